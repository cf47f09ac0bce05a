use anyhow::{Result, bail};
use tracing::info;

use super::Audio;

/// Sums a vocal and an instrumental stem with independent linear volumes.
///
/// The instrumental is resampled to the vocal's rate. The result has as many
/// channels as the wider stem and as many samples as the longer one; it is
/// clipped to [-1, 1].
pub fn mix_stems(
    vocal: &Audio,
    instrumental: &Audio,
    vocal_volume: f32,
    instrumental_volume: f32,
) -> Result<Audio> {
    for (name, volume) in [("vocal", vocal_volume), ("instrumental", instrumental_volume)] {
        if !volume.is_finite() || volume < 0.0 {
            bail!("{name} volume must be a non-negative number, got {volume}");
        }
    }
    let instrumental = instrumental.resampled(vocal.sample_rate());
    let n_channels = vocal.n_channels().max(instrumental.n_channels()).max(1);
    let length = vocal.length().max(instrumental.length());

    let mut mix = Audio::new(vocal.sample_rate(), vec![vec![0.0; length]; n_channels]);
    mix.add_audio_at(0, vocal, vocal_volume)?;
    mix.add_audio_at(0, &instrumental, instrumental_volume)?;
    mix.clip();
    info!(
        n_channels,
        length, vocal_volume, instrumental_volume, "Mixed vocal and instrumental stems"
    );
    Ok(mix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn volumes_scale_each_stem() -> Result<()> {
        let vocal = Audio::mono(8000, vec![0.2, 0.2, 0.2]);
        let instrumental = Audio::stereo(8000, vec![0.1; 2], vec![-0.1; 2]);
        let mix = mix_stems(&vocal, &instrumental, 2.0, 0.5)?;
        assert_eq!(mix.n_channels(), 2);
        assert_eq!(mix.length(), 3);
        assert!((mix.channel(0)[0] - 0.45).abs() < 1e-6);
        assert!((mix.channel(1)[0] - 0.35).abs() < 1e-6);
        assert!((mix.channel(0)[2] - 0.4).abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn mix_is_clipped_and_rate_matched() -> Result<()> {
        let vocal = Audio::mono(16_000, vec![0.9; 16]);
        let instrumental = Audio::mono(8000, vec![0.9; 8]);
        let mix = mix_stems(&vocal, &instrumental, 1.0, 1.0)?;
        assert_eq!(mix.sample_rate(), 16_000);
        assert_eq!(mix.length(), 16);
        assert!(mix.peak() <= 1.0);
        Ok(())
    }

    #[test]
    fn negative_volume_is_rejected() {
        let a = Audio::mono(8000, vec![0.0; 4]);
        assert!(mix_stems(&a, &a, -1.0, 1.0).is_err());
    }
}
