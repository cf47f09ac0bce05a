//! Effect presets applied to a converted vocal before it is mixed back.

use std::path::Path;

use anyhow::{Context, Result as AnyResult, bail};
use tracing::info;

use crate::audio::Audio;
use crate::audio::effects::EffectChain;
use crate::audio::file::{load_mono_resampled, save_audio_to_path, verify_audio_file};
use crate::config::EffectPreset;

/// Runs the preset's chain over a mono buffer. `None` returns the input.
pub fn apply_preset(samples: &[f32], sample_rate: u32, preset: EffectPreset) -> Vec<f32> {
    let mut out = samples.to_vec();
    let mut chain = EffectChain::from_preset(preset, sample_rate);
    if !chain.is_empty() {
        chain.process(&mut out);
    }
    out
}

/// Loads `input` as mono at `sample_rate`, applies `preset` and writes a
/// verified file to `output`.
pub fn apply_vocal_effects(
    input: &Path,
    output: &Path,
    preset: EffectPreset,
    sample_rate: u32,
) -> AnyResult<()> {
    let audio = load_mono_resampled(input, sample_rate)?;
    let processed = apply_preset(audio.channel(0), sample_rate, preset);
    save_audio_to_path(&Audio::mono(sample_rate, processed), output)
        .with_context(|| format!("failed to write effected vocal {}", output.display()))?;
    if !verify_audio_file(output) {
        bail!("effected vocal {} failed verification", output.display());
    }
    info!(?input, ?output, %preset, "Applied vocal effects");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn sine(len: usize) -> Vec<f32> {
        (0..len)
            .map(|n| 0.4 * (2.0 * std::f32::consts::PI * 330.0 * n as f32 / 44_100.0).sin())
            .collect()
    }

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("voice_cover_effects_{name}"));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn none_preset_passes_samples_through() {
        let x = sine(4096);
        assert_eq!(apply_preset(&x, 44_100, EffectPreset::None), x);
    }

    #[test]
    fn presets_keep_length_and_change_the_signal() {
        let x = sine(22_050);
        for preset in [EffectPreset::Studio, EffectPreset::Live] {
            let y = apply_preset(&x, 44_100, preset);
            assert_eq!(y.len(), x.len());
            assert_ne!(y, x);
            assert!(y.iter().all(|v| v.is_finite()));
        }
    }

    #[test]
    fn effected_file_is_written_and_verified() {
        let dir = scratch_dir("live");
        let input = dir.join("converted.wav");
        let output = dir.join("effected.wav");
        save_audio_to_path(&Audio::mono(44_100, sine(44_100)), &input).unwrap();

        apply_vocal_effects(&input, &output, EffectPreset::Live, 44_100).unwrap();
        let written = load_mono_resampled(&output, 44_100).unwrap();
        assert_eq!(written.length(), 44_100);
    }

    #[test]
    fn missing_input_is_an_error() {
        let dir = scratch_dir("missing");
        let output = dir.join("out.wav");
        let result =
            apply_vocal_effects(&dir.join("nope.wav"), &output, EffectPreset::Studio, 44_100);
        assert!(result.is_err());
        assert!(!output.exists());
    }
}
