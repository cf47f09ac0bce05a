use anyhow::{Result, bail};
use tracing::{debug, warn};

use super::{SeparationJob, SeparationStrategy};
use crate::audio::Audio;
use crate::audio::effects::EffectChain;
use crate::audio::file::{load_audio_from_path, save_audio_to_path};
use crate::config::PRE_EMPHASIS;

/// Centre-channel extraction: the mid signal (L+R)/2 is taken as the vocal,
/// the side signal L-R as the accompaniment.
pub struct MidSide {
    enhance: bool,
}

impl MidSide {
    pub fn new(enhance: bool) -> Self {
        Self { enhance }
    }
}

impl SeparationStrategy for MidSide {
    fn name(&self) -> &'static str {
        "mid-side"
    }

    fn separate(&self, job: &SeparationJob) -> Result<()> {
        let mut audio = load_audio_from_path(&job.input)?;
        if audio.is_empty() {
            bail!("{} holds no samples", job.input.display());
        }
        if audio.n_channels() == 1 {
            warn!(input = ?job.input, "Mono input, mid-side split will leave an empty side");
            audio = audio.into_stereo();
        }
        let sample_rate = audio.sample_rate();

        let (mut vocal, instrumental) = mid_side_split(audio.left(), audio.right());
        if self.enhance {
            let mut chain = EffectChain::vocal_enhancement(sample_rate);
            debug!(effects = ?chain.names(), "Enhancing extracted vocal");
            chain.process(&mut vocal);
        }

        save_audio_to_path(&Audio::mono(sample_rate, vocal), &job.vocal_output)?;
        save_audio_to_path(&Audio::mono(sample_rate, instrumental), &job.instrumental_output)?;
        Ok(())
    }
}

/// Returns (pre-emphasised mid, side).
pub fn mid_side_split(left: &[f32], right: &[f32]) -> (Vec<f32>, Vec<f32>) {
    let mid: Vec<f32> = left.iter().zip(right).map(|(l, r)| (l + r) * 0.5).collect();
    let side = left.iter().zip(right).map(|(l, r)| l - r).collect();
    (pre_emphasis(&mid, PRE_EMPHASIS), side)
}

/// First-order high-frequency boost `y[n] = x[n] - coef * x[n-1]`. The
/// missing `x[-1]` is extrapolated linearly from the first two samples.
pub fn pre_emphasis(samples: &[f32], coef: f32) -> Vec<f32> {
    let Some(&first) = samples.first() else {
        return Vec::new();
    };
    let before = match samples.get(1) {
        Some(&second) => 2.0 * first - second,
        None => first,
    };
    std::iter::once(first - coef * before)
        .chain(samples.windows(2).map(|w| w[1] - coef * w[0]))
        .collect()
}
