//! Frame-wise pitch extraction and semitone pitch shifting.

pub mod piptrack;
pub mod shift;

pub use shift::{pitch_shift, time_stretch};

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::audio::spectral::stft;
use crate::config::{HARVEST_THRESHOLD, PM_THRESHOLD, RMVPE_THRESHOLD};
use crate::error::VoiceError;

/// Named pitch extraction presets. All three run the same salience-peak
/// picker and differ only in the salience threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PitchStrategy {
    Pm,
    Harvest,
    #[default]
    Rmvpe,
}

const STRATEGY_THRESHOLDS: [(PitchStrategy, f32); 3] = [
    (PitchStrategy::Rmvpe, RMVPE_THRESHOLD),
    (PitchStrategy::Harvest, HARVEST_THRESHOLD),
    (PitchStrategy::Pm, PM_THRESHOLD),
];

impl PitchStrategy {
    pub const ALL: [PitchStrategy; 3] = [PitchStrategy::Pm, PitchStrategy::Harvest, PitchStrategy::Rmvpe];

    pub fn threshold(self) -> f32 {
        STRATEGY_THRESHOLDS
            .iter()
            .find(|(strategy, _)| *strategy == self)
            .map(|(_, t)| *t)
            .unwrap_or(RMVPE_THRESHOLD)
    }

    pub fn name(self) -> &'static str {
        match self {
            PitchStrategy::Pm => "pm",
            PitchStrategy::Harvest => "harvest",
            PitchStrategy::Rmvpe => "rmvpe",
        }
    }
}

impl FromStr for PitchStrategy {
    type Err = VoiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pm" => Ok(PitchStrategy::Pm),
            "harvest" => Ok(PitchStrategy::Harvest),
            "rmvpe" => Ok(PitchStrategy::Rmvpe),
            other => Err(VoiceError::InvalidParameter(format!(
                "unknown pitch algorithm '{other}' (expected pm, harvest or rmvpe)"
            ))),
        }
    }
}

impl fmt::Display for PitchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One frequency (Hz) and one salience value per STFT frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PitchTrack {
    pub frequencies: Vec<f32>,
    pub magnitudes: Vec<f32>,
}

impl PitchTrack {
    pub fn len(&self) -> usize {
        self.frequencies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frequencies.is_empty()
    }

    /// Frequencies scaled by `2^(semitones / 12)`; salience unchanged.
    pub fn shifted(&self, semitones: i32) -> PitchTrack {
        let factor = 2.0_f32.powf(semitones as f32 / 12.0);
        PitchTrack {
            frequencies: self.frequencies.iter().map(|f| f * factor).collect(),
            magnitudes: self.magnitudes.clone(),
        }
    }

    /// Mean frequency over frames that carry a pitch.
    pub fn mean_voiced_frequency(&self) -> Option<f32> {
        let voiced: Vec<f32> = self.frequencies.iter().copied().filter(|f| *f > 0.0).collect();
        if voiced.is_empty() {
            return None;
        }
        Some(voiced.iter().sum::<f32>() / voiced.len() as f32)
    }
}

/// Picks the most salient candidate frequency in every STFT frame.
pub fn extract_pitch(samples: &[f32], sample_rate: u32, strategy: PitchStrategy) -> PitchTrack {
    let spec = stft(samples);
    let map = piptrack::salience_map(&spec, sample_rate, strategy.threshold());
    let (frequencies, magnitudes) = map.strongest_per_frame().into_iter().unzip();
    let track = PitchTrack {
        frequencies,
        magnitudes,
    };
    debug!(
        %strategy,
        frames = track.len(),
        mean_hz = track.mean_voiced_frequency().unwrap_or(0.0),
        "Extracted pitch track"
    );
    track
}
