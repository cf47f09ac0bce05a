//! Named constants and run-time configuration for the conversion pipeline.
//!
//! The heuristic scaling factors below are kept as-is: they shape the output
//! audibly and tests pin them as behaviour, not as validated acoustics.

use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::VoiceError;

// Working format
pub const WORKING_SAMPLE_RATE: u32 = 44_100;

// STFT framing shared by every spectral transform
pub const N_FFT: usize = 2048;
pub const HOP_LENGTH: usize = 512;

// Feature extraction
pub const N_MFCC: usize = 13;
pub const N_MELS: usize = 128;
pub const ROLLOFF_PERCENT: f32 = 0.85;

// Formant estimation
pub const DEFAULT_FORMANTS: [f32; 3] = [700.0, 1220.0, 2600.0];
pub const FORMANT_FLOOR_HZ: f32 = 50.0;
pub const LPC_MAX_ORDER: usize = 12;
pub const LPC_MIN_SAMPLES: usize = 100;

// Formant shifting
pub const FORMANT_BAND_LOW: f32 = 0.7;
pub const FORMANT_BAND_HIGH: f32 = 1.3;
pub const BRIGHTEN_SLOPE: f32 = 0.5;
pub const DARKEN_BASE: f32 = 0.8;
pub const DARKEN_SLOPE: f32 = 0.4;
/// Ratios this close to 1.0 leave the spectrum untouched.
pub const FORMANT_NEUTRAL_TOLERANCE: f32 = 0.01;

// Pitch salience
pub const RMVPE_THRESHOLD: f32 = 0.1;
pub const HARVEST_THRESHOLD: f32 = 0.2;
pub const PM_THRESHOLD: f32 = 0.3;
pub const PITCH_FMIN: f32 = 150.0;
pub const PITCH_FMAX: f32 = 4000.0;

// Spectral matching
pub const MFCC_SHIFT_SCALE: f32 = 0.1;
pub const RATIO_EPSILON: f32 = 1e-10;

// Target preprocessing
pub const NOISE_PROFILE_SECONDS: f32 = 0.5;
pub const NOISE_SUBTRACT_FACTOR: f32 = 0.5;
pub const NOISE_FLOOR_FACTOR: f32 = 0.1;
pub const PEAK_TARGET: f32 = 0.95;
pub const TRIM_TOP_DB: f32 = 20.0;

// Separation
pub const PRE_EMPHASIS: f32 = 0.97;
pub const VOCAL_HIGHPASS_HZ: f32 = 80.0;
pub const VOCAL_COMPRESSOR_THRESHOLD_DB: f32 = -25.0;
pub const VOCAL_COMPRESSOR_RATIO: f32 = 3.0;
pub const VOCAL_GAIN_DB: f32 = 3.0;
pub const SEPARATION_MODEL: &str = "UVR-MDX-NET-Main-v3-1";
pub const SEPARATOR_PROGRAM: &str = "audio-separator";

// Post-processing presets
pub const STUDIO_PRESET: PresetSettings = PresetSettings {
    highpass_hz: 80.0,
    compressor_threshold_db: -25.0,
    compressor_ratio: 3.0,
    attack_ms: 10.0,
    release_ms: 100.0,
    reverb: ReverbSettings {
        room_size: 0.3,
        damping: 0.7,
        wet_level: 0.2,
        dry_level: 0.8,
    },
};
pub const LIVE_PRESET: PresetSettings = PresetSettings {
    highpass_hz: 60.0,
    compressor_threshold_db: -20.0,
    compressor_ratio: 4.0,
    attack_ms: 5.0,
    release_ms: 50.0,
    reverb: ReverbSettings {
        room_size: 0.7,
        damping: 0.5,
        wet_level: 0.4,
        dry_level: 0.6,
    },
};

// File verification
pub const MIN_FILE_BYTES: u64 = 1024;
pub const MIN_DURATION_SECONDS: f32 = 0.1;

// Parameter ranges
pub const PITCH_SHIFT_RANGE: std::ops::RangeInclusive<i32> = -12..=12;
pub const FORMANT_SHIFT_RANGE: std::ops::RangeInclusive<f32> = 0.5..=1.5;

/// Room parameters of the comb/all-pass reverb, all in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReverbSettings {
    pub room_size: f32,
    pub damping: f32,
    pub wet_level: f32,
    pub dry_level: f32,
}

/// High-pass, compressor and reverb settings of one post-processing preset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PresetSettings {
    pub highpass_hz: f32,
    pub compressor_threshold_db: f32,
    pub compressor_ratio: f32,
    pub attack_ms: f32,
    pub release_ms: f32,
    pub reverb: ReverbSettings,
}

/// Effects applied to a converted vocal before the final mix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EffectPreset {
    /// Dry signal.
    #[default]
    None,
    /// Light reverb and compression.
    Studio,
    /// Heavy reverb.
    Live,
}

impl EffectPreset {
    pub const ALL: [EffectPreset; 3] = [EffectPreset::None, EffectPreset::Studio, EffectPreset::Live];

    pub fn settings(self) -> Option<PresetSettings> {
        match self {
            EffectPreset::None => None,
            EffectPreset::Studio => Some(STUDIO_PRESET),
            EffectPreset::Live => Some(LIVE_PRESET),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            EffectPreset::None => "none",
            EffectPreset::Studio => "studio",
            EffectPreset::Live => "live",
        }
    }
}

impl FromStr for EffectPreset {
    type Err = VoiceError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        EffectPreset::ALL
            .into_iter()
            .find(|preset| preset.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                VoiceError::InvalidParameter(format!(
                    "unknown effect preset '{s}' (expected none, studio or live)"
                ))
            })
    }
}

impl fmt::Display for EffectPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Run-time knobs, loadable from a JSON file. Missing fields take defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub sample_rate: u32,
    /// Wall-clock budget for one conversion, in seconds.
    pub conversion_budget_secs: u64,
    pub separator: SeparatorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SeparatorConfig {
    /// Executable for the external stem-separation model. `None` disables it.
    pub program: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
    /// Run the high-pass/compressor/gain chain over the mid-side vocal estimate.
    pub enhance_vocals: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sample_rate: WORKING_SAMPLE_RATE,
            conversion_budget_secs: 600,
            separator: SeparatorConfig::default(),
        }
    }
}

impl Default for SeparatorConfig {
    fn default() -> Self {
        Self {
            program: Some(SEPARATOR_PROGRAM.to_string()),
            model: SEPARATION_MODEL.to_string(),
            timeout_secs: 900,
            enhance_vocals: true,
        }
    }
}

impl PipelineConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: PipelineConfig = serde_json::from_str(&data)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    pub fn conversion_budget(&self) -> Duration {
        Duration::from_secs(self.conversion_budget_secs)
    }
}

impl SeparatorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_fills_defaults() {
        let config: PipelineConfig =
            serde_json::from_str(r#"{ "separator": { "program": null } }"#).unwrap();
        assert_eq!(config.sample_rate, WORKING_SAMPLE_RATE);
        assert!(config.separator.program.is_none());
        assert_eq!(config.separator.model, SEPARATION_MODEL);
        assert!(config.separator.enhance_vocals);
    }

    #[test]
    fn effect_presets_parse_and_map_to_settings() {
        assert_eq!("Studio".parse::<EffectPreset>().unwrap(), EffectPreset::Studio);
        assert_eq!("live".parse::<EffectPreset>().unwrap(), EffectPreset::Live);
        assert!("hall".parse::<EffectPreset>().is_err());
        assert_eq!(EffectPreset::default(), EffectPreset::None);
        assert!(EffectPreset::None.settings().is_none());
        assert_eq!(EffectPreset::Studio.settings(), Some(STUDIO_PRESET));
        let live = LIVE_PRESET;
        assert!(live.reverb.wet_level > STUDIO_PRESET.reverb.wet_level);
        assert!(live.reverb.room_size > STUDIO_PRESET.reverb.room_size);
    }

    #[test]
    fn constants_are_sane() {
        assert!(HOP_LENGTH < N_FFT);
        assert!(FORMANT_FLOOR_HZ > 0.0);
        assert!(DEFAULT_FORMANTS.windows(2).all(|w| w[0] < w[1]));
        assert!(RMVPE_THRESHOLD < HARVEST_THRESHOLD && HARVEST_THRESHOLD < PM_THRESHOLD);
        assert!(N_MFCC <= N_MELS);
    }
}
