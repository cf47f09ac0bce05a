//! Fixed-size feature summary of a target voice, and its on-disk snapshot.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result as AnyResult};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::preprocess::preprocess_target;
use crate::audio::Audio;
use crate::audio::file::{load_mono_resampled, save_audio_to_path, write_atomically};
use crate::audio::formant::estimate_formants;
use crate::audio::spectral::features::{
    mean, mean_over_frames, mfcc_from_spectrogram, spectral_centroid, spectral_rolloff,
    zero_crossing_rate,
};
use crate::audio::spectral::stft;
use crate::config::{N_FFT, N_MFCC, ROLLOFF_PERCENT};
use crate::error::{Result, VoiceError};

/// Spectral descriptors of a (preprocessed) target voice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub mfcc_mean: Vec<f32>,
    pub spectral_centroid: f32,
    pub spectral_rolloff: f32,
    pub zcr_mean: f32,
    pub formants: Vec<f32>,
    pub sample_count: usize,
}

impl Embedding {
    pub const FEATURE_NAMES: [&'static str; 6] = [
        "mfcc_mean",
        "spectral_centroid",
        "spectral_rolloff",
        "zcr_mean",
        "formants",
        "sample_count",
    ];
}

/// Summarises a waveform. Needs at least one full analysis window.
pub fn embed(samples: &[f32], sample_rate: u32) -> Result<Embedding> {
    if samples.len() < N_FFT {
        return Err(VoiceError::InsufficientSignal {
            provided: samples.len(),
            minimum: N_FFT,
        });
    }

    let spec = stft(samples);
    let ((mfcc_mean, (centroid, rolloff)), (zcr, formants)) = rayon::join(
        || {
            (
                mean_over_frames(&mfcc_from_spectrogram(&spec, sample_rate, N_MFCC)),
                (
                    mean(&spectral_centroid(&spec, sample_rate)),
                    mean(&spectral_rolloff(&spec, sample_rate, ROLLOFF_PERCENT)),
                ),
            )
        },
        || {
            (
                mean(&zero_crossing_rate(samples)),
                estimate_formants(samples, sample_rate),
            )
        },
    );

    let embedding = Embedding {
        mfcc_mean,
        spectral_centroid: centroid,
        spectral_rolloff: rolloff,
        zcr_mean: zcr,
        formants,
        sample_count: samples.len(),
    };
    info!(
        sample_count = embedding.sample_count,
        centroid = embedding.spectral_centroid,
        n_formants = embedding.formants.len(),
        "Generated embedding"
    );
    Ok(embedding)
}

/// Loads a target-voice file at `sample_rate`, preprocesses and embeds it.
pub fn embed_target_file<P: AsRef<Path>>(path: P, sample_rate: u32) -> AnyResult<Embedding> {
    let path = path.as_ref();
    let audio = load_mono_resampled(path, sample_rate)?;
    let cleaned = preprocess_target(audio.channel(0), sample_rate);
    embed(&cleaned, sample_rate)
        .with_context(|| format!("failed to embed target voice {}", path.display()))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingInfo {
    pub algorithm: String,
    pub sample_rate: u32,
    pub features: Vec<String>,
}

/// Persisted embedding plus where it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSnapshot {
    pub embedding: Embedding,
    pub source_path: PathBuf,
    pub training_info: TrainingInfo,
}

impl ModelSnapshot {
    pub fn load<P: AsRef<Path>>(path: P) -> AnyResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(VoiceError::MissingInput(path.to_path_buf()).into());
        }
        let data = fs::read_to_string(path)
            .with_context(|| format!("failed to read snapshot {}", path.display()))?;
        serde_json::from_str(&data)
            .with_context(|| format!("failed to parse snapshot {}", path.display()))
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> AnyResult<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)?;
        write_atomically(path, |tmp| {
            fs::write(tmp, json.as_bytes())?;
            Ok(())
        })
        .with_context(|| format!("failed to write snapshot {}", path.display()))
    }
}

/// Preprocesses and embeds a target voice, then stores the snapshot at
/// `output_path` (JSON) next to the preprocessed waveform.
pub fn auto_train<P: AsRef<Path>, Q: AsRef<Path>>(
    target_path: P,
    output_path: Q,
    sample_rate: u32,
) -> AnyResult<ModelSnapshot> {
    let target_path = target_path.as_ref();
    let output_path = output_path.as_ref();
    info!(target = ?target_path, "Training voice snapshot");

    let audio = load_mono_resampled(target_path, sample_rate)?;
    let cleaned = preprocess_target(audio.channel(0), sample_rate);
    let embedding = embed(&cleaned, sample_rate)
        .with_context(|| format!("failed to embed target voice {}", target_path.display()))?;

    let preprocessed_path = output_path.with_extension("preprocessed.wav");
    save_audio_to_path(&Audio::mono(sample_rate, cleaned), &preprocessed_path)?;

    let snapshot = ModelSnapshot {
        embedding,
        source_path: preprocessed_path,
        training_info: TrainingInfo {
            algorithm: "spectral_matching".to_string(),
            sample_rate,
            features: Embedding::FEATURE_NAMES.iter().map(|s| s.to_string()).collect(),
        },
    };
    snapshot.save(output_path)?;
    info!(snapshot = ?output_path, "Saved voice snapshot");
    Ok(snapshot)
}
