//! The conversion engine: pitch extraction and shifting, formant shifting,
//! then MFCC and formant matching toward a target embedding.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result as AnyResult};
use tracing::{debug, error, info, warn};

use super::embedding::{Embedding, ModelSnapshot, embed_target_file};
use crate::audio::Audio;
use crate::audio::file::{load_mono_resampled, save_audio_to_path, verify_audio_file};
use crate::audio::formant::{apply_formant_shift, estimate_formants};
use crate::audio::pitch::{PitchStrategy, PitchTrack, extract_pitch, pitch_shift};
use crate::audio::spectral::features::{mean_over_frames, mfcc};
use crate::audio::spectral::{istft_with_length, stft};
use crate::config::{
    FORMANT_NEUTRAL_TOLERANCE, FORMANT_SHIFT_RANGE, MFCC_SHIFT_SCALE, N_MFCC, PITCH_SHIFT_RANGE,
    RATIO_EPSILON,
};
use crate::error::{Result, VoiceError};

/// Largest natural-log gain the MFCC shift may apply to one bin row.
const MAX_LOG_GAIN: f32 = 20.0;

/// User-facing conversion knobs, validated on construction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConversionParams {
    pitch_shift: i32,
    formant_shift: f32,
    strategy: PitchStrategy,
}

impl ConversionParams {
    pub fn new(pitch_shift: i32, formant_shift: f32, strategy: PitchStrategy) -> Result<Self> {
        if !PITCH_SHIFT_RANGE.contains(&pitch_shift) {
            return Err(VoiceError::InvalidParameter(format!(
                "pitch shift {pitch_shift} outside {}..={} semitones",
                PITCH_SHIFT_RANGE.start(),
                PITCH_SHIFT_RANGE.end()
            )));
        }
        if !FORMANT_SHIFT_RANGE.contains(&formant_shift) {
            return Err(VoiceError::InvalidParameter(format!(
                "formant shift {formant_shift} outside {}..={}",
                FORMANT_SHIFT_RANGE.start(),
                FORMANT_SHIFT_RANGE.end()
            )));
        }
        Ok(Self {
            pitch_shift,
            formant_shift,
            strategy,
        })
    }

    pub fn pitch_shift(&self) -> i32 {
        self.pitch_shift
    }

    pub fn formant_shift(&self) -> f32 {
        self.formant_shift
    }

    pub fn strategy(&self) -> PitchStrategy {
        self.strategy
    }
}

impl Default for ConversionParams {
    fn default() -> Self {
        Self {
            pitch_shift: 0,
            formant_shift: 1.0,
            strategy: PitchStrategy::default(),
        }
    }
}

/// Everything one conversion needs. Immutable once built.
#[derive(Debug, Clone)]
pub struct ConversionRequest {
    vocal: Vec<f32>,
    sample_rate: u32,
    embedding: Embedding,
    params: ConversionParams,
}

impl ConversionRequest {
    pub fn new(
        vocal: Vec<f32>,
        sample_rate: u32,
        embedding: Embedding,
        params: ConversionParams,
    ) -> Result<Self> {
        if vocal.is_empty() {
            return Err(VoiceError::InsufficientSignal {
                provided: 0,
                minimum: 1,
            });
        }
        if embedding.mfcc_mean.is_empty() {
            return Err(VoiceError::InvalidParameter(
                "target embedding has no MFCC summary".to_string(),
            ));
        }
        Ok(Self {
            vocal,
            sample_rate,
            embedding,
            params,
        })
    }

    pub fn params(&self) -> &ConversionParams {
        &self.params
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

/// Converted waveform plus the (shifted) pitch track of the input vocal.
#[derive(Debug, Clone)]
pub struct Conversion {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub pitch_track: PitchTrack,
}

impl Conversion {
    pub fn to_audio(&self) -> Audio {
        Audio::mono(self.sample_rate, self.samples.clone())
    }

    pub fn duration_secs(&self) -> f32 {
        self.samples.len() as f32 / self.sample_rate.max(1) as f32
    }
}

/// Runs the full conversion. Deterministic for identical requests.
pub fn convert(request: &ConversionRequest) -> Result<Conversion> {
    convert_cancellable(request, &AtomicBool::new(false))
}

fn checkpoint(cancel: &AtomicBool, next_stage: &'static str) -> Result<()> {
    if cancel.load(Ordering::Relaxed) {
        warn!(next_stage, "Conversion cancelled");
        return Err(VoiceError::Cancelled(next_stage));
    }
    Ok(())
}

/// Like [`convert`], but gives up with [`VoiceError::Cancelled`] at the
/// next stage boundary once `cancel` is set.
pub fn convert_cancellable(
    request: &ConversionRequest,
    cancel: &AtomicBool,
) -> Result<Conversion> {
    let sr = request.sample_rate;
    let params = request.params;
    info!(
        length = request.vocal.len(),
        pitch_shift = params.pitch_shift,
        formant_shift = params.formant_shift,
        strategy = %params.strategy,
        "Starting voice conversion"
    );

    checkpoint(cancel, "pitch extraction")?;
    let mut pitch_track = extract_pitch(&request.vocal, sr, params.strategy);

    checkpoint(cancel, "pitch shift")?;
    let mut audio = if params.pitch_shift != 0 {
        pitch_track = pitch_track.shifted(params.pitch_shift);
        pitch_shift(&request.vocal, sr, params.pitch_shift)
    } else {
        request.vocal.clone()
    };

    checkpoint(cancel, "formant shift")?;
    if (params.formant_shift - 1.0).abs() > FORMANT_NEUTRAL_TOLERANCE {
        audio = apply_formant_shift(&audio, sr, params.formant_shift)?;
    }

    checkpoint(cancel, "MFCC matching")?;
    let vocal_mfcc = mean_over_frames(&mfcc(&audio, sr, N_MFCC));
    let diff: Vec<f32> = request
        .embedding
        .mfcc_mean
        .iter()
        .zip(&vocal_mfcc)
        .map(|(target, source)| target - source)
        .collect();
    audio = apply_mfcc_shift(&audio, &diff);

    checkpoint(cancel, "formant matching")?;
    audio = apply_formant_matching(&audio, sr, &request.embedding.formants)?;

    for sample in audio.iter_mut() {
        *sample = if sample.is_finite() {
            sample.clamp(-1.0, 1.0)
        } else {
            0.0
        };
    }
    info!(length = audio.len(), "Voice conversion finished");
    Ok(Conversion {
        samples: audio,
        sample_rate: sr,
        pitch_track,
    })
}

/// Scales STFT bin row `i` by `exp(diff[i] * MFCC_SHIFT_SCALE)`.
pub fn apply_mfcc_shift(samples: &[f32], diff: &[f32]) -> Vec<f32> {
    let mut spec = stft(samples);
    let rows = diff.len().min(spec.n_bins());
    for (i, d) in diff.iter().take(rows).enumerate() {
        let gain = (d * MFCC_SHIFT_SCALE).clamp(-MAX_LOG_GAIN, MAX_LOG_GAIN).exp();
        spec.data_mut().row_mut(i).mapv_inplace(|c| c * gain);
    }
    debug!(rows, "Applied MFCC shift");
    istft_with_length(&spec, samples.len())
}

/// One global formant shift by the mean target/current formant ratio.
pub fn apply_formant_matching(
    samples: &[f32],
    sample_rate: u32,
    target_formants: &[f32],
) -> Result<Vec<f32>> {
    let current = estimate_formants(samples, sample_rate);
    let n = current.len().min(target_formants.len());
    if n == 0 {
        return Ok(samples.to_vec());
    }
    let ratio = target_formants[..n]
        .iter()
        .zip(&current[..n])
        .map(|(t, c)| t / (c + RATIO_EPSILON))
        .sum::<f32>()
        / n as f32;
    debug!(ratio, n, "Matching formants");
    apply_formant_shift(samples, sample_rate, ratio)
}

/// Where the target voice comes from.
#[derive(Debug, Clone)]
pub enum TargetVoice {
    /// Raw recording; preprocessed and embedded on use.
    Recording(PathBuf),
    /// Snapshot written by `auto_train`.
    Snapshot(PathBuf),
    Embedded(Embedding),
}

impl TargetVoice {
    /// `.json` files are snapshots, anything else is a recording.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => TargetVoice::Snapshot(path),
            _ => TargetVoice::Recording(path),
        }
    }

    pub fn resolve(&self, sample_rate: u32) -> AnyResult<Embedding> {
        match self {
            TargetVoice::Recording(path) => embed_target_file(path, sample_rate),
            TargetVoice::Snapshot(path) => {
                let snapshot = ModelSnapshot::load(path)?;
                let trained_at = snapshot.training_info.sample_rate;
                if trained_at != sample_rate {
                    warn!(?path, trained_at, sample_rate, "Snapshot sample rate mismatch");
                    return Err(VoiceError::InvalidParameter(format!(
                        "snapshot {} was trained at {trained_at} Hz, working rate is {sample_rate} Hz",
                        path.display()
                    ))
                    .into());
                }
                Ok(snapshot.embedding)
            }
            TargetVoice::Embedded(embedding) => Ok(embedding.clone()),
        }
    }
}

/// Converts a vocal file and writes the result atomically to `output_path`.
pub fn convert_file(
    vocal_path: &Path,
    embedding: &Embedding,
    params: ConversionParams,
    output_path: &Path,
    sample_rate: u32,
) -> AnyResult<Conversion> {
    let result = (|| -> AnyResult<Conversion> {
        let vocal = load_mono_resampled(vocal_path, sample_rate)?;
        let request = ConversionRequest::new(
            vocal.channel(0).to_vec(),
            sample_rate,
            embedding.clone(),
            params,
        )?;
        let conversion = convert(&request)?;
        save_audio_to_path(&conversion.to_audio(), output_path)?;
        if !verify_audio_file(output_path) {
            anyhow::bail!("converted output {} failed verification", output_path.display());
        }
        Ok(conversion)
    })();
    if let Err(e) = &result {
        error!(vocal = ?vocal_path, "Conversion failed: {e:#}");
    }
    result.with_context(|| format!("failed to convert {}", vocal_path.display()))
}

/// Runs `convert` on a blocking worker, giving up after `budget`.
///
/// On timeout the worker is told to stop at its next stage boundary and its
/// result is discarded.
pub async fn convert_with_budget(
    request: ConversionRequest,
    budget: Duration,
) -> AnyResult<Conversion> {
    let cancel = Arc::new(AtomicBool::new(false));
    let worker_cancel = Arc::clone(&cancel);
    let handle =
        tokio::task::spawn_blocking(move || convert_cancellable(&request, &worker_cancel));
    match tokio::time::timeout(budget, handle).await {
        Ok(joined) => Ok(joined.context("conversion worker panicked")??),
        Err(_) => {
            cancel.store(true, Ordering::Relaxed);
            error!(?budget, "Conversion exceeded its time budget");
            Err(VoiceError::Timeout(budget).into())
        }
    }
}
