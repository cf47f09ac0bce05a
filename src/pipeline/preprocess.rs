//! Target-voice cleanup: spectral subtraction, peak normalisation and
//! silence trimming, always in that order.

use tracing::{debug, info, warn};

use crate::audio::spectral::{istft_with_length, stft};
use crate::config::{
    HOP_LENGTH, N_FFT, NOISE_FLOOR_FACTOR, NOISE_PROFILE_SECONDS, NOISE_SUBTRACT_FACTOR,
    PEAK_TARGET, TRIM_TOP_DB,
};

/// Runs the full cleanup chain on a target-voice waveform.
pub fn preprocess_target(samples: &[f32], sample_rate: u32) -> Vec<f32> {
    let denoised = remove_noise(samples, sample_rate);
    let normalized = normalize_peak(&denoised);
    let trimmed = trim_silence(&normalized);
    info!(
        input_length = samples.len(),
        output_length = trimmed.len(),
        "Preprocessed target voice"
    );
    trimmed
}

/// Samples used as noise profile: `min(NOISE_PROFILE_SECONDS, len / 4)`.
pub fn noise_profile_len(len: usize, sample_rate: u32) -> usize {
    ((NOISE_PROFILE_SECONDS * sample_rate as f32) as usize).min(len / 4)
}

/// Spectral subtraction with the opening of the signal as noise profile.
///
/// The profile covers `NOISE_PROFILE_SECONDS` or the first quarter of the
/// signal, whichever is shorter. Each cell's power becomes
/// `max(P - 0.5 N, 0.1 N)`; phase is kept.
pub fn remove_noise(samples: &[f32], sample_rate: u32) -> Vec<f32> {
    let profile_len = noise_profile_len(samples.len(), sample_rate);
    if profile_len == 0 {
        warn!(length = samples.len(), "Signal too short for a noise profile, skipping denoise");
        return samples.to_vec();
    }

    let noise = stft(&samples[..profile_len]).power();
    let noise_power: Vec<f32> = noise
        .rows()
        .into_iter()
        .map(|row| row.mean().unwrap_or(0.0))
        .collect();

    let spec = stft(samples);
    let mut magnitude = spec.power();
    for (mut row, &n) in magnitude.rows_mut().into_iter().zip(&noise_power) {
        row.mapv_inplace(|p| {
            (p - NOISE_SUBTRACT_FACTOR * n)
                .max(NOISE_FLOOR_FACTOR * n)
                .sqrt()
        });
    }
    debug!(profile_len, frames = spec.n_frames(), "Applied spectral subtraction");
    istft_with_length(&spec.with_magnitude(&magnitude), samples.len())
}

/// Scales so the loudest sample sits at `PEAK_TARGET`. Silence is unchanged.
pub fn normalize_peak(samples: &[f32]) -> Vec<f32> {
    let peak = samples.iter().fold(0.0_f32, |acc, v| acc.max(v.abs()));
    if peak <= 0.0 || !peak.is_finite() {
        return samples.to_vec();
    }
    let scale = PEAK_TARGET / peak;
    samples.iter().map(|v| v * scale).collect()
}

/// Simple RMS energy of a frame.
fn frame_rms(frame: &[f32]) -> f32 {
    if frame.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = frame.iter().map(|x| x * x).sum();
    (sum_sq / frame.len() as f32).sqrt()
}

/// Sample ranges `[start, end)` whose frame energy is within `top_db` of
/// the loudest frame. Frames are centred and zero-padded.
pub fn voiced_intervals(samples: &[f32], top_db: f32) -> Vec<(usize, usize)> {
    if samples.is_empty() {
        return Vec::new();
    }
    let pad = N_FFT / 2;
    let mut padded = vec![0.0_f32; samples.len() + 2 * pad];
    padded[pad..pad + samples.len()].copy_from_slice(samples);
    let frames = 1 + (padded.len() - N_FFT) / HOP_LENGTH;
    let energy: Vec<f32> = (0..frames)
        .map(|t| frame_rms(&padded[t * HOP_LENGTH..t * HOP_LENGTH + N_FFT]).powi(2))
        .collect();

    let max = energy.iter().copied().fold(0.0_f32, f32::max);
    if max <= 0.0 {
        return Vec::new();
    }
    let threshold = max * 10.0_f32.powf(-top_db / 10.0);

    let mut intervals = Vec::new();
    let mut start = None;
    for (t, &e) in energy.iter().enumerate() {
        match (e > threshold, start) {
            (true, None) => start = Some(t),
            (false, Some(s)) => {
                intervals.push((s * HOP_LENGTH, (t * HOP_LENGTH).min(samples.len())));
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        intervals.push((s * HOP_LENGTH, samples.len()));
    }
    intervals.retain(|(s, e)| s < e);
    intervals
}

/// Keeps only voiced segments, concatenated. With nothing voiced the
/// signal passes through untouched.
pub fn trim_silence(samples: &[f32]) -> Vec<f32> {
    let intervals = voiced_intervals(samples, TRIM_TOP_DB);
    if intervals.is_empty() {
        warn!("No voiced interval found, keeping the full signal");
        return samples.to_vec();
    }
    debug!(segments = intervals.len(), "Trimming silence");
    intervals
        .iter()
        .flat_map(|&(start, end)| samples[start..end].iter().copied())
        .collect()
}
