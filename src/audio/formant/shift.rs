use ndarray::Array2;
use tracing::debug;

use super::estimate_formants;
use crate::audio::spectral::{istft_with_length, stft};
use crate::config::{
    BRIGHTEN_SLOPE, DARKEN_BASE, DARKEN_SLOPE, FORMANT_BAND_HIGH, FORMANT_BAND_LOW,
    FORMANT_NEUTRAL_TOLERANCE,
};
use crate::error::{Result, VoiceError};

/// Gain applied inside every formant band for a shift ratio.
pub fn band_gain(ratio: f32) -> f32 {
    if ratio > 1.0 {
        1.0 + (ratio - 1.0) * BRIGHTEN_SLOPE
    } else {
        DARKEN_BASE + (ratio - 1.0) * DARKEN_SLOPE
    }
}

/// Frequency bands `[low, high]` in Hz scaled for each formant.
///
/// The first and last formants get `[0.7, 1.3] x` their shifted centre; an
/// interior formant spans from its lower neighbour's shifted centre to its
/// upper neighbour's.
pub fn formant_bands(formants: &[f32], ratio: f32) -> Vec<(f32, f32)> {
    let shifted: Vec<f32> = formants.iter().map(|f| f * ratio).collect();
    let last = shifted.len().saturating_sub(1);
    shifted
        .iter()
        .enumerate()
        .map(|(i, &center)| {
            if i == 0 || i == last {
                (center * FORMANT_BAND_LOW, center * FORMANT_BAND_HIGH)
            } else {
                (shifted[i - 1], shifted[i + 1])
            }
        })
        .collect()
}

/// Scales STFT magnitude around the signal's formants, leaving phase alone.
///
/// Ratios within `FORMANT_NEUTRAL_TOLERANCE` of 1.0 return the input as-is.
/// The output has the same length as the input.
pub fn apply_formant_shift(samples: &[f32], sample_rate: u32, ratio: f32) -> Result<Vec<f32>> {
    if !ratio.is_finite() || ratio <= 0.0 {
        return Err(VoiceError::InvalidParameter(format!(
            "formant ratio must be positive and finite, got {ratio}"
        )));
    }
    if (ratio - 1.0).abs() <= FORMANT_NEUTRAL_TOLERANCE || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let spec = stft(samples);
    let formants = estimate_formants(samples, sample_rate);
    let freqs = spec.frequencies(sample_rate);
    let gain = band_gain(ratio);

    let mut magnitude = spec.magnitude();
    scale_bands(&mut magnitude, &freqs, &formant_bands(&formants, ratio), gain);
    debug!(ratio, gain, n_formants = formants.len(), "Applied formant shift");

    Ok(istft_with_length(&spec.with_magnitude(&magnitude), samples.len()))
}

/// Multiplies every bin row inside each band by `gain`. Overlapping bands compound.
fn scale_bands(magnitude: &mut Array2<f32>, freqs: &[f32], bands: &[(f32, f32)], gain: f32) {
    for &(low, high) in bands {
        for (k, _) in freqs.iter().enumerate().filter(|(_, f)| **f >= low && **f <= high) {
            magnitude.row_mut(k).mapv_inplace(|m| m * gain);
        }
    }
}
