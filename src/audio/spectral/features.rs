//! Frame-wise spectral descriptors: MFCC, centroid, rolloff, zero-crossing rate.

use ndarray::{Array2, Axis};

use super::{Spectrogram, fft_frequencies};
use crate::config::{HOP_LENGTH, N_FFT, N_MELS};

const TOP_DB: f32 = 80.0;
const POWER_FLOOR: f32 = 1e-10;

fn hz_to_mel(hz: f32) -> f32 {
    // Slaney scale: linear below 1 kHz, logarithmic above.
    const F_SP: f32 = 200.0 / 3.0;
    const MIN_LOG_HZ: f32 = 1000.0;
    let min_log_mel = MIN_LOG_HZ / F_SP;
    let logstep = 6.4_f32.ln() / 27.0;
    if hz >= MIN_LOG_HZ {
        min_log_mel + (hz / MIN_LOG_HZ).ln() / logstep
    } else {
        hz / F_SP
    }
}

fn mel_to_hz(mel: f32) -> f32 {
    const F_SP: f32 = 200.0 / 3.0;
    const MIN_LOG_HZ: f32 = 1000.0;
    let min_log_mel = MIN_LOG_HZ / F_SP;
    let logstep = 6.4_f32.ln() / 27.0;
    if mel >= min_log_mel {
        MIN_LOG_HZ * (logstep * (mel - min_log_mel)).exp()
    } else {
        mel * F_SP
    }
}

/// Triangular, area-normalised mel filters shaped `[n_mels, n_fft / 2 + 1]`.
pub fn mel_filterbank(sample_rate: u32, n_fft: usize, n_mels: usize) -> Array2<f32> {
    let fft_freqs = fft_frequencies(sample_rate, n_fft);
    let mel_max = hz_to_mel(sample_rate as f32 / 2.0);
    let mel_points: Vec<f32> = (0..n_mels + 2)
        .map(|i| mel_to_hz(mel_max * i as f32 / (n_mels + 1) as f32))
        .collect();

    let mut weights = Array2::<f32>::zeros((n_mels, fft_freqs.len()));
    for m in 0..n_mels {
        let (lower, center, upper) = (mel_points[m], mel_points[m + 1], mel_points[m + 2]);
        let norm = 2.0 / (upper - lower);
        for (k, &f) in fft_freqs.iter().enumerate() {
            let rising = (f - lower) / (center - lower);
            let falling = (upper - f) / (upper - center);
            weights[(m, k)] = rising.min(falling).max(0.0) * norm;
        }
    }
    weights
}

/// `10 * log10(power)` clamped to `TOP_DB` below the loudest cell.
fn power_to_db(power: &Array2<f32>) -> Array2<f32> {
    let mut db = power.mapv(|p| 10.0 * p.max(POWER_FLOOR).log10());
    let max = db.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let floor = max - TOP_DB;
    db.mapv_inplace(|v| v.max(floor));
    db
}

/// Orthonormal DCT-II of `input`, first `n_out` coefficients.
fn dct_ortho(input: &[f32], n_out: usize) -> Vec<f32> {
    let n = input.len() as f32;
    (0..n_out)
        .map(|k| {
            let sum: f32 = input
                .iter()
                .enumerate()
                .map(|(i, &x)| {
                    x * (std::f32::consts::PI * k as f32 * (2.0 * i as f32 + 1.0) / (2.0 * n)).cos()
                })
                .sum();
            let scale = if k == 0 { (1.0 / n).sqrt() } else { (2.0 / n).sqrt() };
            sum * scale
        })
        .collect()
}

/// MFCC matrix shaped `[n_mfcc, n_frames]`.
pub fn mfcc(samples: &[f32], sample_rate: u32, n_mfcc: usize) -> Array2<f32> {
    mfcc_from_spectrogram(&super::stft(samples), sample_rate, n_mfcc)
}

pub fn mfcc_from_spectrogram(spec: &Spectrogram, sample_rate: u32, n_mfcc: usize) -> Array2<f32> {
    let filters = mel_filterbank(sample_rate, spec.n_fft(), N_MELS);
    let mel = filters.dot(&spec.power());
    let log_mel = power_to_db(&mel);

    let frames = log_mel.ncols();
    let mut out = Array2::<f32>::zeros((n_mfcc, frames));
    for (t, column) in log_mel.axis_iter(Axis(1)).enumerate() {
        let column: Vec<f32> = column.to_vec();
        for (k, c) in dct_ortho(&column, n_mfcc).into_iter().enumerate() {
            out[(k, t)] = c;
        }
    }
    out
}

/// Per-row mean over the frame axis.
pub fn mean_over_frames(matrix: &Array2<f32>) -> Vec<f32> {
    match matrix.mean_axis(Axis(1)) {
        Some(mean) => mean.to_vec(),
        None => vec![0.0; matrix.nrows()],
    }
}

/// Magnitude-weighted mean frequency of each frame.
pub fn spectral_centroid(spec: &Spectrogram, sample_rate: u32) -> Vec<f32> {
    let freqs = spec.frequencies(sample_rate);
    let magnitude = spec.magnitude();
    magnitude
        .axis_iter(Axis(1))
        .map(|frame| {
            let total: f32 = frame.sum();
            if total <= 0.0 {
                return 0.0;
            }
            frame.iter().zip(&freqs).map(|(m, f)| m * f).sum::<f32>() / total
        })
        .collect()
}

/// Frequency below which `percent` of each frame's energy lies.
pub fn spectral_rolloff(spec: &Spectrogram, sample_rate: u32, percent: f32) -> Vec<f32> {
    let freqs = spec.frequencies(sample_rate);
    let magnitude = spec.magnitude();
    magnitude
        .axis_iter(Axis(1))
        .map(|frame| {
            let threshold = percent * frame.sum();
            let mut cumulative = 0.0;
            for (m, &f) in frame.iter().zip(&freqs) {
                cumulative += m;
                if cumulative >= threshold {
                    return f;
                }
            }
            0.0
        })
        .collect()
}

/// Fraction of sign changes per centred frame, edge-padded.
pub fn zero_crossing_rate(samples: &[f32]) -> Vec<f32> {
    if samples.is_empty() {
        return Vec::new();
    }
    let pad = N_FFT / 2;
    let last = samples.len() - 1;
    let padded: Vec<f32> = (0..samples.len() + 2 * pad)
        .map(|i| samples[i.saturating_sub(pad).min(last)])
        .collect();
    let frames = 1 + (padded.len() - N_FFT) / HOP_LENGTH;
    (0..frames)
        .map(|t| {
            let frame = &padded[t * HOP_LENGTH..t * HOP_LENGTH + N_FFT];
            let crossings = frame
                .windows(2)
                .filter(|w| (w[0] >= 0.0) != (w[1] >= 0.0))
                .count();
            crossings as f32 / N_FFT as f32
        })
        .collect()
}

pub fn mean(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f32>() / values.len() as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::spectral::stft;
    use crate::config::{N_MFCC, ROLLOFF_PERCENT};

    fn sine(freq: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|n| (2.0 * std::f32::consts::PI * freq * n as f32 / 44_100.0).sin() * 0.5)
            .collect()
    }

    #[test]
    fn mel_scale_round_trips() {
        for hz in [0.0, 440.0, 1000.0, 4000.0, 16_000.0] {
            assert!((mel_to_hz(hz_to_mel(hz)) - hz).abs() < 0.5);
        }
    }

    #[test]
    fn filterbank_is_non_negative_and_covers_every_band() {
        let bank = mel_filterbank(44_100, N_FFT, N_MELS);
        assert_eq!(bank.dim(), (N_MELS, N_FFT / 2 + 1));
        assert!(bank.iter().all(|&w| w >= 0.0));
        for row in bank.axis_iter(Axis(0)) {
            assert!(row.sum() > 0.0);
        }
    }

    #[test]
    fn mfcc_has_one_column_per_frame() {
        let signal = sine(440.0, 22_050);
        let coeffs = mfcc(&signal, 44_100, N_MFCC);
        assert_eq!(coeffs.dim(), (N_MFCC, 1 + 22_050 / HOP_LENGTH));
        assert!(coeffs.iter().all(|c| c.is_finite()));
        assert_eq!(mean_over_frames(&coeffs).len(), N_MFCC);
    }

    #[test]
    fn centroid_and_rolloff_track_a_sine() {
        let spec = stft(&sine(1000.0, 44_100));
        let centroid = mean(&spectral_centroid(&spec, 44_100));
        assert!((centroid - 1000.0).abs() < 50.0, "centroid {centroid}");
        let rolloff = mean(&spectral_rolloff(&spec, 44_100, ROLLOFF_PERCENT));
        assert!(rolloff > 900.0 && rolloff < 1200.0, "rolloff {rolloff}");
    }

    #[test]
    fn zero_crossing_rate_extremes() {
        let alternating: Vec<f32> = (0..10_000)
            .map(|n| if n % 2 == 0 { 0.5 } else { -0.5 })
            .collect();
        assert!(mean(&zero_crossing_rate(&alternating)) > 0.8);
        let silence = vec![0.0; 10_000];
        assert_eq!(mean(&zero_crossing_rate(&silence)), 0.0);
    }
}
