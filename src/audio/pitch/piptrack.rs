use ndarray::Array2;

use crate::audio::spectral::Spectrogram;
use crate::config::{PITCH_FMAX, PITCH_FMIN};

/// Instantaneous pitch candidates per (bin, frame). Zero where the bin is not
/// a thresholded local magnitude peak inside `[PITCH_FMIN, PITCH_FMAX)`.
#[derive(Debug, Clone)]
pub struct SalienceMap {
    pub pitches: Array2<f32>,
    pub magnitudes: Array2<f32>,
}

/// Builds the salience map from an STFT magnitude.
///
/// Peaks are refined with parabolic interpolation over the neighbouring bins;
/// a bin only counts if its magnitude exceeds `threshold` times the frame's
/// maximum.
pub fn salience_map(spec: &Spectrogram, sample_rate: u32, threshold: f32) -> SalienceMap {
    let s = spec.magnitude();
    let (bins, frames) = s.dim();
    let freqs = spec.frequencies(sample_rate);
    let bin_hz = sample_rate as f32 / spec.n_fft() as f32;

    let mut pitches = Array2::<f32>::zeros((bins, frames));
    let mut magnitudes = Array2::<f32>::zeros((bins, frames));
    if bins < 3 {
        return SalienceMap { pitches, magnitudes };
    }

    for t in 0..frames {
        let column = s.column(t);
        let reference = threshold * column.iter().copied().fold(0.0_f32, f32::max);
        let gated = |k: usize| if column[k] > reference { column[k] } else { 0.0 };

        for k in 1..bins - 1 {
            if freqs[k] < PITCH_FMIN || freqs[k] >= PITCH_FMAX {
                continue;
            }
            let (left, here, right) = (gated(k - 1), gated(k), gated(k + 1));
            if !(here > left && here >= right) {
                continue;
            }
            let avg = 0.5 * (column[k + 1] - column[k - 1]);
            let curvature = 2.0 * column[k] - column[k + 1] - column[k - 1];
            let shift = if curvature.abs() < f32::MIN_POSITIVE {
                avg
            } else {
                avg / curvature
            };
            pitches[(k, t)] = (k as f32 + shift) * bin_hz;
            magnitudes[(k, t)] = column[k] + 0.5 * avg * shift;
        }
    }
    SalienceMap { pitches, magnitudes }
}

impl SalienceMap {
    /// Strongest candidate of every frame as `(frequency, salience)`; frames
    /// with no candidate give `(0, 0)`.
    pub fn strongest_per_frame(&self) -> Vec<(f32, f32)> {
        self.magnitudes
            .columns()
            .into_iter()
            .enumerate()
            .map(|(t, column)| {
                let best = column
                    .iter()
                    .enumerate()
                    .fold(None::<(usize, f32)>, |best, (k, &m)| match best {
                        Some((_, b)) if b >= m => best,
                        _ if m > 0.0 => Some((k, m)),
                        _ => best,
                    });
                match best {
                    Some((k, m)) => (self.pitches[(k, t)], m),
                    None => (0.0, 0.0),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::spectral::stft;

    #[test]
    fn sine_peaks_near_its_frequency() {
        let signal: Vec<f32> = (0..22_050)
            .map(|n| (2.0 * std::f32::consts::PI * 440.0 * n as f32 / 44_100.0).sin() * 0.5)
            .collect();
        let map = salience_map(&stft(&signal), 44_100, 0.1);
        let track = map.strongest_per_frame();
        let mid = track[track.len() / 2];
        assert!((mid.0 - 440.0).abs() < 5.0, "picked {}", mid.0);
        assert!(mid.1 > 0.0);
    }

    #[test]
    fn silence_has_no_candidates() {
        let map = salience_map(&stft(&vec![0.0; 4096]), 44_100, 0.1);
        assert!(map.magnitudes.iter().all(|&m| m == 0.0));
        assert!(map.strongest_per_frame().iter().all(|&(f, m)| f == 0.0 && m == 0.0));
    }

    #[test]
    fn candidates_stay_inside_band() {
        // 100 Hz is below the search band, so only harmonics can be picked.
        let signal: Vec<f32> = (0..8192)
            .map(|n| (2.0 * std::f32::consts::PI * 100.0 * n as f32 / 44_100.0).sin())
            .collect();
        let map = salience_map(&stft(&signal), 44_100, 0.1);
        for (&p, &m) in map.pitches.iter().zip(&map.magnitudes) {
            if m > 0.0 {
                assert!(p >= PITCH_FMIN - 25.0 && p < PITCH_FMAX + 25.0);
            }
        }
    }
}
