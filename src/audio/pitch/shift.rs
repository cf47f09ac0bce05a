use std::f32::consts::PI;

use ndarray::Array2;
use rustfft::num_complex::Complex32;
use tracing::debug;

use crate::audio::resample::resample_to_len;
use crate::audio::spectral::{Spectrogram, istft_with_length, stft};

const TWO_PI: f32 = 2.0 * PI;

/// Wraps a phase into [-PI, PI).
fn wrap_phase(phase: f32) -> f32 {
    let p = phase + PI;
    p - (p / TWO_PI).floor() * TWO_PI - PI
}

/// Resamples an STFT along time by `rate` (>1 speeds up), keeping each bin's
/// instantaneous frequency by accumulating phase.
fn phase_vocoder(spec: &Spectrogram, rate: f32) -> Array2<Complex32> {
    let data = spec.data();
    let (bins, frames) = data.dim();
    let steps: Vec<f32> = (0..)
        .map(|i| i as f32 * rate)
        .take_while(|&step| step < frames as f32)
        .collect();

    let expected_advance: Vec<f32> = (0..bins)
        .map(|k| TWO_PI * spec.hop() as f32 * k as f32 / spec.n_fft() as f32)
        .collect();
    let mut phase_accum: Vec<f32> = (0..bins).map(|k| data[(k, 0)].arg()).collect();
    let zero = Complex32::new(0.0, 0.0);
    let column = |k: usize, t: usize| if t < frames { data[(k, t)] } else { zero };

    let mut out = Array2::<Complex32>::zeros((bins, steps.len()));
    for (t, &step) in steps.iter().enumerate() {
        let left = step.floor() as usize;
        let alpha = step - left as f32;
        for k in 0..bins {
            let (a, b) = (column(k, left), column(k, left + 1));
            let magnitude = (1.0 - alpha) * a.norm() + alpha * b.norm();
            out[(k, t)] = Complex32::from_polar(magnitude, phase_accum[k]);

            let delta = wrap_phase(b.arg() - a.arg() - expected_advance[k]);
            phase_accum[k] += expected_advance[k] + delta;
        }
    }
    out
}

/// Changes duration by `1 / rate` without changing pitch.
pub fn time_stretch(samples: &[f32], rate: f32) -> Vec<f32> {
    if samples.is_empty() || (rate - 1.0).abs() < f32::EPSILON {
        return samples.to_vec();
    }
    let spec = stft(samples);
    let stretched = phase_vocoder(&spec, rate);
    let frames = stretched.ncols();
    let target_len = (samples.len() as f32 / rate).round() as usize;
    let out = Spectrogram::from_data(stretched, spec.n_fft(), spec.hop(), target_len);
    debug!(rate, frames, target_len, "Time-stretched signal");
    istft_with_length(&out, target_len)
}

/// Shifts pitch by whole semitones, keeping the original length.
pub fn pitch_shift(samples: &[f32], sample_rate: u32, semitones: i32) -> Vec<f32> {
    if semitones == 0 || samples.is_empty() {
        return samples.to_vec();
    }
    let rate = 2.0_f32.powf(-(semitones as f32) / 12.0);
    let stretched = time_stretch(samples, rate);
    debug!(semitones, rate, sample_rate, "Pitch-shifted signal");
    resample_to_len(&stretched, samples.len())
}
