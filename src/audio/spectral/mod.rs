//! Short-time Fourier transform and its inverse.
//!
//! Frames are centred (reflect padding of `n_fft / 2` on both sides) and use a
//! periodic Hann window, so a signal of `n` samples yields `1 + n / hop`
//! frames. The inverse is a weighted overlap-add normalised by the summed
//! squared window, which makes `istft(stft(x)) == x` up to float rounding.

pub mod features;

use ndarray::Array2;
use rustfft::{FftPlanner, num_complex::Complex32};

use crate::config::{HOP_LENGTH, N_FFT};

/// Minimum summed window energy for overlap-add normalisation.
const WINDOW_SUM_EPSILON: f32 = 1e-6;

/// Complex time-frequency matrix, shaped `[n_fft / 2 + 1, n_frames]`.
#[derive(Debug, Clone)]
pub struct Spectrogram {
    data: Array2<Complex32>,
    n_fft: usize,
    hop: usize,
    signal_len: usize,
}

impl Spectrogram {
    pub fn from_data(data: Array2<Complex32>, n_fft: usize, hop: usize, signal_len: usize) -> Self {
        assert_eq!(data.nrows(), n_fft / 2 + 1, "bin count must match n_fft");
        Self {
            data,
            n_fft,
            hop,
            signal_len,
        }
    }

    /// Rebuilds a spectrogram from magnitude and phase matrices of equal shape.
    pub fn from_polar(
        magnitude: &Array2<f32>,
        phase: &Array2<f32>,
        n_fft: usize,
        hop: usize,
        signal_len: usize,
    ) -> Self {
        assert_eq!(magnitude.dim(), phase.dim(), "magnitude/phase shape mismatch");
        let data = ndarray::Zip::from(magnitude)
            .and(phase)
            .map_collect(|&m, &p| Complex32::from_polar(m, p));
        Self {
            data,
            n_fft,
            hop,
            signal_len,
        }
    }

    pub fn n_bins(&self) -> usize {
        self.data.nrows()
    }

    pub fn n_frames(&self) -> usize {
        self.data.ncols()
    }

    pub fn n_fft(&self) -> usize {
        self.n_fft
    }

    pub fn hop(&self) -> usize {
        self.hop
    }

    /// Length of the waveform this spectrogram was computed from.
    pub fn signal_len(&self) -> usize {
        self.signal_len
    }

    pub fn data(&self) -> &Array2<Complex32> {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut Array2<Complex32> {
        &mut self.data
    }

    pub fn magnitude(&self) -> Array2<f32> {
        self.data.mapv(|c| c.norm())
    }

    pub fn power(&self) -> Array2<f32> {
        self.data.mapv(|c| c.norm_sqr())
    }

    pub fn phase(&self) -> Array2<f32> {
        self.data.mapv(|c| c.arg())
    }

    /// Same phase, new magnitude.
    pub fn with_magnitude(&self, magnitude: &Array2<f32>) -> Spectrogram {
        Spectrogram::from_polar(magnitude, &self.phase(), self.n_fft, self.hop, self.signal_len)
    }

    /// Centre frequency of every bin for the given sample rate.
    pub fn frequencies(&self, sample_rate: u32) -> Vec<f32> {
        fft_frequencies(sample_rate, self.n_fft)
    }
}

/// STFT with the pipeline's fixed framing.
pub fn stft(signal: &[f32]) -> Spectrogram {
    stft_with(signal, N_FFT, HOP_LENGTH)
}

pub fn stft_with(signal: &[f32], n_fft: usize, hop: usize) -> Spectrogram {
    assert!(n_fft > 0 && hop > 0, "n_fft and hop must be non-zero");
    let bins = n_fft / 2 + 1;
    if signal.is_empty() {
        return Spectrogram {
            data: Array2::zeros((bins, 0)),
            n_fft,
            hop,
            signal_len: 0,
        };
    }

    let padded = reflect_pad_center(signal, n_fft / 2);
    let frames = 1 + (padded.len() - n_fft) / hop;
    let mut data = Array2::<Complex32>::zeros((bins, frames));

    let mut planner = FftPlanner::<f32>::new();
    let fft = planner.plan_fft_forward(n_fft);
    let window = hann_window_periodic(n_fft);
    let mut buffer = vec![Complex32::new(0.0, 0.0); n_fft];

    for frame_idx in 0..frames {
        let offset = frame_idx * hop;
        for (i, slot) in buffer.iter_mut().enumerate() {
            *slot = Complex32::new(padded[offset + i] * window[i], 0.0);
        }
        fft.process(&mut buffer);
        for bin in 0..bins {
            data[(bin, frame_idx)] = buffer[bin];
        }
    }

    Spectrogram {
        data,
        n_fft,
        hop,
        signal_len: signal.len(),
    }
}

/// Inverse STFT back to the original signal length.
pub fn istft(spec: &Spectrogram) -> Vec<f32> {
    istft_with_length(spec, spec.signal_len)
}

/// Inverse STFT trimmed or zero-padded to `length` samples.
pub fn istft_with_length(spec: &Spectrogram, length: usize) -> Vec<f32> {
    let n_fft = spec.n_fft;
    let hop = spec.hop;
    let frames = spec.n_frames();
    if frames == 0 {
        return vec![0.0; length];
    }

    let total = n_fft + hop * (frames - 1);
    let mut output = vec![0.0_f32; total];
    let mut window_sum = vec![0.0_f32; total];

    let mut planner = FftPlanner::<f32>::new();
    let ifft = planner.plan_fft_inverse(n_fft);
    let window = hann_window_periodic(n_fft);
    let mut buffer = vec![Complex32::new(0.0, 0.0); n_fft];
    let bins = spec.n_bins();
    let scale = 1.0 / n_fft as f32;

    for frame_idx in 0..frames {
        // Rebuild the full Hermitian spectrum from the positive bins.
        for k in 0..n_fft {
            buffer[k] = if k < bins {
                spec.data[(k, frame_idx)]
            } else {
                spec.data[(n_fft - k, frame_idx)].conj()
            };
        }
        ifft.process(&mut buffer);

        let start = frame_idx * hop;
        for i in 0..n_fft {
            let w = window[i];
            output[start + i] += buffer[i].re * scale * w;
            window_sum[start + i] += w * w;
        }
    }

    for (sample, &sum) in output.iter_mut().zip(&window_sum) {
        if sum > WINDOW_SUM_EPSILON {
            *sample /= sum;
        }
    }

    let pad = n_fft / 2;
    let mut out: Vec<f32> = output.into_iter().skip(pad).take(length).collect();
    out.resize(length, 0.0);
    out
}

/// Bin centre frequencies `k * sr / n_fft` for `k` in `0..=n_fft / 2`.
pub fn fft_frequencies(sample_rate: u32, n_fft: usize) -> Vec<f32> {
    (0..=n_fft / 2)
        .map(|k| k as f32 * sample_rate as f32 / n_fft as f32)
        .collect()
}

/// Periodic Hann window.
pub fn hann_window_periodic(size: usize) -> Vec<f32> {
    let denom = size as f32;
    (0..size)
        .map(|i| {
            let phase = 2.0 * std::f32::consts::PI * i as f32 / denom;
            0.5 - 0.5 * phase.cos()
        })
        .collect()
}

/// center=True style reflect padding.
fn reflect_pad_center(signal: &[f32], pad: usize) -> Vec<f32> {
    let n = signal.len();
    if n == 1 {
        return vec![signal[0]; n + 2 * pad];
    }
    (0..n + 2 * pad)
        .map(|i| signal[reflect_index(i as isize - pad as isize, n)])
        .collect()
}

/// Index mapping for reflection at both boundaries.
fn reflect_index(index: isize, len: usize) -> usize {
    let period = (2 * (len - 1)) as isize;
    let mut x = index.rem_euclid(period);
    if x >= len as isize {
        x = period - x;
    }
    x as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pseudo_noise(len: usize) -> Vec<f32> {
        let mut state = 0x2545_f491_u32;
        (0..len)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                (state as f32 / u32::MAX as f32) * 2.0 - 1.0
            })
            .collect()
    }

    #[test]
    fn shape_matches_centred_framing() {
        let spec = stft_with(&vec![0.0; 1024], 256, 128);
        assert_eq!(spec.n_bins(), 129);
        assert_eq!(spec.n_frames(), 9);

        let spec = stft(&vec![0.0; 44_100]);
        assert_eq!(spec.n_bins(), N_FFT / 2 + 1);
        assert_eq!(spec.n_frames(), 1 + 44_100 / HOP_LENGTH);
    }

    #[test]
    fn round_trip_reconstructs_signal() {
        let signal = pseudo_noise(5000);
        let rebuilt = istft(&stft(&signal));
        assert_eq!(rebuilt.len(), signal.len());
        let max_err = signal
            .iter()
            .zip(&rebuilt)
            .map(|(a, b)| (a - b).abs())
            .fold(0.0_f32, f32::max);
        assert!(max_err < 1e-4, "round trip error {max_err}");
    }

    #[test]
    fn round_trip_survives_polar_split() {
        let signal: Vec<f32> = (0..3000)
            .map(|n| (2.0 * std::f32::consts::PI * 440.0 * n as f32 / 44_100.0).sin() * 0.5)
            .collect();
        let spec = stft(&signal);
        let rebuilt = istft(&spec.with_magnitude(&spec.magnitude()));
        for (a, b) in signal.iter().zip(&rebuilt) {
            assert!((a - b).abs() < 1e-4);
        }
    }

    #[test]
    fn short_and_empty_signals() {
        let spec = stft(&[]);
        assert_eq!(spec.n_frames(), 0);
        assert!(istft(&spec).is_empty());

        let short = pseudo_noise(300);
        let rebuilt = istft(&stft(&short));
        assert_eq!(rebuilt.len(), 300);
        for (a, b) in short.iter().zip(&rebuilt) {
            assert!((a - b).abs() < 1e-4);
        }
    }

    #[test]
    fn reflect_index_mirrors_edges() {
        assert_eq!(reflect_index(-1, 5), 1);
        assert_eq!(reflect_index(-2, 5), 2);
        assert_eq!(reflect_index(5, 5), 3);
        assert_eq!(reflect_index(2, 5), 2);
    }

    #[test]
    fn frequencies_span_to_nyquist() {
        let freqs = fft_frequencies(44_100, N_FFT);
        assert_eq!(freqs.len(), N_FFT / 2 + 1);
        assert_eq!(freqs[0], 0.0);
        assert!((freqs[N_FFT / 2] - 22_050.0).abs() < 1e-3);
    }
}
