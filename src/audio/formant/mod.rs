//! Formant estimation from linear prediction.

pub mod shift;

pub use shift::apply_formant_shift;

use rustfft::num_complex::Complex64;
use tracing::{debug, warn};

use crate::config::{DEFAULT_FORMANTS, FORMANT_FLOOR_HZ, LPC_MAX_ORDER, LPC_MIN_SAMPLES};

const ROOT_MAX_ITER: usize = 500;
const ROOT_TOLERANCE: f64 = 1e-10;

/// Fallback resonances for signals too short or too degenerate to analyse.
pub fn default_formants() -> Vec<f32> {
    DEFAULT_FORMANTS.to_vec()
}

/// Estimates resonance frequencies in Hz, ascending, strictly inside
/// `(FORMANT_FLOOR_HZ, nyquist)`.
///
/// Never fails: short input or numerically unusable coefficients yield
/// [`default_formants`].
pub fn estimate_formants(samples: &[f32], sample_rate: u32) -> Vec<f32> {
    let order = LPC_MAX_ORDER.min(samples.len() / LPC_MIN_SAMPLES);
    if order == 0 || samples.len() <= LPC_MIN_SAMPLES {
        warn!(
            length = samples.len(),
            "Signal too short for formant estimation, using defaults"
        );
        return default_formants();
    }

    let Some(coeffs) = lpc(samples, order) else {
        warn!(order, "Degenerate LPC coefficients, using defaults");
        return default_formants();
    };

    let nyquist = sample_rate as f64 / 2.0;
    let mut formants: Vec<f32> = polynomial_roots(&coeffs)
        .into_iter()
        .filter(|z| z.im >= 0.0)
        .map(|z| z.arg() * sample_rate as f64 / (2.0 * std::f64::consts::PI))
        .filter(|f| f.is_finite() && *f > FORMANT_FLOOR_HZ as f64 && *f < nyquist)
        .map(|f| f as f32)
        .collect();

    if formants.is_empty() {
        warn!("No formant survived filtering, using defaults");
        return default_formants();
    }
    formants.sort_by(f32::total_cmp);
    debug!(order, ?formants, "Estimated formants");
    formants
}

/// Autocorrelation LPC via Levinson-Durbin. Returns `[1, a1, ..., a_order]`,
/// or `None` when the recursion becomes unstable.
fn lpc(samples: &[f32], order: usize) -> Option<Vec<f64>> {
    let r: Vec<f64> = (0..=order)
        .map(|lag| {
            samples
                .iter()
                .zip(&samples[lag..])
                .map(|(&a, &b)| a as f64 * b as f64)
                .sum()
        })
        .collect();
    if !r[0].is_finite() || r[0] <= f64::EPSILON {
        return None;
    }

    let mut a = vec![0.0_f64; order + 1];
    a[0] = 1.0;
    let mut error = r[0];
    for i in 1..=order {
        let acc: f64 = r[i] + (1..i).map(|j| a[j] * r[i - j]).sum::<f64>();
        let k = -acc / error;
        let previous = a.clone();
        a[i] = k;
        for j in 1..i {
            a[j] = previous[j] + k * previous[i - j];
        }
        error *= 1.0 - k * k;
        if !error.is_finite() || error <= r[0] * 1e-12 {
            return None;
        }
    }
    a.iter().all(|c| c.is_finite()).then_some(a)
}

/// Roots of `a[0] z^n + a[1] z^(n-1) + ... + a[n]` by Durand-Kerner iteration.
fn polynomial_roots(a: &[f64]) -> Vec<Complex64> {
    let degree = a.len().saturating_sub(1);
    if degree == 0 || a[0].abs() < 1e-300 {
        return Vec::new();
    }
    let monic: Vec<f64> = a.iter().map(|c| c / a[0]).collect();

    let mut roots: Vec<Complex64> = (0..degree)
        .map(|k| {
            // Offset start angles so no root begins on the real axis.
            let theta = 2.0 * std::f64::consts::PI * (k as f64 + 0.3) / degree as f64;
            Complex64::from_polar(0.9, theta)
        })
        .collect();

    for _ in 0..ROOT_MAX_ITER {
        let mut max_correction = 0.0_f64;
        for i in 0..degree {
            let mut denom = Complex64::new(1.0, 0.0);
            for j in 0..degree {
                if i != j {
                    denom *= roots[i] - roots[j];
                }
            }
            let delta = if denom.norm() < 1e-14 {
                Complex64::new(1e-6, 1e-6)
            } else {
                poly_eval(&monic, roots[i]) / denom
            };
            roots[i] -= delta;
            max_correction = max_correction.max(delta.norm());
        }
        if max_correction < ROOT_TOLERANCE {
            break;
        }
    }
    roots
}

fn poly_eval(a: &[f64], z: Complex64) -> Complex64 {
    a[1..]
        .iter()
        .fold(Complex64::new(a[0], 0.0), |acc, &c| acc * z + c)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noisy_two_tone(len: usize) -> Vec<f32> {
        let mut state = 12345_u32;
        (0..len)
            .map(|n| {
                state = state.wrapping_mul(1_103_515_245).wrapping_add(12345);
                let noise = ((state >> 16) as f32 / 32768.0 - 1.0) * 0.01;
                let t = n as f32 / 44_100.0;
                0.5 * (2.0 * std::f32::consts::PI * 800.0 * t).sin()
                    + 0.3 * (2.0 * std::f32::consts::PI * 2000.0 * t).sin()
                    + noise
            })
            .collect()
    }

    #[test]
    fn short_signals_fall_back_to_defaults() {
        assert_eq!(estimate_formants(&[], 44_100), vec![700.0, 1220.0, 2600.0]);
        assert_eq!(estimate_formants(&[0.1; 50], 44_100), vec![700.0, 1220.0, 2600.0]);
        assert_eq!(estimate_formants(&[0.1; 100], 44_100), vec![700.0, 1220.0, 2600.0]);
    }

    #[test]
    fn silence_falls_back_to_defaults() {
        assert_eq!(estimate_formants(&[0.0; 4410], 44_100), default_formants());
    }

    #[test]
    fn formants_are_sorted_and_bounded() {
        let formants = estimate_formants(&noisy_two_tone(4410), 44_100);
        assert!(!formants.is_empty());
        assert!(formants.windows(2).all(|w| w[0] <= w[1]));
        assert!(formants.iter().all(|&f| f > 50.0 && f < 22_050.0));
        assert!(
            formants.iter().any(|&f| (f - 800.0).abs() < 100.0),
            "no resonance near 800 Hz in {formants:?}"
        );
    }

    #[test]
    fn roots_of_known_polynomial() {
        // (z - 0.5)(z^2 + 1) = z^3 - 0.5 z^2 + z - 0.5
        let mut roots = polynomial_roots(&[1.0, -0.5, 1.0, -0.5]);
        roots.sort_by(|a, b| a.im.total_cmp(&b.im));
        assert!((roots[0] - Complex64::new(0.0, -1.0)).norm() < 1e-6);
        assert!((roots[1] - Complex64::new(0.5, 0.0)).norm() < 1e-6);
        assert!((roots[2] - Complex64::new(0.0, 1.0)).norm() < 1e-6);
    }

    #[test]
    fn lpc_rejects_silence() {
        assert!(lpc(&[0.0; 512], 8).is_none());
        let coeffs = lpc(&noisy_two_tone(1024), 8).unwrap();
        assert_eq!(coeffs.len(), 9);
        assert_eq!(coeffs[0], 1.0);
    }
}
