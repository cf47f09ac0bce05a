//! Linear-interpolation resampling.

/// Resamples `samples` from `src_rate` to `dst_rate`.
pub fn resample_linear(samples: &[f32], src_rate: u32, dst_rate: u32) -> Vec<f32> {
    if samples.is_empty() || src_rate == 0 || dst_rate == 0 {
        return Vec::new();
    }
    if src_rate == dst_rate {
        return samples.to_vec();
    }
    let ratio = dst_rate as f64 / src_rate as f64;
    let out_len = ((samples.len() as f64) * ratio).round().max(1.0) as usize;
    resample_to_len(samples, out_len)
}

/// Stretches or squeezes `samples` to exactly `out_len` samples.
pub fn resample_to_len(samples: &[f32], out_len: usize) -> Vec<f32> {
    if samples.is_empty() || out_len == 0 {
        return Vec::new();
    }
    if samples.len() == out_len {
        return samples.to_vec();
    }
    let step = samples.len() as f64 / out_len as f64;
    let last = samples.len() - 1;
    (0..out_len)
        .map(|i| {
            let src_pos = i as f64 * step;
            let left = (src_pos.floor() as usize).min(last);
            let right = (left + 1).min(last);
            let frac = (src_pos - left as f64) as f32;
            samples[left] * (1.0 - frac) + samples[right] * frac
        })
        .collect()
}
