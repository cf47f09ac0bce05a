//! Offline effect chains: clean-up of the mid-side vocal estimate and the
//! post-processing presets applied to a converted vocal.

use std::f32::consts::PI;

use tracing::debug;

use crate::config::{
    EffectPreset, ReverbSettings, VOCAL_COMPRESSOR_RATIO, VOCAL_COMPRESSOR_THRESHOLD_DB,
    VOCAL_GAIN_DB, VOCAL_HIGHPASS_HZ,
};

/// A mono effect processing a whole buffer in place.
pub trait Effect: Send {
    fn name(&self) -> &'static str;

    fn process(&mut self, samples: &mut [f32]);

    /// Clears any internal state so the effect can run on an unrelated buffer.
    fn reset(&mut self) {}
}

pub fn db_to_linear(db: f32) -> f32 {
    10.0_f32.powf(db / 20.0)
}

pub fn linear_to_db(value: f32) -> f32 {
    20.0 * value.max(1e-9).log10()
}

/// Second-order (RBJ cookbook) high-pass filter.
pub struct HighpassFilter {
    b: [f32; 3],
    a: [f32; 2],
    x: [f32; 2],
    y: [f32; 2],
}

impl HighpassFilter {
    pub fn new(sample_rate: u32, cutoff_hz: f32) -> Self {
        let q = std::f32::consts::FRAC_1_SQRT_2;
        let nyquist = sample_rate as f32 / 2.0;
        let omega = 2.0 * PI * cutoff_hz.clamp(1.0, nyquist * 0.99) / sample_rate as f32;
        let (sin, cos) = omega.sin_cos();
        let alpha = sin / (2.0 * q);
        let a0 = 1.0 + alpha;
        Self {
            b: [
                (1.0 + cos) / 2.0 / a0,
                -(1.0 + cos) / a0,
                (1.0 + cos) / 2.0 / a0,
            ],
            a: [-2.0 * cos / a0, (1.0 - alpha) / a0],
            x: [0.0; 2],
            y: [0.0; 2],
        }
    }
}

impl Effect for HighpassFilter {
    fn name(&self) -> &'static str {
        "highpass"
    }

    fn process(&mut self, samples: &mut [f32]) {
        for sample in samples.iter_mut() {
            let input = *sample;
            let output = self.b[0] * input + self.b[1] * self.x[0] + self.b[2] * self.x[1]
                - self.a[0] * self.y[0]
                - self.a[1] * self.y[1];
            self.x = [input, self.x[0]];
            self.y = [output, self.y[0]];
            *sample = output;
        }
    }

    fn reset(&mut self) {
        self.x = [0.0; 2];
        self.y = [0.0; 2];
    }
}

/// Feed-forward peak compressor with attack/release envelope smoothing.
pub struct Compressor {
    threshold_db: f32,
    ratio: f32,
    attack_coeff: f32,
    release_coeff: f32,
    envelope: f32,
}

impl Compressor {
    pub fn new(sample_rate: u32, threshold_db: f32, ratio: f32) -> Self {
        Self::with_timing(sample_rate, threshold_db, ratio, 1.0, 100.0)
    }

    pub fn with_timing(
        sample_rate: u32,
        threshold_db: f32,
        ratio: f32,
        attack_ms: f32,
        release_ms: f32,
    ) -> Self {
        let coeff = |ms: f32| (-1.0 / (ms * 0.001 * sample_rate as f32).max(1.0)).exp();
        Self {
            threshold_db,
            ratio: ratio.max(1.0),
            attack_coeff: coeff(attack_ms),
            release_coeff: coeff(release_ms),
            envelope: 0.0,
        }
    }
}

impl Effect for Compressor {
    fn name(&self) -> &'static str {
        "compressor"
    }

    fn process(&mut self, samples: &mut [f32]) {
        for sample in samples.iter_mut() {
            let level = sample.abs();
            let coeff = if level > self.envelope {
                self.attack_coeff
            } else {
                self.release_coeff
            };
            self.envelope = coeff * self.envelope + (1.0 - coeff) * level;

            let over_db = linear_to_db(self.envelope) - self.threshold_db;
            if over_db > 0.0 {
                let reduction_db = over_db - over_db / self.ratio;
                *sample *= db_to_linear(-reduction_db);
            }
        }
    }

    fn reset(&mut self) {
        self.envelope = 0.0;
    }
}

pub struct Gain {
    factor: f32,
}

impl Gain {
    pub fn from_db(db: f32) -> Self {
        Self {
            factor: db_to_linear(db),
        }
    }
}

impl Effect for Gain {
    fn name(&self) -> &'static str {
        "gain"
    }

    fn process(&mut self, samples: &mut [f32]) {
        for sample in samples.iter_mut() {
            *sample *= self.factor;
        }
    }
}

// Freeverb tunings in samples at 44.1 kHz.
const COMB_TUNINGS: [usize; 8] = [1116, 1188, 1277, 1356, 1422, 1491, 1557, 1617];
const ALLPASS_TUNINGS: [usize; 4] = [556, 441, 341, 225];
const ALLPASS_FEEDBACK: f32 = 0.5;
const REVERB_INPUT_GAIN: f32 = 0.015;
const ROOM_SCALE: f32 = 0.28;
const ROOM_OFFSET: f32 = 0.7;
const DAMP_SCALE: f32 = 0.4;
const WET_SCALE: f32 = 3.0;
const DRY_SCALE: f32 = 2.0;

fn scaled_delay(tuning: usize, sample_rate: u32) -> usize {
    ((tuning as f64 * sample_rate as f64 / 44_100.0).round() as usize).max(1)
}

/// Feedback comb with a one-pole low-pass in the loop.
struct CombFilter {
    buffer: Vec<f32>,
    index: usize,
    last: f32,
}

impl CombFilter {
    fn new(len: usize) -> Self {
        Self {
            buffer: vec![0.0; len],
            index: 0,
            last: 0.0,
        }
    }

    fn process(&mut self, input: f32, feedback: f32, damp: f32) -> f32 {
        let out = self.buffer[self.index];
        self.last = out * (1.0 - damp) + self.last * damp;
        self.buffer[self.index] = input + self.last * feedback;
        self.index = (self.index + 1) % self.buffer.len();
        out
    }

    fn clear(&mut self) {
        self.buffer.fill(0.0);
        self.index = 0;
        self.last = 0.0;
    }
}

struct AllPassFilter {
    buffer: Vec<f32>,
    index: usize,
}

impl AllPassFilter {
    fn new(len: usize) -> Self {
        Self {
            buffer: vec![0.0; len],
            index: 0,
        }
    }

    fn process(&mut self, input: f32) -> f32 {
        let buffered = self.buffer[self.index];
        self.buffer[self.index] = input + buffered * ALLPASS_FEEDBACK;
        self.index = (self.index + 1) % self.buffer.len();
        buffered - input
    }

    fn clear(&mut self) {
        self.buffer.fill(0.0);
        self.index = 0;
    }
}

/// Freeverb-style room: eight parallel damped combs into four series all-passes.
pub struct Reverb {
    combs: Vec<CombFilter>,
    allpasses: Vec<AllPassFilter>,
    feedback: f32,
    damp: f32,
    wet_gain: f32,
    dry_gain: f32,
}

impl Reverb {
    /// All parameters are clamped to [0, 1].
    pub fn new(
        sample_rate: u32,
        room_size: f32,
        damping: f32,
        wet_level: f32,
        dry_level: f32,
    ) -> Self {
        Self {
            combs: COMB_TUNINGS
                .iter()
                .map(|&t| CombFilter::new(scaled_delay(t, sample_rate)))
                .collect(),
            allpasses: ALLPASS_TUNINGS
                .iter()
                .map(|&t| AllPassFilter::new(scaled_delay(t, sample_rate)))
                .collect(),
            feedback: room_size.clamp(0.0, 1.0) * ROOM_SCALE + ROOM_OFFSET,
            damp: damping.clamp(0.0, 1.0) * DAMP_SCALE,
            wet_gain: wet_level.clamp(0.0, 1.0) * WET_SCALE,
            dry_gain: dry_level.clamp(0.0, 1.0) * DRY_SCALE,
        }
    }

    pub fn from_settings(sample_rate: u32, settings: ReverbSettings) -> Self {
        Self::new(
            sample_rate,
            settings.room_size,
            settings.damping,
            settings.wet_level,
            settings.dry_level,
        )
    }
}

impl Effect for Reverb {
    fn name(&self) -> &'static str {
        "reverb"
    }

    fn process(&mut self, samples: &mut [f32]) {
        for sample in samples.iter_mut() {
            let input = *sample * REVERB_INPUT_GAIN;
            let mut wet = 0.0;
            for comb in self.combs.iter_mut() {
                wet += comb.process(input, self.feedback, self.damp);
            }
            for allpass in self.allpasses.iter_mut() {
                wet = allpass.process(wet);
            }
            *sample = wet * self.wet_gain + *sample * self.dry_gain;
        }
    }

    fn reset(&mut self) {
        self.combs.iter_mut().for_each(CombFilter::clear);
        self.allpasses.iter_mut().for_each(AllPassFilter::clear);
    }
}

/// Effects applied in insertion order.
#[derive(Default)]
pub struct EffectChain {
    effects: Vec<Box<dyn Effect>>,
}

impl EffectChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// High-pass, compressor and make-up gain tuned for a vocal estimate.
    pub fn vocal_enhancement(sample_rate: u32) -> Self {
        let mut chain = Self::new();
        chain.add_effect(Box::new(HighpassFilter::new(sample_rate, VOCAL_HIGHPASS_HZ)));
        chain.add_effect(Box::new(Compressor::new(
            sample_rate,
            VOCAL_COMPRESSOR_THRESHOLD_DB,
            VOCAL_COMPRESSOR_RATIO,
        )));
        chain.add_effect(Box::new(Gain::from_db(VOCAL_GAIN_DB)));
        chain
    }

    /// High-pass, compressor and reverb of a named preset; `None` is an empty chain.
    pub fn from_preset(preset: EffectPreset, sample_rate: u32) -> Self {
        let mut chain = Self::new();
        if let Some(settings) = preset.settings() {
            chain.add_effect(Box::new(HighpassFilter::new(sample_rate, settings.highpass_hz)));
            chain.add_effect(Box::new(Compressor::with_timing(
                sample_rate,
                settings.compressor_threshold_db,
                settings.compressor_ratio,
                settings.attack_ms,
                settings.release_ms,
            )));
            chain.add_effect(Box::new(Reverb::from_settings(sample_rate, settings.reverb)));
        }
        chain
    }

    pub fn add_effect(&mut self, effect: Box<dyn Effect>) {
        self.effects.push(effect);
    }

    pub fn len(&self) -> usize {
        self.effects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.effects.iter().map(|e| e.name()).collect()
    }

    pub fn process(&mut self, samples: &mut [f32]) {
        for effect in self.effects.iter_mut() {
            effect.process(samples);
        }
        debug!(effects = ?self.names(), length = samples.len(), "Applied effect chain");
    }

    pub fn reset(&mut self) {
        for effect in self.effects.iter_mut() {
            effect.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LIVE_PRESET, STUDIO_PRESET};

    fn rms(x: &[f32]) -> f32 {
        (x.iter().map(|v| v * v).sum::<f32>() / x.len() as f32).sqrt()
    }

    fn sine(freq: f32, len: usize, amp: f32) -> Vec<f32> {
        (0..len)
            .map(|n| amp * (2.0 * PI * freq * n as f32 / 44_100.0).sin())
            .collect()
    }

    #[test]
    fn highpass_blocks_dc_and_passes_treble() {
        let mut filter = HighpassFilter::new(44_100, 80.0);
        let mut dc = vec![0.5; 44_100];
        filter.process(&mut dc);
        assert!(dc[44_000].abs() < 1e-3);

        filter.reset();
        let mut tone = sine(2000.0, 44_100, 0.5);
        let before = rms(&tone[22_050..]);
        filter.process(&mut tone);
        assert!((rms(&tone[22_050..]) / before - 1.0).abs() < 0.02);
    }

    #[test]
    fn compressor_only_touches_loud_signals() {
        let mut quiet = sine(440.0, 44_100, 0.01);
        let reference = quiet.clone();
        Compressor::new(44_100, -25.0, 3.0).process(&mut quiet);
        assert_eq!(quiet, reference);

        let mut loud = sine(440.0, 44_100, 0.9);
        let before = rms(&loud);
        Compressor::new(44_100, -25.0, 3.0).process(&mut loud);
        assert!(rms(&loud) < before * 0.5);
    }

    #[test]
    fn gain_in_decibels() {
        let mut samples = vec![0.25, -0.5];
        Gain::from_db(20.0 * 2.0_f32.log10()).process(&mut samples);
        assert!((samples[0] - 0.5).abs() < 1e-5);
        assert!((samples[1] + 1.0).abs() < 1e-5);
    }

    #[test]
    fn vocal_chain_runs_in_order() {
        let chain = EffectChain::vocal_enhancement(44_100);
        assert_eq!(chain.names(), vec!["highpass", "compressor", "gain"]);
        assert_eq!(chain.len(), 3);
        assert!(EffectChain::new().is_empty());
    }

    fn impulse(len: usize) -> Vec<f32> {
        let mut x = vec![0.0; len];
        x[0] = 1.0;
        x
    }

    fn tail_energy(x: &[f32]) -> f32 {
        x[4410..].iter().map(|v| v * v).sum()
    }

    #[test]
    fn reverb_leaves_a_decaying_tail() {
        let mut x = impulse(44_100);
        Reverb::new(44_100, 0.5, 0.5, 0.3, 0.7).process(&mut x);
        assert!(tail_energy(&x) > 0.0);
        let early: f32 = x[4410..8820].iter().map(|v| v * v).sum();
        let late: f32 = x[35_280..].iter().map(|v| v * v).sum();
        assert!(late < early);
        assert!(x.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn dry_only_reverb_is_identity() {
        let mut x = sine(330.0, 8192, 0.4);
        let reference = x.clone();
        Reverb::new(44_100, 0.9, 0.2, 0.0, 0.5).process(&mut x);
        assert_eq!(x, reference);
    }

    #[test]
    fn reverb_reset_clears_the_tail() {
        let mut reverb = Reverb::new(44_100, 0.7, 0.5, 0.4, 0.6);
        let mut x = impulse(8192);
        reverb.process(&mut x);
        reverb.reset();
        let mut silence = vec![0.0; 8192];
        reverb.process(&mut silence);
        assert!(silence.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn none_preset_is_an_empty_chain() {
        let mut chain = EffectChain::from_preset(EffectPreset::None, 44_100);
        assert!(chain.is_empty());
        let mut x = sine(440.0, 1024, 0.5);
        let reference = x.clone();
        chain.process(&mut x);
        assert_eq!(x, reference);
    }

    #[test]
    fn studio_preset_chain() {
        let mut chain = EffectChain::from_preset(EffectPreset::Studio, 44_100);
        assert_eq!(chain.names(), vec!["highpass", "compressor", "reverb"]);
        let mut x = sine(440.0, 44_100, 0.5);
        chain.process(&mut x);
        assert!(x.iter().all(|v| v.is_finite()));
        assert!(rms(&x) > 0.05);
    }

    #[test]
    fn live_preset_chain_is_wetter_than_studio() {
        let live = EffectChain::from_preset(EffectPreset::Live, 44_100);
        assert_eq!(live.names(), vec!["highpass", "compressor", "reverb"]);

        let mut studio_tail = impulse(44_100);
        Reverb::from_settings(44_100, STUDIO_PRESET.reverb).process(&mut studio_tail);
        let mut live_tail = impulse(44_100);
        Reverb::from_settings(44_100, LIVE_PRESET.reverb).process(&mut live_tail);
        assert!(tail_energy(&live_tail) > tail_energy(&studio_tail));
    }
}
