pub mod effects;
pub mod file;
pub mod formant;
pub mod mix;
pub mod pitch;
pub mod resample;
pub mod spectral;

use tracing::debug;

/// Multi-channel waveform with channel-major storage.
/// Every channel holds the same number of samples.
#[derive(Clone, Debug, PartialEq)]
pub struct Audio {
    sample_rate: u32,
    length: usize,
    channels: Vec<Vec<f32>>,
}

impl Audio {
    pub fn new(sample_rate: u32, channels: Vec<Vec<f32>>) -> Self {
        let length = channels.first().map(Vec::len).unwrap_or(0);
        assert!(
            channels.iter().all(|c| c.len() == length),
            "All channel lengths must match"
        );
        Self {
            sample_rate,
            length,
            channels,
        }
    }

    pub fn mono(sample_rate: u32, samples: Vec<f32>) -> Self {
        Self::new(sample_rate, vec![samples])
    }

    pub fn stereo(sample_rate: u32, left: Vec<f32>, right: Vec<f32>) -> Self {
        assert_eq!(
            left.len(),
            right.len(),
            "Left and right channel lengths must match"
        );
        Self::new(sample_rate, vec![left, right])
    }

    /// Builds channel-major audio from interleaved frames.
    pub fn from_interleaved(sample_rate: u32, samples: &[f32], n_channels: usize) -> Self {
        let n_channels = n_channels.max(1);
        let n_frames = samples.len() / n_channels;
        let mut channels = vec![Vec::with_capacity(n_frames); n_channels];
        for frame in samples.chunks_exact(n_channels) {
            for (channel, &sample) in channels.iter_mut().zip(frame) {
                channel.push(sample);
            }
        }
        Self::new(sample_rate, channels)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn length(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn n_channels(&self) -> usize {
        self.channels.len()
    }

    pub fn duration_secs(&self) -> f32 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.length as f32 / self.sample_rate as f32
    }

    pub fn channel(&self, index: usize) -> &[f32] {
        &self.channels[index]
    }

    pub fn left(&self) -> &[f32] {
        self.channels.first().map(Vec::as_slice).unwrap_or(&[])
    }

    /// Second channel, or the first one again for mono audio.
    pub fn right(&self) -> &[f32] {
        self.channels
            .get(1)
            .or_else(|| self.channels.first())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Averages all channels into one.
    pub fn to_mono(&self) -> Vec<f32> {
        match self.channels.len() {
            0 => Vec::new(),
            1 => self.channels[0].clone(),
            n => (0..self.length)
                .map(|i| self.channels.iter().map(|c| c[i]).sum::<f32>() / n as f32)
                .collect(),
        }
    }

    pub fn into_mono(self) -> Audio {
        if self.channels.len() == 1 {
            return self;
        }
        Audio::mono(self.sample_rate, self.to_mono())
    }

    /// Mono audio is duplicated into two identical channels.
    pub fn into_stereo(self) -> Audio {
        match self.channels.len() {
            1 => {
                let left = self.channels.into_iter().next().unwrap_or_default();
                Audio::stereo(self.sample_rate, left.clone(), left)
            }
            _ => self,
        }
    }

    pub fn peak(&self) -> f32 {
        self.channels
            .iter()
            .flatten()
            .fold(0.0_f32, |acc, v| acc.max(v.abs()))
    }

    /// Clamps every sample into [-1.0, 1.0].
    pub fn clip(&mut self) {
        for sample in self.channels.iter_mut().flatten() {
            *sample = sample.clamp(-1.0, 1.0);
        }
    }

    pub fn resampled(&self, target_rate: u32) -> Audio {
        if target_rate == self.sample_rate {
            return self.clone();
        }
        debug!(
            from = self.sample_rate,
            to = target_rate,
            length = self.length,
            "Resampling audio"
        );
        let channels = self
            .channels
            .iter()
            .map(|c| resample::resample_linear(c, self.sample_rate, target_rate))
            .collect();
        Audio::new(target_rate, channels)
    }

    /// Returns interleaved samples as a Vec<f32>
    pub fn interleaved(&self) -> Vec<f32> {
        let mut out = vec![0.0; self.length * self.channels.len()];
        interleave(&self.channels, &mut out);
        out
    }

    /// Adds the audio from `other` into `self` starting at `position`. (Adds to existing
    /// samples, each sample scaled by `gain`)
    /// If `other` extends beyond the current length of `self`, `self` is resized accordingly.
    /// Mono `other` is spread over every channel of `self`.
    /// Returns an error if the sample rates do not match.
    pub fn add_audio_at(&mut self, position: usize, other: &Audio, gain: f32) -> anyhow::Result<()> {
        debug!(
            position,
            other_length = other.length(),
            self_length = self.length,
            gain,
            "Adding audio at position"
        );
        if self.sample_rate != other.sample_rate {
            anyhow::bail!("Sample rates must match to add audio");
        }
        let end_position = position + other.length();
        if end_position > self.length {
            for channel in &mut self.channels {
                channel.resize(end_position, 0.0);
            }
            self.length = end_position;
        }
        for (index, channel) in self.channels.iter_mut().enumerate() {
            let source = if other.n_channels() == 1 {
                other.channel(0)
            } else {
                match other.channels.get(index) {
                    Some(c) => c.as_slice(),
                    None => continue,
                }
            };
            for (i, &sample) in source.iter().enumerate() {
                channel[position + i] += sample * gain;
            }
        }
        debug!(self_length = self.length, "Completed audio addition");
        Ok(())
    }
}

/// Interleaves channel-major samples into `out`.
/// Assumes `out` has room for every frame of every channel.
fn interleave(channels: &[Vec<f32>], out: &mut [f32]) {
    let n_channels = channels.len().max(1);
    for (i, frame) in out.chunks_exact_mut(n_channels).enumerate() {
        for (slot, channel) in frame.iter_mut().zip(channels) {
            *slot = channel.get(i).copied().unwrap_or(0.0);
        }
    }
}
