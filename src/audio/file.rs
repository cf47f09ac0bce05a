use crate::audio::Audio;
use crate::config::{MIN_DURATION_SECONDS, MIN_FILE_BYTES};
use crate::error::VoiceError;
use anyhow::{Context, Result, anyhow};
use hound::{WavSpec, WavWriter};
use rodio::{Decoder, Source};
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

/// Audio file with interleaved samples:
/// layout = [ch0_f0, ch1_f0, ..., ch{n-1}_f0, ch0_f1, ch1_f1, ...]
pub struct AudioFileData {
    samples: Vec<f32>,
    n_samples: usize,
    sample_rate: u32,
    n_channels: usize,
}

impl AudioFileData {
    /// Uses rodio::Decoder, which yields interleaved samples for multichannel audio.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(VoiceError::MissingInput(path.to_path_buf()).into());
        }
        let file = File::open(path)?;
        let source = Decoder::new(BufReader::new(file))
            .map_err(|e| VoiceError::Decode(format!("{}: {e}", path.display())))?;

        let sample_rate = source.sample_rate();
        let n_channels = source.channels() as usize;

        if n_channels == 0 {
            return Err(anyhow!("Decoder reported 0 channels for file {:?}", path));
        }

        let samples: Vec<f32> = source.collect();

        if samples.len() % n_channels != 0 {
            return Err(anyhow!(
                "Sample count {} is not divisible by channel count {} for file {:?}",
                samples.len(),
                n_channels,
                path
            ));
        }

        let n_samples = samples.len() / n_channels;
        debug!(?path, sample_rate, n_channels, n_samples, "Decoded audio file");

        Ok(AudioFileData {
            samples,
            sample_rate,
            n_samples,
            n_channels,
        })
    }

    // `samples` layout must be: [ch0_f0, ch1_f0, ..., ch{n-1}_f0, ch0_f1, ...].
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Result<Self> {
        if channels == 0 {
            return Err(anyhow!("channels must be > 0"));
        }
        if samples.len() % channels as usize != 0 {
            return Err(anyhow!(
                "samples length {} is not divisible by channels {}",
                samples.len(),
                channels
            ));
        }

        let n_channels = channels as usize;
        let n_samples = samples.len() / n_channels;

        Ok(AudioFileData {
            samples,
            sample_rate,
            n_channels,
            n_samples,
        })
    }

    pub fn from_audio(audio: &Audio) -> Self {
        AudioFileData {
            samples: audio.interleaved(),
            sample_rate: audio.sample_rate(),
            n_samples: audio.length(),
            n_channels: audio.n_channels().max(1),
        }
    }

    /// Save audio data to a WAV file (16-bit PCM, interleaved channels).
    /// The file appears at `path` only once it is completely written.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let extension = path
            .extension()
            .and_then(|s| s.to_str())
            .map(str::to_ascii_lowercase);
        match extension.as_deref() {
            Some("wav") => {
                let spec = WavSpec {
                    channels: self.n_channels as u16,
                    sample_rate: self.sample_rate,
                    bits_per_sample: 16,
                    sample_format: hound::SampleFormat::Int,
                };

                write_atomically(path, |tmp| {
                    let mut writer = WavWriter::create(tmp, spec)?;
                    for &sample in &self.samples {
                        // Clamp to [-1.0, 1.0] before scaling to i16
                        let clamped = sample.clamp(-1.0, 1.0);
                        let int_sample = (clamped * i16::MAX as f32) as i16;
                        writer.write_sample(int_sample)?;
                    }
                    writer.finalize()?;
                    Ok(())
                })
                .with_context(|| format!("failed to write {}", path.display()))
            }
            _ => Err(anyhow!("Unsupported file format; only .wav is supported.")),
        }
    }

    pub fn to_audio(&self) -> Audio {
        Audio::from_interleaved(self.sample_rate, &self.samples, self.n_channels)
    }

    pub fn n_channels(&self) -> usize {
        self.n_channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn n_samples(&self) -> usize {
        self.n_samples
    }

    pub fn duration_secs(&self) -> f32 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.n_samples as f32 / self.sample_rate as f32
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }
}

/// Loads a file at its native rate and channel layout.
pub fn load_audio_from_path<P: AsRef<Path>>(path: P) -> Result<Audio> {
    Ok(AudioFileData::load(path)?.to_audio())
}

/// Loads a file as mono audio at `sample_rate`.
pub fn load_mono_resampled<P: AsRef<Path>>(path: P, sample_rate: u32) -> Result<Audio> {
    let audio = load_audio_from_path(&path)?.into_mono();
    Ok(audio.resampled(sample_rate))
}

pub fn save_audio_to_path<P: AsRef<Path>>(audio: &Audio, path: P) -> Result<()> {
    AudioFileData::from_audio(audio).save(&path)?;
    info!(path = ?path.as_ref(), length = audio.length(), "Saved audio");
    Ok(())
}

/// Copies `from` to `to` byte for byte; `to` appears only once complete.
pub fn copy_atomically(from: &Path, to: &Path) -> Result<()> {
    write_atomically(to, |tmp| {
        fs::copy(from, tmp)?;
        Ok(())
    })
    .with_context(|| format!("failed to copy {} to {}", from.display(), to.display()))
}

/// Runs `write` against a sibling temporary path, then renames it over `path`.
/// The temporary file is removed on every failure.
pub fn write_atomically<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(&Path) -> Result<()>,
{
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let tmp = temporary_sibling(path);
    let result = write(&tmp).and_then(|_| fs::rename(&tmp, path).map_err(Into::into));
    if result.is_err() && tmp.exists() {
        if let Err(e) = fs::remove_file(&tmp) {
            warn!(?tmp, "Failed to remove temporary file: {e}");
        }
    }
    result
}

static TEMPORARY_COUNTER: AtomicU64 = AtomicU64::new(0);

fn temporary_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    // Keep the extension last so writers that dispatch on it still work.
    let serial = TEMPORARY_COUNTER.fetch_add(1, Ordering::Relaxed);
    path.with_file_name(format!(
        ".{}.{}.{}.partial.wav",
        name,
        std::process::id(),
        serial
    ))
}

/// Checks that a file exists, is not trivially small, decodes, and lasts long
/// enough to be worth processing.
pub fn verify_audio_file<P: AsRef<Path>>(path: P) -> bool {
    let path = path.as_ref();
    let size = match fs::metadata(path) {
        Ok(meta) => meta.len(),
        Err(_) => {
            warn!(?path, "File does not exist");
            return false;
        }
    };
    if size < MIN_FILE_BYTES {
        warn!(?path, size, "File is too small to hold audio");
        return false;
    }
    match AudioFileData::load(path) {
        Ok(data) if data.duration_secs() >= MIN_DURATION_SECONDS => {
            debug!(?path, duration = data.duration_secs(), "Audio file verified");
            true
        }
        Ok(data) => {
            warn!(?path, duration = data.duration_secs(), "Audio is too short");
            false
        }
        Err(e) => {
            warn!(?path, "Audio file failed to decode: {e}");
            false
        }
    }
}
