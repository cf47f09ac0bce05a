use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::{SeparationJob, SeparationStrategy};
use crate::audio::file::copy_atomically;
use crate::error::VoiceError;

/// Candidate output names for the vocal stem, in priority order. `{base}` is
/// the input's file stem and `*` matches any run of characters.
const VOCAL_PATTERNS: [&str; 4] = [
    "{base}_Vocals.wav",
    "{base}_vocals.wav",
    "{base}_(Vocals)*.wav",
    "{base}_Stem_01.wav",
];

const INSTRUMENTAL_PATTERNS: [&str; 5] = [
    "{base}_Instruments.wav",
    "{base}_instruments.wav",
    "{base}_Instrument.wav",
    "{base}_(Instrumental)*.wav",
    "{base}_Stem_00.wav",
];

/// Runs an external stem-separation program on the CPU.
pub struct ExternalModel {
    program: String,
    model: String,
    timeout: Duration,
}

impl ExternalModel {
    pub fn new(program: &str, model: &str, timeout: Duration) -> Self {
        Self {
            program: program.to_string(),
            model: model.to_string(),
            timeout,
        }
    }

    fn run_model(&self, input: &Path, work_dir: &Path) -> Result<()> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("failed to start process runtime")?;

        let mut command = Command::new(&self.program);
        command
            .arg(input)
            .arg("--model_filename")
            .arg(&self.model)
            .arg("--output_dir")
            .arg(work_dir)
            .arg("--output_format")
            .arg("WAV")
            .env("CUDA_VISIBLE_DEVICES", "")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        debug!(program = %self.program, model = %self.model, "Launching separation model");

        runtime.block_on(async {
            let child = match command.spawn() {
                Ok(child) => child,
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    let missing = VoiceError::DependencyUnavailable(self.program.clone());
                    return Err(anyhow::Error::from(missing));
                }
                Err(e) => return Err(e).context("failed to launch separation model"),
            };
            // Dropping the child on timeout kills it.
            let output = tokio::time::timeout(self.timeout, child.wait_with_output())
                .await
                .map_err(|_| VoiceError::Timeout(self.timeout))?
                .context("failed to wait for separation model")?;
            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                let tail: String = stderr.lines().rev().take(5).collect::<Vec<_>>().join(" | ");
                bail!("separation model exited with {}: {tail}", output.status);
            }
            Ok(())
        })
    }
}

impl SeparationStrategy for ExternalModel {
    fn name(&self) -> &'static str {
        "external-model"
    }

    fn separate(&self, job: &SeparationJob) -> Result<()> {
        let work_dir = working_dir(job);
        fs::create_dir_all(&work_dir)
            .with_context(|| format!("failed to create {}", work_dir.display()))?;

        let result = self
            .run_model(&job.input, &work_dir)
            .and_then(|_| collect_stems(job, &work_dir));
        if let Err(e) = fs::remove_dir_all(&work_dir) {
            debug!(?work_dir, "Could not remove separation scratch directory: {e}");
        }
        result
    }
}

fn working_dir(job: &SeparationJob) -> PathBuf {
    let parent = job
        .vocal_output
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    parent.join(format!(".{}.{}.separation", job.base_name(), std::process::id()))
}

/// Moves the model's outputs into place. A stem the model did not produce is
/// replaced by a copy of the original mix.
pub(crate) fn collect_stems(job: &SeparationJob, work_dir: &Path) -> Result<()> {
    let base = job.base_name();
    for (label, patterns, target) in [
        ("vocal", &VOCAL_PATTERNS[..], &job.vocal_output),
        ("instrumental", &INSTRUMENTAL_PATTERNS[..], &job.instrumental_output),
    ] {
        match find_stem(work_dir, &base, patterns)? {
            Some(found) => {
                move_into_place(&found, target)?;
                info!(stem = label, path = ?target, "Saved separated stem");
            }
            None => {
                warn!(stem = label, "Model produced no {label} stem, copying the mix instead");
                copy_atomically(&job.input, target)?;
            }
        }
    }
    Ok(())
}

/// First file in `dir` matching a pattern, trying patterns in order.
pub(crate) fn find_stem(dir: &Path, base: &str, patterns: &[&str]) -> Result<Option<PathBuf>> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .with_context(|| format!("failed to list {}", dir.display()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();

    for pattern in patterns {
        let pattern = pattern.replace("{base}", base);
        if let Some(name) = names.iter().find(|name| wildcard_match(&pattern, name)) {
            return Ok(Some(dir.join(name)));
        }
    }
    Ok(None)
}

/// Matches `name` against a pattern holding at most one `*`.
fn wildcard_match(pattern: &str, name: &str) -> bool {
    match pattern.split_once('*') {
        Some((prefix, suffix)) => {
            name.len() >= prefix.len() + suffix.len()
                && name.starts_with(prefix)
                && name.ends_with(suffix)
        }
        None => pattern == name,
    }
}

fn move_into_place(from: &Path, to: &Path) -> Result<()> {
    if let Some(parent) = to.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    if fs::rename(from, to).is_ok() {
        return Ok(());
    }
    // Different filesystem: copy, then drop the original.
    copy_atomically(from, to)?;
    fs::remove_file(from).with_context(|| format!("failed to remove {}", from.display()))
}
