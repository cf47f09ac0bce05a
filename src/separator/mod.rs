//! Vocal/instrumental separation with an ordered fallback chain.
//!
//! Strategies run in order until one succeeds. Each runs inside its own
//! failure boundary: an error or a panic moves on to the next strategy. The
//! error of the last strategy is returned as-is.

pub mod external;
pub mod mid_side;
pub mod passthrough;

pub use external::ExternalModel;
pub use mid_side::MidSide;
pub use passthrough::Passthrough;

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};
use tracing::{info, warn};

use crate::config::SeparatorConfig;
use crate::error::VoiceError;

/// Input mix and the two stem files to produce.
#[derive(Debug, Clone)]
pub struct SeparationJob {
    pub input: PathBuf,
    pub vocal_output: PathBuf,
    pub instrumental_output: PathBuf,
}

impl SeparationJob {
    pub fn new(input: &Path, vocal_output: &Path, instrumental_output: &Path) -> Self {
        Self {
            input: input.to_path_buf(),
            vocal_output: vocal_output.to_path_buf(),
            instrumental_output: instrumental_output.to_path_buf(),
        }
    }

    /// Input file name without extension, used to name intermediate files.
    pub fn base_name(&self) -> String {
        self.input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "mix".to_string())
    }
}

/// Produced stems and the strategy that produced them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StemPaths {
    pub vocal: PathBuf,
    pub instrumental: PathBuf,
    pub strategy: &'static str,
}

/// One way of turning a mix into two stem files.
pub trait SeparationStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Writes both stem files of `job`, or fails.
    fn separate(&self, job: &SeparationJob) -> Result<()>;
}

pub struct Separator {
    strategies: Vec<Box<dyn SeparationStrategy>>,
}

impl Separator {
    pub fn new(strategies: Vec<Box<dyn SeparationStrategy>>) -> Self {
        Self { strategies }
    }

    /// External model (when configured), then mid-side, then pass-through.
    pub fn from_config(config: &SeparatorConfig) -> Self {
        let mut strategies: Vec<Box<dyn SeparationStrategy>> = Vec::new();
        if let Some(program) = &config.program {
            strategies.push(Box::new(ExternalModel::new(
                program,
                &config.model,
                config.timeout(),
            )));
        }
        strategies.push(Box::new(MidSide::new(config.enhance_vocals)));
        strategies.push(Box::new(Passthrough));
        Self::new(strategies)
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    pub fn separate(
        &self,
        input: &Path,
        vocal_output: &Path,
        instrumental_output: &Path,
    ) -> Result<StemPaths> {
        if !input.exists() {
            return Err(VoiceError::MissingInput(input.to_path_buf()).into());
        }
        let job = SeparationJob::new(input, vocal_output, instrumental_output);
        let mut last_error = None;

        for strategy in &self.strategies {
            info!(strategy = strategy.name(), input = ?input, "Trying separation strategy");
            let outcome = catch_unwind(AssertUnwindSafe(|| strategy.separate(&job)))
                .unwrap_or_else(|_| Err(anyhow!("{} panicked", strategy.name())));
            match outcome {
                Ok(()) => {
                    info!(
                        strategy = strategy.name(),
                        vocal = ?job.vocal_output,
                        instrumental = ?job.instrumental_output,
                        "Separation complete"
                    );
                    return Ok(StemPaths {
                        vocal: job.vocal_output.clone(),
                        instrumental: job.instrumental_output.clone(),
                        strategy: strategy.name(),
                    });
                }
                Err(e) => {
                    warn!(strategy = strategy.name(), "Separation strategy failed: {e:#}");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| anyhow!("no separation strategy configured")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Failing(&'static str, Arc<AtomicUsize>);

    impl SeparationStrategy for Failing {
        fn name(&self) -> &'static str {
            self.0
        }

        fn separate(&self, _job: &SeparationJob) -> Result<()> {
            self.1.fetch_add(1, Ordering::SeqCst);
            Err(anyhow!("{} is broken", self.0))
        }
    }

    struct Panicking;

    impl SeparationStrategy for Panicking {
        fn name(&self) -> &'static str {
            "panicking"
        }

        fn separate(&self, _job: &SeparationJob) -> Result<()> {
            panic!("strategy defect")
        }
    }

    struct Succeeding(Arc<AtomicUsize>);

    impl SeparationStrategy for Succeeding {
        fn name(&self) -> &'static str {
            "ok"
        }

        fn separate(&self, _job: &SeparationJob) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn existing_input() -> PathBuf {
        let dir = std::env::temp_dir().join("voice_cover_chain");
        std::fs::create_dir_all(&dir).unwrap();
        let input = dir.join("mix.wav");
        std::fs::write(&input, b"not really audio").unwrap();
        input
    }

    #[test]
    fn chain_order_follows_config() {
        let mut config = SeparatorConfig::default();
        assert_eq!(
            Separator::from_config(&config).strategy_names(),
            vec!["external-model", "mid-side", "passthrough"]
        );
        config.program = None;
        assert_eq!(
            Separator::from_config(&config).strategy_names(),
            vec!["mid-side", "passthrough"]
        );
    }

    #[test]
    fn each_strategy_runs_at_most_once_until_success() {
        let calls = Arc::new(AtomicUsize::new(0));
        let after = Arc::new(AtomicUsize::new(0));
        let separator = Separator::new(vec![
            Box::new(Failing("a", calls.clone())),
            Box::new(Panicking),
            Box::new(Succeeding(after.clone())),
            Box::new(Failing("never", calls.clone())),
        ]);
        let input = existing_input();
        let stems = separator
            .separate(&input, &input.with_file_name("v.wav"), &input.with_file_name("i.wav"))
            .unwrap();
        assert_eq!(stems.strategy, "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(after.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn last_error_propagates() {
        let separator = Separator::new(vec![Box::new(Failing("only", Arc::default()))]);
        let input = existing_input();
        let err = separator.separate(&input, &input, &input).unwrap_err();
        assert!(err.to_string().contains("only is broken"));
    }

    #[test]
    fn missing_input_fails_fast() {
        let calls = Arc::new(AtomicUsize::new(0));
        let separator = Separator::new(vec![Box::new(Succeeding(calls.clone()))]);
        let missing = std::env::temp_dir().join("voice_cover_chain_missing.wav");
        let err = separator.separate(&missing, &missing, &missing).unwrap_err();
        assert!(matches!(err.downcast_ref::<VoiceError>(), Some(VoiceError::MissingInput(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
