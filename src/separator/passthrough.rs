use anyhow::Result;
use tracing::warn;

use super::{SeparationJob, SeparationStrategy};
use crate::audio::file::copy_atomically;

/// Last resort: both stems are byte-for-byte copies of the mix.
pub struct Passthrough;

impl SeparationStrategy for Passthrough {
    fn name(&self) -> &'static str {
        "passthrough"
    }

    fn separate(&self, job: &SeparationJob) -> Result<()> {
        warn!(input = ?job.input, "No separation possible, passing the mix through");
        copy_atomically(&job.input, &job.vocal_output)?;
        copy_atomically(&job.input, &job.instrumental_output)?;
        Ok(())
    }
}
