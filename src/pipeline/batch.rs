use std::collections::HashSet;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use tracing::{info, warn};

use super::conversion::{ConversionParams, convert_file};
use super::embedding::Embedding;

/// Outcome of one file in a batch.
#[derive(Debug)]
pub struct BatchItem {
    pub input: PathBuf,
    pub output: PathBuf,
    pub result: anyhow::Result<()>,
}

fn input_stem(input: &Path) -> String {
    input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "vocal".to_string())
}

/// Output location for `input` inside `output_dir`: `<stem>_converted.wav`.
pub fn converted_path(input: &Path, output_dir: &Path) -> PathBuf {
    output_dir.join(format!("{}_converted.wav", input_stem(input)))
}

/// One distinct output per input. The first file with a given stem keeps
/// `<stem>_converted.wav`; later ones get `<stem>_converted_1.wav`, `_2`, ...
pub fn output_paths(inputs: &[PathBuf], output_dir: &Path) -> Vec<PathBuf> {
    let mut taken = HashSet::new();
    inputs
        .iter()
        .map(|input| {
            let stem = input_stem(input);
            let mut candidate = converted_path(input, output_dir);
            let mut suffix = 1;
            while !taken.insert(candidate.clone()) {
                candidate = output_dir.join(format!("{stem}_converted_{suffix}.wav"));
                suffix += 1;
            }
            candidate
        })
        .collect()
}

/// Converts every vocal against one embedding. Files run in parallel; the
/// stages of each conversion stay sequential. One failure does not stop the
/// others.
pub fn convert_batch(
    inputs: &[PathBuf],
    embedding: &Embedding,
    params: ConversionParams,
    output_dir: &Path,
    sample_rate: u32,
) -> Vec<BatchItem> {
    info!(files = inputs.len(), ?output_dir, "Starting batch conversion");
    let outputs = output_paths(inputs, output_dir);
    let items: Vec<BatchItem> = inputs
        .par_iter()
        .zip(outputs.into_par_iter())
        .map(|(input, output)| {
            let result = convert_file(input, embedding, params, &output, sample_rate).map(|_| ());
            BatchItem {
                input: input.clone(),
                output,
                result,
            }
        })
        .collect();

    let failed = items.iter().filter(|item| item.result.is_err()).count();
    if failed > 0 {
        warn!(failed, total = items.len(), "Batch finished with failures");
    } else {
        info!(total = items.len(), "Batch finished");
    }
    items
}
