use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

use voice_cover::audio::Audio;
use voice_cover::audio::file::{
    load_audio_from_path, load_mono_resampled, save_audio_to_path, verify_audio_file,
};
use voice_cover::audio::formant::apply_formant_shift;
use voice_cover::audio::mix::mix_stems;
use voice_cover::audio::pitch::{PitchStrategy, extract_pitch};
use voice_cover::config::{EffectPreset, PipelineConfig};
use voice_cover::error::VoiceError;
use voice_cover::pipeline::batch::convert_batch;
use voice_cover::pipeline::{
    ConversionParams, ConversionRequest, TargetVoice, apply_vocal_effects, auto_train,
    convert_with_budget,
};
use voice_cover::separator::{Separator, StemPaths};

#[derive(Parser)]
#[command(name = "voice-cover", version, about = "Signal-processing voice conversion")]
struct Cli {
    /// JSON pipeline configuration
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Working sample rate, overrides the configuration
    #[arg(long, global = true)]
    sample_rate: Option<u32>,

    /// Conversion time budget in seconds, overrides the configuration
    #[arg(long, global = true)]
    budget_secs: Option<u64>,

    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Clone, Copy)]
struct ConversionArgs {
    /// Pitch shift in semitones (-12..=12)
    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    pitch: i32,

    /// Formant shift ratio (0.5..=1.5)
    #[arg(long, default_value_t = 1.0)]
    formant: f32,

    /// Pitch extraction method: pm, harvest or rmvpe
    #[arg(long, default_value_t = PitchStrategy::Rmvpe)]
    method: PitchStrategy,
}

impl ConversionArgs {
    fn params(self) -> Result<ConversionParams> {
        Ok(ConversionParams::new(self.pitch, self.formant, self.method)?)
    }
}

#[derive(Args, Clone)]
struct SeparatorArgs {
    /// External separation program, overrides the configuration
    #[arg(long)]
    separator_program: Option<String>,

    /// Skip the external separation model
    #[arg(long)]
    no_external: bool,

    /// Skip the effect chain on the mid-side vocal estimate
    #[arg(long)]
    no_enhance: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Convert a vocal track toward a target voice
    Convert {
        vocal: PathBuf,
        /// Target voice recording, or a snapshot written by `train`
        target: PathBuf,
        output: PathBuf,
        #[command(flatten)]
        conversion: ConversionArgs,
    },
    /// Split a mix into vocal and instrumental stems
    Separate {
        input: PathBuf,
        vocal_output: PathBuf,
        instrumental_output: PathBuf,
        #[command(flatten)]
        separator: SeparatorArgs,
    },
    /// Preprocess and embed a target voice into a reusable snapshot
    Train { target: PathBuf, output: PathBuf },
    /// Shift the formants of a recording
    Formant {
        input: PathBuf,
        output: PathBuf,
        #[arg(long)]
        ratio: f32,
    },
    /// Report the pitch track of a recording
    Pitch {
        input: PathBuf,
        #[arg(long, default_value_t = PitchStrategy::Rmvpe)]
        method: PitchStrategy,
    },
    /// Mix a vocal and an instrumental stem
    Mix {
        vocal: PathBuf,
        instrumental: PathBuf,
        output: PathBuf,
        #[arg(long, default_value_t = 1.0)]
        vocal_volume: f32,
        #[arg(long, default_value_t = 1.0)]
        instrumental_volume: f32,
        /// Vocal effect preset: none, studio or live
        #[arg(long, default_value_t = EffectPreset::None)]
        effect: EffectPreset,
    },
    /// Separate a song, convert its vocal and mix it back
    Cover {
        song: PathBuf,
        target: PathBuf,
        output: PathBuf,
        /// Directory for intermediate stems, defaults to the output's directory
        #[arg(long)]
        work_dir: Option<PathBuf>,
        #[arg(long, default_value_t = 1.0)]
        vocal_volume: f32,
        #[arg(long, default_value_t = 1.0)]
        instrumental_volume: f32,
        /// Vocal effect preset: none, studio or live
        #[arg(long, default_value_t = EffectPreset::None)]
        effect: EffectPreset,
        #[command(flatten)]
        conversion: ConversionArgs,
        #[command(flatten)]
        separator: SeparatorArgs,
    },
    /// Convert many vocal files against one target voice
    Batch {
        target: PathBuf,
        output_dir: PathBuf,
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
        #[command(flatten)]
        conversion: ConversionArgs,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = match &cli.config {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    };
    if let Some(sample_rate) = cli.sample_rate {
        config.sample_rate = sample_rate;
    }
    if let Some(budget) = cli.budget_secs {
        config.conversion_budget_secs = budget;
    }

    match cli.command {
        Command::Convert {
            vocal,
            target,
            output,
            conversion,
        } => {
            let params = conversion.params()?;
            run_conversion(&config, &vocal, TargetVoice::from_path(&target), params, &output)
                .await?;
        }
        Command::Separate {
            input,
            vocal_output,
            instrumental_output,
            separator,
        } => {
            let stems = run_separation(&config, separator, input, vocal_output, instrumental_output)
                .await?;
            println!(
                "{} -> vocal {}, instrumental {}",
                stems.strategy,
                stems.vocal.display(),
                stems.instrumental.display()
            );
        }
        Command::Train { target, output } => {
            ensure_usable(&target)?;
            let sample_rate = config.sample_rate;
            let snapshot =
                blocking(move || auto_train(&target, &output, sample_rate)).await?;
            println!(
                "Trained snapshot from {} ({} samples)",
                snapshot.source_path.display(),
                snapshot.embedding.sample_count
            );
        }
        Command::Formant {
            input,
            output,
            ratio,
        } => {
            ensure_usable(&input)?;
            let sample_rate = config.sample_rate;
            blocking(move || {
                let audio = load_mono_resampled(&input, sample_rate)?;
                let shifted = apply_formant_shift(audio.channel(0), sample_rate, ratio)?;
                save_audio_to_path(&Audio::mono(sample_rate, shifted), &output)
            })
            .await?;
        }
        Command::Pitch { input, method } => {
            ensure_usable(&input)?;
            let sample_rate = config.sample_rate;
            let track = blocking(move || {
                let audio = load_mono_resampled(&input, sample_rate)?;
                Ok(extract_pitch(audio.channel(0), sample_rate, method))
            })
            .await?;
            match track.mean_voiced_frequency() {
                Some(hz) => println!("{method}: {} frames, mean pitch {hz:.1} Hz", track.len()),
                None => println!("{method}: {} frames, no pitch found", track.len()),
            }
        }
        Command::Mix {
            vocal,
            instrumental,
            output,
            vocal_volume,
            instrumental_volume,
            effect,
        } => {
            ensure_usable(&vocal)?;
            ensure_usable(&instrumental)?;
            let sample_rate = config.sample_rate;
            let effected =
                output.with_file_name(format!("{}_effected_vocals.wav", file_stem_or(&output, "mix")));
            blocking(move || {
                let vocal = with_effect(&vocal, &effected, effect, sample_rate)?;
                mix_files(&vocal, &instrumental, &output, vocal_volume, instrumental_volume)
            })
            .await?;
        }
        Command::Cover {
            song,
            target,
            output,
            work_dir,
            vocal_volume,
            instrumental_volume,
            effect,
            conversion,
            separator,
        } => {
            let params = conversion.params()?;
            let work_dir = work_dir.unwrap_or_else(|| {
                output
                    .parent()
                    .filter(|p| !p.as_os_str().is_empty())
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| PathBuf::from("."))
            });
            let base = file_stem_or(&song, "song");
            let vocal_stem = work_dir.join(format!("{base}_vocals.wav"));
            let instrumental_stem = work_dir.join(format!("{base}_instrumental.wav"));
            let converted = work_dir.join(format!("{base}_converted_vocals.wav"));
            let effected = work_dir.join(format!("{base}_effected_vocals.wav"));

            info!(?song, "Step 1/4: separating");
            let stems =
                run_separation(&config, separator, song, vocal_stem, instrumental_stem).await?;
            info!("Step 2/4: converting vocal");
            run_conversion(
                &config,
                &stems.vocal,
                TargetVoice::from_path(&target),
                params,
                &converted,
            )
            .await?;
            info!(%effect, "Step 3/4: applying vocal effects");
            let sample_rate = config.sample_rate;
            let vocal =
                blocking(move || with_effect(&converted, &effected, effect, sample_rate)).await?;
            info!("Step 4/4: mixing");
            let instrumental = stems.instrumental.clone();
            let mixed = output.clone();
            blocking(move || {
                mix_files(&vocal, &instrumental, &mixed, vocal_volume, instrumental_volume)
            })
            .await?;
            println!("Cover written to {}", output.display());
        }
        Command::Batch {
            target,
            output_dir,
            inputs,
            conversion,
        } => {
            let params = conversion.params()?;
            let sample_rate = config.sample_rate;
            let target = TargetVoice::from_path(&target);
            let items = blocking(move || {
                let embedding = target.resolve(sample_rate)?;
                Ok(convert_batch(&inputs, &embedding, params, &output_dir, sample_rate))
            })
            .await?;
            let mut failed = 0;
            for item in &items {
                match &item.result {
                    Ok(()) => println!("{} -> {}", item.input.display(), item.output.display()),
                    Err(e) => {
                        failed += 1;
                        println!("{} failed: {e:#}", item.input.display());
                    }
                }
            }
            if failed > 0 {
                bail!("{failed} of {} conversions failed", items.len());
            }
        }
    }
    Ok(())
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let subscriber = fmt().with_env_filter(filter).finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

/// Runs CPU- or process-bound work off the async executor.
async fn blocking<T, F>(work: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .context("worker thread panicked")?
}

fn ensure_usable(path: &Path) -> Result<()> {
    if !path.exists() {
        return Err(VoiceError::MissingInput(path.to_path_buf()).into());
    }
    if !verify_audio_file(path) {
        bail!("{} is not usable audio", path.display());
    }
    Ok(())
}

async fn run_separation(
    config: &PipelineConfig,
    args: SeparatorArgs,
    input: PathBuf,
    vocal_output: PathBuf,
    instrumental_output: PathBuf,
) -> Result<StemPaths> {
    ensure_usable(&input)?;
    let mut separator_config = config.separator.clone();
    if let Some(program) = args.separator_program {
        separator_config.program = Some(program);
    }
    if args.no_external {
        separator_config.program = None;
    }
    if args.no_enhance {
        separator_config.enhance_vocals = false;
    }
    let separator = Separator::from_config(&separator_config);
    info!(strategies = ?separator.strategy_names(), "Separating stems");
    blocking(move || separator.separate(&input, &vocal_output, &instrumental_output)).await
}

async fn run_conversion(
    config: &PipelineConfig,
    vocal: &Path,
    target: TargetVoice,
    params: ConversionParams,
    output: &Path,
) -> Result<()> {
    ensure_usable(vocal)?;
    let sample_rate = config.sample_rate;
    let vocal_path = vocal.to_path_buf();
    let request = blocking(move || {
        let embedding = target.resolve(sample_rate)?;
        let vocal = load_mono_resampled(&vocal_path, sample_rate)?;
        Ok(ConversionRequest::new(
            vocal.channel(0).to_vec(),
            sample_rate,
            embedding,
            params,
        )?)
    })
    .await?;

    let conversion = convert_with_budget(request, config.conversion_budget())
        .await
        .with_context(|| format!("failed to convert {}", vocal.display()))?;
    save_audio_to_path(&conversion.to_audio(), output)?;
    if !verify_audio_file(output) {
        warn!(?output, "Converted output failed verification");
        bail!("converted output {} failed verification", output.display());
    }
    info!(
        ?output,
        duration = conversion.duration_secs(),
        "Conversion complete"
    );
    Ok(())
}

/// Applies `preset` to `vocal` into `effected`. Returns the vocal to mix.
fn with_effect(
    vocal: &Path,
    effected: &Path,
    preset: EffectPreset,
    sample_rate: u32,
) -> Result<PathBuf> {
    if preset == EffectPreset::None {
        return Ok(vocal.to_path_buf());
    }
    apply_vocal_effects(vocal, effected, preset, sample_rate)?;
    Ok(effected.to_path_buf())
}

fn file_stem_or(path: &Path, fallback: &str) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| fallback.to_string())
}

fn mix_files(
    vocal: &Path,
    instrumental: &Path,
    output: &Path,
    vocal_volume: f32,
    instrumental_volume: f32,
) -> Result<()> {
    let vocal = load_audio_from_path(vocal)?;
    let instrumental = load_audio_from_path(instrumental)?;
    let mix = mix_stems(&vocal, &instrumental, vocal_volume, instrumental_volume)?;
    save_audio_to_path(&mix, output)
}
