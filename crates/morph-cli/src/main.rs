//! `morph`: fuzz, replay and shrink modules from the command line.
//!
//! Modules are read and written in the binary encoding, or as JSON when
//! the file name ends in `.json`. A run writes the output module plus its
//! transformation log next to it, as `<out>.transformations` (binary) and
//! `<out>.transformations_json`.

mod logging;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use morph_core::{FuzzerConfig, ReplayConfig, ShrinkerConfig};
use morph_fuzz::{FactSequence, Fuzzer, FuzzerStatus, ReplayStatus, Replayer, Shrinker, ShrinkerStatus, TransformationSequence};
use morph_ir::Module;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitCode, Stdio};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "morph")]
#[command(about = "Semantics-preserving mutation of IR modules")]
struct Cli {
    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Apply a random sequence of transformations
    Fuzz {
        input: PathBuf,

        #[arg(short, long)]
        output: PathBuf,

        /// Overrides the seed from --config
        #[arg(long)]
        seed: Option<u64>,

        /// Facts known about the input, as JSON
        #[arg(long)]
        facts: Option<PathBuf>,

        /// Modules whose functions may be copied into the input
        #[arg(long, num_args = 1..)]
        donors: Vec<PathBuf>,

        /// Fuzzer configuration, as JSON
        #[arg(long)]
        config: Option<PathBuf>,

        #[arg(long)]
        validate_after_each_pass: bool,
    },

    /// Re-apply a transformation log
    Replay {
        input: PathBuf,

        #[arg(long)]
        transformations: PathBuf,

        #[arg(short, long)]
        output: PathBuf,

        #[arg(long)]
        facts: Option<PathBuf>,

        #[arg(long)]
        validate_after_each_transformation: bool,
    },

    /// Remove transformations while an interestingness test keeps passing
    Shrink {
        input: PathBuf,

        #[arg(long)]
        transformations: PathBuf,

        /// Called with the path of a candidate module; exit status 0 means
        /// interesting
        #[arg(long)]
        interestingness: PathBuf,

        #[arg(short, long)]
        output: PathBuf,

        #[arg(long)]
        facts: Option<PathBuf>,

        #[arg(long, default_value_t = ShrinkerConfig::default().step_limit)]
        step_limit: u32,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init_logging(cli.log_json);

    match run(cli.command) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Returns whether the command completed normally.
fn run(command: Commands) -> Result<bool> {
    match command {
        Commands::Fuzz {
            input,
            output,
            seed,
            facts,
            donors,
            config,
            validate_after_each_pass,
        } => {
            let mut config = match config {
                Some(path) => {
                    let text = fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
                    serde_json::from_str::<FuzzerConfig>(&text)
                        .with_context(|| format!("parsing {}", path.display()))?
                }
                None => FuzzerConfig::default(),
            };
            if let Some(seed) = seed {
                config.seed = seed;
            }
            config.validate_after_each_pass |= validate_after_each_pass;

            let module = read_module(&input)?;
            let facts = read_facts(facts.as_deref())?;
            let donors = donors.iter().map(|path| read_module(path)).collect::<Result<Vec<_>>>()?;
            info!(input = %input.display(), seed = config.seed, donors = donors.len(), "Fuzzing");

            let outcome = Fuzzer::new(config).with_donors(donors).run(&module, &facts)?;
            write_module(&output, &outcome.module)?;
            write_log(&output, &outcome.transformations)?;
            match outcome.status {
                FuzzerStatus::Complete => Ok(true),
                FuzzerStatus::InitialModuleInvalid { reason } => bail!("input module is invalid: {}", reason),
                FuzzerStatus::PassLedToInvalidModule { pass, reason } => {
                    warn!(pass = %pass, "Fuzzing stopped, the log reproduces the invalid module: {}", reason);
                    Ok(false)
                }
            }
        }

        Commands::Replay {
            input,
            transformations,
            output,
            facts,
            validate_after_each_transformation,
        } => {
            let module = read_module(&input)?;
            let facts = read_facts(facts.as_deref())?;
            let log = read_log(&transformations)?;
            let outcome = Replayer::new(ReplayConfig {
                validate_after_each_transformation,
            })
            .replay(&module, &facts, &log)?;
            write_module(&output, &outcome.module)?;
            write_log(&output, &outcome.transformations)?;
            match outcome.status {
                ReplayStatus::Complete => Ok(true),
                ReplayStatus::InitialModuleInvalid { reason } => bail!("input module is invalid: {}", reason),
                ReplayStatus::TransformationLedToInvalidModule { index, reason } => {
                    warn!(index, "Replay stopped at an invalid module: {}", reason);
                    Ok(false)
                }
            }
        }

        Commands::Shrink {
            input,
            transformations,
            interestingness,
            output,
            facts,
            step_limit,
        } => {
            let module = read_module(&input)?;
            let facts = read_facts(facts.as_deref())?;
            let log = read_log(&transformations)?;
            let scratch = tempfile::tempdir().context("creating scratch directory")?;
            let outcome = Shrinker::new(ShrinkerConfig { step_limit }).shrink(&module, &facts, &log, |candidate, attempt| {
                match is_interesting(&interestingness, scratch.path(), candidate, attempt) {
                    Ok(interesting) => interesting,
                    Err(e) => {
                        warn!(attempt, "Interestingness test failed to run: {:#}", e);
                        false
                    }
                }
            })?;
            write_module(&output, &outcome.module)?;
            write_log(&output, &outcome.transformations)?;
            info!(status = ?outcome.status, remaining = outcome.transformations.len(), "Shrinking finished");
            match outcome.status {
                ShrinkerStatus::Complete | ShrinkerStatus::StepLimitReached => Ok(true),
                ShrinkerStatus::InitialBinaryNotInteresting => bail!("the unshrunk module is not interesting"),
                ShrinkerStatus::InitialModuleInvalid => bail!("input module is invalid"),
            }
        }
    }
}

fn is_interesting(script: &Path, scratch: &Path, module: &Module, attempt: u32) -> Result<bool> {
    let candidate = scratch.join(format!("attempt_{}.morph", attempt));
    fs::write(&candidate, module.to_bytes()?)?;
    let status = Command::new(script)
        .arg(&candidate)
        .stdout(Stdio::null())
        .status()
        .with_context(|| format!("running {}", script.display()))?;
    fs::remove_file(&candidate)?;
    Ok(status.success())
}

fn is_json(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "json")
}

fn read_module(path: &Path) -> Result<Module> {
    let module = if is_json(path) {
        Module::from_json(&fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?)
    } else {
        Module::from_bytes(&fs::read(path).with_context(|| format!("reading {}", path.display()))?)
    };
    module.with_context(|| format!("decoding module {}", path.display()))
}

fn write_module(path: &Path, module: &Module) -> Result<()> {
    if is_json(path) {
        fs::write(path, module.to_json()?)?;
    } else {
        fs::write(path, module.to_bytes()?)?;
    }
    info!(output = %path.display(), instructions = module.instruction_count(), "Wrote module");
    Ok(())
}

fn read_facts(path: Option<&Path>) -> Result<FactSequence> {
    let Some(path) = path else {
        return Ok(FactSequence::default());
    };
    let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    FactSequence::from_json(&text).with_context(|| format!("parsing facts {}", path.display()))
}

/// Accepts either log encoding.
fn read_log(path: &Path) -> Result<TransformationSequence> {
    let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    match TransformationSequence::from_bytes(&bytes) {
        Ok(log) => Ok(log),
        Err(_) => {
            let text = String::from_utf8(bytes).context("log is neither binary nor UTF-8 JSON")?;
            TransformationSequence::from_json(&text).with_context(|| format!("parsing log {}", path.display()))
        }
    }
}

fn log_path(output: &Path, suffix: &str) -> PathBuf {
    let mut name = output.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

fn write_log(output: &Path, log: &TransformationSequence) -> Result<()> {
    fs::write(log_path(output, ".transformations"), log.to_bytes()?)?;
    fs::write(log_path(output, ".transformations_json"), log.to_json()?)?;
    Ok(())
}
