use clap::error::ErrorKind;
use clap::{Args, Parser};
use jproc_core::merge::json_files_in;
use jproc_core::{Engine, MergeError, Mode, Pipeline, PipelineError, Summary, merge_files};
use std::ffi::OsString;
use std::fs;
use std::io::{self, IsTerminal};
use std::path::PathBuf;
use std::time::Instant;
use thiserror::Error;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Overrides the log filter while `--verbose` is on, `EnvFilter` syntax.
pub const LOG_ENV: &str = "JPROC_LOG";

#[derive(Debug, Error)]
pub enum CliError {
    #[error("{0}")]
    Usage(clap::Error),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Merge(#[from] MergeError),

    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to serialize merged document: {0}")]
    Serialize(#[source] serde_json::Error),
}

/// Apply a steps file to a JSON document.
#[derive(Debug, Clone, Parser)]
#[command(name = "jproc", version)]
#[command(about = "Apply a declarative list of steps to a JSON document")]
pub struct Cli {
    /// Steps document: `{ "steps": [ ... ] }`.
    pub steps_file: PathBuf,

    pub input_file: PathBuf,

    pub output_file: PathBuf,

    /// Transform each top-level JSON value of the input as it is read.
    #[arg(short, long)]
    pub stream: bool,

    /// Log every step and its effect count to stderr.
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    pub fn mode(&self) -> Mode {
        if self.stream { Mode::Stream } else { Mode::Whole }
    }
}

/// Deep-merge JSON files into one document.
#[derive(Debug, Clone, Parser)]
#[command(name = "jproc-merge", version)]
#[command(about = "Deep-merge JSON files: objects merge, arrays concatenate, scalars overwrite")]
pub struct MergeCli {
    #[command(flatten)]
    pub inputs: MergeInputs,

    /// Where to write the merged document.
    #[arg(short, long)]
    pub output: PathBuf,

    /// Stamp every merged object with `_source_` naming its file.
    #[arg(long)]
    pub nameit: bool,

    /// Log progress to stderr.
    #[arg(short, long)]
    pub verbose: bool,
}

#[derive(Debug, Clone, Args)]
#[group(required = true, multiple = false)]
pub struct MergeInputs {
    /// Input files, merged in the order given.
    #[arg(short = 'f', long = "files", num_args = 1..)]
    pub files: Vec<PathBuf>,

    /// Directory whose `*.json` files are merged in name order.
    pub dir: Option<PathBuf>,
}

pub fn run_from_env() -> Result<(), CliError> {
    run_from_args(std::env::args_os())
}

pub fn run_from_args<I, T>(args: I) -> Result<(), CliError>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let Some(cli) = parse_args::<Cli, _, _>(args)? else {
        return Ok(());
    };
    init_tracing(cli.verbose);
    run(&cli).map(|_| ())
}

/// Run one transformation, no argument parsing or logging setup.
pub fn run(cli: &Cli) -> Result<Summary, CliError> {
    let started = Instant::now();
    let pipeline = Pipeline::from_steps_file(Engine::new(), &cli.steps_file)?;
    let summary = pipeline.process_file(&cli.input_file, &cli.output_file, cli.mode())?;
    info!(
        chunks = summary.chunks(),
        effects = summary.total_effects(),
        failed_steps = summary.failed_steps(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "processing complete"
    );
    Ok(summary)
}

pub fn run_merge_from_env() -> Result<(), CliError> {
    run_merge_from_args(std::env::args_os())
}

pub fn run_merge_from_args<I, T>(args: I) -> Result<(), CliError>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let Some(cli) = parse_args::<MergeCli, _, _>(args)? else {
        return Ok(());
    };
    init_tracing(cli.verbose);
    run_merge(&cli)
}

pub fn run_merge(cli: &MergeCli) -> Result<(), CliError> {
    let files = match &cli.inputs.dir {
        Some(dir) => json_files_in(dir)?,
        None => cli.inputs.files.clone(),
    };
    let merged = merge_files(&files, cli.nameit)?;
    let text = serde_json::to_string_pretty(&merged).map_err(CliError::Serialize)?;
    fs::write(&cli.output, text).map_err(|source| CliError::Write {
        path: cli.output.clone(),
        source,
    })?;
    println!("Merged JSON written to {}", cli.output.display());
    Ok(())
}

/// Print `err` to stderr and exit with status 1.
pub fn exit_with(err: CliError) -> ! {
    match err {
        CliError::Usage(usage) => eprint!("{usage}"),
        other => eprintln!("error: {other}"),
    }
    std::process::exit(1)
}

/// `Ok(None)` after help or version output has been printed.
fn parse_args<P, I, T>(args: I) -> Result<Option<P>, CliError>
where
    P: Parser,
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    match P::try_parse_from(args) {
        Ok(parsed) => Ok(Some(parsed)),
        Err(err) if matches!(err.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            err.print().map_err(|source| CliError::Write {
                path: PathBuf::from("<stdout>"),
                source,
            })?;
            Ok(None)
        }
        Err(err) => Err(CliError::Usage(err)),
    }
}

/// Diagnostics are off unless `verbose`; then `info`, or whatever
/// `JPROC_LOG` asks for.
fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"))
    } else {
        EnvFilter::new("off")
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_ansi(io::stderr().is_terminal())
        .with_target(false)
        .try_init();
}
