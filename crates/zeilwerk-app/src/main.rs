// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Zeilwerk — scanned page to per-line transcripts.
//
// Entry point. Initialises logging, parses the command line, builds the
// pipeline configuration, and maps the run outcome onto the exit status:
// 0 on success, 1 on a fatal error, 2 when the page held no text lines.

mod pipeline;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::{error, info, warn};
use zeilwerk_core::config::{BackendSpec, PipelineConfig, ThresholdPolicy};
use zeilwerk_core::error::{Result, ZeilwerkError};
use zeilwerk_core::human_errors::humanize_error;

use pipeline::{OutputPaths, Pipeline, PipelineOutcome};

const EXIT_FATAL: u8 = 1;
const EXIT_NO_LINES: u8 = 2;

#[derive(Parser)]
#[command(name = "zeilwerk")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(
    about = "Segment scanned pages into text lines and recognize them with one or more engines",
    long_about = None
)]
struct Cli {
    /// Pipeline configuration file (JSON); command-line flags override it
    #[arg(long, global = true, env = "ZEILWERK_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process a page image end to end
    Run {
        /// Page image to process
        input: PathBuf,

        /// Write the binarized page here
        #[arg(long)]
        binarized: Option<PathBuf>,

        /// Persist extracted line images into this directory
        #[arg(long = "lines-dir")]
        lines_dir: Option<PathBuf>,

        #[command(flatten)]
        detect: DetectArgs,

        #[command(flatten)]
        recognize: RecognizeArgs,

        #[command(flatten)]
        output: ReportArgs,
    },
    /// Binarize, detect, and extract lines without recognizing them
    Segment {
        /// Page image to process
        input: PathBuf,

        /// Directory receiving the line images
        #[arg(long = "lines-dir")]
        lines_dir: PathBuf,

        /// Write the binarized page here
        #[arg(long)]
        binarized: Option<PathBuf>,

        #[command(flatten)]
        detect: DetectArgs,
    },
    /// Recognize a directory of previously extracted line images
    Recognize {
        /// Directory holding line_NNN image files
        lines_dir: PathBuf,

        #[command(flatten)]
        recognize: RecognizeArgs,

        #[command(flatten)]
        output: ReportArgs,
    },
    /// Print the effective configuration as JSON
    Config,
}

#[derive(Args)]
struct DetectArgs {
    /// Discard detected lines shorter than this many rows
    #[arg(long = "min-line-height")]
    min_line_height: Option<u32>,

    /// How the text/gap threshold is derived from the row profile
    #[arg(long = "threshold-policy", value_enum)]
    threshold_policy: Option<PolicyArg>,

    /// Fraction of the profile maximum used as threshold
    #[arg(long)]
    fraction: Option<f64>,

    /// Multiple of the profile mean used as threshold
    #[arg(long = "mean-multiple")]
    mean_multiple: Option<f64>,

    /// Dilate the ink mask with a 3x3 square before profiling
    #[arg(long)]
    dilate: bool,

    /// Merge lines separated by gaps shorter than --min-line-height
    #[arg(long = "merge-gaps")]
    merge_gaps: bool,

    /// Remove isolated ink specks after binarization
    #[arg(long)]
    despeckle: bool,
}

#[derive(Args)]
struct RecognizeArgs {
    /// Recognition backend: kraken:<model>, ocrs:<model-dir>, or a bare kraken model (repeatable)
    #[arg(long = "backend", short = 'b')]
    backends: Vec<String>,

    /// Backend whose text goes into the flattened transcript
    #[arg(long)]
    primary: Option<String>,

    /// Maximum concurrent recognizer invocations
    #[arg(long, env = "ZEILWERK_WORKERS")]
    workers: Option<usize>,

    /// Per-invocation timeout in milliseconds
    #[arg(long = "timeout-ms")]
    timeout_ms: Option<u64>,

    /// Record lines as unavailable for backends whose model is missing instead of failing
    #[arg(long = "allow-missing-models")]
    allow_missing_models: bool,
}

#[derive(Args)]
struct ReportArgs {
    /// Write the per-line report here (printed to stdout otherwise)
    #[arg(long)]
    report: Option<PathBuf>,

    /// Write the flattened transcript here
    #[arg(long)]
    text: Option<PathBuf>,

    /// Write the full transcript as JSON here
    #[arg(long)]
    json: Option<PathBuf>,
}

#[derive(Clone, Copy, ValueEnum)]
enum PolicyArg {
    FractionOfMax,
    MultipleOfMean,
    MaxOfBoth,
}

impl From<PolicyArg> for ThresholdPolicy {
    fn from(arg: PolicyArg) -> Self {
        match arg {
            PolicyArg::FractionOfMax => Self::FractionOfMax,
            PolicyArg::MultipleOfMean => Self::MultipleOfMean,
            PolicyArg::MaxOfBoth => Self::MaxOfBoth,
        }
    }
}

impl DetectArgs {
    fn apply(&self, config: &mut PipelineConfig) {
        let detect = &mut config.detect;
        if let Some(rows) = self.min_line_height {
            detect.min_line_height = rows;
        }
        if let Some(policy) = self.threshold_policy {
            detect.threshold_policy = policy.into();
        }
        if let Some(fraction) = self.fraction {
            detect.fraction = fraction;
        }
        if let Some(multiple) = self.mean_multiple {
            detect.mean_multiple = multiple;
        }
        detect.dilate |= self.dilate;
        detect.merge_small_gaps |= self.merge_gaps;
        config.normalize.despeckle |= self.despeckle;
    }
}

impl RecognizeArgs {
    fn apply(&self, config: &mut PipelineConfig) -> Result<()> {
        if !self.backends.is_empty() {
            config.backends = self
                .backends
                .iter()
                .map(|shorthand| BackendSpec::parse(shorthand))
                .collect::<Result<_>>()?;
        }
        if let Some(primary) = &self.primary {
            config.primary_backend = Some(primary.clone());
        }
        if let Some(workers) = self.workers {
            config.dispatch.max_workers = workers;
        }
        if let Some(timeout) = self.timeout_ms {
            config.dispatch.timeout_ms = Some(timeout);
        }
        if self.allow_missing_models {
            config.require_models = false;
        }
        Ok(())
    }
}

impl ReportArgs {
    fn paths(&self) -> OutputPaths {
        OutputPaths {
            report: self.report.clone(),
            text: self.text.clone(),
            json: self.json.clone(),
            ..OutputPaths::default()
        }
    }
}

fn base_config(path: Option<&PathBuf>) -> Result<PipelineConfig> {
    match path {
        Some(path) => PipelineConfig::from_json_file(path),
        None => Ok(PipelineConfig::default()),
    }
}

/// Stop starting new recognizer calls on Ctrl-C; in-flight calls finish.
fn cancel_on_ctrl_c(pipeline: &Pipeline) {
    let handle = pipeline.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; finishing in-flight recognition");
            handle.cancel();
        }
    });
}

/// Report a finished run; a report without `--report` goes to stdout.
fn finish(outcome: PipelineOutcome, report: &ReportArgs) -> ExitCode {
    match outcome {
        PipelineOutcome::Completed(transcript) => {
            if report.report.is_none() {
                print!("{}", transcript.render_report());
            }
            ExitCode::SUCCESS
        }
        PipelineOutcome::NoLines => {
            eprintln!("No text lines were detected; nothing was recognized.");
            ExitCode::from(EXIT_NO_LINES)
        }
    }
}

async fn execute(cli: Cli) -> Result<ExitCode> {
    let mut config = base_config(cli.config.as_ref())?;

    match cli.command {
        Commands::Run {
            input,
            binarized,
            lines_dir,
            detect,
            recognize,
            output,
        } => {
            detect.apply(&mut config);
            recognize.apply(&mut config)?;
            let pipeline = Pipeline::new(config)?;
            cancel_on_ctrl_c(&pipeline);

            let outputs = OutputPaths {
                binarized,
                lines_dir,
                ..output.paths()
            };
            let outcome = pipeline.run(&input, &outputs).await?;
            Ok(finish(outcome, &output))
        }
        Commands::Segment {
            input,
            lines_dir,
            binarized,
            detect,
        } => {
            detect.apply(&mut config);
            let pipeline = Pipeline::new(config)?;
            let outputs = OutputPaths {
                binarized,
                lines_dir: Some(lines_dir.clone()),
                ..OutputPaths::default()
            };

            let lines = pipeline.segment(&input, &outputs)?;
            if lines.is_empty() {
                eprintln!("No text lines were detected.");
                return Ok(ExitCode::from(EXIT_NO_LINES));
            }
            println!("{} lines written to {}", lines.len(), lines_dir.display());
            Ok(ExitCode::SUCCESS)
        }
        Commands::Recognize {
            lines_dir,
            recognize,
            output,
        } => {
            recognize.apply(&mut config)?;
            let pipeline = Pipeline::new(config)?;
            cancel_on_ctrl_c(&pipeline);

            let outcome = pipeline.recognize_dir(&lines_dir, &output.paths()).await?;
            Ok(finish(outcome, &output))
        }
        Commands::Config => {
            let pipeline = Pipeline::new(config)?;
            println!("{}", serde_json::to_string_pretty(pipeline.config())?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    info!("Zeilwerk starting");

    match execute(cli).await {
        Ok(code) => code,
        Err(err) => {
            error!(error = %err, "Run failed");
            report_error(&err);
            ExitCode::from(EXIT_FATAL)
        }
    }
}

fn report_error(err: &ZeilwerkError) {
    let human = humanize_error(err);
    eprintln!("error: {human}");
}
