//! fall-audit CLI.

// Allow print_stdout/stderr in CLI binary (needed for user output)
#![allow(clippy::print_stdout)]
#![allow(clippy::print_stderr)]

use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand};
use fall_audit::config::{AuditConfig, default_config_path};
use fall_audit::io::{self, CsvNoteOptions, NoteColumn};
use fall_audit::observability::{self, LoggingConfig};
use fall_audit::{
    BatchRunner, CancellationToken, InferenceBackend, Note, ProcessInvoker, ProgressSink,
    PromptChannel, RowProgress, RowState,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

/// fall-audit - screen clinical progress notes for fall incidents.
#[derive(Parser)]
#[command(name = "fall-audit")]
#[command(about = "Screen clinical progress notes for fall incidents with a local LLM")]
#[command(version)]
struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Screen every note in a CSV file and write the verdicts to another.
    Run(RunArgs),

    /// Resolve settings and check the inference executable and model.
    Check(InferenceArgs),

    /// Print the prompt built for a note.
    Prompt {
        /// The note text.
        note: String,

        /// Notes longer than this many characters are truncated.
        #[arg(long)]
        max_note_chars: Option<usize>,
    },

    /// Screen a single note and print the verdict.
    Classify {
        /// The note text.
        note: String,

        #[command(flatten)]
        inference: InferenceArgs,
    },

    /// Show or change the configuration file.
    Config {
        /// Print the resolved configuration.
        #[arg(long)]
        show: bool,

        /// Record the folder holding the bundled executable and weights.
        #[arg(long, value_name = "DIR")]
        set_brain_dir: Option<PathBuf>,
    },
}

/// Arguments for `run`.
#[derive(Args)]
struct RunArgs {
    /// Input CSV of progress notes.
    #[arg(short, long)]
    input: PathBuf,

    /// Output CSV for the verdicts.
    #[arg(short, long)]
    output: PathBuf,

    /// Use only the column with this header as the note.
    #[arg(long, conflicts_with = "column_index")]
    column: Option<String>,

    /// Use only the column at this zero-based index as the note.
    #[arg(long)]
    column_index: Option<usize>,

    /// Treat the first row as a header instead of a note (implied by --column).
    #[arg(long)]
    headers: bool,

    /// Write a JSON summary of the run to this path.
    #[arg(long, value_name = "PATH")]
    summary_json: Option<PathBuf>,

    /// Do not print per-note progress.
    #[arg(short, long)]
    quiet: bool,

    #[command(flatten)]
    inference: InferenceArgs,
}

/// Overrides for inference settings.
#[derive(Args)]
struct InferenceArgs {
    /// Per-note inference budget in milliseconds.
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Notes longer than this many characters are truncated.
    #[arg(long)]
    max_note_chars: Option<usize>,

    /// Path to the inference executable.
    #[arg(long)]
    executable: Option<PathBuf>,

    /// Path to the model weights.
    #[arg(long)]
    model: Option<PathBuf>,

    /// Folder holding the bundled executable and weights.
    #[arg(long)]
    brain_dir: Option<PathBuf>,

    /// Pass the prompt on standard input instead of as an argument.
    #[arg(long)]
    stdin_prompt: bool,
}

impl InferenceArgs {
    fn apply(&self, config: &mut AuditConfig) {
        if let Some(timeout_ms) = self.timeout_ms {
            config.inference.timeout_ms = Some(timeout_ms);
        }
        if let Some(max) = self.max_note_chars {
            config.prompt.max_note_chars = Some(max);
        }
        if let Some(executable) = &self.executable {
            config.inference.executable = Some(executable.clone());
        }
        if let Some(model) = &self.model {
            config.inference.model = Some(model.clone());
        }
        if let Some(brain_dir) = &self.brain_dir {
            config.inference.brain_dir = Some(brain_dir.clone());
        }
        if self.stdin_prompt {
            config.inference.prompt_channel = PromptChannel::Stdin;
        }
    }
}

/// Prints one line per completed note to stderr.
struct StderrProgress;

impl ProgressSink for StderrProgress {
    fn on_row(&mut self, progress: &RowProgress<'_>) {
        let marker = if progress.state == RowState::Errored {
            " (inference error)"
        } else {
            ""
        };
        eprintln!(
            "[{}/{}] {} -> {}{marker}",
            progress.completed(),
            progress.total,
            progress.note_preview,
            progress.verdict.as_output(),
        );
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e:#}");
            return ExitCode::FAILURE;
        },
    };

    if let Err(e) = observability::init(LoggingConfig::from_settings(&config.logging, cli.verbose))
    {
        eprintln!("Failed to initialize logging: {e}");
        return ExitCode::FAILURE;
    }

    match run_command(cli, config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        },
    }
}

/// Loads the config file and applies environment overrides.
fn load_config(path: Option<&Path>) -> anyhow::Result<AuditConfig> {
    let config = match path {
        Some(path) => AuditConfig::load_from_file(path)?,
        None => AuditConfig::load_default()?,
    };
    Ok(config.with_env_overrides()?)
}

/// Runs the selected command.
fn run_command(cli: Cli, mut config: AuditConfig) -> anyhow::Result<()> {
    match cli.command {
        Commands::Run(args) => {
            args.inference.apply(&mut config);
            cmd_run(&config, &args)
        },
        Commands::Check(args) => {
            args.apply(&mut config);
            cmd_check(&config)
        },
        Commands::Prompt {
            note,
            max_note_chars,
        } => {
            if max_note_chars.is_some() {
                config.prompt.max_note_chars = max_note_chars;
            }
            cmd_prompt(&config, note)
        },
        Commands::Classify { note, inference } => {
            inference.apply(&mut config);
            cmd_classify(&config, note)
        },
        Commands::Config {
            show,
            set_brain_dir,
        } => cmd_config(cli.config.as_deref(), &config, show, set_brain_dir.as_deref()),
    }
}

/// Builds a runner from resolved configuration.
fn build_runner(config: &AuditConfig) -> anyhow::Result<BatchRunner<ProcessInvoker>> {
    let settings = config.inference_settings()?;
    let timeout = config.row_timeout()?;
    let prompt = config.prompt_builder()?;
    Ok(BatchRunner::new(ProcessInvoker::new(settings), prompt, timeout))
}

/// Screens a CSV file.
fn cmd_run(config: &AuditConfig, args: &RunArgs) -> anyhow::Result<()> {
    io::require_csv_extension(&args.output, "output")?;

    let options = CsvNoteOptions {
        column: match (&args.column, args.column_index) {
            (Some(name), _) => NoteColumn::Named(name.clone()),
            (None, Some(index)) => NoteColumn::Index(index),
            (None, None) => NoteColumn::AllJoined,
        },
        has_headers: args.headers || args.column.is_some(),
    };
    let notes = io::read_notes(&args.input, &options)
        .with_context(|| format!("reading notes from {}", args.input.display()))?;
    let runner = build_runner(config)?;

    let cancel = CancellationToken::new();
    let handler_token = cancel.clone();
    ctrlc::set_handler(move || {
        if handler_token.is_cancelled() {
            eprintln!("Interrupted again, exiting without writing results");
            std::process::exit(130);
        }
        eprintln!("Stopping after the current note (press Ctrl-C again to abort)");
        handler_token.cancel();
    })
    .context("installing Ctrl-C handler")?;

    eprintln!("Screening {} notes from {}", notes.len(), args.input.display());
    let report = if args.quiet {
        runner.process(&notes, &mut fall_audit::NoProgress, &cancel)?
    } else {
        runner.process(&notes, &mut StderrProgress, &cancel)?
    };

    io::write_results(&args.output, &report.rows)
        .with_context(|| format!("writing results to {}", args.output.display()))?;
    if let Some(path) = &args.summary_json {
        io::write_summary_json(path, &report.summary())
            .with_context(|| format!("writing summary to {}", path.display()))?;
    }

    let counts = report.counts();
    println!(
        "Processed {} of {} notes: {} falls, {} no falls, {} unparseable ({} inference errors)",
        report.rows.len(),
        report.total,
        counts.falls,
        counts.no_falls,
        counts.unparseable,
        counts.errored,
    );
    if let fall_audit::BatchStatus::Cancelled { remaining } = report.status {
        println!("Cancelled: {remaining} notes were not processed");
    }
    println!("Results written to {}", args.output.display());
    Ok(())
}

/// Prints resolved settings and runs the setup preflight.
fn cmd_check(config: &AuditConfig) -> anyhow::Result<()> {
    let settings = config.inference_settings()?;
    println!("Executable:   {}", settings.executable.display());
    match &settings.model {
        Some(model) => println!("Model:        {}", model.display()),
        None => println!("Model:        (none)"),
    }
    println!("Prompt via:   {:?}", settings.prompt_channel);
    println!("Temperature:  {}", settings.temperature);
    println!("Arguments:    {}", settings.args.join(" "));
    println!("Row timeout:  {:?}", config.row_timeout()?);
    println!(
        "Max note len: {}",
        config.prompt_builder()?.max_note_chars()
    );

    ProcessInvoker::new(settings).preflight()?;
    println!("Inference setup OK");
    Ok(())
}

/// Prints the prompt for a note.
fn cmd_prompt(config: &AuditConfig, note: String) -> anyhow::Result<()> {
    let request = config.prompt_builder()?.build(&Note::new(note));
    print!("{}", request.text());
    if request.was_truncated() {
        eprintln!("(note was truncated)");
    }
    Ok(())
}

/// Screens one note.
fn cmd_classify(config: &AuditConfig, note: String) -> anyhow::Result<()> {
    let runner = build_runner(config)?;
    runner.backend().preflight()?;

    let row = runner.classify(0, &Note::new(note));
    if row.state == RowState::Errored {
        eprintln!("Inference failed");
    }
    println!("{}", row.verdict.as_output());
    Ok(())
}

/// Shows or updates the configuration file.
fn cmd_config(
    path: Option<&Path>,
    config: &AuditConfig,
    show: bool,
    set_brain_dir: Option<&Path>,
) -> anyhow::Result<()> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => default_config_path().context("no config directory available")?,
    };

    if let Some(brain_dir) = set_brain_dir {
        AuditConfig::save_brain_dir(&path, brain_dir)?;
        println!("Brain folder set to {} in {}", brain_dir.display(), path.display());
        return Ok(());
    }
    if !show {
        bail!("nothing to do: pass --show or --set-brain-dir");
    }

    let display = |p: Option<&PathBuf>| {
        p.map_or_else(|| "(unset)".to_string(), |p| p.display().to_string())
    };
    println!("Config file:    {}", path.display());
    println!("executable:     {}", display(config.inference.executable.as_ref()));
    println!("model:          {}", display(config.inference.model.as_ref()));
    println!("brain_dir:      {}", display(config.inference.brain_dir.as_ref()));
    println!(
        "timeout_ms:     {}",
        config
            .inference
            .timeout_ms
            .map_or_else(|| "(unset)".to_string(), |ms| ms.to_string())
    );
    println!(
        "max_note_chars: {}",
        config
            .prompt
            .max_note_chars
            .map_or_else(|| "(unset)".to_string(), |n| n.to_string())
    );
    println!("prompt_channel: {:?}", config.inference.prompt_channel);
    println!("temperature:    {}", config.inference.temperature);
    Ok(())
}
