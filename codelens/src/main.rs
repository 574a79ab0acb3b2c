//! codelens - AI-backed code analysis from the command line
//!
//! Lists providers, reviews single files, and runs project-wide analysis jobs
//! with live progress. Ctrl-C cancels a running job at the next step boundary.

mod discover;
mod report;

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use codelens_core::{
    AnalysisKind, AnalysisOptions, AnalysisRequest, AnalysisService, Config, JobEvent, JobStatus,
    ProviderKind, Subject, UserCredentials,
};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::broadcast::error::RecvError;

#[derive(Parser)]
#[command(name = "codelens")]
#[command(about = "AI-backed code analysis across multiple providers")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct CommonArgs {
    /// User the analysis runs as (free-tier quota is tracked per user)
    #[arg(short, long, global = true, default_value = "local")]
    user: String,

    /// OpenAI API key (falls back to OPENAI_API_KEY)
    #[arg(long, global = true)]
    openai_key: Option<String>,

    /// Anthropic API key (falls back to ANTHROPIC_API_KEY)
    #[arg(long, global = true)]
    anthropic_key: Option<String>,

    /// Configuration file to use instead of the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, global = true, value_enum, default_value_t = Format::Text)]
    format: Format,

    /// Verbose output (also mirrors logs to stderr)
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// List providers and whether they can be used right now
    Providers,

    /// Analyze a single file
    Review {
        /// File to analyze
        file: PathBuf,

        /// Analysis kind (single-file, bug-fix, security-audit, performance, ...)
        #[arg(short, long, default_value = "single-file")]
        kind: AnalysisKind,

        /// Bug identifier, for bug-fix analyses
        #[arg(long)]
        bug_id: Option<String>,

        /// Project id the file belongs to (defaults to its directory name)
        #[arg(long)]
        project: Option<String>,

        /// Extra instructions for the provider
        #[arg(short, long, default_value = "")]
        instructions: String,
    },

    /// Run a project-wide analysis job
    Analyze {
        /// Project directory
        path: PathBuf,

        /// Glob pattern relative to the project root (repeatable)
        #[arg(short, long = "pattern")]
        patterns: Vec<String>,

        /// Files larger than this are listed without content
        #[arg(long, default_value_t = 64 * 1024)]
        max_file_bytes: u64,

        /// Project id (defaults to the directory name)
        #[arg(long)]
        project: Option<String>,

        /// Extra instructions for the provider
        #[arg(short, long, default_value = "")]
        instructions: String,
    },
}

impl CommonArgs {
    fn credentials(&self) -> UserCredentials {
        let mut credentials = UserCredentials::new();
        let keys = [
            (ProviderKind::OpenAi, &self.openai_key, "OPENAI_API_KEY"),
            (ProviderKind::Anthropic, &self.anthropic_key, "ANTHROPIC_API_KEY"),
        ];
        for (provider, flag, var) in keys {
            if let Some(key) = flag.clone().or_else(|| std::env::var(var).ok()) {
                credentials.insert(provider, key);
            }
        }
        credentials
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    Config::ensure_xdg_env();

    // Load configuration
    let mut config = match &cli.common.config {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?,
        None => Config::load().context("failed to load configuration")?,
    };
    if cli.common.verbose {
        config.logging.stderr = true;
    }

    // Initialize logging
    let _log_guard =
        codelens_core::logging::init(&config.logging).context("failed to initialize logging")?;
    if cli.common.verbose {
        eprintln!("Logging to {}", codelens_core::logging::log_file_path().display());
    }

    let service =
        AnalysisService::from_config(&config).context("failed to initialize analysis service")?;

    match cli.command {
        Command::Providers => run_providers(&service, &cli.common),
        Command::Review {
            file,
            kind,
            bug_id,
            project,
            instructions,
        } => run_review(&service, &cli.common, &file, kind, bug_id, project, instructions).await,
        Command::Analyze {
            path,
            patterns,
            max_file_bytes,
            project,
            instructions,
        } => {
            let patterns = if patterns.is_empty() {
                discover::DEFAULT_PATTERNS.iter().map(|p| p.to_string()).collect()
            } else {
                patterns
            };
            run_analyze(
                &service,
                &cli.common,
                &path,
                &patterns,
                max_file_bytes,
                project,
                instructions,
            )
            .await
        }
    }
}

fn run_providers(service: &AnalysisService, common: &CommonArgs) -> Result<()> {
    let rows = service.available_providers(&common.user, &common.credentials());
    match common.format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&rows)?),
        Format::Text => report::print_providers(&rows),
    }
    Ok(())
}

async fn run_review(
    service: &AnalysisService,
    common: &CommonArgs,
    file: &Path,
    kind: AnalysisKind,
    bug_id: Option<String>,
    project: Option<String>,
    instructions: String,
) -> Result<()> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;

    let project = project.unwrap_or_else(|| {
        let dir = file
            .canonicalize()
            .ok()
            .and_then(|p| p.parent().map(Path::to_path_buf))
            .unwrap_or_default();
        discover::project_id_for(&dir)
    });
    let file_id = file
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| file.display().to_string());

    let mut subject = Subject::file(project, file_id);
    if let Some(bug) = bug_id {
        subject = subject.with_bug(bug);
    }

    let request = AnalysisRequest::new(kind, subject, common.user.clone())
        .with_instructions(instructions)
        .with_content(content);

    let spinner = match common.format {
        Format::Text => ProgressBar::new_spinner(),
        Format::Json => ProgressBar::hidden(),
    };
    spinner.set_message(format!("Running {} analysis...", kind));
    spinner.enable_steady_tick(std::time::Duration::from_millis(120));

    let envelope = service.resolve_analysis(request, common.credentials()).await;
    spinner.finish_and_clear();

    match common.format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&envelope)?),
        Format::Text => report::print_envelope(&envelope, common.verbose),
    }

    if !envelope.success {
        bail!("analysis unavailable");
    }
    Ok(())
}

fn job_progress_style() -> Result<ProgressStyle> {
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}% {msg}")
        .context("invalid progress bar template")?
        .progress_chars("#>-");
    Ok(style)
}

async fn run_analyze(
    service: &AnalysisService,
    common: &CommonArgs,
    path: &Path,
    patterns: &[String],
    max_file_bytes: u64,
    project: Option<String>,
    instructions: String,
) -> Result<()> {
    let snapshot = discover::snapshot(path, patterns, max_file_bytes, project)?;
    if snapshot.files.is_empty() {
        bail!("no source files found under {}", path.display());
    }

    if common.format == Format::Text {
        println!(
            "Analyzing {} file(s) in {}...\n",
            snapshot.files.len(),
            snapshot.project_id
        );
    }

    let options = AnalysisOptions::for_user(common.user.clone())
        .with_credentials(common.credentials())
        .with_instructions(instructions);

    // Subscribe before starting so no event is missed
    let mut events = service.subscribe();
    let job_id = service
        .start_analysis(snapshot, options)
        .context("failed to start analysis")?;

    let cancel_service = service.clone();
    let cancel_job = job_id.clone();
    ctrlc::set_handler(move || {
        eprintln!("\nCancelling analysis...");
        if let Err(e) = cancel_service.cancel_analysis(&cancel_job) {
            eprintln!("Cancel failed: {}", e);
        }
    })
    .context("failed to install Ctrl-C handler")?;

    let pb = match common.format {
        Format::Text => ProgressBar::new(100),
        Format::Json => ProgressBar::hidden(),
    };
    pb.set_style(job_progress_style()?);

    loop {
        match events.recv().await {
            Ok(event) if event.job_id() != job_id => continue,
            Ok(JobEvent::Progress(snapshot)) => {
                pb.set_position(u64::from(snapshot.progress));
                pb.set_message(snapshot.current_step);
            }
            Ok(JobEvent::Completed { .. })
            | Ok(JobEvent::Failed { .. })
            | Ok(JobEvent::Cancelled { .. }) => break,
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Progress events dropped, polling job state");
                let snapshot = service.get_progress(&job_id)?;
                pb.set_position(u64::from(snapshot.progress));
                if snapshot.status.is_terminal() {
                    break;
                }
            }
            Err(RecvError::Closed) => bail!("job event stream closed unexpectedly"),
        }
    }

    let progress = service.get_progress(&job_id)?;
    match progress.status {
        JobStatus::Completed => {
            pb.finish_and_clear();
            let envelope = service
                .job_result(&job_id)?
                .context("completed job has no result")?;
            match common.format {
                Format::Json => println!("{}", serde_json::to_string_pretty(&envelope)?),
                Format::Text => report::print_project_report(&envelope, &progress, common.verbose),
            }
            Ok(())
        }
        JobStatus::Cancelled => {
            pb.abandon_with_message("cancelled");
            bail!(
                "analysis cancelled after {}/{} steps",
                progress.completed_steps,
                progress.total_steps
            )
        }
        _ => {
            pb.abandon_with_message("failed");
            bail!(
                "analysis failed: {}",
                progress.errors.last().map(String::as_str).unwrap_or("unknown error")
            )
        }
    }
}
