/// Version injected at compile time via AWS_DESCRIPTIONS_VERSION env var (set by CI/CD),
/// or "dev" for local builds.
pub const VERSION: &str = match option_env!("AWS_DESCRIPTIONS_VERSION") {
    Some(v) => v,
    None => "dev",
};

use anyhow::{Context, Result};
use aws_descriptions::aws::client::format_aws_error;
use aws_descriptions::resource::get_all_endpoint_names;
use aws_descriptions::{Collector, CollectorConfig, CollectorError, JobDescriptor};
use clap::{Parser, Subcommand, ValueEnum};
use futures::{StreamExt, TryStreamExt};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::io::{AsyncWriteExt, Stdout};
use tokio::sync::Mutex;
use tracing::level_filters::LevelFilter;
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Collect describe/list inventory from AWS
#[derive(Parser, Debug)]
#[command(name = "aws-descriptions", version, about, long_about = None)]
struct Args {
    /// Collector configuration (JSON or YAML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level for debugging
    #[arg(long, value_enum, default_value = "warn", global = true)]
    log_level: LogLevel,

    /// Write logs to this file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List every registered endpoint
    Endpoints,
    /// Print the configured jobs as JSON lines
    Discover,
    /// Run one job and stream its records to stdout
    Collect {
        #[arg(long)]
        region: String,
        #[arg(long)]
        endpoint: String,
        /// Terminate each record with a newline
        #[arg(long)]
        newline: bool,
    },
    /// Run every configured job, one JSON envelope per record
    Run {
        /// Jobs executed at the same time
        #[arg(long, default_value_t = 4)]
        concurrency: usize,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Option<Level> {
        match self {
            LogLevel::Off => None,
            LogLevel::Error => Some(Level::ERROR),
            LogLevel::Warn => Some(Level::WARN),
            LogLevel::Info => Some(Level::INFO),
            LogLevel::Debug => Some(Level::DEBUG),
            LogLevel::Trace => Some(Level::TRACE),
        }
    }
}

fn setup_logging(
    level: LogLevel,
    log_file: Option<&Path>,
) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let Some(tracing_level) = level.to_tracing_level() else {
        return Ok(None);
    };

    let (non_blocking, guard) = match log_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {:?}", path))?;
            tracing_appender::non_blocking(file)
        }
        None => tracing_appender::non_blocking(std::io::stderr()),
    };

    // RUST_LOG wins over --log-level when set
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::default().add_directive(LevelFilter::from_level(tracing_level).into()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!("aws-descriptions {} started with log level: {:?}", VERSION, level);

    Ok(Some(guard))
}

fn default_config_path() -> PathBuf {
    if let Some(config_dir) = dirs::config_dir() {
        return config_dir.join("aws-descriptions").join("config.yaml");
    }
    PathBuf::from("aws-descriptions.yaml")
}

fn load_collector(path: Option<PathBuf>) -> Result<Collector> {
    let path = path.unwrap_or_else(default_config_path);
    let config = CollectorConfig::load(&path)?;
    tracing::info!("Loaded configuration from {:?}", path);
    Ok(Collector::initialize(config)?)
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();
    let _log_guard = setup_logging(args.log_level, args.log_file.as_deref())?;

    match args.command {
        Command::Endpoints => {
            for name in get_all_endpoint_names() {
                println!("{}", name);
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Discover => {
            let collector = load_collector(args.config)?;
            for job in collector.enumerate() {
                println!("{}", serde_json::to_string(&job)?);
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Collect {
            region,
            endpoint,
            newline,
        } => {
            let collector = load_collector(args.config)?;
            let job = JobDescriptor { region, endpoint };
            collect_one(&collector, &job, newline).await
        }
        Command::Run { concurrency } => {
            let collector = load_collector(args.config)?;
            run_all(&collector, concurrency.max(1)).await
        }
    }
}

async fn collect_one(collector: &Collector, job: &JobDescriptor, newline: bool) -> Result<ExitCode> {
    let mut stdout = tokio::io::stdout();
    let mut chunks = collector.collect(job).await?;

    while let Some(chunk) = chunks.try_next().await? {
        stdout.write_all(chunk.as_bytes()).await?;
        if newline {
            stdout.write_all(b"\n").await?;
        }
    }
    stdout.flush().await?;

    Ok(ExitCode::SUCCESS)
}

async fn run_all(collector: &Collector, concurrency: usize) -> Result<ExitCode> {
    let jobs = collector.enumerate();
    let total = jobs.len();
    let stdout = Arc::new(Mutex::new(tokio::io::stdout()));

    let outcomes: Vec<(JobDescriptor, Result<usize>)> = futures::stream::iter(jobs)
        .map(|job| {
            let collector = collector.clone();
            let stdout = Arc::clone(&stdout);
            async move {
                let outcome = run_job(&collector, &job, &stdout).await;
                (job, outcome)
            }
        })
        .buffer_unordered(concurrency)
        .collect()
        .await;

    stdout.lock().await.flush().await?;

    let mut failed = 0;
    for (job, outcome) in outcomes {
        match outcome {
            Ok(records) => {
                tracing::info!("{} in {}: {} records", job.endpoint, job.region, records);
            }
            Err(err) => {
                failed += 1;
                let kind = err
                    .downcast_ref::<CollectorError>()
                    .map(CollectorError::kind)
                    .unwrap_or("io");
                tracing::error!(
                    "{} in {} failed ({}): {}",
                    job.endpoint,
                    job.region,
                    kind,
                    format_aws_error(&err)
                );
            }
        }
    }

    if failed > 0 {
        eprintln!("{} of {} jobs failed", failed, total);
        Ok(ExitCode::FAILURE)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

/// Stream one job into stdout as envelope lines; returns the record count
async fn run_job(collector: &Collector, job: &JobDescriptor, stdout: &Mutex<Stdout>) -> Result<usize> {
    let mut chunks = collector.collect(job).await?;
    let prefix = format!(
        "{{\"region\":{},\"endpoint\":{},\"record\":",
        serde_json::to_string(&job.region)?,
        serde_json::to_string(&job.endpoint)?
    );

    let mut records = 0;
    while let Some(chunk) = chunks.try_next().await? {
        let line = format!("{}{}}}\n", prefix, chunk);
        stdout.lock().await.write_all(line.as_bytes()).await?;
        records += 1;
    }

    Ok(records)
}
