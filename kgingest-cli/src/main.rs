mod cli;
mod logging;

use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{anyhow, Context, Result};
use chrono::{Duration, Utc};
use clap::Parser;
use serde::Serialize;
use tracing::{error, info};

use kgingest::config::LoggingConfig;
use kgingest::job::JobStatus;
use kgingest::recovery::RecoveryWindow;
use kgingest::service::{FileBatchSubmission, IncomingFile, IngestService, RawSubmission};
use kgingest::{load_config, IngestConfig, JobListFilter};

use crate::cli::{CliArgs, Command, WindowArgs};

fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".kgingest").join("config.json"))
}

fn load(args: &CliArgs) -> Result<IngestConfig> {
    let path = args
        .config
        .clone()
        .or_else(default_config_path)
        .ok_or_else(|| anyhow!("no config path given and no home directory found"))?;
    load_config(&path).with_context(|| format!("failed to load config from {}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn window(service: &IngestService, args: WindowArgs) -> Option<RecoveryWindow> {
    if !args.is_set() {
        return None;
    }
    let base = RecoveryWindow::from_config(&service.config().recovery);
    Some(RecoveryWindow {
        min_age: args
            .min_age_secs
            .map(|s| Duration::seconds(s as i64))
            .unwrap_or(base.min_age),
        max_age: args
            .max_age_secs
            .map(|s| Duration::seconds(s as i64))
            .unwrap_or(base.max_age),
    })
}

/// Waits for a submitted job and prints its final detail.
async fn finish(service: &IngestService, owner: &str, job_id: &str) -> Result<()> {
    service.wait_for(job_id).await;
    print_json(&service.job_detail(owner, job_id)?)
}

async fn run(args: CliArgs, service: IngestService) -> Result<()> {
    let owner = args.owner.as_str();

    match args.command {
        Command::RegisterGraph { iri, description } => {
            print_json(&service.register_graph(&iri, description.as_deref())?)
        }
        Command::Graphs => print_json(&service.list_graphs()?),
        Command::SubmitRaw {
            file,
            graph,
            no_wait,
        } => {
            let content = match file {
                Some(path) => tokio::fs::read_to_string(&path)
                    .await
                    .with_context(|| format!("failed to read {}", path.display()))?,
                None => {
                    let mut buf = String::new();
                    std::io::stdin()
                        .read_to_string(&mut buf)
                        .context("failed to read payload from stdin")?;
                    buf
                }
            };
            let response = service
                .submit_raw(RawSubmission {
                    owner: owner.to_string(),
                    graph,
                    content,
                })
                .await?;
            print_json(&response)?;
            if no_wait {
                return Ok(());
            }
            finish(&service, owner, &response.job_id).await
        }
        Command::SubmitFiles {
            files,
            graph,
            concurrency,
            skip_provenance,
            no_wait,
        } => {
            let response = service
                .submit_files(FileBatchSubmission {
                    owner: owner.to_string(),
                    graph,
                    concurrency,
                    skip_provenance,
                    files: files.into_iter().map(IncomingFile::from_path).collect(),
                })
                .await?;
            print_json(&response)?;
            if no_wait {
                return Ok(());
            }
            finish(&service, owner, &response.job_id).await
        }
        Command::List {
            status,
            since_hours,
            limit,
            offset,
        } => {
            let status = status
                .map(|s| s.parse::<JobStatus>())
                .transpose()
                .map_err(anyhow::Error::msg)?;
            let filter = JobListFilter {
                status,
                started_after: since_hours.map(|h| Utc::now() - Duration::hours(h)),
                limit,
                offset,
                ..Default::default()
            };
            print_json(&service.list_jobs(owner, &filter)?)
        }
        Command::Status { job_id } => print_json(&service.job_detail(owner, &job_id)?),
        Command::CheckRecoverable { job_id, window: w } => {
            let window = window(&service, w);
            print_json(&service.check_recoverable(owner, &job_id, window)?)
        }
        Command::Recover { job_id, window: w } => {
            let window = window(&service, w);
            print_json(&service.recover(owner, job_id.as_deref(), window)?)
        }
        Command::Sweep => print_json(&service.sweep()?),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = CliArgs::parse();

    let config = match load(&args) {
        Ok(config) => config,
        Err(e) => {
            if logging::init(&LoggingConfig::default()).is_ok() {
                error!("{:#}", e);
            } else {
                eprintln!("{:#}", e);
            }
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = logging::init(&config.logging) {
        eprintln!("{:#}", e);
        return ExitCode::FAILURE;
    }

    info!("Starting kgingest v{}", env!("CARGO_PKG_VERSION"));

    let service = match IngestService::open(config) {
        Ok(service) => service,
        Err(e) => {
            error!("Failed to open ingestion service: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match service.startup() {
        Ok(Some(report)) if !report.recovered.is_empty() => {
            info!(jobs = ?report.recovered, "Recovered orphaned jobs at startup");
        }
        Ok(_) => {}
        Err(e) => error!("Startup recovery failed: {}", e),
    }

    match run(args, service).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
