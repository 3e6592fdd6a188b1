use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Background RDF ingestion into a remote graph store.
#[derive(Parser, Debug)]
#[command(name = "kgingest", version, about)]
pub struct CliArgs {
    /// Path to the JSON configuration file.
    #[arg(long, short, env = "KGINGEST_CONFIG")]
    pub config: Option<PathBuf>,

    /// Identity the jobs are submitted and queried as.
    #[arg(long, env = "KGINGEST_OWNER", default_value = "local")]
    pub owner: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Register a named graph so it can be ingested into.
    RegisterGraph {
        iri: String,
        #[arg(long)]
        description: Option<String>,
    },

    /// List registered named graphs.
    Graphs,

    /// Submit a raw RDF payload read from a file or stdin.
    SubmitRaw {
        /// Payload file; stdin when omitted.
        #[arg(long)]
        file: Option<PathBuf>,
        /// Target named graph; the configured default when omitted.
        #[arg(long)]
        graph: Option<String>,
        /// Return right after submission instead of waiting for the job.
        #[arg(long)]
        no_wait: bool,
    },

    /// Submit a batch of RDF files.
    SubmitFiles {
        #[arg(required = true)]
        files: Vec<PathBuf>,
        #[arg(long)]
        graph: Option<String>,
        #[arg(long)]
        concurrency: Option<usize>,
        #[arg(long)]
        skip_provenance: bool,
        #[arg(long)]
        no_wait: bool,
    },

    /// List jobs, newest first.
    List {
        /// pending, running, done or error
        #[arg(long)]
        status: Option<String>,
        /// Only jobs started within this many hours.
        #[arg(long)]
        since_hours: Option<i64>,
        #[arg(long)]
        limit: Option<u64>,
        #[arg(long)]
        offset: Option<u64>,
    },

    /// Show one job with results, summary and history.
    Status { job_id: String },

    /// Report whether a job may be recovered right now.
    CheckRecoverable {
        job_id: String,
        #[command(flatten)]
        window: WindowArgs,
    },

    /// Recover one stale job, or every stale job of the owner.
    Recover {
        job_id: Option<String>,
        #[command(flatten)]
        window: WindowArgs,
    },

    /// Recover stale jobs of every owner.
    Sweep,
}

#[derive(clap::Args, Debug, Clone, Copy)]
pub struct WindowArgs {
    /// Override the minimum job age, in seconds.
    #[arg(long)]
    pub min_age_secs: Option<u64>,
    /// Override the maximum job age, in seconds.
    #[arg(long)]
    pub max_age_secs: Option<u64>,
}

impl WindowArgs {
    pub fn is_set(&self) -> bool {
        self.min_age_secs.is_some() || self.max_age_secs.is_some()
    }
}
