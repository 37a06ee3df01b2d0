use clap::{Args, Subcommand};
use std::path::PathBuf;

use crate::exit::CliResult;
use crate::output::OutputFormat;

pub mod probe;
pub mod version;
pub mod worker;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the reference worker over stdin/stdout/stderr.
    Worker(WorkerArgs),
    /// Start a worker under a controller and report what it observed.
    Probe(ProbeArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Worker(args) => worker::run(args),
        Command::Probe(args) => probe::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug, Default)]
pub struct WorkerArgs {
    /// Do not announce readiness on startup.
    #[arg(long)]
    pub no_ready: bool,
    /// Never acknowledge flush directives.
    #[arg(long)]
    pub ignore_flush: bool,
    /// Exit with this code when the first flush directive arrives.
    #[arg(long, value_name = "CODE")]
    pub exit_on_flush: Option<i32>,
    /// Write this line to stderr on startup (repeatable).
    #[arg(long, value_name = "TEXT")]
    pub stderr_line: Vec<String>,
}

#[derive(Args, Debug)]
pub struct ProbeArgs {
    /// Controller configuration file (JSON).
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
    /// Liveness grace period override (e.g. 45ms).
    #[arg(long)]
    pub grace: Option<String>,
    /// Require the worker's readiness handshake.
    #[arg(long)]
    pub handshake: bool,
    /// Time to wait for readiness and for the flush acknowledgment (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
    /// Worker program and its arguments, after `--`.
    #[arg(last = true, required = true, value_name = "COMMAND")]
    pub command: Vec<String>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}
