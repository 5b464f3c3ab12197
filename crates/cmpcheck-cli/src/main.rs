//! cmpcheck - CMP conformance suite runner
//!
//! Runs the built-in conformance cases against the mock responder and
//! reports each verdict. Exits non-zero if any case fails its oracle.

mod report;

use std::{
    io::{self, Write},
    path::PathBuf,
    process::ExitCode,
    time::Duration,
};

use clap::Parser;
use cmpcheck_core::{ConfigError, MachineConfig};
use cmpcheck_harness::{ConformanceCase, HarnessError, suite};
use tracing_subscriber::EnvFilter;

use crate::report::{CaseReport, Report};

/// cmpcheck - CMP conformance suite runner
#[derive(Parser, Debug)]
#[command(name = "cmpcheck")]
#[command(version, about, long_about = None)]
struct Cli {
    /// List the conformance cases and exit
    #[arg(long)]
    list: bool,

    /// Run only this case (repeatable)
    #[arg(long = "case", value_name = "NAME")]
    cases: Vec<String>,

    /// Seed for the simulated environment
    #[arg(long, default_value_t = cmpcheck_harness::env::DEFAULT_SEED)]
    seed: u64,

    /// Seconds the end entity allows itself to send certConf
    #[arg(long)]
    confirm_wait_secs: Option<u64>,

    /// Milliseconds allowed for each peer response
    #[arg(long)]
    response_timeout_ms: Option<u64>,

    /// Write a CBOR report to this path
    #[arg(long, value_name = "PATH")]
    report: Option<PathBuf>,

    /// Log filter directive, overriding RUST_LOG
    #[arg(long)]
    log_filter: Option<String>,
}

impl Cli {
    fn machine_config(&self) -> Result<MachineConfig, CliError> {
        let mut config = MachineConfig::default();
        if let Some(secs) = self.confirm_wait_secs {
            config = config.with_confirm_wait(Duration::from_secs(secs));
        }
        if let Some(ms) = self.response_timeout_ms {
            config = config.with_response_timeout(Duration::from_millis(ms));
        }
        config.validate()?;
        Ok(config)
    }

    fn selected(&self) -> Result<Vec<ConformanceCase>, CliError> {
        if self.cases.is_empty() {
            return Ok(suite());
        }
        self.cases
            .iter()
            .map(|name| suite::find(name).map_err(CliError::from))
            .collect()
    }
}

/// CLI failures.
#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Harness(#[from] HarnessError),

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("invalid log filter: {0}")]
    LogFilter(String),

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to encode report: {0}")]
    Encode(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

fn init_logging(directive: Option<&str>) -> Result<(), CliError> {
    let filter = match directive {
        Some(directive) => {
            EnvFilter::try_new(directive).map_err(|e| CliError::LogFilter(e.to_string()))?
        },
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(io::stderr).init();
    Ok(())
}

fn list(out: &mut impl Write) -> Result<(), CliError> {
    for case in suite() {
        writeln!(out, "{:<32} {}", case.name, case.summary)?;
    }
    Ok(())
}

/// Run the selected cases and collect their reports.
fn run(cli: &Cli) -> Result<Report, CliError> {
    let config = cli.machine_config()?;
    let mut report = Report::new(cli.seed);
    for case in cli.selected()? {
        let execution = case.scenario(cli.seed, config.clone()).execute()?;
        match &execution.oracle {
            Ok(()) => tracing::info!(case = case.name, "pass"),
            Err(reason) => tracing::error!(case = case.name, %reason, "fail"),
        }
        report.push(CaseReport::from_execution(&execution));
    }
    Ok(report)
}

fn try_main(cli: &Cli) -> Result<bool, CliError> {
    init_logging(cli.log_filter.as_deref())?;

    if cli.list {
        list(&mut io::stdout().lock())?;
        return Ok(true);
    }

    let report = run(cli)?;
    tracing::info!(
        cases = report.cases().len(),
        passed = report.passed(),
        failed = report.failed(),
        "suite finished"
    );
    if let Some(path) = &cli.report {
        report.write(path)?;
        tracing::info!(path = %path.display(), "report written");
    }
    writeln!(io::stdout().lock(), "{}", report.summary())?;
    Ok(report.failed() == 0)
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match try_main(&cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            tracing::error!(%err, "cmpcheck failed");
            let _ = writeln!(io::stderr().lock(), "error: {err}");
            ExitCode::from(2)
        },
    }
}
