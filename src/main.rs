//! token-keeper
//!
//! Scheduled entry point. Configuration comes from `TOKEN_KEEPER_*`
//! environment variables; the report is printed to stdout as JSON and logs
//! go to stderr.
//!
//! Exit codes: `0` token usable, `1` retryable failure, `2` re-authorization
//! required, `3` failure that retrying will not fix.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::process::ExitCode;
use std::sync::Arc;

use brokerage_token_keeper::job::{coordinator_from_config, inspect, run_invocation};
use brokerage_token_keeper::telemetry::{init_logging, LogFormat, NoOpMetrics};
use brokerage_token_keeper::{InvocationReport, InvocationStatus, JobConfig};

#[derive(Parser, Debug)]
#[command(name = "token-keeper", version, about = "Keep the brokerage OAuth2 token usable")]
struct Cli {
    /// Log output format.
    #[arg(
        long,
        value_enum,
        default_value = "text",
        env = "TOKEN_KEEPER_LOG_FORMAT",
        global = true
    )]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one scheduled invocation: refresh if needed and report.
    Run,
    /// Report the stored token state without contacting the provider.
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.log_format).context("failed to initialise logging")?;

    let config = JobConfig::from_env().context("invalid configuration")?;
    let coordinator = coordinator_from_config(&config, Arc::new(NoOpMetrics))
        .context("failed to build token coordinator")?;

    match cli.command {
        Command::Run => {
            let report = run_invocation(&coordinator).await;
            println!("{}", serde_json::to_string(&report)?);
            Ok(exit_code(&report))
        }
        Command::Status => {
            let status = inspect(&coordinator)
                .await
                .context("failed to read token store")?;
            println!("{}", serde_json::to_string(&status)?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn exit_code(report: &InvocationReport) -> ExitCode {
    match report.status {
        InvocationStatus::TokenValidNoAction | InvocationStatus::Refreshed => ExitCode::SUCCESS,
        InvocationStatus::RetryableFailure if report.fatal => ExitCode::from(3),
        InvocationStatus::RetryableFailure => ExitCode::from(1),
        InvocationStatus::RequiresReauthorization => ExitCode::from(2),
    }
}
