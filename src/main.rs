mod cli;
mod logging;

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use bucket_copy::{copy_bucket, RusotoConnector};
use clap::Parser;
use tracing::warn;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Read command-line arguments
    let args = cli::Args::parse();
    let connection = args.connection_config()?;
    logging::init(connection.debug)?;

    let connector = RusotoConnector::new(connection)?;
    let report = copy_bucket(
        Arc::new(connector),
        &args.source,
        &args.destination,
        &args.copy_options(),
    )
    .await
    .with_context(|| format!("copy from {} to {} failed", args.source, args.destination))?;

    if args.strict && report.has_failures() {
        warn!(
            failed = report.failed(),
            timed_out = report.timed_out(),
            "some keys were not copied"
        );
        return Ok(ExitCode::from(2));
    }

    return Ok(ExitCode::SUCCESS);
}
