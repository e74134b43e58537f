use anyhow::{Context, Result};
use bucket_copy::config::DebugLevel;
use tracing_subscriber::EnvFilter;

/// Filter directives for a `--debug` level. The S3 client logs through `log`
/// under the `rusoto_*` targets; level 2 also opens up the HTTP layer.
pub fn filter_directives(level: DebugLevel) -> &'static str {
    match level {
        DebugLevel::Off => "warn,bucket_copy=info",
        DebugLevel::Client => {
            "warn,bucket_copy=debug,rusoto_core=debug,rusoto_s3=debug,rusoto_credential=debug"
        }
        DebugLevel::Wire => {
            "warn,bucket_copy=debug,rusoto_core=trace,rusoto_s3=trace,rusoto_credential=trace,hyper=debug"
        }
    }
}

/// Installs the stdout subscriber. `RUST_LOG` wins over `--debug`.
pub fn init(level: DebugLevel) -> Result<()> {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let directives = filter_directives(level);
        EnvFilter::try_new(directives)
            .with_context(|| format!("invalid log filter: {directives}"))?
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!(e))
        .context("failed to install tracing subscriber")?;

    Ok(())
}
