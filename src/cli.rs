use std::time::Duration;

use bucket_copy::config::{
    AddressingStyle, ConnectionConfig, CopyOptions, DebugLevel, DEFAULT_HOST, DEFAULT_REGION,
    DEFAULT_THREADS,
};
use bucket_copy::error::CopyResult;
use clap::builder::RangedU64ValueParser;
use clap::Parser;

/// Copy every key of SOURCE that DESTINATION does not have yet.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(override_usage = "bucket-copy [OPTIONS] SOURCE DESTINATION")]
pub struct Args {
    #[arg(value_name = "SOURCE")]
    pub source: String,

    #[arg(value_name = "DESTINATION")]
    pub destination: String,

    /// Your access key ID
    #[arg(short = 'a', long, value_name = "KEY")]
    pub access_key: Option<String>,

    /// Your secret access key
    #[arg(short = 's', long, value_name = "SECRET")]
    pub secret_key: Option<String>,

    /// Connect without TLS
    #[arg(long)]
    pub insecure: bool,

    /// Use path-style requests (no bucket subdomain, upper-case bucket names allowed)
    #[arg(long = "ordinarycallingformat")]
    pub ordinary_calling_format: bool,

    /// S3 endpoint to connect to
    #[arg(long, value_name = "HOST", default_value = DEFAULT_HOST)]
    pub host: String,

    /// Region used to sign requests
    #[arg(long, default_value = DEFAULT_REGION)]
    pub region: String,

    /// Maximum number of simultaneous copies
    #[arg(
        long,
        default_value_t = DEFAULT_THREADS,
        value_parser = RangedU64ValueParser::<usize>::new().range(1..)
    )]
    pub threads: usize,

    /// Copy the ACL from the source key to the destination key
    #[arg(short = 'p', long)]
    pub preserve_acl: bool,

    /// 0: no client debug output, 1: client debug output, 2: also request/response tracing
    #[arg(
        short = 'd',
        long,
        value_name = "LEVEL",
        default_value_t = 0,
        value_parser = clap::value_parser!(u8).range(0..=2)
    )]
    pub debug: u8,

    /// Seconds to wait for each key's copy when collecting results
    #[arg(
        long,
        value_name = "SECONDS",
        default_value_t = 30,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub join_timeout: u64,

    /// Abort copies that miss the join timeout instead of leaving them running
    #[arg(long)]
    pub cancel_on_timeout: bool,

    /// Exit with status 2 when any key failed or timed out
    #[arg(long)]
    pub strict: bool,
}

impl Args {
    pub fn connection_config(&self) -> CopyResult<ConnectionConfig> {
        let addressing_style = if self.ordinary_calling_format {
            AddressingStyle::Path
        } else {
            AddressingStyle::VirtualHosted
        };

        let config = ConnectionConfig {
            access_key: self.access_key.clone(),
            secret_key: self.secret_key.clone(),
            insecure: self.insecure,
            addressing_style,
            host: self.host.clone(),
            region: self.region.clone(),
            debug: DebugLevel::try_from(self.debug)?,
        };
        config.validate()?;

        Ok(config)
    }

    pub fn copy_options(&self) -> CopyOptions {
        CopyOptions {
            threads: self.threads,
            preserve_acl: self.preserve_acl,
            join_timeout: Duration::from_secs(self.join_timeout),
            cancel_on_timeout: self.cancel_on_timeout,
            ..Default::default()
        }
    }
}
