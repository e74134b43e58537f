use std::time::Duration;

use crate::error::{CopyError, CopyResult};

pub const DEFAULT_HOST: &str = "s3.amazonaws.com";
pub const DEFAULT_REGION: &str = "us-east-1";
pub const DEFAULT_THREADS: usize = 10;
pub const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// How bucket names are resolved in request URLs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AddressingStyle {
    /// `bucket.host/key`; the bucket name has to be a valid DNS label.
    #[default]
    VirtualHosted,
    /// `host/bucket/key`; any bucket name is accepted.
    Path,
}

impl AddressingStyle {
    /// Rejects bucket names the style cannot put into a request URL.
    pub fn check_bucket_name(&self, bucket: &str) -> Result<(), String> {
        if bucket.is_empty() {
            return Err("bucket name must not be empty".to_string());
        }
        let upper_case = bucket.chars().any(|c| c.is_ascii_uppercase());
        if *self == AddressingStyle::VirtualHosted && upper_case {
            return Err(format!(
                "bucket {bucket} contains upper-case characters; use path-style addressing"
            ));
        }
        Ok(())
    }
}

/// Verbosity of the storage client's own logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum DebugLevel {
    #[default]
    Off,
    Client,
    Wire,
}

impl TryFrom<u8> for DebugLevel {
    type Error = CopyError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(DebugLevel::Off),
            1 => Ok(DebugLevel::Client),
            2 => Ok(DebugLevel::Wire),
            other => Err(CopyError::Config(format!(
                "debug level must be 0, 1 or 2, got {other}"
            ))),
        }
    }
}

/// Everything needed to open a connection to the storage backend.
///
/// Cloned into every unit of work, each of which opens its own connection.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub insecure: bool,
    pub addressing_style: AddressingStyle,
    pub host: String,
    pub region: String,
    pub debug: DebugLevel,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            access_key: None,
            secret_key: None,
            insecure: false,
            addressing_style: AddressingStyle::default(),
            host: DEFAULT_HOST.to_string(),
            region: DEFAULT_REGION.to_string(),
            debug: DebugLevel::default(),
        }
    }
}

impl ConnectionConfig {
    /// Endpoint URL including the scheme picked by `insecure`.
    ///
    /// A host that already carries a scheme is used as is.
    pub fn endpoint(&self) -> String {
        if self.host.contains("://") {
            return self.host.clone();
        }
        let scheme = if self.insecure { "http" } else { "https" };
        format!("{}://{}", scheme, self.host.trim_end_matches('/'))
    }

    /// Static credentials, or `None` to fall back to the default provider chain.
    pub fn static_credentials(&self) -> CopyResult<Option<(String, String)>> {
        match (&self.access_key, &self.secret_key) {
            (Some(access_key), Some(secret_key)) => {
                Ok(Some((access_key.clone(), secret_key.clone())))
            }
            (None, None) => Ok(None),
            _ => Err(CopyError::Config(
                "access key and secret key must be given together".to_string(),
            )),
        }
    }

    pub fn validate(&self) -> CopyResult<()> {
        if self.host.trim().is_empty() {
            return Err(CopyError::Config("host must not be empty".into()));
        }
        self.static_credentials()?;
        Ok(())
    }
}

/// Knobs of a single copy run.
#[derive(Debug, Clone)]
pub struct CopyOptions {
    /// Capacity of the copy gate and the launch limit.
    pub threads: usize,
    /// Only keys starting with this prefix are copied. Empty means the whole bucket.
    pub prefix: Option<String>,
    pub preserve_acl: bool,
    /// How long the driver waits for each unit when joining.
    pub join_timeout: Duration,
    /// How often the launch limit is re-checked while paused.
    pub poll_interval: Duration,
    /// Abort a unit that missed its join deadline instead of leaving it running.
    pub cancel_on_timeout: bool,
}

impl Default for CopyOptions {
    fn default() -> Self {
        Self {
            threads: DEFAULT_THREADS,
            prefix: None,
            preserve_acl: false,
            join_timeout: DEFAULT_JOIN_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            cancel_on_timeout: false,
        }
    }
}

impl CopyOptions {
    pub fn validate(&self) -> CopyResult<()> {
        if self.threads == 0 {
            return Err(CopyError::Config("threads must be at least 1".into()));
        }
        if self.join_timeout.is_zero() {
            return Err(CopyError::Config("join timeout must be positive".into()));
        }
        if self.poll_interval.is_zero() {
            return Err(CopyError::Config("poll interval must be positive".into()));
        }
        Ok(())
    }

    /// The prefix to list with, treating an empty string as no prefix.
    pub fn effective_prefix(&self) -> Option<&str> {
        self.prefix.as_deref().filter(|p| !p.is_empty())
    }
}
