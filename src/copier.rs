use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Local};
use futures_util::StreamExt;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::config::CopyOptions;
use crate::error::{CopyError, CopyResult, ErrorKind, StoreError};
use crate::lister::list_keys;
use crate::store::Connector;

/// What happened to a single key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CopyOutcome {
    AlreadyExists,
    Copied,
    Failed(StoreError),
    /// The unit did not finish before its join deadline.
    TimedOut,
}

impl CopyOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, CopyOutcome::Failed(_) | CopyOutcome::TimedOut)
    }
}

#[derive(Debug, Clone)]
pub struct KeyReport {
    pub key: String,
    pub outcome: CopyOutcome,
    /// When the unit finished, or when the driver gave up waiting for it.
    pub at: DateTime<Local>,
}

impl KeyReport {
    fn new(key: String, outcome: CopyOutcome) -> Self {
        Self {
            key,
            outcome,
            at: Local::now(),
        }
    }
}

// The log line carries the timestamp, so the status text does not.
impl fmt::Display for KeyReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            CopyOutcome::AlreadyExists => {
                write!(f, "Key Already Exists, will not overwrite : {}", self.key)
            }
            CopyOutcome::Copied => write!(f, "Copy Success : {}", self.key),
            CopyOutcome::Failed(e) => write!(f, "Copy Error : {} : {}", self.key, e),
            CopyOutcome::TimedOut => write!(f, "TIMEOUT on key {}", self.key),
        }
    }
}

/// Per-key outcomes of a run, in the order the keys were listed.
#[derive(Debug, Clone, Default)]
pub struct CopyReport {
    pub entries: Vec<KeyReport>,
    /// Keys enumerated from the source bucket, whether copied or not.
    pub total_keys: usize,
}

impl CopyReport {
    fn count(&self, pred: impl Fn(&CopyOutcome) -> bool) -> usize {
        self.entries.iter().filter(|e| pred(&e.outcome)).count()
    }

    pub fn copied(&self) -> usize {
        self.count(|o| *o == CopyOutcome::Copied)
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| *o == CopyOutcome::AlreadyExists)
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, CopyOutcome::Failed(_)))
    }

    pub fn timed_out(&self) -> usize {
        self.count(|o| *o == CopyOutcome::TimedOut)
    }

    pub fn has_failures(&self) -> bool {
        self.entries.iter().any(|e| e.outcome.is_failure())
    }
}

// One key's worth of work, owned by the unit that runs it.
struct CopyTask {
    source_bucket: Arc<str>,
    dest_bucket: Arc<str>,
    key: String,
    preserve_acl: bool,
}

struct Unit {
    key: String,
    handle: JoinHandle<KeyReport>,
}

/// Copies every key of `source_bucket` (under `options.prefix`) that is not
/// already present in `dest_bucket`.
///
/// Each key is handled by its own task with its own connection. The copy step
/// is gated to `options.threads` at a time, and launching pauses while
/// `options.threads` units (counting the driver) are alive. Units are joined
/// in listing order, each for at most `options.join_timeout`.
///
/// Only configuration, bucket access and listing failures are returned as
/// errors; per-key problems end up in the report.
pub async fn copy_bucket(
    connector: Arc<dyn Connector>,
    source_bucket: &str,
    dest_bucket: &str,
    options: &CopyOptions,
) -> CopyResult<CopyReport> {
    options.validate()?;

    // Init the driver's own connection
    let store = connector.connect().map_err(CopyError::Connect)?;
    for bucket in [source_bucket, dest_bucket] {
        store
            .check_bucket(bucket)
            .await
            .map_err(|source| CopyError::Bucket {
                bucket: bucket.to_owned(),
                source,
            })?;
    }

    let mut keys = list_keys(
        store,
        source_bucket.to_owned(),
        options.effective_prefix().map(str::to_owned),
    );

    let gate = Arc::new(Semaphore::new(options.threads));
    let source: Arc<str> = Arc::from(source_bucket);
    let dest: Arc<str> = Arc::from(dest_bucket);
    let mut units: Vec<Unit> = Vec::new();
    let mut live: Vec<usize> = Vec::new();
    let mut total_keys = 0;

    // Request units
    while let Some(key) = keys.next().await {
        let key = match key {
            Ok(key) => key,
            Err(e) => {
                for unit in &units {
                    unit.handle.abort();
                }
                return Err(CopyError::Listing {
                    bucket: source_bucket.to_owned(),
                    source: e,
                });
            }
        };

        total_keys += 1;
        info!(key = %key, "requesting copy unit for key");

        let task = CopyTask {
            source_bucket: source.clone(),
            dest_bucket: dest.clone(),
            key: key.clone(),
            preserve_acl: options.preserve_acl,
        };
        let handle = tokio::spawn(run_unit(connector.clone(), gate.clone(), task));
        live.push(units.len());
        units.push(Unit { key, handle });

        // Pause while the live units plus this driver reach the thread limit
        if launch_limit_reached(&units, &mut live, options.threads) {
            info!(
                threads = options.threads,
                "max threads reached: pausing until thread count reduces"
            );
            while launch_limit_reached(&units, &mut live, options.threads) {
                sleep(options.poll_interval).await;
            }
            info!("continuing unit creation");
        }
    }

    let mut entries = Vec::with_capacity(units.len());
    for Unit { key, mut handle } in units {
        let report = match timeout(options.join_timeout, &mut handle).await {
            Ok(Ok(report)) => report,
            Ok(Err(e)) => KeyReport::new(
                key,
                CopyOutcome::Failed(StoreError::new(ErrorKind::Other, e.to_string())),
            ),
            Err(_) => {
                if options.cancel_on_timeout {
                    handle.abort();
                }
                KeyReport::new(key, CopyOutcome::TimedOut)
            }
        };

        if report.outcome.is_failure() {
            warn!("status output: {}", report);
        } else {
            info!("status output: {}", report);
        }
        entries.push(report);
    }

    info!(total_keys, "complete: {} total keys requested", total_keys);

    Ok(CopyReport {
        entries,
        total_keys,
    })
}

// `live` holds indices of units that have not been seen finished yet.
fn launch_limit_reached(units: &[Unit], live: &mut Vec<usize>, threads: usize) -> bool {
    live.retain(|&i| !units[i].handle.is_finished());
    !live.is_empty() && live.len() + 1 >= threads
}

async fn run_unit(
    connector: Arc<dyn Connector>,
    gate: Arc<Semaphore>,
    task: CopyTask,
) -> KeyReport {
    let outcome = copy_one(connector.as_ref(), &gate, &task).await;
    KeyReport::new(task.key, outcome)
}

async fn copy_one(connector: &dyn Connector, gate: &Semaphore, task: &CopyTask) -> CopyOutcome {
    // Connections are not shared between units
    let store = match connector.connect() {
        Ok(store) => store,
        Err(e) => return CopyOutcome::Failed(e),
    };

    // Only copy if not exists on dest bucket
    match store.key_exists(&task.dest_bucket, &task.key).await {
        Ok(true) => return CopyOutcome::AlreadyExists,
        Ok(false) => {}
        Err(e) => return CopyOutcome::Failed(e),
    }

    let _permit = match gate.acquire().await {
        Ok(permit) => permit,
        Err(e) => {
            return CopyOutcome::Failed(StoreError::new(ErrorKind::Other, e.to_string()));
        }
    };
    debug!(key = %task.key, "gate acquired, copying");

    match store
        .copy_key(
            &task.source_bucket,
            &task.dest_bucket,
            &task.key,
            task.preserve_acl,
        )
        .await
    {
        Ok(()) => CopyOutcome::Copied,
        Err(e) => CopyOutcome::Failed(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;

    fn report(key: &str, outcome: CopyOutcome) -> KeyReport {
        KeyReport::new(key.to_string(), outcome)
    }

    #[test]
    fn status_lines_name_key_and_outcome() {
        let line = report("x", CopyOutcome::AlreadyExists).to_string();
        assert_eq!(line, "Key Already Exists, will not overwrite : x");

        let line = report("y", CopyOutcome::Copied).to_string();
        assert_eq!(line, "Copy Success : y");

        let err = StoreError::new(ErrorKind::AccessDenied, "403");
        let line = report("z", CopyOutcome::Failed(err)).to_string();
        assert_eq!(line, "Copy Error : z : access denied: 403");

        let line = report("w", CopyOutcome::TimedOut).to_string();
        assert_eq!(line, "TIMEOUT on key w");
    }

    #[test]
    fn report_counts_by_outcome() {
        let report = CopyReport {
            entries: vec![
                report("a", CopyOutcome::Copied),
                report("b", CopyOutcome::AlreadyExists),
                report("c", CopyOutcome::Copied),
                report("d", CopyOutcome::TimedOut),
            ],
            total_keys: 4,
        };
        assert_eq!(report.copied(), 2);
        assert_eq!(report.skipped(), 1);
        assert_eq!(report.failed(), 0);
        assert_eq!(report.timed_out(), 1);
        assert!(report.has_failures());
    }

    #[tokio::test]
    async fn missing_source_bucket_aborts() {
        let store = MemoryStore::new();
        store.create_bucket("dst");

        let err = copy_bucket(Arc::new(store.clone()), "src", "dst", &CopyOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, CopyError::Bucket { ref bucket, .. } if bucket == "src"));
        assert_eq!(store.copy_calls(), 0);
    }

    #[tokio::test]
    async fn zero_threads_is_config_error() {
        let store = MemoryStore::new();
        let options = CopyOptions {
            threads: 0,
            ..Default::default()
        };
        let err = copy_bucket(Arc::new(store.clone()), "src", "dst", &options)
            .await
            .unwrap_err();
        assert!(matches!(err, CopyError::Config(_)));
        assert_eq!(store.connections(), 0);
    }

    #[tokio::test]
    async fn each_unit_opens_its_own_connection() {
        let store = MemoryStore::new();
        for key in ["a", "b", "c"] {
            store.put("src", key, key);
        }
        store.create_bucket("dst");

        let report = copy_bucket(Arc::new(store.clone()), "src", "dst", &CopyOptions::default())
            .await
            .unwrap();
        assert_eq!(report.copied(), 3);
        // driver plus one per key
        assert_eq!(store.connections(), 4);
    }

    #[tokio::test]
    async fn preserve_acl_is_passed_through() {
        let store = MemoryStore::new();
        store.put_with_acl("src", "k", "data", Some("public-read"));
        store.create_bucket("dst");
        let options = CopyOptions {
            preserve_acl: true,
            ..Default::default()
        };

        copy_bucket(Arc::new(store.clone()), "src", "dst", &options)
            .await
            .unwrap();
        assert_eq!(store.acl("dst", "k"), Some("public-read".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn single_thread_does_not_stall_launching() {
        let store = MemoryStore::new();
        for key in ["a", "b", "c", "d"] {
            store.put("src", key, key);
        }
        store.create_bucket("dst");
        store.set_copy_delay(std::time::Duration::from_millis(500));
        let options = CopyOptions {
            threads: 1,
            ..Default::default()
        };

        let report = copy_bucket(Arc::new(store.clone()), "src", "dst", &options)
            .await
            .unwrap();
        assert_eq!(report.copied(), 4);
        assert_eq!(store.max_copies_in_flight(), 1);
    }
}
