//! In-memory object store.
//!
//! Buckets live in a shared map; every [`Connector::connect`] hands out a new
//! handle onto the same map. Faults can be injected per key so that the copy
//! scheduler can be exercised without a network.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::store::{Connector, KeyPage, ObjectStore};

const DEFAULT_PAGE_SIZE: usize = 1000;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct StoredObject {
    body: Vec<u8>,
    acl: Option<String>,
}

#[derive(Debug, Default)]
struct Faults {
    copy_errors: HashMap<String, StoreError>,
    stalled_copies: HashSet<String>,
    listing_error: Option<StoreError>,
    copy_delay: Option<Duration>,
}

#[derive(Debug)]
struct Shared {
    buckets: Mutex<BTreeMap<String, BTreeMap<String, StoredObject>>>,
    faults: Mutex<Faults>,
    page_size: usize,
    connections: AtomicUsize,
    copy_calls: AtomicUsize,
    copies_in_flight: AtomicUsize,
    max_copies_in_flight: AtomicUsize,
    open_connections: AtomicUsize,
    max_open_connections: AtomicUsize,
}

#[derive(Debug, Clone)]
pub struct MemoryStore {
    shared: Arc<Shared>,
    // Set on handles returned by `connect`; released when the last clone drops.
    connection: Option<Arc<OpenConnection>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::with_page_size(DEFAULT_PAGE_SIZE)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Listing returns at most `page_size` keys per page.
    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                buckets: Mutex::new(BTreeMap::new()),
                faults: Mutex::new(Faults::default()),
                page_size: page_size.max(1),
                connections: AtomicUsize::new(0),
                copy_calls: AtomicUsize::new(0),
                copies_in_flight: AtomicUsize::new(0),
                max_copies_in_flight: AtomicUsize::new(0),
                open_connections: AtomicUsize::new(0),
                max_open_connections: AtomicUsize::new(0),
            }),
            connection: None,
        }
    }

    pub fn create_bucket(&self, bucket: &str) {
        lock(&self.shared.buckets)
            .entry(bucket.to_owned())
            .or_default();
    }

    /// Stores an object, creating the bucket if needed.
    pub fn put(&self, bucket: &str, key: &str, body: impl Into<Vec<u8>>) {
        self.put_with_acl(bucket, key, body, None);
    }

    pub fn put_with_acl(
        &self,
        bucket: &str,
        key: &str,
        body: impl Into<Vec<u8>>,
        acl: Option<&str>,
    ) {
        lock(&self.shared.buckets)
            .entry(bucket.to_owned())
            .or_default()
            .insert(
                key.to_owned(),
                StoredObject {
                    body: body.into(),
                    acl: acl.map(str::to_owned),
                },
            );
    }

    pub fn get(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        lock(&self.shared.buckets)
            .get(bucket)
            .and_then(|objects| objects.get(key))
            .map(|object| object.body.clone())
    }

    pub fn acl(&self, bucket: &str, key: &str) -> Option<String> {
        lock(&self.shared.buckets)
            .get(bucket)
            .and_then(|objects| objects.get(key))
            .and_then(|object| object.acl.clone())
    }

    /// Keys of `bucket` in lexical order.
    pub fn keys(&self, bucket: &str) -> Vec<String> {
        lock(&self.shared.buckets)
            .get(bucket)
            .map(|objects| objects.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Makes every copy of `key` fail with `error`.
    pub fn fail_copy(&self, key: &str, error: StoreError) {
        lock(&self.shared.faults)
            .copy_errors
            .insert(key.to_owned(), error);
    }

    /// Makes every copy of `key` wait forever.
    pub fn stall_copy(&self, key: &str) {
        lock(&self.shared.faults)
            .stalled_copies
            .insert(key.to_owned());
    }

    pub fn fail_listing(&self, error: StoreError) {
        lock(&self.shared.faults).listing_error = Some(error);
    }

    /// Every copy sleeps this long before touching the data.
    pub fn set_copy_delay(&self, delay: Duration) {
        lock(&self.shared.faults).copy_delay = Some(delay);
    }

    pub fn connections(&self) -> usize {
        self.shared.connections.load(Ordering::SeqCst)
    }

    pub fn copy_calls(&self) -> usize {
        self.shared.copy_calls.load(Ordering::SeqCst)
    }

    pub fn copies_in_flight(&self) -> usize {
        self.shared.copies_in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of copies that ever ran at the same time.
    pub fn max_copies_in_flight(&self) -> usize {
        self.shared.max_copies_in_flight.load(Ordering::SeqCst)
    }

    /// Connections handed out by `connect` that are still held by someone.
    pub fn open_connections(&self) -> usize {
        self.shared.open_connections.load(Ordering::SeqCst)
    }

    /// Highest number of connections that were open at the same time.
    pub fn max_open_connections(&self) -> usize {
        self.shared.max_open_connections.load(Ordering::SeqCst)
    }

    fn missing_bucket(bucket: &str) -> StoreError {
        StoreError::not_found(format!("bucket {bucket} does not exist"))
    }
}

// Counts a copy as in flight until dropped, including when the copy is aborted.
struct InFlight<'a> {
    shared: &'a Shared,
}

impl<'a> InFlight<'a> {
    fn enter(shared: &'a Shared) -> Self {
        let now = shared.copies_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        shared.max_copies_in_flight.fetch_max(now, Ordering::SeqCst);
        Self { shared }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.shared.copies_in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug)]
struct OpenConnection {
    shared: Arc<Shared>,
}

impl OpenConnection {
    fn open(shared: &Arc<Shared>) -> Self {
        shared.connections.fetch_add(1, Ordering::SeqCst);
        let now = shared.open_connections.fetch_add(1, Ordering::SeqCst) + 1;
        shared.max_open_connections.fetch_max(now, Ordering::SeqCst);
        Self {
            shared: shared.clone(),
        }
    }
}

impl Drop for OpenConnection {
    fn drop(&mut self) {
        self.shared.open_connections.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Connector for MemoryStore {
    fn connect(&self) -> Result<Arc<dyn ObjectStore>, StoreError> {
        Ok(Arc::new(MemoryStore {
            shared: self.shared.clone(),
            connection: Some(Arc::new(OpenConnection::open(&self.shared))),
        }))
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn check_bucket(&self, bucket: &str) -> Result<(), StoreError> {
        if lock(&self.shared.buckets).contains_key(bucket) {
            Ok(())
        } else {
            Err(Self::missing_bucket(bucket))
        }
    }

    async fn list_page(
        &self,
        bucket: &str,
        prefix: Option<&str>,
        continuation: Option<String>,
    ) -> Result<KeyPage, StoreError> {
        if let Some(error) = lock(&self.shared.faults).listing_error.clone() {
            return Err(error);
        }

        let buckets = lock(&self.shared.buckets);
        let objects = buckets
            .get(bucket)
            .ok_or_else(|| Self::missing_bucket(bucket))?;
        let prefix = prefix.unwrap_or_default();

        // The continuation token is the last key of the previous page
        let mut matching = objects
            .keys()
            .filter(|key| continuation.as_deref().map_or(true, |after| key.as_str() > after))
            .filter(|key| key.starts_with(prefix));

        let keys: Vec<String> = matching
            .by_ref()
            .take(self.shared.page_size)
            .cloned()
            .collect();
        let next = match matching.next() {
            Some(_) => keys.last().cloned(),
            None => None,
        };

        Ok(KeyPage { keys, next })
    }

    async fn key_exists(&self, bucket: &str, key: &str) -> Result<bool, StoreError> {
        let buckets = lock(&self.shared.buckets);
        let objects = buckets
            .get(bucket)
            .ok_or_else(|| Self::missing_bucket(bucket))?;
        Ok(objects.contains_key(key))
    }

    async fn copy_key(
        &self,
        source_bucket: &str,
        dest_bucket: &str,
        key: &str,
        preserve_acl: bool,
    ) -> Result<(), StoreError> {
        self.shared.copy_calls.fetch_add(1, Ordering::SeqCst);
        let _in_flight = InFlight::enter(&self.shared);

        let (delay, stalled, error) = {
            let faults = lock(&self.shared.faults);
            (
                faults.copy_delay,
                faults.stalled_copies.contains(key),
                faults.copy_errors.get(key).cloned(),
            )
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if stalled {
            std::future::pending::<()>().await;
        }
        if let Some(error) = error {
            return Err(error);
        }

        let mut buckets = lock(&self.shared.buckets);
        let object = buckets
            .get(source_bucket)
            .ok_or_else(|| Self::missing_bucket(source_bucket))?
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::not_found(format!("key {key} does not exist")))?;
        let dest = buckets
            .get_mut(dest_bucket)
            .ok_or_else(|| Self::missing_bucket(dest_bucket))?;

        let acl = if preserve_acl { object.acl } else { None };
        dest.insert(
            key.to_owned(),
            StoredObject {
                body: object.body,
                acl,
            },
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[tokio::test]
    async fn pages_follow_continuation() {
        let store = MemoryStore::with_page_size(2);
        for key in ["a", "b", "c", "d", "e"] {
            store.put("src", key, key);
        }

        let first = store.list_page("src", None, None).await.unwrap();
        assert_eq!(first.keys, vec!["a", "b"]);
        let second = store.list_page("src", None, first.next).await.unwrap();
        assert_eq!(second.keys, vec!["c", "d"]);
        let third = store.list_page("src", None, second.next).await.unwrap();
        assert_eq!(third.keys, vec!["e"]);
        assert_eq!(third.next, None);
    }

    #[tokio::test]
    async fn copy_moves_body_and_optionally_acl() {
        let store = MemoryStore::new();
        store.put_with_acl("src", "k", "data", Some("public-read"));
        store.create_bucket("dst");

        store.copy_key("src", "dst", "k", false).await.unwrap();
        assert_eq!(store.get("dst", "k"), Some(b"data".to_vec()));
        assert_eq!(store.acl("dst", "k"), None);

        store.copy_key("src", "dst", "k", true).await.unwrap();
        assert_eq!(store.acl("dst", "k"), Some("public-read".to_string()));
        assert_eq!(store.copies_in_flight(), 0);
        assert_eq!(store.max_copies_in_flight(), 1);
    }

    #[test]
    fn connections_are_counted_until_dropped() {
        let store = MemoryStore::new();
        let first = store.connect().unwrap();
        let second = store.connect().unwrap();
        assert_eq!(store.open_connections(), 2);

        drop(first);
        assert_eq!(store.open_connections(), 1);
        drop(second);
        assert_eq!(store.open_connections(), 0);
        assert_eq!(store.connections(), 2);
        assert_eq!(store.max_open_connections(), 2);
    }

    #[tokio::test]
    async fn missing_bucket_is_not_found() {
        let store = MemoryStore::new();
        let err = store.check_bucket("nope").await.unwrap_err();
        assert!(err.is_not_found());
        assert!(store.key_exists("nope", "k").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn injected_copy_error_is_returned() {
        let store = MemoryStore::new();
        store.put("src", "k", "data");
        store.create_bucket("dst");
        store.fail_copy("k", ErrorKind::AccessDenied.into());

        let err = store.copy_key("src", "dst", "k", false).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::AccessDenied);
        assert_eq!(store.get("dst", "k"), None);
        assert_eq!(store.copy_calls(), 1);
    }
}
