use std::sync::Arc;

use async_trait::async_trait;

use crate::error::StoreError;

/// One page of a bucket listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyPage {
    pub keys: Vec<String>,
    /// Token for the next page, `None` on the last one.
    pub next: Option<String>,
}

/// The storage operations a copy run needs.
///
/// A handle is not shared between units of work; see [`Connector`].
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fails when the bucket does not exist or is not accessible.
    async fn check_bucket(&self, bucket: &str) -> Result<(), StoreError>;

    async fn list_page(
        &self,
        bucket: &str,
        prefix: Option<&str>,
        continuation: Option<String>,
    ) -> Result<KeyPage, StoreError>;

    async fn key_exists(&self, bucket: &str, key: &str) -> Result<bool, StoreError>;

    /// Server-side copy of `key` from `source_bucket` to `dest_bucket` under the same name.
    async fn copy_key(
        &self,
        source_bucket: &str,
        dest_bucket: &str,
        key: &str,
        preserve_acl: bool,
    ) -> Result<(), StoreError>;
}

/// Opens fresh connections to the backend.
pub trait Connector: Send + Sync {
    fn connect(&self) -> Result<Arc<dyn ObjectStore>, StoreError>;
}
