//! Bucket-to-bucket object copy that skips keys the destination already has.
//!
//! [`copier::copy_bucket`] lists the source bucket, starts one unit of work per
//! key and collects a [`copier::CopyReport`]. Storage access goes through the
//! [`store::ObjectStore`] seam, backed by rusoto in [`s3`] and by an in-memory
//! map in [`memory`].

pub mod config;
pub mod copier;
pub mod error;
pub mod lister;
pub mod memory;
pub mod s3;
pub mod store;

pub use config::{AddressingStyle, ConnectionConfig, CopyOptions, DebugLevel};
pub use copier::{copy_bucket, CopyOutcome, CopyReport, KeyReport};
pub use error::{CopyError, ErrorKind, StoreError};
pub use s3::RusotoConnector;
pub use store::{Connector, KeyPage, ObjectStore};
