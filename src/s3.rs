use std::sync::Arc;

use async_trait::async_trait;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use rusoto_core::{HttpClient, Region, RusotoError};
use rusoto_credential::{ChainProvider, StaticProvider};
use rusoto_s3::{
    AccessControlPolicy, CopyObjectRequest, GetObjectAclRequest, HeadBucketError,
    HeadBucketRequest, HeadObjectError, HeadObjectRequest, ListObjectsV2Request,
    PutObjectAclRequest, S3Client, S3,
};
use tracing::debug;

use crate::config::{AddressingStyle, ConnectionConfig};
use crate::error::{CopyResult, ErrorKind, StoreError};
use crate::store::{Connector, KeyPage, ObjectStore};

// Everything but unreserved characters and the path separator.
const COPY_SOURCE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'/')
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Builds a new rusoto `S3Client` for every call to `connect`.
#[derive(Debug, Clone)]
pub struct RusotoConnector {
    config: ConnectionConfig,
    credentials: Option<(String, String)>,
}

impl RusotoConnector {
    pub fn new(config: ConnectionConfig) -> CopyResult<Self> {
        config.validate()?;
        let credentials = config.static_credentials()?;
        Ok(Self {
            config,
            credentials,
        })
    }
}

impl Connector for RusotoConnector {
    fn connect(&self) -> Result<Arc<dyn ObjectStore>, StoreError> {
        let http_client =
            HttpClient::new().map_err(|e| StoreError::new(ErrorKind::Network, e.to_string()))?;
        let region = Region::Custom {
            name: self.config.region.clone(),
            endpoint: self.config.endpoint(),
        };

        // Create S3 client, static keys first, then the default chain
        let client = match &self.credentials {
            Some((access_key, secret_key)) => S3Client::new_with(
                http_client,
                StaticProvider::new_minimal(access_key.clone(), secret_key.clone()),
                region,
            ),
            None => S3Client::new_with(http_client, ChainProvider::new(), region),
        };
        debug!(endpoint = %self.config.endpoint(), "opened storage connection");

        Ok(Arc::new(RusotoStore::new(
            client,
            self.config.addressing_style,
        )))
    }
}

/// [`ObjectStore`] over a single rusoto client.
pub struct RusotoStore {
    client: S3Client,
    addressing_style: AddressingStyle,
}

impl RusotoStore {
    pub fn new(client: S3Client, addressing_style: AddressingStyle) -> Self {
        Self {
            client,
            addressing_style,
        }
    }
}

#[async_trait]
impl ObjectStore for RusotoStore {
    async fn check_bucket(&self, bucket: &str) -> Result<(), StoreError> {
        self.addressing_style
            .check_bucket_name(bucket)
            .map_err(|message| StoreError::new(ErrorKind::InvalidInput, message))?;

        let request = HeadBucketRequest {
            bucket: bucket.to_owned(),
            ..Default::default()
        };

        match self.client.head_bucket(request).await {
            Ok(()) => Ok(()),
            Err(RusotoError::Service(HeadBucketError::NoSuchBucket(message))) => {
                Err(StoreError::not_found(message))
            }
            Err(e) => Err(store_error(e)),
        }
    }

    async fn list_page(
        &self,
        bucket: &str,
        prefix: Option<&str>,
        continuation: Option<String>,
    ) -> Result<KeyPage, StoreError> {
        let request = ListObjectsV2Request {
            bucket: bucket.to_owned(),
            prefix: prefix.map(str::to_owned),
            continuation_token: continuation,
            ..Default::default()
        };

        let output = self
            .client
            .list_objects_v2(request)
            .await
            .map_err(store_error)?;

        let keys = output
            .contents
            .unwrap_or_default()
            .into_iter()
            .filter_map(|object| object.key)
            .collect();
        let next = if output.is_truncated.unwrap_or_default() {
            output.next_continuation_token
        } else {
            None
        };

        Ok(KeyPage { keys, next })
    }

    async fn key_exists(&self, bucket: &str, key: &str) -> Result<bool, StoreError> {
        let request = HeadObjectRequest {
            bucket: bucket.to_owned(),
            key: key.to_owned(),
            ..Default::default()
        };

        match self.client.head_object(request).await {
            Ok(_) => Ok(true),
            Err(RusotoError::Service(HeadObjectError::NoSuchKey(_))) => Ok(false),
            Err(e) => {
                // HEAD responses carry no body, so a missing key is usually a bare 404
                let err = store_error(e);
                if err.is_not_found() {
                    Ok(false)
                } else {
                    Err(err)
                }
            }
        }
    }

    async fn copy_key(
        &self,
        source_bucket: &str,
        dest_bucket: &str,
        key: &str,
        preserve_acl: bool,
    ) -> Result<(), StoreError> {
        let copy_request = CopyObjectRequest {
            bucket: dest_bucket.to_owned(),
            key: key.to_owned(),
            copy_source: copy_source(source_bucket, key),
            ..Default::default()
        };
        self.client
            .copy_object(copy_request)
            .await
            .map_err(store_error)?;

        if !preserve_acl {
            return Ok(());
        }

        // Copy the ACL from the source key to the destination key
        let acl = self
            .client
            .get_object_acl(GetObjectAclRequest {
                bucket: source_bucket.to_owned(),
                key: key.to_owned(),
                ..Default::default()
            })
            .await
            .map_err(store_error)?;

        self.client
            .put_object_acl(PutObjectAclRequest {
                bucket: dest_bucket.to_owned(),
                key: key.to_owned(),
                access_control_policy: Some(AccessControlPolicy {
                    grants: acl.grants,
                    owner: acl.owner,
                }),
                ..Default::default()
            })
            .await
            .map_err(store_error)?;

        Ok(())
    }
}

fn copy_source(bucket: &str, key: &str) -> String {
    format!("{}/{}", bucket, utf8_percent_encode(key, COPY_SOURCE))
}

fn store_error<E: std::error::Error>(err: RusotoError<E>) -> StoreError {
    match err {
        RusotoError::Service(e) => StoreError::new(ErrorKind::Service, e.to_string()),
        RusotoError::HttpDispatch(e) => StoreError::new(ErrorKind::Network, e.to_string()),
        RusotoError::Credentials(e) => StoreError::new(ErrorKind::Credentials, e.to_string()),
        RusotoError::Validation(message) => StoreError::new(ErrorKind::InvalidInput, message),
        RusotoError::ParseError(message) => StoreError::new(ErrorKind::Other, message),
        RusotoError::Unknown(response) => {
            let kind = match response.status.as_u16() {
                404 => ErrorKind::NotFound,
                401 | 403 => ErrorKind::AccessDenied,
                _ => ErrorKind::Service,
            };
            StoreError::new(
                kind,
                format!("HTTP {}: {}", response.status, response.body_as_str()),
            )
        }
        RusotoError::Blocking => StoreError::new(ErrorKind::Other, "blocking call failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusoto_core::request::HttpDispatchError;
    use rusoto_credential::CredentialsError;
    use rusoto_s3::CopyObjectError;

    #[test]
    fn copy_source_escapes_key_but_keeps_separators() {
        assert_eq!(copy_source("src", "a/b c/d+e.txt"), "src/a/b%20c/d%2Be.txt");
        assert_eq!(copy_source("src", "plain-key_1~"), "src/plain-key_1~");
    }

    #[test]
    fn rusoto_errors_are_classified() {
        let err = store_error::<CopyObjectError>(RusotoError::HttpDispatch(
            HttpDispatchError::new("connection refused".into()),
        ));
        assert_eq!(err.kind, ErrorKind::Network);

        let err = store_error::<CopyObjectError>(RusotoError::Credentials(
            CredentialsError::new("no keys"),
        ));
        assert_eq!(err.kind, ErrorKind::Credentials);

        let err = store_error::<CopyObjectError>(RusotoError::Validation("bad key".into()));
        assert_eq!(err, StoreError::new(ErrorKind::InvalidInput, "bad key"));
    }

    #[test]
    fn connector_rejects_half_credentials() {
        let config = ConnectionConfig {
            secret_key: Some("secret".into()),
            ..Default::default()
        };
        assert!(RusotoConnector::new(config).is_err());
    }

    #[tokio::test]
    async fn connector_builds_independent_clients() {
        let config = ConnectionConfig {
            access_key: Some("AKID".into()),
            secret_key: Some("secret".into()),
            insecure: true,
            host: "localhost:9000".into(),
            ..Default::default()
        };
        let connector = RusotoConnector::new(config).unwrap();
        let first = connector.connect().unwrap();
        let second = connector.connect().unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn virtual_hosted_style_rejects_upper_case_bucket() {
        let connector = RusotoConnector::new(ConnectionConfig::default()).unwrap();
        let store = connector.connect().unwrap();

        let err = store.check_bucket("MyBucket").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidInput);
    }
}
