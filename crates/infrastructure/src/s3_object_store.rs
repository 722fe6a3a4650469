//! S3-backed object store.

use async_trait::async_trait;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use chrono::DateTime;
use cirrus_application::{ObjectStore, StoredObject};
use cirrus_core::{AppError, AppResult};
use tracing::warn;

/// S3 implementation of the object store port, scoped to one bucket.
#[derive(Clone)]
pub struct S3ObjectStore {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl S3ObjectStore {
    /// Creates an object store over `bucket`.
    #[must_use]
    pub fn new(client: aws_sdk_s3::Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put_object(&self, key: &str, body: Vec<u8>) -> AppResult<()> {
        self.client
            .put_object()
            .bucket(self.bucket.as_str())
            .key(key)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|error| {
                AppError::Internal(format!(
                    "failed to write s3://{}/{key}: {}",
                    self.bucket,
                    DisplayErrorContext(&error)
                ))
            })?;

        Ok(())
    }

    async fn list_objects(&self, prefix: &str) -> AppResult<Vec<StoredObject>> {
        let mut objects = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let response = self
                .client
                .list_objects_v2()
                .bucket(self.bucket.as_str())
                .prefix(prefix)
                .set_continuation_token(continuation_token.take())
                .send()
                .await
                .map_err(|error| {
                    AppError::Internal(format!(
                        "failed to list s3://{}/{prefix}: {}",
                        self.bucket,
                        DisplayErrorContext(&error)
                    ))
                })?;

            for object in response.contents() {
                let Some(key) = object.key() else {
                    continue;
                };
                let Some(last_modified) = object.last_modified().and_then(|timestamp| {
                    DateTime::from_timestamp(timestamp.secs(), timestamp.subsec_nanos())
                }) else {
                    warn!(key = %key, "s3 object without usable last-modified time");
                    continue;
                };

                objects.push(StoredObject {
                    key: key.to_owned(),
                    last_modified,
                });
            }

            match response.next_continuation_token() {
                Some(token) if response.is_truncated().unwrap_or(false) => {
                    continuation_token = Some(token.to_owned());
                }
                _ => break,
            }
        }

        Ok(objects)
    }

    async fn delete_object(&self, key: &str) -> AppResult<()> {
        self.client
            .delete_object()
            .bucket(self.bucket.as_str())
            .key(key)
            .send()
            .await
            .map_err(|error| {
                AppError::Internal(format!(
                    "failed to delete s3://{}/{key}: {}",
                    self.bucket,
                    DisplayErrorContext(&error)
                ))
            })?;

        Ok(())
    }
}
