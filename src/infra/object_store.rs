//! S3 implementation of the object-store seam.

use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::ObjectCannedAcl;
use bytes::Bytes;

use crate::application::stores::{ObjectStore, ObjectStoreError};

pub struct S3ObjectStore {
    client: Client,
}

impl S3ObjectStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build a client from the ambient AWS environment (credentials
    /// chain, region, endpoint overrides).
    pub async fn from_env(region: Option<String>) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(aws_config::Region::new(region));
        }
        let config = loader.load().await;
        Self::new(Client::new(&config))
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put_file(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: &str,
        acl: &str,
    ) -> Result<(), ObjectStoreError> {
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(body))
            .content_type(content_type)
            .acl(ObjectCannedAcl::from(acl))
            .send()
            .await
            .map_err(|err| ObjectStoreError::Request(err.to_string()))?;
        Ok(())
    }

    async fn put_redirect(
        &self,
        bucket: &str,
        key: &str,
        destination: &str,
        acl: &str,
    ) -> Result<(), ObjectStoreError> {
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from_static(b""))
            .website_redirect_location(destination)
            .acl(ObjectCannedAcl::from(acl))
            .send()
            .await
            .map_err(|err| ObjectStoreError::Request(err.to_string()))?;
        Ok(())
    }
}
