//! CloudFront implementation of the CDN seam.

use async_trait::async_trait;
use aws_sdk_cloudfront::Client;
use aws_sdk_cloudfront::error::SdkError;
use aws_sdk_cloudfront::types::{InvalidationBatch, Paths};

use crate::application::stores::{CdnClient, CdnError, InvalidationOutcome};

pub struct CloudFrontCdn {
    client: Client,
}

impl CloudFrontCdn {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub async fn from_env() -> Self {
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        Self::new(Client::new(&config))
    }
}

#[async_trait]
impl CdnClient for CloudFrontCdn {
    async fn create_invalidation(
        &self,
        distribution_id: &str,
        paths: &[String],
        caller_reference: &str,
    ) -> Result<InvalidationOutcome, CdnError> {
        let path_list = Paths::builder()
            .quantity(paths.len() as i32)
            .set_items(Some(paths.to_vec()))
            .build()
            .map_err(|err| CdnError::Request(err.to_string()))?;
        let batch = InvalidationBatch::builder()
            .paths(path_list)
            .caller_reference(caller_reference)
            .build()
            .map_err(|err| CdnError::Request(err.to_string()))?;

        let result = self
            .client
            .create_invalidation()
            .distribution_id(distribution_id)
            .invalidation_batch(batch)
            .send()
            .await;

        match result {
            Ok(output) => Ok(InvalidationOutcome {
                http_status: 201,
                invalidation_status: output.invalidation().map(|inv| inv.status().to_string()),
            }),
            // A non-2xx from the service is handed back to the caller
            // to log; the queue decides whether anything retries.
            Err(SdkError::ServiceError(service)) => Ok(InvalidationOutcome {
                http_status: service.raw().status().as_u16(),
                invalidation_status: None,
            }),
            Err(other) => Err(CdnError::Request(other.to_string())),
        }
    }
}
