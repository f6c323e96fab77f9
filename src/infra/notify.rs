//! Moderator notification delivery.

use async_trait::async_trait;
use tracing::info;
use url::Url;
use uuid::Uuid;

use crate::application::notify::{ModerationNotifier, NotifyError};

/// Posts a JSON payload to the moderation webhook. Without a configured
/// webhook URL the notification is only logged, which is enough for
/// single-operator deployments tailing the logs.
pub struct WebhookNotifier {
    http: reqwest::Client,
    webhook_url: Option<Url>,
}

impl WebhookNotifier {
    pub fn new(http: reqwest::Client, webhook_url: Option<Url>) -> Self {
        Self { http, webhook_url }
    }
}

#[async_trait]
impl ModerationNotifier for WebhookNotifier {
    async fn notify_draft(&self, draft_id: Uuid) -> Result<(), NotifyError> {
        let Some(url) = &self.webhook_url else {
            info!(
                target = "portalbake::notify",
                %draft_id,
                "draft awaiting moderation (no webhook configured)"
            );
            return Ok(());
        };

        self.http
            .post(url.clone())
            .json(&serde_json::json!({ "draft_id": draft_id, "event": "draft_awaiting_moderation" }))
            .send()
            .await
            .and_then(|resp| resp.error_for_status())
            .map_err(|err| NotifyError::Delivery(err.to_string()))?;
        info!(target = "portalbake::notify", %draft_id, "moderation webhook delivered");
        Ok(())
    }
}
