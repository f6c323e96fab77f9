//! Shared domain enumerations aligned with persisted database enums.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "build_status", rename_all = "snake_case")]
pub enum BuildStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl BuildStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            BuildStatus::Succeeded | BuildStatus::Failed | BuildStatus::Skipped
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "build_trigger", rename_all = "snake_case")]
pub enum BuildTrigger {
    Publish,
    Unpublish,
    Scheduled,
    Manual,
}

impl BuildTrigger {
    pub fn as_str(self) -> &'static str {
        match self {
            BuildTrigger::Publish => "publish",
            BuildTrigger::Unpublish => "unpublish",
            BuildTrigger::Scheduled => "scheduled",
            BuildTrigger::Manual => "manual",
        }
    }
}

/// What a feed source turns into on the CMS side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "source_kind", rename_all = "snake_case")]
pub enum SourceKind {
    ExternalArticle,
    ExternalVideo,
}

impl SourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceKind::ExternalArticle => "external_article",
            SourceKind::ExternalVideo => "external_video",
        }
    }
}

/// Queue names recognised by the worker monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    BuildAndPublish,
    PublishScheduledPages,
    SelectiveCdnInvalidate,
    IngestArticles,
    IngestVideos,
    DispatchNotifications,
}

impl JobType {
    pub fn as_str(self) -> &'static str {
        match self {
            JobType::BuildAndPublish => "build_and_publish",
            JobType::PublishScheduledPages => "publish_scheduled_pages",
            JobType::SelectiveCdnInvalidate => "selective_cdn_invalidate",
            JobType::IngestArticles => "ingest_articles",
            JobType::IngestVideos => "ingest_videos",
            JobType::DispatchNotifications => "dispatch_notifications",
        }
    }
}

impl TryFrom<&str> for JobType {
    type Error = ();

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "build_and_publish" => Ok(JobType::BuildAndPublish),
            "publish_scheduled_pages" => Ok(JobType::PublishScheduledPages),
            "selective_cdn_invalidate" => Ok(JobType::SelectiveCdnInvalidate),
            "ingest_articles" => Ok(JobType::IngestArticles),
            "ingest_videos" => Ok(JobType::IngestVideos),
            "dispatch_notifications" => Ok(JobType::DispatchNotifications),
            _ => Err(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_type_round_trips_through_queue_name() {
        for job_type in [
            JobType::BuildAndPublish,
            JobType::PublishScheduledPages,
            JobType::SelectiveCdnInvalidate,
            JobType::IngestArticles,
            JobType::IngestVideos,
            JobType::DispatchNotifications,
        ] {
            assert_eq!(JobType::try_from(job_type.as_str()), Ok(job_type));
        }
    }

    #[test]
    fn terminal_statuses() {
        assert!(BuildStatus::Skipped.is_terminal());
        assert!(BuildStatus::Failed.is_terminal());
        assert!(!BuildStatus::Running.is_terminal());
    }
}
