//! CMS adapter backed by the CMS database plus its origin server.
//!
//! Structured reads (pages, redirects, drafts, watermarks) go straight
//! to the CMS schema; rendered bodies come from the CMS origin over
//! HTTP, with `X-Forwarded-Proto: https` when the bake wants secure
//! absolute links. The draft transaction wraps a single database
//! transaction, so the outbox row and the watermark ride along with the
//! draft itself.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Postgres, Transaction, postgres::PgPool};
use tracing::warn;
use url::Url;
use uuid::Uuid;

use crate::application::cms::{
    CmsAdapter, CmsError, CmsRedirect, CmsTransaction, DraftOutcome, DraftPage, PageRef,
    PublicPage, PublishReport, RedirectTarget,
};

pub struct PortalCms {
    pool: PgPool,
    http: reqwest::Client,
    /// Internal origin that renders pages, e.g. `http://cms:8000`.
    origin_base: Url,
    /// Public base used to absolutize sitemap URLs.
    site_base: Url,
}

fn persistence(err: impl std::fmt::Display) -> CmsError {
    CmsError::Persistence(err.to_string())
}

impl PortalCms {
    pub fn new(pool: PgPool, http: reqwest::Client, origin_base: Url, site_base: Url) -> Self {
        Self {
            pool,
            http,
            origin_base,
            site_base,
        }
    }

    async fn fetch_rendered(&self, path: &str, secure: bool) -> Result<String, CmsError> {
        let url = self.origin_base.join(path).map_err(|err| CmsError::Render {
            path: path.to_string(),
            message: err.to_string(),
        })?;
        let mut request = self.http.get(url);
        if secure {
            request = request.header("X-Forwarded-Proto", "https");
        }
        let response = request.send().await.map_err(|err| CmsError::Render {
            path: path.to_string(),
            message: err.to_string(),
        })?;
        if !response.status().is_success() {
            return Err(CmsError::Render {
                path: path.to_string(),
                message: format!("origin returned {}", response.status()),
            });
        }
        response.text().await.map_err(|err| CmsError::Render {
            path: path.to_string(),
            message: err.to_string(),
        })
    }

    async fn live_paths(&self) -> Result<Vec<(String, String)>, CmsError> {
        sqlx::query_as::<_, (String, String)>(
            r#"
            SELECT path, title
            FROM cms_pages
            WHERE live
            ORDER BY path
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(persistence)
    }
}

#[derive(sqlx::FromRow)]
struct RedirectRow {
    from_path: String,
    target_path: Option<String>,
    external_url: Option<String>,
}

#[async_trait]
impl CmsAdapter for PortalCms {
    async fn list_public_pages(&self) -> Result<Vec<PublicPage>, CmsError> {
        let rows = self.live_paths().await?;
        Ok(rows
            .into_iter()
            .map(|(path, title)| PublicPage { path, title })
            .collect())
    }

    async fn render_page(&self, path: &str, secure: bool) -> Result<String, CmsError> {
        self.fetch_rendered(path, secure).await
    }

    async fn error_page_404(&self, secure: bool) -> Result<String, CmsError> {
        // The origin serves its not-found template at a fixed path so
        // the baker does not have to provoke a real 404.
        self.fetch_rendered("/404/", secure).await
    }

    async fn sitemap_xml(&self) -> Result<String, CmsError> {
        self.fetch_rendered("/sitemap.xml", false).await
    }

    async fn sitemap_urls(&self) -> Result<Vec<String>, CmsError> {
        let rows = self.live_paths().await?;
        let mut urls = Vec::with_capacity(rows.len());
        for (path, _) in rows {
            match self.site_base.join(&path) {
                Ok(url) => urls.push(url.to_string()),
                Err(err) => {
                    warn!(
                        target = "portalbake::cms",
                        path, error = %err, "skipping unjoinable sitemap path"
                    );
                }
            }
        }
        Ok(urls)
    }

    async fn list_redirects(&self) -> Result<Vec<CmsRedirect>, CmsError> {
        let rows = sqlx::query_as::<_, RedirectRow>(
            r#"
            SELECT r.from_path,
                   p.path AS target_path,
                   r.external_url
            FROM cms_redirects r
            LEFT JOIN cms_pages p ON p.id = r.target_page_id
            WHERE r.site_scope IN ('any', 'default_site')
            ORDER BY r.from_path
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(persistence)?;

        let mut redirects = Vec::with_capacity(rows.len());
        for row in rows {
            let target = match (row.target_path, row.external_url) {
                (Some(path), _) => RedirectTarget::Internal(path),
                (None, Some(url)) => RedirectTarget::External(url),
                (None, None) => {
                    warn!(
                        target = "portalbake::cms",
                        from_path = %row.from_path,
                        "redirect has no resolvable destination; skipping"
                    );
                    continue;
                }
            };
            redirects.push(CmsRedirect {
                from_path: row.from_path,
                target,
            });
        }
        Ok(redirects)
    }

    async fn publish_scheduled(&self, now: DateTime<Utc>) -> Result<PublishReport, CmsError> {
        let mut tx = self.pool.begin().await.map_err(persistence)?;

        let published: Vec<(String,)> = sqlx::query_as(
            r#"
            UPDATE cms_pages
            SET live = TRUE
            WHERE NOT live AND go_live_at IS NOT NULL AND go_live_at <= $1
            RETURNING path
            "#,
        )
        .bind(now)
        .fetch_all(&mut *tx)
        .await
        .map_err(persistence)?;

        let unpublished: Vec<(String,)> = sqlx::query_as(
            r#"
            UPDATE cms_pages
            SET live = FALSE
            WHERE live AND expire_at IS NOT NULL AND expire_at <= $1
            RETURNING path
            "#,
        )
        .bind(now)
        .fetch_all(&mut *tx)
        .await
        .map_err(persistence)?;

        tx.commit().await.map_err(persistence)?;

        Ok(PublishReport {
            published: published
                .into_iter()
                .map(|(path,)| PageRef { path })
                .collect(),
            unpublished: unpublished
                .into_iter()
                .map(|(path,)| PageRef { path })
                .collect(),
        })
    }

    async fn begin(&self) -> Result<Box<dyn CmsTransaction>, CmsError> {
        let tx = self.pool.begin().await.map_err(persistence)?;
        Ok(Box::new(PortalCmsTransaction { tx }))
    }
}

struct PortalCmsTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl CmsTransaction for PortalCmsTransaction {
    async fn create_draft(&mut self, draft: DraftPage) -> Result<DraftOutcome, CmsError> {
        let authors = serde_json::to_value(&draft.authors).map_err(persistence)?;
        let id: Option<Uuid> = sqlx::query_scalar(
            r#"
            INSERT INTO cms_drafts (id, slug, title, authors, source_url, image_key, published_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (slug) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&draft.slug)
        .bind(&draft.title)
        .bind(authors)
        .bind(&draft.source_url)
        .bind(&draft.image_key)
        .bind(draft.published_at)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(persistence)?;

        Ok(match id {
            Some(id) => DraftOutcome::Created { id },
            None => DraftOutcome::AlreadyKnown,
        })
    }

    async fn store_image(
        &mut self,
        slug: &str,
        url: &str,
        body: &[u8],
    ) -> Result<String, CmsError> {
        sqlx::query(
            r#"
            INSERT INTO cms_draft_images (slug, source_url, body)
            VALUES ($1, $2, $3)
            ON CONFLICT (slug) DO UPDATE
            SET source_url = EXCLUDED.source_url, body = EXCLUDED.body
            "#,
        )
        .bind(slug)
        .bind(url)
        .bind(body)
        .execute(&mut *self.tx)
        .await
        .map_err(persistence)?;
        Ok(format!("draft-images/{slug}"))
    }

    async fn queue_moderation_notification(&mut self, draft_id: Uuid) -> Result<(), CmsError> {
        sqlx::query(
            r#"
            INSERT INTO notification_outbox (id, draft_id)
            VALUES ($1, $2)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(draft_id)
        .execute(&mut *self.tx)
        .await
        .map_err(persistence)?;
        Ok(())
    }

    async fn advance_watermark(
        &mut self,
        source_id: Uuid,
        to: DateTime<Utc>,
    ) -> Result<(), CmsError> {
        // GREATEST keeps the watermark monotonic even if runs land out
        // of order.
        sqlx::query(
            r#"
            UPDATE ingestion_sources
            SET last_sync = GREATEST(coalesce(last_sync, 'epoch'::timestamptz), $2)
            WHERE id = $1
            "#,
        )
        .bind(source_id)
        .bind(to)
        .execute(&mut *self.tx)
        .await
        .map_err(persistence)?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), CmsError> {
        self.tx.commit().await.map_err(persistence)
    }
}
