//! Publishing and content-freshness pipeline for a content-managed
//! developer portal.
//!
//! The crate bakes the CMS into a static tree, uploads it to object
//! storage, coordinates CDN invalidation and cache warming, and keeps
//! the portal fresh by polling external feeds into moderation drafts.
//! All recurring work runs through a durable Postgres-backed job queue
//! so that retries and scheduling live in one place.

pub mod application;
pub mod config;
pub mod domain;
pub mod infra;
