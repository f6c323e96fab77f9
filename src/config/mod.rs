//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{net::SocketAddr, num::NonZeroU32, path::PathBuf, str::FromStr, time::Duration};

use clap::{Args, Parser, Subcommand, ValueEnum, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

use crate::domain::types::SourceKind;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "portalbake";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PUBLIC_PORT: u16 = 8380;
const DEFAULT_DB_HTTP_MAX_CONNECTIONS: u32 = 8;
const DEFAULT_DB_JOBS_MAX_CONNECTIONS: u32 = 8;
const DEFAULT_BUILD_ROOT: &str = "/var/lib/portalbake/build";
const DEFAULT_BUILD_DEADLINE_SECS: u64 = 1800;
const DEFAULT_ACL: &str = "public-read";
const DEFAULT_UPLOAD_CONCURRENCY: u32 = 8;
const DEFAULT_LOCK_TTL_SECS: u64 = 600;
const DEFAULT_FEED_MAX_ENTRIES: u32 = 200;
const DEFAULT_WARM_CONCURRENCY: u32 = 8;
const DEFAULT_WARM_URL_TIMEOUT_SECS: u64 = 15;
const DEFAULT_SURVEY_COOKIE: &str = "dwf_task_completion_survey";
const DEFAULT_CMS_ORIGIN: &str = "http://127.0.0.1:8000";
const DEFAULT_SITE_BASE: &str = "https://developer.example.org";

fn default_selective_targets() -> Vec<String> {
    ["events/*", "people/*", "topics/*"]
        .into_iter()
        .map(str::to_string)
        .collect()
}

/// Command-line arguments for the portalbake binary.
#[derive(Debug, Parser)]
#[command(name = "portalbake", version, about = "Developer-portal publishing pipeline")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "PORTALBAKE_CONFIG_FILE",
        value_name = "PATH"
    )]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the intake server, scheduler, and queue workers.
    Serve(Box<ServeArgs>),
    /// Run one bake-and-publish cycle and exit.
    Build(BuildArgs),
    /// Ingest all enabled feed sources of one kind and exit.
    Ingest(IngestArgs),
    /// Issue a CDN invalidation and exit.
    Invalidate(InvalidateArgs),
    /// Apply pending database migrations and exit.
    Migrate(MigrateArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Clone)]
pub struct BuildArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum IngestKindArg {
    Articles,
    Videos,
}

impl From<IngestKindArg> for SourceKind {
    fn from(value: IngestKindArg) -> Self {
        match value {
            IngestKindArg::Articles => SourceKind::ExternalArticle,
            IngestKindArg::Videos => SourceKind::ExternalVideo,
        }
    }
}

#[derive(Debug, Args, Clone)]
pub struct IngestArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,

    /// Which kind of sources to poll.
    #[arg(value_enum)]
    pub kind: IngestKindArg,
}

#[derive(Debug, Args, Clone)]
pub struct InvalidateArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,

    /// Invalidate everything instead of the selective targets.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub full: bool,

    /// Warm the cache from the sitemap afterwards.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub warm: bool,
}

#[derive(Debug, Args, Clone)]
pub struct MigrateArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    /// Override the intake listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the intake listener port.
    #[arg(long = "server-public-port", value_name = "PORT")]
    pub public_port: Option<u16>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the database connection URL.
    #[arg(long = "database-url", value_name = "URL")]
    pub database_url: Option<String>,

    /// Override the build output root.
    #[arg(long = "build-root", value_name = "PATH")]
    pub build_root: Option<PathBuf>,

    /// Override the build wall-clock deadline.
    #[arg(long = "build-deadline-seconds", value_name = "SECONDS")]
    pub build_deadline_seconds: Option<u64>,

    /// Override the object-store bucket.
    #[arg(long = "object-store-bucket", value_name = "BUCKET")]
    pub object_store_bucket: Option<String>,

    /// Override the CDN distribution id (empty disables invalidation).
    #[arg(long = "cdn-distribution-id", value_name = "ID")]
    pub cdn_distribution_id: Option<String>,

    /// Override the lock TTL.
    #[arg(long = "lock-ttl-seconds", value_name = "SECONDS")]
    pub lock_ttl_seconds: Option<u64>,

    /// Toggle feed ingestion.
    #[arg(
        long = "ingestion-enabled",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub ingestion_enabled: Option<bool>,
}

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub database: DatabaseSettings,
    pub build: BuildSettings,
    pub object_store: ObjectStoreSettings,
    pub cdn: CdnSettings,
    pub lock: LockSettings,
    pub ingestion: IngestionSettings,
    pub survey: SurveySettings,
    pub cms: CmsSettings,
    pub notifications: NotificationSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub public_addr: SocketAddr,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub url: Option<String>,
    pub http_max_connections: NonZeroU32,
    pub jobs_max_connections: NonZeroU32,
}

#[derive(Debug, Clone)]
pub struct BuildSettings {
    pub root: PathBuf,
    pub deadline: Duration,
    pub force_https: bool,
}

#[derive(Debug, Clone)]
pub struct ObjectStoreSettings {
    pub bucket: Option<String>,
    pub region: Option<String>,
    pub acl: String,
    pub upload_concurrency: NonZeroU32,
}

#[derive(Debug, Clone)]
pub struct CdnSettings {
    /// Empty or absent disables invalidation.
    pub distribution_id: Option<String>,
    pub selective_targets: Vec<String>,
    pub warm_concurrency: NonZeroU32,
    pub warm_url_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct LockSettings {
    pub ttl: Duration,
}

#[derive(Debug, Clone)]
pub struct IngestionSettings {
    pub enabled: bool,
    pub feed_max_entries: NonZeroU32,
}

#[derive(Debug, Clone)]
pub struct SurveySettings {
    pub cookie_name: String,
}

#[derive(Debug, Clone)]
pub struct CmsSettings {
    pub origin_base: Url,
    pub site_base: Url,
}

#[derive(Debug, Clone)]
pub struct NotificationSettings {
    pub webhook_url: Option<Url>,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix("PORTALBAKE").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Build(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Ingest(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Invalidate(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Migrate(args)) => raw.apply_serve_overrides(&args.overrides),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    database: RawDatabaseSettings,
    build: RawBuildSettings,
    object_store: RawObjectStoreSettings,
    cdn: RawCdnSettings,
    lock: RawLockSettings,
    ingestion: RawIngestionSettings,
    survey: RawSurveySettings,
    cms: RawCmsSettings,
    notifications: RawNotificationSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.public_port {
            self.server.public_port = Some(port);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
        if let Some(root) = overrides.build_root.as_ref() {
            self.build.root = Some(root.clone());
        }
        if let Some(seconds) = overrides.build_deadline_seconds {
            self.build.deadline_seconds = Some(seconds);
        }
        if let Some(bucket) = overrides.object_store_bucket.as_ref() {
            self.object_store.bucket = Some(bucket.clone());
        }
        if let Some(id) = overrides.cdn_distribution_id.as_ref() {
            self.cdn.distribution_id = Some(id.clone());
        }
        if let Some(seconds) = overrides.lock_ttl_seconds {
            self.lock.ttl_seconds = Some(seconds);
        }
        if let Some(enabled) = overrides.ingestion_enabled {
            self.ingestion.enabled = Some(enabled);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            database,
            build,
            object_store,
            cdn,
            lock,
            ingestion,
            survey,
            cms,
            notifications,
        } = raw;

        let cms = build_cms_settings(cms)?;
        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            database: build_database_settings(database)?,
            build: build_build_settings(build, &cms.site_base)?,
            object_store: build_object_store_settings(object_store)?,
            cdn: build_cdn_settings(cdn)?,
            lock: build_lock_settings(lock)?,
            ingestion: build_ingestion_settings(ingestion)?,
            survey: build_survey_settings(survey)?,
            cms,
            notifications: build_notification_settings(notifications)?,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());
    let public_port = server.public_port.unwrap_or(DEFAULT_PUBLIC_PORT);
    if public_port == 0 {
        return Err(LoadError::invalid(
            "server.public_port",
            "port must be greater than zero",
        ));
    }
    let public_addr = parse_socket_addr(&host, public_port)
        .map_err(|reason| LoadError::invalid("server.public_addr", reason))?;
    Ok(ServerSettings { public_addr })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_database_settings(database: RawDatabaseSettings) -> Result<DatabaseSettings, LoadError> {
    let url = database.url.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    });

    let http_value = database
        .http_max_connections
        .unwrap_or(DEFAULT_DB_HTTP_MAX_CONNECTIONS);
    let jobs_value = database
        .jobs_max_connections
        .unwrap_or(DEFAULT_DB_JOBS_MAX_CONNECTIONS);

    Ok(DatabaseSettings {
        url,
        http_max_connections: non_zero_u32(http_value.into(), "database.http_max_connections")?,
        jobs_max_connections: non_zero_u32(jobs_value.into(), "database.jobs_max_connections")?,
    })
}

fn build_build_settings(
    build: RawBuildSettings,
    site_base: &Url,
) -> Result<BuildSettings, LoadError> {
    let root = build
        .root
        .unwrap_or_else(|| PathBuf::from(DEFAULT_BUILD_ROOT));
    if root.as_os_str().is_empty() {
        return Err(LoadError::invalid("build.root", "path must not be empty"));
    }

    let deadline_seconds = build
        .deadline_seconds
        .unwrap_or(DEFAULT_BUILD_DEADLINE_SECS);
    if deadline_seconds == 0 {
        return Err(LoadError::invalid(
            "build.deadline_seconds",
            "must be greater than zero",
        ));
    }

    // Unless overridden, pages render secure links whenever the public
    // site itself is served over TLS.
    let force_https = build
        .force_https
        .unwrap_or_else(|| site_base.scheme() == "https" || site_base.port() == Some(443));

    Ok(BuildSettings {
        root,
        deadline: Duration::from_secs(deadline_seconds),
        force_https,
    })
}

fn build_object_store_settings(
    object_store: RawObjectStoreSettings,
) -> Result<ObjectStoreSettings, LoadError> {
    let bucket = object_store.bucket.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    });
    let acl = object_store.acl.unwrap_or_else(|| DEFAULT_ACL.to_string());
    if acl.is_empty() {
        return Err(LoadError::invalid("object_store.acl", "must not be empty"));
    }
    let concurrency = object_store
        .upload_concurrency
        .unwrap_or(DEFAULT_UPLOAD_CONCURRENCY);

    Ok(ObjectStoreSettings {
        bucket,
        region: object_store.region,
        acl,
        upload_concurrency: non_zero_u32(concurrency.into(), "object_store.upload_concurrency")?,
    })
}

fn build_cdn_settings(cdn: RawCdnSettings) -> Result<CdnSettings, LoadError> {
    let distribution_id = cdn.distribution_id.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    });
    let selective_targets = cdn
        .selective_targets
        .unwrap_or_else(default_selective_targets);
    let warm_concurrency = cdn.warm_concurrency.unwrap_or(DEFAULT_WARM_CONCURRENCY);
    let warm_url_timeout_seconds = cdn
        .warm_url_timeout_seconds
        .unwrap_or(DEFAULT_WARM_URL_TIMEOUT_SECS);
    if warm_url_timeout_seconds == 0 {
        return Err(LoadError::invalid(
            "cdn.warm_url_timeout_seconds",
            "must be greater than zero",
        ));
    }

    Ok(CdnSettings {
        distribution_id,
        selective_targets,
        warm_concurrency: non_zero_u32(warm_concurrency.into(), "cdn.warm_concurrency")?,
        warm_url_timeout: Duration::from_secs(warm_url_timeout_seconds),
    })
}

fn build_lock_settings(lock: RawLockSettings) -> Result<LockSettings, LoadError> {
    let ttl_seconds = lock.ttl_seconds.unwrap_or(DEFAULT_LOCK_TTL_SECS);
    if ttl_seconds == 0 {
        return Err(LoadError::invalid(
            "lock.ttl_seconds",
            "must be greater than zero",
        ));
    }
    Ok(LockSettings {
        ttl: Duration::from_secs(ttl_seconds),
    })
}

fn build_ingestion_settings(
    ingestion: RawIngestionSettings,
) -> Result<IngestionSettings, LoadError> {
    let feed_max_entries = ingestion
        .feed_max_entries
        .unwrap_or(DEFAULT_FEED_MAX_ENTRIES);
    Ok(IngestionSettings {
        enabled: ingestion.enabled.unwrap_or(true),
        feed_max_entries: non_zero_u32(feed_max_entries.into(), "ingestion.feed_max_entries")?,
    })
}

fn build_survey_settings(survey: RawSurveySettings) -> Result<SurveySettings, LoadError> {
    let cookie_name = survey
        .cookie_name
        .unwrap_or_else(|| DEFAULT_SURVEY_COOKIE.to_string());
    if cookie_name.is_empty() {
        return Err(LoadError::invalid("survey.cookie_name", "must not be empty"));
    }
    Ok(SurveySettings { cookie_name })
}

fn build_cms_settings(cms: RawCmsSettings) -> Result<CmsSettings, LoadError> {
    let origin = cms
        .origin_base
        .unwrap_or_else(|| DEFAULT_CMS_ORIGIN.to_string());
    let origin_base = Url::parse(&origin)
        .map_err(|err| LoadError::invalid("cms.origin_base", err.to_string()))?;

    let site = cms
        .site_base
        .unwrap_or_else(|| DEFAULT_SITE_BASE.to_string());
    let site_base =
        Url::parse(&site).map_err(|err| LoadError::invalid("cms.site_base", err.to_string()))?;

    Ok(CmsSettings {
        origin_base,
        site_base,
    })
}

fn build_notification_settings(
    notifications: RawNotificationSettings,
) -> Result<NotificationSettings, LoadError> {
    let webhook_url = match notifications.webhook_url {
        Some(value) if !value.trim().is_empty() => Some(
            Url::parse(value.trim())
                .map_err(|err| LoadError::invalid("notifications.webhook_url", err.to_string()))?,
        ),
        _ => None,
    };
    Ok(NotificationSettings { webhook_url })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    public_port: Option<u16>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDatabaseSettings {
    url: Option<String>,
    http_max_connections: Option<u32>,
    jobs_max_connections: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawBuildSettings {
    root: Option<PathBuf>,
    deadline_seconds: Option<u64>,
    force_https: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawObjectStoreSettings {
    bucket: Option<String>,
    region: Option<String>,
    acl: Option<String>,
    upload_concurrency: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCdnSettings {
    distribution_id: Option<String>,
    selective_targets: Option<Vec<String>>,
    warm_concurrency: Option<u32>,
    warm_url_timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLockSettings {
    ttl_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawIngestionSettings {
    enabled: Option<bool>,
    feed_max_entries: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSurveySettings {
    cookie_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCmsSettings {
    origin_base: Option<String>,
    site_base: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawNotificationSettings {
    webhook_url: Option<String>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[cfg(test)]
mod tests;
