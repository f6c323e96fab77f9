use std::{process, sync::Arc, time::Duration};

use apalis::{
    layers::WorkerBuilderExt,
    prelude::{Monitor, WorkerBuilder, WorkerFactoryFn},
};
use apalis_cron::CronStream;
use apalis_sql::{Config as ApalisSqlConfig, postgres::PostgresStorage};
use chrono::Utc;
use portalbake::{
    application::{
        baker::{Baker, BakerConfig, build_dir_for},
        cms::CmsAdapter,
        error::{AppError, JobError},
        feed::FeedFetcher,
        ingest::Ingester,
        invalidation::CdnInvalidator,
        jobs::{
            JobWorkerContext, build_schedule, dispatch_notifications_schedule,
            ingest_articles_schedule, ingest_videos_schedule, on_build_tick,
            on_dispatch_notifications_tick, on_ingest_articles_tick, on_ingest_videos_tick,
            on_publish_scheduled_tick, on_selective_invalidate_tick, process_build_job,
            process_dispatch_notifications_job, process_ingest_job, process_publish_scheduled_job,
            process_selective_invalidate_job, publish_scheduled_schedule,
            selective_invalidate_schedule,
        },
        lock::{BUILD_LOCK_KEY, DistributedLock},
        notify::ModerationNotifier,
        repos::{BuildRunsRepo, IngestionSourcesRepo},
        stores::{CdnClient, ObjectStore},
    },
    config,
    domain::types::{BuildStatus, BuildTrigger, JobType},
    infra::{
        cdn::CloudFrontCdn,
        cms::PortalCms,
        db::PostgresRepositories,
        error::InfraError,
        http::{self, HttpState, SurveyConfig},
        lock::PostgresLockStore,
        notify::WebhookNotifier,
        object_store::S3ObjectStore,
        telemetry,
    },
};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Build(_) => run_build(settings).await,
        config::Command::Ingest(args) => run_ingest(settings, args).await,
        config::Command::Invalidate(args) => run_invalidate(settings, args).await,
        config::Command::Migrate(_) => run_migrate(settings).await,
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let (http_repositories, job_repositories) = init_repositories(&settings).await?;
    let app = build_application_context(
        http_repositories.clone(),
        job_repositories.clone(),
        &settings,
    )
    .await?;

    let monitor_handle = spawn_job_monitor(job_repositories, app.job_context.clone());

    let result = serve_http(&settings, app.http_state).await;

    monitor_handle.abort();
    let _ = monitor_handle.await;

    result
}

async fn run_build(settings: config::Settings) -> Result<(), AppError> {
    let (http_repositories, job_repositories) = init_repositories(&settings).await?;
    let app = build_application_context(http_repositories, job_repositories, &settings).await?;
    let ctx = app.job_context;

    let runs: &dyn BuildRunsRepo = ctx.repositories.as_ref();
    let run_id = runs
        .create_run(BuildTrigger::Manual)
        .await
        .map_err(|err| AppError::unexpected(err.to_string()))?;

    let lease = ctx
        .lock
        .acquire(BUILD_LOCK_KEY)
        .await
        .map_err(|err| AppError::unexpected(err.to_string()))?;
    let Some(lease) = lease else {
        runs.mark_finished(run_id, BuildStatus::Skipped, Some("build lock held elsewhere"))
            .await
            .map_err(|err| AppError::unexpected(err.to_string()))?;
        return Err(JobError::conflict("another build holds the lock; try again later").into());
    };

    let now = Utc::now();
    let build_dir = build_dir_for(ctx.baker.build_root(), now);
    if let Err(err) = runs.mark_running(run_id, &build_dir.to_string_lossy()).await {
        if let Err(release_err) = lease.release().await {
            warn!(target = "portalbake::build", error = %release_err, "build lock release failed");
        }
        if let Err(mark_err) = runs
            .mark_finished(run_id, BuildStatus::Failed, Some("could not mark run running"))
            .await
        {
            warn!(target = "portalbake::build", error = %mark_err, "failed to record run failure");
        }
        return Err(AppError::unexpected(err.to_string()));
    }

    let outcome = tokio::time::timeout(ctx.build_deadline, ctx.baker.run(now)).await;

    if let Err(err) = lease.release().await {
        warn!(target = "portalbake::build", error = %err, "build lock release failed");
    }

    match outcome {
        Ok(Ok(report)) => {
            info!(
                target = "portalbake::build",
                %run_id,
                pages_rendered = report.pages_rendered,
                pages_skipped = report.pages_skipped,
                files_uploaded = report.files_uploaded,
                redirects_written = report.redirects_written,
                "build succeeded"
            );
            runs.mark_finished(run_id, BuildStatus::Succeeded, None)
                .await
                .map_err(|err| AppError::unexpected(err.to_string()))?;
            Ok(())
        }
        Ok(Err(err)) => {
            let message = err.to_string();
            runs.mark_finished(run_id, BuildStatus::Failed, Some(&message))
                .await
                .map_err(|err| AppError::unexpected(err.to_string()))?;
            Err(AppError::unexpected(message))
        }
        Err(_) => {
            if let Err(err) = tokio::fs::remove_dir_all(&build_dir).await {
                if err.kind() != std::io::ErrorKind::NotFound {
                    warn!(
                        target = "portalbake::build",
                        %run_id, error = %err, "stale build directory removal failed"
                    );
                }
            }
            runs.mark_finished(run_id, BuildStatus::Failed, Some("deadline exceeded"))
                .await
                .map_err(|err| AppError::unexpected(err.to_string()))?;
            Err(AppError::unexpected(format!(
                "build exceeded the {}s deadline",
                ctx.build_deadline.as_secs()
            )))
        }
    }
}

async fn run_ingest(settings: config::Settings, args: config::IngestArgs) -> Result<(), AppError> {
    let (http_repositories, job_repositories) = init_repositories(&settings).await?;
    let app = build_application_context(http_repositories, job_repositories, &settings).await?;

    let report = app
        .job_context
        .ingester
        .ingest_kind(args.kind.into(), Utc::now())
        .await?;

    info!(
        target = "portalbake::ingest",
        sources_processed = report.sources_processed,
        entries_seen = report.entries_seen,
        drafts_created = report.drafts_created,
        duplicates = report.duplicates,
        images_stored = report.images_stored,
        "ingest complete"
    );
    Ok(())
}

async fn run_invalidate(
    settings: config::Settings,
    args: config::InvalidateArgs,
) -> Result<(), AppError> {
    let (http_repositories, job_repositories) = init_repositories(&settings).await?;
    let app = build_application_context(http_repositories, job_repositories, &settings).await?;
    let ctx = app.job_context;

    let now = Utc::now();
    if args.full {
        ctx.invalidator
            .invalidate_full(now)
            .await
            .map_err(|err| AppError::from(InfraError::cdn(err.to_string())))?;
    } else {
        ctx.invalidator
            .invalidate_selective(now)
            .await
            .map_err(|err| AppError::from(InfraError::cdn(err.to_string())))?;
    }

    if args.warm {
        let urls = ctx
            .cms
            .sitemap_urls()
            .await
            .map_err(|err| AppError::unexpected(err.to_string()))?;
        let report = ctx.invalidator.warm(&urls).await;
        info!(
            target = "portalbake::invalidate",
            fetched = report.fetched,
            failed = report.failed,
            "warm pass complete"
        );
    }
    Ok(())
}

async fn run_migrate(settings: config::Settings) -> Result<(), AppError> {
    let database_url = settings
        .database
        .url
        .as_ref()
        .ok_or_else(|| InfraError::configuration("database url is not configured"))
        .map_err(AppError::from)?;

    let pool = PostgresRepositories::connect(database_url, 1)
        .await
        .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;

    PostgresRepositories::run_migrations(&pool)
        .await
        .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;

    info!(target = "portalbake::migrate", "migrations applied");
    Ok(())
}

async fn init_repositories(
    settings: &config::Settings,
) -> Result<(Arc<PostgresRepositories>, Arc<PostgresRepositories>), AppError> {
    let database_url = settings
        .database
        .url
        .as_ref()
        .ok_or_else(|| InfraError::configuration("database url is not configured"))
        .map_err(AppError::from)?;

    let http_pool =
        PostgresRepositories::connect(database_url, settings.database.http_max_connections.get())
            .await
            .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;

    PostgresRepositories::run_migrations(&http_pool)
        .await
        .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;

    let jobs_pool =
        PostgresRepositories::connect(database_url, settings.database.jobs_max_connections.get())
            .await
            .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;

    Ok((
        Arc::new(PostgresRepositories::new(http_pool)),
        Arc::new(PostgresRepositories::new(jobs_pool)),
    ))
}

struct ApplicationContext {
    job_context: JobWorkerContext,
    http_state: HttpState,
}

async fn build_application_context(
    http_repositories: Arc<PostgresRepositories>,
    job_repositories: Arc<PostgresRepositories>,
    settings: &config::Settings,
) -> Result<ApplicationContext, AppError> {
    let bucket = settings
        .object_store
        .bucket
        .clone()
        .ok_or_else(|| InfraError::configuration("object store bucket is not configured"))
        .map_err(AppError::from)?;

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .map_err(|err| AppError::unexpected(format!("failed to build http client: {err}")))?;

    let store: Arc<dyn ObjectStore> = Arc::new(
        S3ObjectStore::from_env(settings.object_store.region.clone()).await,
    );
    let cdn: Arc<dyn CdnClient> = Arc::new(CloudFrontCdn::from_env().await);

    let invalidator = Arc::new(
        CdnInvalidator::new(
            cdn,
            http.clone(),
            settings.cdn.distribution_id.clone(),
            settings.cdn.selective_targets.clone(),
        )
        .with_warm_settings(
            settings.cdn.warm_concurrency.get() as usize,
            settings.cdn.warm_url_timeout,
        ),
    );

    let cms: Arc<dyn CmsAdapter> = Arc::new(PortalCms::new(
        job_repositories.pool().clone(),
        http.clone(),
        settings.cms.origin_base.clone(),
        settings.cms.site_base.clone(),
    ));

    let baker = Arc::new(Baker::new(
        cms.clone(),
        store,
        invalidator.clone(),
        BakerConfig {
            build_root: settings.build.root.clone(),
            bucket,
            acl: settings.object_store.acl.clone(),
            upload_concurrency: settings.object_store.upload_concurrency.get() as usize,
            force_https: settings.build.force_https,
        },
    ));

    let sources: Arc<dyn IngestionSourcesRepo> = job_repositories.clone();
    let fetcher = FeedFetcher::new(
        http.clone(),
        settings.ingestion.feed_max_entries.get() as usize,
    );
    let ingester = Arc::new(Ingester::new(cms.clone(), sources, fetcher, http.clone()));

    let lock = Arc::new(DistributedLock::new(
        Arc::new(PostgresLockStore::new(job_repositories.pool().clone())),
        settings.lock.ttl,
    ));

    let notifier: Arc<dyn ModerationNotifier> = Arc::new(WebhookNotifier::new(
        http,
        settings.notifications.webhook_url.clone(),
    ));

    let job_context = JobWorkerContext {
        repositories: job_repositories,
        cms,
        baker,
        invalidator,
        ingester,
        lock,
        notifier,
        build_deadline: settings.build.deadline,
        ingestion_enabled: settings.ingestion.enabled,
    };

    let http_state = HttpState {
        repositories: http_repositories,
    };

    Ok(ApplicationContext {
        job_context,
        http_state,
    })
}

fn spawn_job_monitor(
    repositories: Arc<PostgresRepositories>,
    context: JobWorkerContext,
) -> tokio::task::JoinHandle<()> {
    let build_storage = PostgresStorage::new_with_config(
        repositories.pool().clone(),
        ApalisSqlConfig::new(JobType::BuildAndPublish.as_str()),
    );
    let publish_scheduled_storage = PostgresStorage::new_with_config(
        repositories.pool().clone(),
        ApalisSqlConfig::new(JobType::PublishScheduledPages.as_str()),
    );
    let invalidate_storage = PostgresStorage::new_with_config(
        repositories.pool().clone(),
        ApalisSqlConfig::new(JobType::SelectiveCdnInvalidate.as_str()),
    );
    let ingest_articles_storage = PostgresStorage::new_with_config(
        repositories.pool().clone(),
        ApalisSqlConfig::new(JobType::IngestArticles.as_str()),
    );
    let ingest_videos_storage = PostgresStorage::new_with_config(
        repositories.pool().clone(),
        ApalisSqlConfig::new(JobType::IngestVideos.as_str()),
    );
    let dispatch_storage = PostgresStorage::new_with_config(
        repositories.pool().clone(),
        ApalisSqlConfig::new(JobType::DispatchNotifications.as_str()),
    );

    // The distributed lock serializes builds across the fleet; worker
    // concurrency of one keeps a single process from queueing contenders
    // that would only record skipped runs.
    let build_worker = WorkerBuilder::new("build-worker")
        .concurrency(1)
        .data(context.clone())
        .backend(build_storage)
        .build_fn(process_build_job);
    let publish_scheduled_worker = WorkerBuilder::new("publish-scheduled-worker")
        .concurrency(1)
        .data(context.clone())
        .backend(publish_scheduled_storage)
        .build_fn(process_publish_scheduled_job);
    let invalidate_worker = WorkerBuilder::new("selective-invalidate-worker")
        .concurrency(1)
        .data(context.clone())
        .backend(invalidate_storage)
        .build_fn(process_selective_invalidate_job);
    let ingest_articles_worker = WorkerBuilder::new("ingest-articles-worker")
        .concurrency(2)
        .data(context.clone())
        .backend(ingest_articles_storage)
        .build_fn(process_ingest_job);
    let ingest_videos_worker = WorkerBuilder::new("ingest-videos-worker")
        .concurrency(2)
        .data(context.clone())
        .backend(ingest_videos_storage)
        .build_fn(process_ingest_job);
    let dispatch_worker = WorkerBuilder::new("dispatch-notifications-worker")
        .concurrency(1)
        .data(context.clone())
        .backend(dispatch_storage)
        .build_fn(process_dispatch_notifications_job);

    let build_cron_worker = WorkerBuilder::new("build-cron-worker")
        .data(context.clone())
        .backend(CronStream::new(build_schedule()))
        .build_fn(on_build_tick);
    let publish_scheduled_cron_worker = WorkerBuilder::new("publish-scheduled-cron-worker")
        .data(context.clone())
        .backend(CronStream::new(publish_scheduled_schedule()))
        .build_fn(on_publish_scheduled_tick);
    let invalidate_cron_worker = WorkerBuilder::new("selective-invalidate-cron-worker")
        .data(context.clone())
        .backend(CronStream::new(selective_invalidate_schedule()))
        .build_fn(on_selective_invalidate_tick);
    let ingest_articles_cron_worker = WorkerBuilder::new("ingest-articles-cron-worker")
        .data(context.clone())
        .backend(CronStream::new(ingest_articles_schedule()))
        .build_fn(on_ingest_articles_tick);
    let ingest_videos_cron_worker = WorkerBuilder::new("ingest-videos-cron-worker")
        .data(context.clone())
        .backend(CronStream::new(ingest_videos_schedule()))
        .build_fn(on_ingest_videos_tick);
    let dispatch_cron_worker = WorkerBuilder::new("dispatch-notifications-cron-worker")
        .data(context)
        .backend(CronStream::new(dispatch_notifications_schedule()))
        .build_fn(on_dispatch_notifications_tick);

    let monitor = Monitor::new()
        .register(build_worker)
        .register(publish_scheduled_worker)
        .register(invalidate_worker)
        .register(ingest_articles_worker)
        .register(ingest_videos_worker)
        .register(dispatch_worker)
        .register(build_cron_worker)
        .register(publish_scheduled_cron_worker)
        .register(invalidate_cron_worker)
        .register(ingest_articles_cron_worker)
        .register(ingest_videos_cron_worker)
        .register(dispatch_cron_worker);

    tokio::spawn(async move {
        if let Err(err) = monitor.run().await {
            error!(error = %err, "job monitor stopped");
        }
    })
}

async fn serve_http(settings: &config::Settings, http_state: HttpState) -> Result<(), AppError> {
    let survey = SurveyConfig {
        cookie_name: settings.survey.cookie_name.clone(),
    };
    let router = http::build_router(http_state, survey);

    let listener = tokio::net::TcpListener::bind(settings.server.public_addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    info!(
        target = "portalbake::serve",
        addr = %settings.server.public_addr,
        "intake listener started"
    );

    axum::serve(listener, router.into_make_service())
        .await
        .map_err(|err| AppError::unexpected(format!("server error: {err}")))?;

    Ok(())
}
