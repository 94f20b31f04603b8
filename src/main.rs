use std::{process, sync::Arc};

use apalis::{
    layers::WorkerBuilderExt,
    prelude::{Monitor, WorkerBuilder, WorkerFactoryFn},
};
use apalis_cron::CronStream;
use apalis_sql::{Config as ApalisSqlConfig, postgres::PostgresStorage};
use spola::{
    application::{
        batch::{BatchOutcome, BatchScheduler},
        delivery::DeliveryService,
        dispatcher::ChangeDispatcher,
        error::AppError,
        events::EventBus,
        fingerprint::FingerprintEngine,
        jobs::{
            JobWorkerContext, batch_tick_schedule, delivery_tick_schedule,
            process_batch_tick_job, process_deliver_feed_job, process_delivery_tick_job,
            process_fingerprint_batch_job, process_taxonomy_sweep_job, taxonomy_sweep_schedule,
        },
        ledger::FreshnessLedger,
        repos::{ConfigStore, FeedBufferRepo, JobsRepo, ProductsRepo, TaxonomyRepo},
    },
    cache::{CacheConfig, CacheService},
    config,
    domain::types::JobType,
    infra::{
        db::PostgresRepositories,
        error::InfraError,
        http::{self, HttpState},
        remote::RemoteBackendClient,
        telemetry,
    },
};
use tracing::{Dispatch, Level, dispatcher, error, info};
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
        config::Command::FingerprintAll(_) => run_fingerprintall(settings).await,
        config::Command::Reset(_) => run_reset(settings).await,
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let (http_repositories, job_repositories) = init_repositories(&settings).await?;
    let app = build_application_context(http_repositories, &settings)?;
    let job_context = build_job_context(job_repositories.clone(), &settings)?;

    let monitor_handle = spawn_job_monitor(job_repositories, job_context, &settings.jobs);

    let result = serve_http(&settings, app.http_state).await;

    monitor_handle.abort();
    let _ = monitor_handle.await;

    result
}

async fn run_fingerprintall(settings: config::Settings) -> Result<(), AppError> {
    let (http_repositories, _) = init_repositories(&settings).await?;
    let app = build_application_context(http_repositories, &settings)?;

    info!(
        target = "spola::fingerprintall",
        "starting full fingerprint scan"
    );

    loop {
        match app.scheduler.run_batch().await.map_err(AppError::from)? {
            BatchOutcome::Complete => break,
            BatchOutcome::Processed {
                fingerprinted,
                failed,
            } => {
                info!(
                    target = "spola::fingerprintall",
                    fingerprinted, failed, "batch finished"
                );
            }
            BatchOutcome::Skipped => {
                return Err(AppError::unexpected(
                    "another batch run holds the dedupe lock",
                ));
            }
        }
    }

    let progress = app.scheduler.progress().await.map_err(AppError::from)?;
    info!(
        target = "spola::fingerprintall",
        processed_count = progress.processed_count,
        batch_count = progress.batch_count,
        "fingerprint scan complete"
    );
    Ok(())
}

async fn run_reset(settings: config::Settings) -> Result<(), AppError> {
    let (http_repositories, _) = init_repositories(&settings).await?;
    let app = build_application_context(http_repositories, &settings)?;

    app.scheduler.reset().await.map_err(AppError::from)?;
    app.ledger.reset(None).await.map_err(AppError::from)?;
    app.cache.reset().await.map_err(AppError::from)?;
    app.feed.clear().await.map_err(AppError::from)?;

    info!(target = "spola::reset", "sync state cleared");
    Ok(())
}

struct ApplicationContext {
    http_state: HttpState,
    scheduler: Arc<BatchScheduler>,
    ledger: Arc<FreshnessLedger>,
    cache: Arc<CacheService>,
    feed: Arc<dyn FeedBufferRepo>,
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

fn build_sync_services(
    repositories: &Arc<PostgresRepositories>,
    settings: &config::Settings,
) -> Result<
    (
        Arc<BatchScheduler>,
        Arc<DeliveryService>,
        Arc<FreshnessLedger>,
        Arc<FingerprintEngine>,
    ),
    AppError,
> {
    let products: Arc<dyn ProductsRepo> = repositories.clone();
    let taxonomy: Arc<dyn TaxonomyRepo> = repositories.clone();
    let config_store: Arc<dyn ConfigStore> = repositories.clone();
    let feed: Arc<dyn FeedBufferRepo> = repositories.clone();
    let jobs: Arc<dyn JobsRepo> = repositories.clone();

    let engine = Arc::new(FingerprintEngine::new(products.clone(), taxonomy));
    let ledger = Arc::new(FreshnessLedger::new(config_store.clone()));
    let scheduler = Arc::new(BatchScheduler::new(
        products.clone(),
        engine.clone(),
        config_store,
        jobs,
        feed.clone(),
        settings.sync.batch_size.get(),
    ));

    let remote = RemoteBackendClient::new(&settings.remote)
        .map_err(AppError::from)?
        .into_backend();
    let delivery = Arc::new(DeliveryService::new(
        feed,
        products,
        remote,
        settings.sync.delivery_warn_window,
    ));

    Ok((scheduler, delivery, ledger, engine))
}

fn build_application_context(
    repositories: Arc<PostgresRepositories>,
    settings: &config::Settings,
) -> Result<ApplicationContext, AppError> {
    let products: Arc<dyn ProductsRepo> = repositories.clone();
    let taxonomy: Arc<dyn TaxonomyRepo> = repositories.clone();
    let config_store: Arc<dyn ConfigStore> = repositories.clone();
    let feed: Arc<dyn FeedBufferRepo> = repositories.clone();
    let jobs: Arc<dyn JobsRepo> = repositories.clone();

    let (scheduler, _delivery, ledger, engine) = build_sync_services(&repositories, settings)?;

    let cache = Arc::new(CacheService::new(
        CacheConfig::from(&settings.cache),
        ledger.clone(),
        config_store,
    ));

    let bus = Arc::new(EventBus::new());
    let dispatcher = Arc::new(ChangeDispatcher::new(
        products.clone(),
        taxonomy,
        ledger.clone(),
        feed.clone(),
        scheduler.clone(),
        jobs,
    ));
    dispatcher.wire(&bus);

    let http_state = HttpState {
        products,
        engine,
        feed: feed.clone(),
        scheduler: scheduler.clone(),
        cache: cache.clone(),
        bus,
    };

    Ok(ApplicationContext {
        http_state,
        scheduler,
        ledger,
        cache,
        feed,
    })
}

fn build_job_context(
    repositories: Arc<PostgresRepositories>,
    settings: &config::Settings,
) -> Result<JobWorkerContext, AppError> {
    let (scheduler, delivery, _, _) = build_sync_services(&repositories, settings)?;

    Ok(JobWorkerContext {
        scheduler,
        delivery,
        delivery_batch_limit: settings.sync.delivery_batch_limit.get(),
    })
}

fn spawn_job_monitor(
    repositories: Arc<PostgresRepositories>,
    context: JobWorkerContext,
    jobs: &config::JobsSettings,
) -> tokio::task::JoinHandle<()> {
    let batch_storage = PostgresStorage::new_with_config(
        repositories.pool().clone(),
        ApalisSqlConfig::new(JobType::FingerprintBatch.as_str()),
    );
    let delivery_storage = PostgresStorage::new_with_config(
        repositories.pool().clone(),
        ApalisSqlConfig::new(JobType::DeliverFeed.as_str()),
    );

    let batch_worker = WorkerBuilder::new("fingerprint-batch-worker")
        .concurrency(jobs.batch_concurrency.get() as usize)
        .data(context.clone())
        .backend(batch_storage)
        .build_fn(process_fingerprint_batch_job);
    let delivery_worker = WorkerBuilder::new("deliver-feed-worker")
        .concurrency(jobs.delivery_concurrency.get() as usize)
        .data(context.clone())
        .backend(delivery_storage)
        .build_fn(process_deliver_feed_job);

    let batch_tick_worker = WorkerBuilder::new("batch-tick-worker")
        .data(context.clone())
        .backend(CronStream::new(batch_tick_schedule()))
        .build_fn(process_batch_tick_job);
    let sweep_worker = WorkerBuilder::new("taxonomy-sweep-worker")
        .data(context.clone())
        .backend(CronStream::new(taxonomy_sweep_schedule()))
        .build_fn(process_taxonomy_sweep_job);
    let delivery_tick_worker = WorkerBuilder::new("delivery-tick-worker")
        .data(context)
        .backend(CronStream::new(delivery_tick_schedule()))
        .build_fn(process_delivery_tick_job);

    let monitor = Monitor::new()
        .register(batch_worker)
        .register(delivery_worker)
        .register(batch_tick_worker)
        .register(sweep_worker)
        .register(delivery_tick_worker);

    tokio::spawn(async move {
        if let Err(err) = monitor.run().await {
            error!(error = %err, "job monitor stopped");
        }
    })
}

async fn serve_http(settings: &config::Settings, http_state: HttpState) -> Result<(), AppError> {
    let router = http::build_router(http_state);

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    info!(addr = %settings.server.addr, "spola listening");

    axum::serve(listener, router.into_make_service())
        .await
        .map_err(|err| AppError::unexpected(format!("server error: {err}")))?;

    Ok(())
}
