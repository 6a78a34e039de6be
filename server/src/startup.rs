use std::pin::pin;

use anyhow::Context;
use config::index::{IndexConfigs, load_index_configs};
use config::shared::{CheckpointStoreConfig, EspipeConfig};
use espipe::concurrency::cancel::create_cancel_pair;
use espipe::controller::TaskController;
use espipe::destination::elasticsearch::ElasticsearchGateway;
use espipe::indexer::{Indexer, IndexerSettings};
use espipe::scheduler::start_sync_scheduler;
use espipe::source::postgres::PostgresRowSource;
use espipe::store::CheckpointStore;
use espipe::store::memory::MemoryCheckpointStore;
use espipe::store::postgres::PostgresCheckpointStore;
use espipe::workers::WorkerPool;
use postgres::connect_to_source_database;
use postgres::migrations::apply_espipe_migrations;
use tokio::runtime::Handle;
use tokio::signal::unix::{SignalKind, signal};
use tracing::{info, warn};

use crate::routes::{ControlSurface, build_server};

/// Connections kept by the pool backing the watermark table.
const CHECKPOINT_POOL_MIN_CONNECTIONS: u32 = 1;

const CHECKPOINT_POOL_MAX_CONNECTIONS: u32 = 4;

/// Loads the index configurations, wires the engine and serves the control surface
/// until SIGINT or SIGTERM.
pub async fn start_espipe(config: EspipeConfig) -> anyhow::Result<()> {
    info!("starting espipe");
    log_config(&config);

    let indices = load_index_configs(&config.indices_dir, config.default_fields_mode)
        .with_context(|| {
            format!(
                "loading index configurations from `{}`",
                config.indices_dir.display()
            )
        })?;
    if indices.is_empty() {
        warn!(indices_dir = %config.indices_dir.display(), "no index is configured");
    }

    let source = PostgresRowSource::new(config.source.clone());
    let gateway = ElasticsearchGateway::new(&config.elasticsearch)?;

    // Static dispatch over the checkpoint store keeps the engine free of trait objects.
    match config.checkpoint_store {
        CheckpointStoreConfig::Memory => {
            warn!("watermarks are kept in memory and will be lost on restart");
            run(config, indices, source, gateway, MemoryCheckpointStore::new()).await
        }
        CheckpointStoreConfig::Postgres => {
            apply_espipe_migrations(&config.source)
                .await
                .context("applying espipe migrations")?;
            let pool = connect_to_source_database(
                &config.source,
                CHECKPOINT_POOL_MIN_CONNECTIONS,
                CHECKPOINT_POOL_MAX_CONNECTIONS,
            )
            .await
            .context("connecting to the watermark database")?;

            let store = PostgresCheckpointStore::new(pool);
            let count = store.log_watermarks().await?;
            info!(count, "loaded stored watermarks");

            run(config, indices, source, gateway, store).await
        }
    }
}

async fn run<C>(
    config: EspipeConfig,
    indices: IndexConfigs,
    source: PostgresRowSource,
    gateway: ElasticsearchGateway,
    store: C,
) -> anyhow::Result<()>
where
    C: CheckpointStore,
{
    let indexer = Indexer::new(
        source,
        gateway,
        store,
        IndexerSettings {
            batch_size: config.batch.max_size,
            watermark_policy: config.sync.watermark_policy,
        },
    );
    let init_pool = WorkerPool::new("init", config.workers.init_workers());
    let sync_pool = WorkerPool::new("sync", config.workers.sync_workers());
    info!(
        init_workers = init_pool.metrics().size,
        sync_workers = sync_pool.metrics().size,
        "created worker pools"
    );

    let controller = TaskController::new(indexer, indices, config.sync.clone(), init_pool, sync_pool);

    let (scheduler_shutdown, scheduler_token) = create_cancel_pair();
    let scheduler = start_sync_scheduler(controller.clone(), &config.scheduler, scheduler_token);

    let server = build_server(
        &config.server,
        ControlSurface::new(controller.clone(), Handle::current()),
    )
    .context("binding the control surface")?;
    let server_handle = server.handle();
    let mut server = pin!(server);
    info!(host = %config.server.host, port = config.server.port, "control surface listening");

    let mut sigterm = signal(SignalKind::terminate()).context("registering SIGTERM handler")?;
    tokio::select! {
        result = &mut server => {
            warn!("control surface stopped on its own");
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("sigint (ctrl+c) received, shutting down espipe");
        }
        _ = sigterm.recv() => {
            info!("sigterm received, shutting down espipe");
        }
    }

    scheduler_shutdown.cancel();
    if let Some(scheduler) = scheduler {
        let _ = scheduler.await;
    }

    controller.shutdown().await;

    server_handle.stop(true).await;
    let _ = server.await;

    info!("espipe stopped");

    Ok(())
}

fn log_config(config: &EspipeConfig) {
    info!(
        host = %config.source.host,
        port = config.source.port,
        dbname = %config.source.name,
        username = %config.source.username,
        tls_enabled = config.source.tls.enabled,
        "source database options"
    );
    info!(
        url = %config.elasticsearch.url,
        refresh_interval = %config.elasticsearch.refresh_interval,
        "elasticsearch options"
    );
    info!(
        batch_max_size = config.batch.max_size,
        sync_initial_delay_ms = config.sync.initial_delay_ms,
        sync_period_ms = config.sync.period_ms,
        watermark_policy = ?config.sync.watermark_policy,
        checkpoint_store = ?config.checkpoint_store,
        "engine options"
    );
}
