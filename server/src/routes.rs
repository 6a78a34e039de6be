use std::collections::BTreeMap;
use std::future::Future;
use std::io;

use actix_web::dev::Server;
use actix_web::web::{self, Data, Path, Query, ServiceConfig};
use actix_web::{App, HttpResponse, HttpServer};
use config::shared::ServerConfig;
use espipe::controller::TaskController;
use espipe::destination::BulkGateway;
use espipe::source::RowSource;
use espipe::store::CheckpointStore;
use serde::Serialize;
use tokio::runtime::Handle;
use tracing_actix_web::TracingLogger;

use crate::response::{ApiError, ResultVo};

/// Shared state of the control surface handlers.
///
/// Controller calls are spawned on the engine runtime so that tasks started by a request
/// are not tied to the actix worker that served it.
pub struct ControlSurface<S, G, C> {
    controller: TaskController<S, G, C>,
    runtime: Handle,
}

impl<S, G, C> ControlSurface<S, G, C>
where
    S: RowSource,
    G: BulkGateway,
    C: CheckpointStore,
{
    pub fn new(controller: TaskController<S, G, C>, runtime: Handle) -> Self {
        Self {
            controller,
            runtime,
        }
    }

    async fn call<F, Fut, T>(&self, f: F) -> Result<T, ApiError>
    where
        F: FnOnce(TaskController<S, G, C>) -> Fut,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let result = self.runtime.spawn(f(self.controller.clone())).await?;

        Ok(result)
    }
}

type SurfaceData<S, G, C> = Data<ControlSurface<S, G, C>>;

fn success<T: Serialize>(data: T) -> HttpResponse {
    HttpResponse::Ok().json(ResultVo::success(data))
}

async fn start_init_all<S, G, C>(surface: SurfaceData<S, G, C>) -> Result<HttpResponse, ApiError>
where
    S: RowSource,
    G: BulkGateway,
    C: CheckpointStore,
{
    let messages = surface
        .call(|controller| async move { controller.start_init_all().await })
        .await?;

    Ok(success(messages))
}

async fn start_init<S, G, C>(
    surface: SurfaceData<S, G, C>,
    index_name: Path<String>,
) -> Result<HttpResponse, ApiError>
where
    S: RowSource,
    G: BulkGateway,
    C: CheckpointStore,
{
    let index_name = index_name.into_inner();
    let message = surface
        .call(|controller| async move { controller.start_init(&index_name).await })
        .await?;

    Ok(success(message))
}

async fn stop_init_all<S, G, C>(surface: SurfaceData<S, G, C>) -> Result<HttpResponse, ApiError>
where
    S: RowSource,
    G: BulkGateway,
    C: CheckpointStore,
{
    let message = surface
        .call(|controller| async move { controller.stop_init_all().await })
        .await?;

    Ok(success(message))
}

async fn stop_init<S, G, C>(
    surface: SurfaceData<S, G, C>,
    index_name: Path<String>,
) -> Result<HttpResponse, ApiError>
where
    S: RowSource,
    G: BulkGateway,
    C: CheckpointStore,
{
    let index_name = index_name.into_inner();
    let message = surface
        .call(|controller| async move { controller.stop_init(&index_name).await })
        .await?;

    Ok(success(message))
}

async fn start_sync_all<S, G, C>(surface: SurfaceData<S, G, C>) -> Result<HttpResponse, ApiError>
where
    S: RowSource,
    G: BulkGateway,
    C: CheckpointStore,
{
    let messages = surface
        .call(|controller| async move { controller.start_sync_all().await })
        .await?;

    Ok(success(messages))
}

async fn start_sync<S, G, C>(
    surface: SurfaceData<S, G, C>,
    index_name: Path<String>,
) -> Result<HttpResponse, ApiError>
where
    S: RowSource,
    G: BulkGateway,
    C: CheckpointStore,
{
    let index_name = index_name.into_inner();
    let message = surface
        .call(|controller| async move { controller.start_sync(&index_name).await })
        .await?;

    Ok(success(message))
}

async fn stop_sync_all<S, G, C>(surface: SurfaceData<S, G, C>) -> Result<HttpResponse, ApiError>
where
    S: RowSource,
    G: BulkGateway,
    C: CheckpointStore,
{
    let message = surface
        .call(|controller| async move { controller.stop_sync_all().await })
        .await?;

    Ok(success(message))
}

async fn stop_sync<S, G, C>(
    surface: SurfaceData<S, G, C>,
    index_name: Path<String>,
) -> Result<HttpResponse, ApiError>
where
    S: RowSource,
    G: BulkGateway,
    C: CheckpointStore,
{
    let index_name = index_name.into_inner();
    let message = surface
        .call(|controller| async move { controller.stop_sync(&index_name).await })
        .await?;

    Ok(success(message))
}

/// Re-indexes the rows whose id columns match the query string, e.g.
/// `/please/fix/orders?id=42`.
async fn fix<S, G, C>(
    surface: SurfaceData<S, G, C>,
    index_name: Path<String>,
    request: Query<BTreeMap<String, String>>,
) -> Result<HttpResponse, ApiError>
where
    S: RowSource,
    G: BulkGateway,
    C: CheckpointStore,
{
    let index_name = index_name.into_inner();
    let request = request.into_inner();
    let outcome = surface
        .call(|controller| async move { controller.start_fix(&index_name, request).await })
        .await??;

    Ok(success(outcome))
}

async fn show_metrics<S, G, C>(surface: SurfaceData<S, G, C>) -> Result<HttpResponse, ApiError>
where
    S: RowSource,
    G: BulkGateway,
    C: CheckpointStore,
{
    let metrics = surface
        .call(|controller| async move { controller.metrics().await })
        .await?;

    Ok(success(metrics))
}

/// Registers the `/please` routes. The `all` routes come first so they win over the
/// `{index_name}` ones.
pub fn configure<S, G, C>(cfg: &mut ServiceConfig)
where
    S: RowSource,
    G: BulkGateway,
    C: CheckpointStore,
{
    cfg.service(
        web::scope("/please")
            .route("/start/init/all", web::get().to(start_init_all::<S, G, C>))
            .route("/start/init/{index_name}", web::get().to(start_init::<S, G, C>))
            .route("/stop/init/all", web::get().to(stop_init_all::<S, G, C>))
            .route("/stop/init/{index_name}", web::get().to(stop_init::<S, G, C>))
            .route("/start/sync/all", web::get().to(start_sync_all::<S, G, C>))
            .route("/start/sync/{index_name}", web::get().to(start_sync::<S, G, C>))
            .route("/stop/sync/all", web::get().to(stop_sync_all::<S, G, C>))
            .route("/stop/sync/{index_name}", web::get().to(stop_sync::<S, G, C>))
            .route("/fix/{index_name}", web::get().to(fix::<S, G, C>))
            .route("/show/metrics", web::get().to(show_metrics::<S, G, C>)),
    );
}

pub fn build_server<S, G, C>(
    config: &ServerConfig,
    surface: ControlSurface<S, G, C>,
) -> io::Result<Server>
where
    S: RowSource,
    G: BulkGateway,
    C: CheckpointStore,
{
    let surface = Data::new(surface);
    let server = HttpServer::new(move || {
        App::new()
            .wrap(TracingLogger::default())
            .app_data(surface.clone())
            .configure(configure::<S, G, C>)
    })
    .bind((config.host.as_str(), config.port))?
    // Controller shutdown happens before the server stops, so signals are handled there.
    .disable_signals()
    .run();

    Ok(server)
}

#[cfg(test)]
mod tests {
    use actix_web::http::StatusCode;
    use actix_web::test;
    use config::index::IndexConfigs;
    use config::shared::{SyncConfig, WatermarkPolicy};
    use espipe::indexer::{Indexer, IndexerSettings};
    use espipe::store::memory::MemoryCheckpointStore;
    use espipe::test_utils::index::{numbered_rows, test_index};
    use espipe::test_utils::memory_gateway::MemoryGateway;
    use espipe::test_utils::memory_source::MemoryRowSource;
    use espipe::workers::WorkerPool;
    use serde_json::Value;

    use super::*;

    type TestSurface = ControlSurface<MemoryRowSource, MemoryGateway, MemoryCheckpointStore>;

    fn surface(source: MemoryRowSource, gateway: MemoryGateway) -> TestSurface {
        let indexer = Indexer::new(
            source,
            gateway,
            MemoryCheckpointStore::new(),
            IndexerSettings {
                batch_size: 10,
                watermark_policy: WatermarkPolicy::SaveBeforeSync,
            },
        );
        let controller = TaskController::new(
            indexer,
            IndexConfigs::new([test_index("orders", "orders", &["id"])]),
            SyncConfig {
                initial_delay_ms: 60_000,
                period_ms: 60_000,
                watermark_policy: WatermarkPolicy::SaveBeforeSync,
            },
            WorkerPool::new("init", 1),
            WorkerPool::new("sync", 1),
        );

        ControlSurface::new(controller, Handle::current())
    }

    async fn get(surface: TestSurface, uri: &str) -> (StatusCode, ResultVo<Value>) {
        let app = test::init_service(
            App::new()
                .app_data(Data::new(surface))
                .configure(configure::<MemoryRowSource, MemoryGateway, MemoryCheckpointStore>),
        )
        .await;
        let response = test::call_service(&app, test::TestRequest::get().uri(uri).to_request()).await;
        let status = response.status();
        let body = test::read_body_json(response).await;

        (status, body)
    }

    #[actix_web::test]
    async fn malformed_fix_request_is_a_public_error() {
        let surface = surface(MemoryRowSource::new(), MemoryGateway::new());

        let (status, body) = get(surface, "/please/fix/orders?id=abc").await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.code, 10001);
        assert!(body.msg.contains("value abc is incorrect"), "{}", body.msg);
        assert!(body.data.is_none());
    }

    #[actix_web::test]
    async fn fix_of_an_unknown_index_is_a_public_error() {
        let surface = surface(MemoryRowSource::new(), MemoryGateway::new());

        let (status, body) = get(surface, "/please/fix/customers?id=1").await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.code, 10001);
    }

    #[actix_web::test]
    async fn fix_returns_the_outcome() {
        let source = MemoryRowSource::new();
        source
            .add_rows("AND id = $2", numbered_rows(1))
            .await;
        let gateway = MemoryGateway::new();
        gateway.add_index("orders");
        let surface = surface(source, gateway.clone());

        let (status, body) = get(surface, "/please/fix/orders?id=1").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.code, 10000);
        let data = body.data.unwrap();
        assert_eq!(data["status"], "completed");
        assert_eq!(data["documents"], 1);
        assert_eq!(gateway.submission_sizes(), vec![1]);
    }

    #[actix_web::test]
    async fn unknown_index_start_is_reported_in_a_success_envelope() {
        let surface = surface(MemoryRowSource::new(), MemoryGateway::new());

        let (status, body) = get(surface, "/please/start/init/customers").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.code, 10000);
        assert_eq!(body.msg, "success");
        assert_eq!(
            body.data,
            Some(Value::String("Index customers is not configured".to_string()))
        );
    }

    #[actix_web::test]
    async fn stop_all_routes_are_not_shadowed_by_index_routes() {
        let surface = surface(MemoryRowSource::new(), MemoryGateway::new());

        let (_, body) = get(surface, "/please/stop/sync/all").await;

        assert_eq!(body.data, Some(Value::String("Shutdown all sync".to_string())));
    }

    #[actix_web::test]
    async fn metrics_are_wrapped_in_a_success_envelope() {
        let surface = surface(MemoryRowSource::new(), MemoryGateway::new());

        let (status, body) = get(surface, "/please/show/metrics").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.code, 10000);
        let data = body.data.unwrap();
        assert_eq!(data["init_pool"]["name"], "init");
        assert_eq!(data["init_pool"]["size"], 1);
        assert_eq!(data["sync_tasks"], Value::Array(vec![]));
    }

    #[actix_web::test]
    async fn metrics_count_source_streams() {
        let source = MemoryRowSource::new();
        source.add_rows("AND id = $2", numbered_rows(1)).await;
        let gateway = MemoryGateway::new();
        gateway.add_index("orders");
        let app = test::init_service(
            App::new()
                .app_data(Data::new(surface(source, gateway)))
                .configure(configure::<MemoryRowSource, MemoryGateway, MemoryCheckpointStore>),
        )
        .await;

        let fix = test::TestRequest::get().uri("/please/fix/orders?id=1").to_request();
        assert_eq!(test::call_service(&app, fix).await.status(), StatusCode::OK);

        let metrics = test::TestRequest::get().uri("/please/show/metrics").to_request();
        let body: ResultVo<Value> = test::call_and_read_body_json(&app, metrics).await;

        let data = body.data.unwrap();
        assert_eq!(data["source"]["streams"]["opened_connections"], 1);
        assert_eq!(data["source"]["streams"]["active_connections"], 0);
        assert_eq!(data["source"]["checkpoint_pool"], Value::Null);
    }
}
