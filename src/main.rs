use expiry_scan::api::{self, AppState};
use expiry_scan::capability::Capabilities;
use expiry_scan::config::StorageBackend;
use expiry_scan::db::{LineStore, MemoryLineStore, PgLineStore};
use expiry_scan::{
    create_pool, ensure_schema, AppConfig, CatalogClient, DetectionPipeline, InferencePool,
    LedgerService,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tracing::info;
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 初始化日志 - 使用本地时间格式
    tracing_subscriber::fmt()
        .with_timer(ChronoLocal::new("%Y-%m-%d %H:%M:%S".to_string()))
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .with_level(true)
        .init();

    // 加载配置
    let config = AppConfig::load()?;
    info!("Starting server with config: {:?}", config);

    // 账本存储
    let store: Arc<dyn LineStore> = match config.storage.backend {
        StorageBackend::Postgres => {
            let pool = create_pool(&config.database).await?;
            ensure_schema(&pool).await?;
            info!("Database pool created");
            Arc::new(PgLineStore::new(pool))
        }
        StorageBackend::Memory => {
            info!("Using in-memory ledger, data is lost on exit");
            Arc::new(MemoryLineStore::new())
        }
    };

    // 模型能力只在启动时加载一次 (阻塞客户端, 放到阻塞线程)
    let models = config.models.clone();
    let capabilities = tokio::task::spawn_blocking(move || Capabilities::load(&models)).await?;
    info!("Capabilities: {:?}", capabilities);

    let workers = Arc::new(InferencePool::new(config.workers.threads)?);
    info!("Inference pool started with {} threads", workers.threads());

    // 流水线是模型句柄的唯一持有者, 退出时由这里统一释放
    let pipeline = Arc::new(DetectionPipeline::new(capabilities));

    let state = AppState {
        pipeline: pipeline.clone(),
        ledger: Arc::new(LedgerService::new(store)),
        catalog: Arc::new(CatalogClient::new(&config.catalog)?),
        workers,
    };

    let app = api::router(state).layer(ServiceBuilder::new());

    // 启动服务器
    let addr = format!("{}:{}", config.server.host, config.server.port);
    info!("Server listening on {}", addr);
    info!("API Endpoints:");
    info!("  POST /scan            - detect and read an expiration date");
    info!("  POST /detect-region   - region detection only");
    info!("  POST /confirm         - record a confirmed date");
    info!("  POST /lookup          - product metadata by barcode");
    info!("  GET|POST /lines       - ledger lines");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    match Arc::try_unwrap(pipeline) {
        Ok(mut pipeline) => pipeline.shutdown(),
        Err(_) => {
            tracing::warn!("Inference jobs still hold the pipeline, releasing models on exit")
        }
    }
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutdown signal received");
}
