pub mod handlers;
pub mod lines;

pub use handlers::*;
pub use lines::*;

use crate::service::{CatalogClient, DetectionPipeline, InferencePool, LedgerService};
use axum::{
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;

/// 共享状态: 识别流水线、账本、商品目录与推理线程池
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<DetectionPipeline>,
    pub ledger: Arc<LedgerService>,
    pub catalog: Arc<CatalogClient>,
    pub workers: Arc<InferencePool>,
}

/// 构建全部路由
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/scan", post(scan))
        .route("/detect-region", post(detect_region))
        .route("/confirm", post(confirm))
        .route("/lookup", post(lookup))
        .route("/lines", get(list_lines).post(create_line))
        .route("/lines/:barcode", get(get_lines).delete(delete_lines))
        .route("/lines/:barcode/quantity", put(set_quantity))
        .route("/lines/:barcode/expiration", put(update_expiration))
        .route("/lines/:barcode/increment", put(increment_quantity))
        .route("/lines/:barcode/decrement", put(decrement_quantity))
        .with_state(state)
}
