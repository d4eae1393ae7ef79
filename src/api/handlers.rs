use super::AppState;
use crate::capability::imaging::decode_base64_image;
use crate::error::{AppError, AppResult};
use crate::models::{CropRect, DisplaySize, InventoryLine, ProductMetadata, ScanResult};
use crate::service::RegionReport;
use axum::extract::{Json, State};
use serde::{Deserialize, Serialize};

/// 扫描请求体
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanRequest {
    pub barcode: String,
    pub image_base64: String,
    #[serde(default = "default_true")]
    pub use_auto_detection: bool,
    #[serde(default)]
    pub manual_crop_rect: Option<CropRect>,
    #[serde(default)]
    pub display_size: Option<DisplaySize>,
}

fn default_true() -> bool {
    true
}

fn default_quantity() -> i64 {
    1
}

/// 扫描响应体: 扫描结果附带条码
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanResponse {
    pub barcode: String,
    #[serde(flatten)]
    pub result: ScanResult,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectRegionRequest {
    pub image_base64: String,
}

/// 确认请求体: 人工确认后的日期文本
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmRequest {
    pub barcode: String,
    #[serde(alias = "expirationDate")]
    pub expiration_date_text: String,
    #[serde(default = "default_quantity")]
    pub quantity: i64,
    #[serde(default)]
    pub metadata: Option<ProductMetadata>,
}

#[derive(Debug, Deserialize)]
pub struct LookupRequest {
    pub barcode: String,
}

/// 商品信息来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LookupSource {
    Ledger,
    Catalog,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LookupResponse {
    pub barcode: String,
    pub source: LookupSource,
    pub product: ProductMetadata,
    pub line: Option<InventoryLine>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub storage: bool,
    pub region_detector: bool,
    pub text_recognizer: bool,
}

/// 健康检查: 存储与两个能力的可用状态
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let capabilities = state.pipeline.capabilities();
    let storage = state.ledger.storage_reachable().await;
    let text_recognizer = capabilities.recognizer_loaded();

    Json(HealthResponse {
        status: if storage && text_recognizer { "healthy" } else { "degraded" },
        storage,
        region_detector: capabilities.detector_loaded(),
        text_recognizer,
    })
}

/// 扫描到期日; 解码与推理都在推理线程池中执行
pub async fn scan(
    State(state): State<AppState>,
    Json(req): Json<ScanRequest>,
) -> AppResult<Json<ScanResponse>> {
    let barcode = req.barcode.trim().to_string();
    if barcode.is_empty() {
        return Err(AppError::InvalidArgument("barcode must not be empty".to_string()));
    }
    tracing::info!(
        "Scan request: barcode={}, auto_detection={}, manual_crop={}",
        barcode,
        req.use_auto_detection,
        req.manual_crop_rect.is_some()
    );

    let pipeline = state.pipeline.clone();
    let result = state
        .workers
        .run(move || {
            let image = decode_base64_image(&req.image_base64)?;
            pipeline.scan(
                &image,
                req.use_auto_detection,
                req.manual_crop_rect,
                req.display_size,
            )
        })
        .await??;

    Ok(Json(ScanResponse { barcode, result }))
}

/// 只做区域检测, 不识别
pub async fn detect_region(
    State(state): State<AppState>,
    Json(req): Json<DetectRegionRequest>,
) -> AppResult<Json<RegionReport>> {
    let pipeline = state.pipeline.clone();
    let report = state
        .workers
        .run(move || {
            let image = decode_base64_image(&req.image_base64)?;
            Ok::<_, AppError>(pipeline.detect_regions(&image))
        })
        .await??;

    Ok(Json(report))
}

/// 人工确认扫描结果并入账
pub async fn confirm(
    State(state): State<AppState>,
    Json(req): Json<ConfirmRequest>,
) -> AppResult<Json<InventoryLine>> {
    let line = state
        .ledger
        .upsert_confirmed_scan(&req.barcode, &req.expiration_date_text, req.quantity, req.metadata)
        .await?;
    Ok(Json(line))
}

/// 按条码查商品: 先查账本, 再查外部目录; 不写入账本
pub async fn lookup(
    State(state): State<AppState>,
    Json(req): Json<LookupRequest>,
) -> AppResult<Json<LookupResponse>> {
    let barcode = req.barcode.trim().to_string();

    if let Some(line) = state.ledger.list_by_barcode(&barcode).await?.into_iter().next() {
        let product = ProductMetadata {
            name: line.name.clone(),
            manufacturer: line.manufacturer.clone(),
            unit_price: line.unit_price.clone(),
            catalog_id: line.catalog_id.clone(),
        };
        return Ok(Json(LookupResponse {
            barcode,
            source: LookupSource::Ledger,
            product,
            line: Some(line),
        }));
    }

    let product = state
        .catalog
        .lookup(&barcode)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("product {} not found in catalog", barcode)))?;
    tracing::info!("Catalog hit for {}: {}", barcode, product.name);

    Ok(Json(LookupResponse {
        barcode,
        source: LookupSource::Catalog,
        product,
        line: None,
    }))
}
