use super::AppState;
use crate::error::{AppError, AppResult};
use crate::models::{InventoryLine, ProductMetadata};
use axum::extract::{Json, Path, Query, State};
use serde::{Deserialize, Serialize};

/// 手工录入请求体
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateLineRequest {
    pub barcode: String,
    #[serde(default)]
    pub expiration_date: Option<String>,
    #[serde(default = "default_quantity")]
    pub quantity: i64,
    #[serde(default)]
    pub metadata: Option<ProductMetadata>,
}

fn default_quantity() -> i64 {
    1
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetQuantityRequest {
    pub quantity: i64,
    #[serde(default)]
    pub expiration_date: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdjustQuantityRequest {
    pub amount: i64,
    #[serde(default)]
    pub expiration_date: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateExpirationRequest {
    pub old_date: String,
    pub new_date: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LotQuery {
    #[serde(default)]
    pub expiration_date: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LinesResponse {
    pub count: usize,
    pub lines: Vec<InventoryLine>,
}

impl From<Vec<InventoryLine>> for LinesResponse {
    fn from(lines: Vec<InventoryLine>) -> Self {
        Self {
            count: lines.len(),
            lines,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteResponse {
    pub success: bool,
    pub message: String,
    pub deleted: u64,
}

pub async fn list_lines(State(state): State<AppState>) -> AppResult<Json<LinesResponse>> {
    let lines = state.ledger.list_all().await?;
    Ok(Json(lines.into()))
}

pub async fn create_line(
    State(state): State<AppState>,
    Json(req): Json<CreateLineRequest>,
) -> AppResult<Json<InventoryLine>> {
    let line = state
        .ledger
        .create_line(
            &req.barcode,
            req.expiration_date.as_deref(),
            req.quantity,
            req.metadata,
        )
        .await?;
    Ok(Json(line))
}

/// 某条码下的全部批次; 一个都没有时返回 404
pub async fn get_lines(
    State(state): State<AppState>,
    Path(barcode): Path<String>,
) -> AppResult<Json<LinesResponse>> {
    let lines = state.ledger.list_by_barcode(&barcode).await?;
    if lines.is_empty() {
        return Err(AppError::NotFound(format!("no line for barcode {}", barcode)));
    }
    Ok(Json(lines.into()))
}

pub async fn delete_lines(
    State(state): State<AppState>,
    Path(barcode): Path<String>,
    Query(query): Query<LotQuery>,
) -> AppResult<Json<DeleteResponse>> {
    let deleted = state
        .ledger
        .delete_line(&barcode, query.expiration_date.as_deref())
        .await?;
    Ok(Json(DeleteResponse {
        success: true,
        message: format!("deleted {} line(s) for barcode {}", deleted, barcode),
        deleted,
    }))
}

pub async fn set_quantity(
    State(state): State<AppState>,
    Path(barcode): Path<String>,
    Json(req): Json<SetQuantityRequest>,
) -> AppResult<Json<LinesResponse>> {
    let lines = state
        .ledger
        .set_quantity(&barcode, req.quantity, req.expiration_date.as_deref())
        .await?;
    Ok(Json(lines.into()))
}

pub async fn update_expiration(
    State(state): State<AppState>,
    Path(barcode): Path<String>,
    Json(req): Json<UpdateExpirationRequest>,
) -> AppResult<Json<InventoryLine>> {
    let line = state
        .ledger
        .update_expiration_date(&barcode, &req.old_date, &req.new_date)
        .await?;
    Ok(Json(line))
}

pub async fn increment_quantity(
    State(state): State<AppState>,
    Path(barcode): Path<String>,
    Json(req): Json<AdjustQuantityRequest>,
) -> AppResult<Json<InventoryLine>> {
    let line = state
        .ledger
        .increment_quantity(&barcode, req.amount, req.expiration_date.as_deref())
        .await?;
    Ok(Json(line))
}

pub async fn decrement_quantity(
    State(state): State<AppState>,
    Path(barcode): Path<String>,
    Json(req): Json<AdjustQuantityRequest>,
) -> AppResult<Json<InventoryLine>> {
    let line = state
        .ledger
        .decrement_quantity(&barcode, req.amount, req.expiration_date.as_deref())
        .await?;
    Ok(Json(line))
}
