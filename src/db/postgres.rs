use super::queries;
use super::store::{quantity_overflow, sort_lines, AdjustTarget, LineStore, QuantityTarget};
use crate::error::{AppError, AppResult};
use crate::models::{InventoryLine, LineKey, ProductMetadata};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::time::Duration;

/// PostgreSQL 账本
#[derive(Debug, Clone)]
pub struct PgLineStore {
    pool: PgPool,
}

impl PgLineStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LineStore for PgLineStore {
    async fn upsert(
        &self,
        key: &LineKey,
        delta: i64,
        metadata: &ProductMetadata,
        now: DateTime<Utc>,
    ) -> AppResult<InventoryLine> {
        queries::upsert_line(&self.pool, key, delta, metadata, now)
            .await
            .map_err(map_storage_error)
    }

    async fn find(&self, key: &LineKey) -> AppResult<Option<InventoryLine>> {
        queries::find_line(&self.pool, key)
            .await
            .map_err(map_storage_error)
    }

    async fn list_all(&self) -> AppResult<Vec<InventoryLine>> {
        queries::list_lines(&self.pool)
            .await
            .map_err(map_storage_error)
    }

    async fn list_by_barcode(&self, barcode: &str) -> AppResult<Vec<InventoryLine>> {
        queries::list_lines_by_barcode(&self.pool, barcode)
            .await
            .map_err(map_storage_error)
    }

    async fn set_quantity(
        &self,
        target: &QuantityTarget,
        value: i64,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<InventoryLine>> {
        let mut lines = match target {
            QuantityTarget::Lot(key) => {
                queries::set_lot_quantity(&self.pool, key, value, now).await
            }
            QuantityTarget::AllOfBarcode(barcode) => {
                queries::set_barcode_quantity(&self.pool, barcode, value, now).await
            }
        }
        .map_err(map_storage_error)?;
        sort_lines(&mut lines);
        Ok(lines)
    }

    async fn adjust_quantity(
        &self,
        target: &AdjustTarget,
        delta: i64,
        now: DateTime<Utc>,
    ) -> AppResult<Option<InventoryLine>> {
        match target {
            AdjustTarget::Lot(key) => {
                queries::adjust_lot_quantity(&self.pool, key, delta, now).await
            }
            AdjustTarget::EarliestOfBarcode(barcode) => {
                queries::adjust_earliest_quantity(&self.pool, barcode, delta, now).await
            }
        }
        .map_err(map_storage_error)
    }

    async fn update_expiration(
        &self,
        key: &LineKey,
        new_date: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> AppResult<Option<InventoryLine>> {
        queries::update_line_expiration(&self.pool, key, new_date, now)
            .await
            .map_err(map_storage_error)
    }

    async fn delete_lot(&self, key: &LineKey) -> AppResult<u64> {
        queries::delete_lot(&self.pool, key)
            .await
            .map_err(map_storage_error)
    }

    async fn delete_barcode(&self, barcode: &str) -> AppResult<u64> {
        queries::delete_barcode(&self.pool, barcode)
            .await
            .map_err(map_storage_error)
    }

    async fn ping(&self) -> bool {
        // 超时控制: 2秒
        let ping = sqlx::query_scalar::<_, i32>("SELECT 1").fetch_one(&self.pool);
        match tokio::time::timeout(Duration::from_secs(2), ping).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                tracing::error!("Storage ping failed: {:?}", e);
                false
            }
            Err(_) => {
                tracing::error!("Storage ping timed out (>2s)");
                false
            }
        }
    }
}

/// 数值越界 (SQLSTATE 22003) 是调用方输入的问题, 其余归为存储错误
fn map_storage_error(e: sqlx::Error) -> AppError {
    let out_of_range = e
        .as_database_error()
        .and_then(|db| db.code())
        .map_or(false, |code| code == "22003");
    if out_of_range {
        quantity_overflow()
    } else {
        AppError::Storage(e)
    }
}
