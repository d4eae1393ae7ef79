use crate::error::{AppError, AppResult};
use crate::models::{InventoryLine, LineKey, ProductMetadata};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// 数量设置的目标
#[derive(Debug, Clone, PartialEq)]
pub enum QuantityTarget {
    /// 指定批次
    Lot(LineKey),
    /// 该条码下所有批次
    AllOfBarcode(String),
}

/// 数量增减的目标
#[derive(Debug, Clone, PartialEq)]
pub enum AdjustTarget {
    /// 指定批次
    Lot(LineKey),
    /// 该条码下最早到期的批次 (无到期日排最后, 同日按 id)
    EarliestOfBarcode(String),
}

/// 库存行存储
///
/// 所有数量变更都必须在存储层按键原子完成 (单条条件更新), 不能拆成先读后写。
#[async_trait]
pub trait LineStore: Send + Sync {
    /// 存在则 quantity += delta 并刷新 updated_at, 否则以 quantity = delta 新建
    async fn upsert(
        &self,
        key: &LineKey,
        delta: i64,
        metadata: &ProductMetadata,
        now: DateTime<Utc>,
    ) -> AppResult<InventoryLine>;

    async fn find(&self, key: &LineKey) -> AppResult<Option<InventoryLine>>;

    /// 按 (条码, 到期日) 升序
    async fn list_all(&self) -> AppResult<Vec<InventoryLine>>;

    async fn list_by_barcode(&self, barcode: &str) -> AppResult<Vec<InventoryLine>>;

    async fn set_quantity(
        &self,
        target: &QuantityTarget,
        value: i64,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<InventoryLine>>;

    /// quantity = max(quantity + delta, 0)
    async fn adjust_quantity(
        &self,
        target: &AdjustTarget,
        delta: i64,
        now: DateTime<Utc>,
    ) -> AppResult<Option<InventoryLine>>;

    /// 修改到期日; 新键已存在时合并数量并删除旧行
    async fn update_expiration(
        &self,
        key: &LineKey,
        new_date: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> AppResult<Option<InventoryLine>>;

    async fn delete_lot(&self, key: &LineKey) -> AppResult<u64>;

    async fn delete_barcode(&self, barcode: &str) -> AppResult<u64>;

    /// 存储是否可达
    async fn ping(&self) -> bool;
}

pub(crate) fn sort_lines(lines: &mut [InventoryLine]) {
    lines.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
}

/// 数量超出 i64 范围
pub(crate) fn quantity_overflow() -> AppError {
    AppError::InvalidArgument("quantity would exceed the supported range".to_string())
}
