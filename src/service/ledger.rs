use crate::db::{AdjustTarget, LineStore, QuantityTarget};
use crate::error::{AppError, AppResult};
use crate::models::{InventoryLine, LineKey, ProductMetadata};
use crate::service::date_parser::parse_expiration_date;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// 商品到期账本
///
/// 键为 (条码, 到期日); 日期文本统一经 `parse_expiration_date` 归一化后再比较。
pub struct LedgerService {
    store: Arc<dyn LineStore>,
}

impl LedgerService {
    pub fn new(store: Arc<dyn LineStore>) -> Self {
        Self { store }
    }

    /// 确认扫描结果入账: 已有批次累加数量, 否则新建
    pub async fn upsert_confirmed_scan(
        &self,
        barcode: &str,
        expiration_date: &str,
        quantity_delta: i64,
        metadata: Option<ProductMetadata>,
    ) -> AppResult<InventoryLine> {
        let date = parse_expiration_date(expiration_date)?;
        self.upsert(barcode, Some(date), quantity_delta, metadata).await
    }

    /// 手工录入; 到期日可缺省, 同键同样合并
    pub async fn create_line(
        &self,
        barcode: &str,
        expiration_date: Option<&str>,
        quantity: i64,
        metadata: Option<ProductMetadata>,
    ) -> AppResult<InventoryLine> {
        let date = parse_optional_date(expiration_date)?;
        self.upsert(barcode, date, quantity, metadata).await
    }

    async fn upsert(
        &self,
        barcode: &str,
        expiration_date: Option<DateTime<Utc>>,
        quantity_delta: i64,
        metadata: Option<ProductMetadata>,
    ) -> AppResult<InventoryLine> {
        let barcode = validate_barcode(barcode)?;
        validate_non_negative("quantity", quantity_delta)?;

        let key = LineKey::new(barcode, expiration_date);
        let metadata = metadata.unwrap_or_else(|| ProductMetadata::placeholder(barcode));
        let line = self.store.upsert(&key, quantity_delta, &metadata, Utc::now()).await?;

        tracing::info!(
            "Lot {} {:?} now at quantity {} (+{})",
            line.barcode, line.expiration_date, line.quantity, quantity_delta
        );
        Ok(line)
    }

    /// 设置数量: 给定到期日时只改该批次, 否则改该条码下所有批次
    pub async fn set_quantity(
        &self,
        barcode: &str,
        value: i64,
        expiration_date: Option<&str>,
    ) -> AppResult<Vec<InventoryLine>> {
        let barcode = validate_barcode(barcode)?;
        validate_non_negative("quantity", value)?;

        let target = match parse_optional_date(expiration_date)? {
            Some(date) => QuantityTarget::Lot(LineKey::new(barcode, Some(date))),
            None => QuantityTarget::AllOfBarcode(barcode.to_string()),
        };

        let lines = self.store.set_quantity(&target, value, Utc::now()).await?;
        if lines.is_empty() {
            return Err(not_found(barcode, expiration_date));
        }
        Ok(lines)
    }

    pub async fn increment_quantity(
        &self,
        barcode: &str,
        delta: i64,
        expiration_date: Option<&str>,
    ) -> AppResult<InventoryLine> {
        validate_non_negative("amount", delta)?;
        self.adjust(barcode, delta, expiration_date).await
    }

    /// 减少数量, 最低为 0
    pub async fn decrement_quantity(
        &self,
        barcode: &str,
        delta: i64,
        expiration_date: Option<&str>,
    ) -> AppResult<InventoryLine> {
        validate_non_negative("amount", delta)?;
        self.adjust(barcode, -delta, expiration_date).await
    }

    async fn adjust(
        &self,
        barcode: &str,
        delta: i64,
        expiration_date: Option<&str>,
    ) -> AppResult<InventoryLine> {
        let barcode = validate_barcode(barcode)?;
        let target = match parse_optional_date(expiration_date)? {
            Some(date) => AdjustTarget::Lot(LineKey::new(barcode, Some(date))),
            None => AdjustTarget::EarliestOfBarcode(barcode.to_string()),
        };

        self.store
            .adjust_quantity(&target, delta, Utc::now())
            .await?
            .ok_or_else(|| not_found(barcode, expiration_date))
    }

    /// 修改到期日; 新日期已有批次时合并数量
    pub async fn update_expiration_date(
        &self,
        barcode: &str,
        old_date: &str,
        new_date: &str,
    ) -> AppResult<InventoryLine> {
        let barcode = validate_barcode(barcode)?;
        let old = parse_expiration_date(old_date)?;
        let new = parse_expiration_date(new_date)?;

        let key = LineKey::new(barcode, Some(old));
        self.store
            .update_expiration(&key, new, Utc::now())
            .await?
            .ok_or_else(|| not_found(barcode, Some(old_date)))
    }

    /// 删除: 给定到期日删除单个批次, 否则删除该条码下全部批次; 返回删除行数
    pub async fn delete_line(
        &self,
        barcode: &str,
        expiration_date: Option<&str>,
    ) -> AppResult<u64> {
        let barcode = validate_barcode(barcode)?;
        let deleted = match parse_optional_date(expiration_date)? {
            Some(date) => self.store.delete_lot(&LineKey::new(barcode, Some(date))).await?,
            None => self.store.delete_barcode(barcode).await?,
        };

        if deleted == 0 {
            return Err(not_found(barcode, expiration_date));
        }
        tracing::info!("Deleted {} line(s) for barcode {}", deleted, barcode);
        Ok(deleted)
    }

    pub async fn list_all(&self) -> AppResult<Vec<InventoryLine>> {
        self.store.list_all().await
    }

    pub async fn list_by_barcode(&self, barcode: &str) -> AppResult<Vec<InventoryLine>> {
        let barcode = validate_barcode(barcode)?;
        self.store.list_by_barcode(barcode).await
    }

    pub async fn storage_reachable(&self) -> bool {
        self.store.ping().await
    }
}

fn validate_barcode(barcode: &str) -> AppResult<&str> {
    let barcode = barcode.trim();
    if barcode.is_empty() {
        return Err(AppError::InvalidArgument("barcode must not be empty".to_string()));
    }
    Ok(barcode)
}

fn validate_non_negative(field: &str, value: i64) -> AppResult<()> {
    if value < 0 {
        return Err(AppError::InvalidArgument(format!("{} cannot be negative", field)));
    }
    Ok(())
}

fn parse_optional_date(text: Option<&str>) -> AppResult<Option<DateTime<Utc>>> {
    match text {
        Some(text) if !text.trim().is_empty() => parse_expiration_date(text).map(Some),
        _ => Ok(None),
    }
}

fn not_found(barcode: &str, expiration_date: Option<&str>) -> AppError {
    match expiration_date {
        Some(date) => {
            AppError::NotFound(format!("no line for barcode {} expiring {}", barcode, date))
        }
        None => AppError::NotFound(format!("no line for barcode {}", barcode)),
    }
}
