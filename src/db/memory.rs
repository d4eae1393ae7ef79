use super::store::{quantity_overflow, sort_lines, AdjustTarget, LineStore, QuantityTarget};
use crate::error::AppResult;
use crate::models::{InventoryLine, LineKey, ProductMetadata};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicI64, Ordering};

/// 进程内账本, 以 DashMap 的分片锁保证单键原子性
#[derive(Debug, Default)]
pub struct MemoryLineStore {
    lines: DashMap<LineKey, InventoryLine>,
    next_id: AtomicI64,
}

impl MemoryLineStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn adjust_key(
        &self,
        key: &LineKey,
        delta: i64,
        now: DateTime<Utc>,
    ) -> AppResult<Option<InventoryLine>> {
        match self.lines.get_mut(key) {
            Some(mut line) => {
                line.quantity = adjusted_quantity(line.quantity, delta)?;
                line.updated_at = now;
                Ok(Some(line.clone()))
            }
            None => Ok(None),
        }
    }

    fn earliest_key(&self, barcode: &str) -> Option<LineKey> {
        self.lines
            .iter()
            .filter(|e| e.value().barcode == barcode)
            .min_by(|a, b| a.value().sort_key().cmp(&b.value().sort_key()))
            .map(|e| e.key().clone())
    }
}

/// 增加时溢出报错, 减少时下限为 0
fn adjusted_quantity(quantity: i64, delta: i64) -> AppResult<i64> {
    if delta >= 0 {
        quantity.checked_add(delta).ok_or_else(quantity_overflow)
    } else {
        Ok(quantity.saturating_add(delta).max(0))
    }
}

#[async_trait]
impl LineStore for MemoryLineStore {
    async fn upsert(
        &self,
        key: &LineKey,
        delta: i64,
        metadata: &ProductMetadata,
        now: DateTime<Utc>,
    ) -> AppResult<InventoryLine> {
        let line = match self.lines.entry(key.clone()) {
            Entry::Occupied(mut entry) => {
                let line = entry.get_mut();
                line.quantity = line.quantity.checked_add(delta).ok_or_else(quantity_overflow)?;
                line.updated_at = now;
                line.clone()
            }
            Entry::Vacant(entry) => {
                let line = InventoryLine {
                    id: self.allocate_id(),
                    barcode: key.barcode.clone(),
                    name: metadata.name.clone(),
                    manufacturer: metadata.manufacturer.clone(),
                    unit_price: metadata.unit_price.clone(),
                    catalog_id: metadata.catalog_id.clone(),
                    expiration_date: key.expiration_date,
                    quantity: delta,
                    created_at: now,
                    updated_at: now,
                };
                entry.insert(line.clone());
                line
            }
        };
        Ok(line)
    }

    async fn find(&self, key: &LineKey) -> AppResult<Option<InventoryLine>> {
        Ok(self.lines.get(key).map(|line| line.value().clone()))
    }

    async fn list_all(&self) -> AppResult<Vec<InventoryLine>> {
        let mut lines: Vec<InventoryLine> = self.lines.iter().map(|e| e.value().clone()).collect();
        sort_lines(&mut lines);
        Ok(lines)
    }

    async fn list_by_barcode(&self, barcode: &str) -> AppResult<Vec<InventoryLine>> {
        let mut lines: Vec<InventoryLine> = self
            .lines
            .iter()
            .filter(|e| e.value().barcode == barcode)
            .map(|e| e.value().clone())
            .collect();
        sort_lines(&mut lines);
        Ok(lines)
    }

    async fn set_quantity(
        &self,
        target: &QuantityTarget,
        value: i64,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<InventoryLine>> {
        let mut updated = Vec::new();
        match target {
            QuantityTarget::Lot(key) => {
                if let Some(mut line) = self.lines.get_mut(key) {
                    line.quantity = value;
                    line.updated_at = now;
                    updated.push(line.clone());
                }
            }
            QuantityTarget::AllOfBarcode(barcode) => {
                for mut entry in self.lines.iter_mut() {
                    let line = entry.value_mut();
                    if &line.barcode == barcode {
                        line.quantity = value;
                        line.updated_at = now;
                        updated.push(line.clone());
                    }
                }
            }
        }
        sort_lines(&mut updated);
        Ok(updated)
    }

    async fn adjust_quantity(
        &self,
        target: &AdjustTarget,
        delta: i64,
        now: DateTime<Utc>,
    ) -> AppResult<Option<InventoryLine>> {
        let barcode = match target {
            AdjustTarget::Lot(key) => return self.adjust_key(key, delta, now),
            AdjustTarget::EarliestOfBarcode(barcode) => barcode,
        };

        // 选出的批次可能在修改前被并发删除, 此时重新选择
        while let Some(key) = self.earliest_key(barcode) {
            if let Some(line) = self.adjust_key(&key, delta, now)? {
                return Ok(Some(line));
            }
        }
        Ok(None)
    }

    async fn update_expiration(
        &self,
        key: &LineKey,
        new_date: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> AppResult<Option<InventoryLine>> {
        if key.expiration_date == Some(new_date) {
            return self.find(key).await;
        }

        let Some((_, mut old)) = self.lines.remove(key) else {
            return Ok(None);
        };

        let new_key = LineKey::new(&key.barcode, Some(new_date));
        let moved = match self.lines.entry(new_key) {
            Entry::Occupied(mut entry) => {
                let line = entry.get_mut();
                match line.quantity.checked_add(old.quantity) {
                    Some(quantity) => {
                        line.quantity = quantity;
                        line.updated_at = now;
                        Ok(line.clone())
                    }
                    None => Err(old),
                }
            }
            Entry::Vacant(entry) => {
                old.expiration_date = Some(new_date);
                old.updated_at = now;
                entry.insert(old.clone());
                Ok(old)
            }
        };

        match moved {
            Ok(line) => Ok(Some(line)),
            Err(old) => {
                // 合并溢出: 旧批次原样放回
                self.lines.insert(key.clone(), old);
                Err(quantity_overflow())
            }
        }
    }

    async fn delete_lot(&self, key: &LineKey) -> AppResult<u64> {
        Ok(self.lines.remove(key).map_or(0, |_| 1))
    }

    async fn delete_barcode(&self, barcode: &str) -> AppResult<u64> {
        let mut removed = 0u64;
        self.lines.retain(|_, line| {
            let keep = line.barcode != barcode;
            if !keep {
                removed += 1;
            }
            keep
        });
        Ok(removed)
    }

    async fn ping(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use chrono::TimeZone;
    use std::sync::Arc;

    fn date(month: u32) -> Option<DateTime<Utc>> {
        Some(Utc.with_ymd_and_hms(2027, month, 1, 0, 0, 0).unwrap())
    }

    #[tokio::test]
    async fn test_ids_are_unique_and_missing_date_is_its_own_lot() {
        let store = MemoryLineStore::new();
        let meta = ProductMetadata::placeholder("A");
        let now = Utc::now();

        let a = store.upsert(&LineKey::new("A", date(9)), 1, &meta, now).await.unwrap();
        let b = store.upsert(&LineKey::new("A", None), 1, &meta, now).await.unwrap();
        let c = store.upsert(&LineKey::new("A", None), 2, &meta, now).await.unwrap();

        assert_ne!(a.id, b.id);
        assert_eq!(b.id, c.id);
        assert_eq!(c.quantity, 3);
        assert_eq!(store.list_all().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_update_expiration_to_same_date_is_noop() {
        let store = MemoryLineStore::new();
        let meta = ProductMetadata::placeholder("A");
        let key = LineKey::new("A", date(9));
        let created = store.upsert(&key, 4, &meta, Utc::now()).await.unwrap();

        let line = store
            .update_expiration(&key, date(9).unwrap(), Utc::now())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(line.id, created.id);
        assert_eq!(line.quantity, 4);
        assert_eq!(line.updated_at, created.updated_at);
    }

    #[tokio::test]
    async fn test_earliest_lot_ignores_other_barcodes() {
        let store = MemoryLineStore::new();
        let now = Utc::now();
        store
            .upsert(&LineKey::new("B", date(1)), 5, &ProductMetadata::placeholder("B"), now)
            .await
            .unwrap();
        store
            .upsert(&LineKey::new("A", None), 5, &ProductMetadata::placeholder("A"), now)
            .await
            .unwrap();
        store
            .upsert(&LineKey::new("A", date(6)), 5, &ProductMetadata::placeholder("A"), now)
            .await
            .unwrap();

        let line = store
            .adjust_quantity(&AdjustTarget::EarliestOfBarcode("A".to_string()), -2, now)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(line.barcode, "A");
        assert_eq!(line.expiration_date, date(6));
        assert_eq!(line.quantity, 3);
    }

    #[tokio::test]
    async fn test_overflowing_additions_are_rejected_and_leave_lots_intact() {
        let store = MemoryLineStore::new();
        let meta = ProductMetadata::placeholder("A");
        let now = Utc::now();
        let sep = LineKey::new("A", date(9));
        let oct = LineKey::new("A", date(10));
        store.upsert(&sep, 1, &meta, now).await.unwrap();
        store.upsert(&oct, i64::MAX, &meta, now).await.unwrap();

        assert!(matches!(
            store.upsert(&sep, i64::MAX, &meta, now).await,
            Err(AppError::InvalidArgument(_))
        ));
        assert!(matches!(
            store.adjust_quantity(&AdjustTarget::Lot(sep.clone()), i64::MAX, now).await,
            Err(AppError::InvalidArgument(_))
        ));
        assert!(matches!(
            store.update_expiration(&sep, date(10).unwrap(), now).await,
            Err(AppError::InvalidArgument(_))
        ));

        assert_eq!(store.find(&sep).await.unwrap().unwrap().quantity, 1);
        assert_eq!(store.find(&oct).await.unwrap().unwrap().quantity, i64::MAX);
    }

    #[tokio::test]
    async fn test_large_decrement_saturates_at_zero() {
        let store = MemoryLineStore::new();
        let key = LineKey::new("A", date(9));
        let now = Utc::now();
        store.upsert(&key, 3, &ProductMetadata::placeholder("A"), now).await.unwrap();

        let line = store
            .adjust_quantity(&AdjustTarget::Lot(key), i64::MIN, now)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(line.quantity, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_earliest_adjust_survives_concurrent_deletes() {
        let store = Arc::new(MemoryLineStore::new());
        let meta = ProductMetadata::placeholder("A");
        let now = Utc::now();
        let first = Utc.with_ymd_and_hms(2027, 1, 1, 0, 0, 0).unwrap();

        let dated: Vec<LineKey> = (0..200)
            .map(|day| LineKey::new("A", Some(first + chrono::Duration::days(day))))
            .collect();
        for key in &dated {
            store.upsert(key, 1, &meta, now).await.unwrap();
        }
        // the undated lot sorts last and is never deleted
        store.upsert(&LineKey::new("A", None), 1, &meta, now).await.unwrap();

        let deleter = {
            let store = store.clone();
            tokio::spawn(async move {
                for key in dated {
                    store.delete_lot(&key).await.unwrap();
                    tokio::task::yield_now().await;
                }
            })
        };
        let adjusters: Vec<_> = (0..4)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move {
                    let target = AdjustTarget::EarliestOfBarcode("A".to_string());
                    for _ in 0..200 {
                        let line = store.adjust_quantity(&target, 1, Utc::now()).await.unwrap();
                        assert!(line.is_some());
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();

        deleter.await.unwrap();
        for result in futures::future::join_all(adjusters).await {
            result.unwrap();
        }
        assert_eq!(store.list_all().await.unwrap().len(), 1);
    }
}
