use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// 库存行: 同一条码 + 同一到期日 = 一个批次
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryLine {
    pub id: i64,
    pub barcode: String,
    pub name: String,
    pub manufacturer: String,
    pub unit_price: BigDecimal,
    pub catalog_id: String,
    pub expiration_date: Option<DateTime<Utc>>,
    pub quantity: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl InventoryLine {
    pub fn key(&self) -> LineKey {
        LineKey::new(&self.barcode, self.expiration_date)
    }

    /// 排序键: (条码, 到期日), 无到期日排在最后
    pub fn sort_key(&self) -> (&str, bool, Option<DateTime<Utc>>, i64) {
        (
            self.barcode.as_str(),
            self.expiration_date.is_none(),
            self.expiration_date,
            self.id,
        )
    }
}

/// 批次逻辑主键
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LineKey {
    pub barcode: String,
    pub expiration_date: Option<DateTime<Utc>>,
}

impl LineKey {
    pub fn new(barcode: &str, expiration_date: Option<DateTime<Utc>>) -> Self {
        Self {
            barcode: barcode.to_string(),
            expiration_date,
        }
    }
}

/// 商品描述信息 (来自商品目录或手工录入)
///
/// 同时接受目录原始字段名 (productName / lab / price / matnr)。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductMetadata {
    #[serde(default, alias = "productName")]
    pub name: String,
    #[serde(default, alias = "lab")]
    pub manufacturer: String,
    #[serde(default, alias = "price")]
    pub unit_price: BigDecimal,
    #[serde(default, alias = "matnr")]
    pub catalog_id: String,
}

impl ProductMetadata {
    /// 无目录信息时的占位商品
    pub fn placeholder(barcode: &str) -> Self {
        Self {
            name: format!("Product {}", barcode),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn line(id: i64, barcode: &str, expiration: Option<DateTime<Utc>>) -> InventoryLine {
        let now = Utc::now();
        InventoryLine {
            id,
            barcode: barcode.to_string(),
            name: String::new(),
            manufacturer: String::new(),
            unit_price: BigDecimal::default(),
            catalog_id: String::new(),
            expiration_date: expiration,
            quantity: 1,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_missing_expiration_sorts_last() {
        let early = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let late = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();
        let mut lines = vec![
            line(1, "b", None),
            line(2, "a", Some(late)),
            line(3, "b", Some(early)),
            line(4, "a", None),
            line(5, "a", Some(early)),
        ];
        lines.sort_by(|x, y| x.sort_key().cmp(&y.sort_key()));
        let ids: Vec<i64> = lines.iter().map(|l| l.id).collect();
        assert_eq!(ids, vec![5, 2, 4, 3, 1]);
    }

    #[test]
    fn test_metadata_accepts_catalog_field_names() {
        let meta: ProductMetadata = serde_json::from_str(
            r#"{"productName": "Ibuprofeno 400", "lab": "Bago", "price": 1520.5, "matnr": "M-77"}"#,
        )
        .unwrap();
        assert_eq!(meta.name, "Ibuprofeno 400");
        assert_eq!(meta.manufacturer, "Bago");
        assert_eq!(meta.catalog_id, "M-77");
        assert_eq!(meta.unit_price.to_string(), "1520.5");
    }

    #[test]
    fn test_placeholder_name() {
        let meta = ProductMetadata::placeholder("750100001");
        assert_eq!(meta.name, "Product 750100001");
        assert!(meta.manufacturer.is_empty());
    }
}
