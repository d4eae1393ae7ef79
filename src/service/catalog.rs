use crate::config::CatalogConfig;
use crate::error::{AppError, AppResult};
use crate::models::ProductMetadata;
use bigdecimal::BigDecimal;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;

/// 外部商品目录客户端 (按条码查询商品信息)
pub struct CatalogClient {
    client: reqwest::Client,
    base_url: String,
    bearer_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CatalogResponse {
    #[serde(default)]
    result: Vec<CatalogItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CatalogItem {
    #[serde(default)]
    product_name: String,
    #[serde(default)]
    lab: String,
    #[serde(default)]
    price: Option<BigDecimal>,
    #[serde(default)]
    matnr: String,
}

impl From<CatalogItem> for ProductMetadata {
    fn from(item: CatalogItem) -> Self {
        Self {
            name: item.product_name.trim().to_string(),
            manufacturer: item.lab.trim().to_string(),
            unit_price: item.price.unwrap_or_default(),
            catalog_id: item.matnr,
        }
    }
}

impl CatalogClient {
    pub fn new(config: &CatalogConfig) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::Internal(format!("failed to create catalog client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            bearer_token: config.bearer_token.clone().filter(|t| !t.is_empty()),
        })
    }

    /// 查询条码; 目录中没有该商品时返回 None
    pub async fn lookup(&self, barcode: &str) -> AppResult<Option<ProductMetadata>> {
        let Some(token) = &self.bearer_token else {
            return Err(AppError::UpstreamUnavailable(
                "catalog bearer token is not configured".to_string(),
            ));
        };

        let response = self
            .client
            .get(&self.base_url)
            .query(&[("descripcion", barcode), ("propertyName", "descripcion")])
            .bearer_auth(token)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| AppError::UpstreamUnavailable(format!("catalog request failed: {}", e)))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            tracing::warn!("Catalog lookup for {} returned {}", barcode, status);
            return Err(AppError::UpstreamUnavailable(format!("catalog returned {}", status)));
        }

        let body: CatalogResponse = response
            .json()
            .await
            .map_err(|e| {
                AppError::UpstreamUnavailable(format!("invalid catalog response: {}", e))
            })?;

        Ok(first_product(body))
    }
}

fn first_product(body: CatalogResponse) -> Option<ProductMetadata> {
    body.result.into_iter().next().map(ProductMetadata::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_result_is_mapped() {
        let body: CatalogResponse = serde_json::from_str(
            r#"{"result": [
                {"codebar": "7791234", "productName": " Ibuprofeno 400 ", "lab": "Bago ", "price": 1520.5, "matnr": "M-77"},
                {"codebar": "7791234", "productName": "Other", "lab": "", "price": 1, "matnr": "M-78"}
            ]}"#,
        )
        .unwrap();

        let meta = first_product(body).unwrap();
        assert_eq!(meta.name, "Ibuprofeno 400");
        assert_eq!(meta.manufacturer, "Bago");
        assert_eq!(meta.catalog_id, "M-77");
        assert_eq!(meta.unit_price.to_string(), "1520.5");
    }

    #[test]
    fn test_empty_or_missing_result() {
        let body: CatalogResponse = serde_json::from_str(r#"{"result": []}"#).unwrap();
        assert!(first_product(body).is_none());

        let body: CatalogResponse = serde_json::from_str(r#"{}"#).unwrap();
        assert!(first_product(body).is_none());
    }

    #[test]
    fn test_missing_price_defaults_to_zero() {
        let body: CatalogResponse =
            serde_json::from_str(r#"{"result": [{"productName": "X", "price": null}]}"#).unwrap();
        let meta = first_product(body).unwrap();
        assert_eq!(meta.unit_price, BigDecimal::default());
    }

    #[tokio::test]
    async fn test_missing_token_is_upstream_unavailable() {
        let client = CatalogClient::new(&CatalogConfig {
            base_url: "http://127.0.0.1:9/catalog".to_string(),
            bearer_token: None,
            timeout_secs: 1,
        })
        .unwrap();

        assert!(matches!(
            client.lookup("7791234").await,
            Err(AppError::UpstreamUnavailable(_))
        ));
    }
}
