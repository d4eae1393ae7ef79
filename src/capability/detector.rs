use super::imaging::encode_png_base64;
use super::{CapabilityError, RegionDetector};
use crate::models::{BoundingBox, DetectionCandidate, RoleClass};
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 通过 HTTP 调用独立部署的区域检测模型
pub struct HttpRegionDetector {
    client: reqwest::blocking::Client,
    base_url: String,
    score_threshold: f64,
}

#[derive(Serialize)]
struct ImageRequest {
    image_base64: String,
}

/// 单个检测结果, bbox = [x1, y1, x2, y2]
#[derive(Deserialize, Debug)]
struct RawDetection {
    #[serde(alias = "classId")]
    class_id: u32,
    score: f64,
    bbox: [f64; 4],
}

#[derive(Deserialize)]
struct DetectResponse {
    detections: Vec<RawDetection>,
}

impl HttpRegionDetector {
    /// 建立客户端并探测 /health, 探测失败视为未加载
    pub fn connect(
        base_url: &str,
        timeout: Duration,
        score_threshold: f64,
    ) -> Result<Self, CapabilityError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                CapabilityError::Unavailable(format!("failed to create HTTP client: {}", e))
            })?;

        let detector = Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            score_threshold,
        };
        detector.health_check()?;
        Ok(detector)
    }

    fn health_check(&self) -> Result<(), CapabilityError> {
        let url = format!("{}/health", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|e| CapabilityError::Unavailable(format!("health check failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(CapabilityError::Unavailable(format!(
                "health check returned {}",
                response.status()
            )));
        }
        Ok(())
    }

    /// 过滤低分与未知类别, 转为候选
    fn to_candidates(&self, detections: Vec<RawDetection>) -> Vec<DetectionCandidate> {
        detections
            .into_iter()
            .filter(|d| d.score >= self.score_threshold)
            .filter_map(|d| {
                let Some(role) = RoleClass::from_class_id(d.class_id) else {
                    tracing::debug!("Ignoring detection with unknown class {}", d.class_id);
                    return None;
                };
                let [x1, y1, x2, y2] = d.bbox;
                Some(DetectionCandidate::new(role, BoundingBox::new(x1, y1, x2, y2), d.score))
            })
            .collect()
    }
}

impl RegionDetector for HttpRegionDetector {
    fn detect(&self, image: &DynamicImage) -> Result<Vec<DetectionCandidate>, CapabilityError> {
        let image_base64 = encode_png_base64(image)
            .map_err(|e| CapabilityError::Failed(format!("failed to encode image: {}", e)))?;
        let url = format!("{}/detect", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(&ImageRequest { image_base64 })
            .send()
            .map_err(|e| CapabilityError::Unavailable(format!("request failed: {}", e)))?;

        if response.status() == reqwest::StatusCode::SERVICE_UNAVAILABLE {
            return Err(CapabilityError::Unavailable("detector is not ready".to_string()));
        }
        if !response.status().is_success() {
            let error_text = response.text().unwrap_or_else(|_| "Unknown error".to_string());
            return Err(CapabilityError::Failed(format!("detector error: {}", error_text)));
        }

        let data: DetectResponse = response
            .json()
            .map_err(|e| CapabilityError::Failed(format!("failed to parse response: {}", e)))?;

        Ok(self.to_candidates(data.detections))
    }

    fn name(&self) -> &str {
        &self.base_url
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector(threshold: f64) -> HttpRegionDetector {
        HttpRegionDetector {
            client: reqwest::blocking::Client::new(),
            base_url: "http://127.0.0.1:1".to_string(),
            score_threshold: threshold,
        }
    }

    #[test]
    fn test_response_mapping_filters_threshold_and_unknown_classes() {
        let response: DetectResponse = serde_json::from_str(
            r#"{"detections": [
                {"class_id": 3, "score": 0.91, "bbox": [10, 20, 110, 60]},
                {"class_id": 0, "score": 0.2, "bbox": [0, 0, 5, 5]},
                {"class_id": 9, "score": 0.99, "bbox": [0, 0, 5, 5]},
                {"class_id": 2, "score": 0.5, "bbox": [1.5, 2.5, 30, 40]}
            ]}"#,
        )
        .unwrap();

        let candidates = detector(0.3).to_candidates(response.detections);
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].role_class, RoleClass::Date);
        assert_eq!(candidates[0].bounding_box, BoundingBox::new(10.0, 20.0, 110.0, 60.0));
        assert_eq!(candidates[1].role_class, RoleClass::Code);
        assert!(candidates.iter().all(|c| c.recognized_text.is_none()));
    }

    #[test]
    fn test_unreachable_server_is_unavailable() {
        let result =
            HttpRegionDetector::connect("http://127.0.0.1:1", Duration::from_millis(200), 0.3);
        assert!(matches!(result, Err(CapabilityError::Unavailable(_))));
    }
}
