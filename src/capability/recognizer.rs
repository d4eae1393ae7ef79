use super::imaging::encode_png_base64;
use super::{CapabilityError, TextRecognizer};
use crate::models::Recognition;
use image::{imageops::FilterType, DynamicImage};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 识别模型的输入尺寸 (高 × 宽)
pub const INPUT_HEIGHT: u32 = 192;
pub const INPUT_WIDTH: u32 = 2048;

/// 通过 HTTP 调用独立部署的文字识别模型
pub struct HttpTextRecognizer {
    client: reqwest::blocking::Client,
    base_url: String,
}

#[derive(Serialize)]
struct ImageRequest {
    image_base64: String,
}

#[derive(Deserialize)]
struct RecognizeResponse {
    text: String,
    confidence: f64,
}

/// 灰度化并缩放到固定输入尺寸, 任意宽高比均可
pub fn preprocess(image: &DynamicImage) -> DynamicImage {
    let gray = image.grayscale();
    gray.resize_exact(INPUT_WIDTH, INPUT_HEIGHT, FilterType::Lanczos3)
}

impl HttpTextRecognizer {
    pub fn connect(base_url: &str, timeout: Duration) -> Result<Self, CapabilityError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                CapabilityError::Unavailable(format!("failed to create HTTP client: {}", e))
            })?;

        let recognizer = Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        };

        let url = format!("{}/health", recognizer.base_url);
        let response = recognizer
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

        Ok(recognizer)
    }

    fn try_recognize(&self, image: &DynamicImage) -> Result<Recognition, CapabilityError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(CapabilityError::Failed("empty image".to_string()));
        }

        let input = preprocess(image);
        let image_base64 = encode_png_base64(&input)
            .map_err(|e| CapabilityError::Failed(format!("failed to encode image: {}", e)))?;
        let url = format!("{}/recognize", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(&ImageRequest { image_base64 })
            .send()
            .map_err(|e| CapabilityError::Unavailable(format!("request failed: {}", e)))?;

        if !response.status().is_success() {
            let error_text = response.text().unwrap_or_else(|_| "Unknown error".to_string());
            return Err(CapabilityError::Failed(format!("recognizer error: {}", error_text)));
        }

        let data: RecognizeResponse = response
            .json()
            .map_err(|e| CapabilityError::Failed(format!("failed to parse response: {}", e)))?;

        Ok(Recognition::new(data.text.trim(), data.confidence.clamp(0.0, 1.0)))
    }
}

impl TextRecognizer for HttpTextRecognizer {
    fn recognize(&self, image: &DynamicImage) -> Recognition {
        match self.try_recognize(image) {
            Ok(recognition) => recognition,
            Err(e) => {
                tracing::warn!("Text recognition failed: {}", e);
                Recognition::empty()
            }
        }
    }

    fn name(&self) -> &str {
        &self.base_url
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, RgbImage};

    #[test]
    fn test_preprocess_produces_canonical_grayscale_frame() {
        for (w, h) in [(40, 12), (12, 300), (4096, 100)] {
            let image = DynamicImage::ImageRgb8(RgbImage::new(w, h));
            let input = preprocess(&image);
            assert_eq!(input.dimensions(), (INPUT_WIDTH, INPUT_HEIGHT));
            assert_eq!(input.color().channel_count(), 1);
        }
    }

    #[test]
    fn test_preprocess_is_deterministic() {
        let mut raw = RgbImage::new(30, 10);
        for (x, y, pixel) in raw.enumerate_pixels_mut() {
            *pixel = image::Rgb([(x * 8) as u8, (y * 20) as u8, 90]);
        }
        let image = DynamicImage::ImageRgb8(raw);
        assert_eq!(preprocess(&image).as_bytes(), preprocess(&image).as_bytes());
    }

    #[test]
    fn test_failure_yields_empty_recognition() {
        let recognizer = HttpTextRecognizer {
            client: reqwest::blocking::Client::builder()
                .timeout(Duration::from_millis(200))
                .build()
                .unwrap(),
            base_url: "http://127.0.0.1:1".to_string(),
        };
        let image = DynamicImage::ImageRgb8(RgbImage::new(20, 10));
        assert_eq!(recognizer.recognize(&image), Recognition::empty());
    }
}
