pub mod detector;
pub mod imaging;
pub mod recognizer;

use crate::config::ModelsConfig;
use crate::models::{DetectionCandidate, Recognition};
use image::DynamicImage;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub use detector::HttpRegionDetector;
pub use recognizer::HttpTextRecognizer;

/// 能力调用失败
#[derive(Debug, Error)]
pub enum CapabilityError {
    /// 模型服务不可达 / 未就绪
    #[error("capability unavailable: {0}")]
    Unavailable(String),

    /// 调用完成但结果不可用
    #[error("capability failed: {0}")]
    Failed(String),
}

/// 区域检测能力: 在图像中给出带角色的候选框
pub trait RegionDetector: Send + Sync {
    /// 返回尚未做文字识别的候选; 空列表是合法结果
    fn detect(&self, image: &DynamicImage) -> Result<Vec<DetectionCandidate>, CapabilityError>;

    fn name(&self) -> &str;
}

/// 文字识别能力
///
/// 实现自行把输入缩放到固定尺寸; 内部失败时返回空文本和 0 置信度, 不报错。
pub trait TextRecognizer: Send + Sync {
    fn recognize(&self, image: &DynamicImage) -> Recognition;

    fn name(&self) -> &str;
}

/// 进程级能力句柄, 启动时加载一次, 注入到流水线中共享只读使用
#[derive(Clone, Default)]
pub struct Capabilities {
    detector: Option<Arc<dyn RegionDetector>>,
    recognizer: Option<Arc<dyn TextRecognizer>>,
}

impl Capabilities {
    pub fn new(
        detector: Option<Arc<dyn RegionDetector>>,
        recognizer: Option<Arc<dyn TextRecognizer>>,
    ) -> Self {
        Self {
            detector,
            recognizer,
        }
    }

    /// 按配置连接模型服务; 连接失败的能力保持未加载, 服务继续启动
    ///
    /// 内部使用阻塞 HTTP 客户端, 不能在异步上下文中直接调用。
    pub fn load(config: &ModelsConfig) -> Self {
        let timeout = Duration::from_secs(config.timeout_secs);

        let detector = config.detector_url.as_deref().and_then(|url| {
            match HttpRegionDetector::connect(url, timeout, config.detection_score_threshold) {
                Ok(detector) => {
                    tracing::info!("Region detector loaded from {}", url);
                    Some(Arc::new(detector) as Arc<dyn RegionDetector>)
                }
                Err(e) => {
                    tracing::warn!("Region detector not loaded ({}), continuing without it", e);
                    None
                }
            }
        });

        let recognizer = config.recognizer_url.as_deref().and_then(|url| {
            match HttpTextRecognizer::connect(url, timeout) {
                Ok(recognizer) => {
                    tracing::info!("Text recognizer loaded from {}", url);
                    Some(Arc::new(recognizer) as Arc<dyn TextRecognizer>)
                }
                Err(e) => {
                    tracing::warn!("Text recognizer not loaded ({}), scans will be refused", e);
                    None
                }
            }
        });

        Self::new(detector, recognizer)
    }

    pub fn detector(&self) -> Option<&Arc<dyn RegionDetector>> {
        self.detector.as_ref()
    }

    pub fn recognizer(&self) -> Option<&Arc<dyn TextRecognizer>> {
        self.recognizer.as_ref()
    }

    pub fn detector_loaded(&self) -> bool {
        self.detector.is_some()
    }

    pub fn recognizer_loaded(&self) -> bool {
        self.recognizer.is_some()
    }

    /// 释放模型句柄
    pub fn shutdown(&mut self) {
        if let Some(detector) = self.detector.take() {
            tracing::info!("Releasing region detector {}", detector.name());
        }
        if let Some(recognizer) = self.recognizer.take() {
            tracing::info!("Releasing text recognizer {}", recognizer.name());
        }
    }
}

impl std::fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Capabilities")
            .field("detector", &self.detector.as_ref().map(|d| d.name().to_string()))
            .field("recognizer", &self.recognizer.as_ref().map(|r| r.name().to_string()))
            .finish()
    }
}
