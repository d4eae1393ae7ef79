use super::detection::{BoundingBox, DetectionCandidate, PixelRect};
use serde::{Deserialize, Serialize};

/// 显示坐标系下的手动扫描框
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CropRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// 手动扫描框所在的显示区域尺寸
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DisplaySize {
    pub width: f64,
    pub height: f64,
}

/// 文字识别输出
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recognition {
    pub text: String,
    pub confidence: f64,
}

impl Recognition {
    pub fn new(text: impl Into<String>, confidence: f64) -> Self {
        Self {
            text: text.into(),
            confidence,
        }
    }

    /// 无可用读数
    pub fn empty() -> Self {
        Self {
            text: String::new(),
            confidence: 0.0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// 最终结果来自哪条路径
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanPath {
    Auto,
    Manual,
}

/// 自动检测阶段的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorStatus {
    /// 调用方关闭了自动检测
    Disabled,
    /// 检测器未加载或调用失败
    Unavailable,
    /// 没有检测到任何区域
    Empty,
    /// 有区域, 但没有 date / due 类别
    NoDateRegion,
    /// 日期区域的综合置信度低于下限
    BelowFloor,
    /// 自动路径产出了结果
    Accepted,
}

/// 扫描诊断信息, 保留各阶段输出供排查和人工确认时展示
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanDiagnostics {
    pub path: ScanPath,
    pub auto_detection_requested: bool,
    pub detector_status: DetectorStatus,
    pub detector_message: Option<String>,
    pub region_count: usize,
    pub candidates: Vec<DetectionCandidate>,
    pub best_candidate: Option<DetectionCandidate>,
    pub chosen_box: Option<BoundingBox>,
    pub chosen_crop: Option<PixelRect>,
    pub auto_confidence: Option<f64>,
    pub manual_crop: Option<PixelRect>,
    pub manual_confidence: Option<f64>,
    pub image_width: u32,
    pub image_height: u32,
}

impl ScanDiagnostics {
    pub fn new(auto_detection_requested: bool, image_width: u32, image_height: u32) -> Self {
        Self {
            path: ScanPath::Manual,
            auto_detection_requested,
            detector_status: DetectorStatus::Disabled,
            detector_message: None,
            region_count: 0,
            candidates: Vec::new(),
            best_candidate: None,
            chosen_box: None,
            chosen_crop: None,
            auto_confidence: None,
            manual_crop: None,
            manual_confidence: None,
            image_width,
            image_height,
        }
    }
}

/// 扫描结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanResult {
    pub predicted_text: String,
    pub confidence: f64,
    pub success: bool,
    pub message: String,
    pub diagnostics: ScanDiagnostics,
}
