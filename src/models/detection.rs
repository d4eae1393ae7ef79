use serde::{Deserialize, Serialize};

/// 全局置信度下限, 自动与手动两条路径共用
pub const CONFIDENCE_FLOOR: f64 = 0.1;

/// 未做识别的候选区域的综合置信度 (低于下限)
pub const UNRECOGNIZED_PENALTY: f64 = 0.05;

/// 裁剪候选区域时的外扩像素
pub const CROP_MARGIN: u32 = 5;

/// 区域角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoleClass {
    Due,
    Production,
    Code,
    Date,
}

impl RoleClass {
    /// 检测模型的类别编号: 0 due, 1 production, 2 code, 3 date
    pub fn from_class_id(id: u32) -> Option<Self> {
        match id {
            0 => Some(RoleClass::Due),
            1 => Some(RoleClass::Production),
            2 => Some(RoleClass::Code),
            3 => Some(RoleClass::Date),
            _ => None,
        }
    }
}

/// 图像坐标系下的像素矩形
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// 检测框 (x1, y1, x2, y2)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl BoundingBox {
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// 裁剪到图像范围内; 裁剪后退化 (x1 >= x2 或 y1 >= y2) 时返回 None
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<Self> {
        let (w, h) = (width as f64, height as f64);
        let clamped = Self {
            x1: self.x1.clamp(0.0, w),
            y1: self.y1.clamp(0.0, h),
            x2: self.x2.clamp(0.0, w),
            y2: self.y2.clamp(0.0, h),
        };
        if clamped.x1 < clamped.x2 && clamped.y1 < clamped.y2 {
            Some(clamped)
        } else {
            None
        }
    }

    /// 外扩 margin 像素并限制在图像内, 得到裁剪矩形
    pub fn expand_to_rect(&self, margin: u32, width: u32, height: u32) -> PixelRect {
        let m = margin as i64;
        let x1 = (self.x1.floor() as i64 - m).max(0);
        let y1 = (self.y1.floor() as i64 - m).max(0);
        let x2 = (self.x2.ceil() as i64 + m).min(width as i64);
        let y2 = (self.y2.ceil() as i64 + m).min(height as i64);

        PixelRect {
            x: x1 as u32,
            y: y1 as u32,
            width: (x2 - x1).max(0) as u32,
            height: (y2 - y1).max(0) as u32,
        }
    }
}

/// 单次流水线中的候选区域 (不持久化)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionCandidate {
    pub role_class: RoleClass,
    pub bounding_box: BoundingBox,
    pub detection_confidence: f64,
    pub recognized_text: Option<String>,
    pub recognition_confidence: Option<f64>,
    pub combined_confidence: f64,
}

impl DetectionCandidate {
    pub fn new(
        role_class: RoleClass,
        bounding_box: BoundingBox,
        detection_confidence: f64,
    ) -> Self {
        Self {
            role_class,
            bounding_box,
            detection_confidence: detection_confidence.clamp(0.0, 1.0),
            recognized_text: None,
            recognition_confidence: None,
            combined_confidence: UNRECOGNIZED_PENALTY,
        }
    }

    /// 写入识别结果并融合置信度: 检测 × 识别, 不取平均
    pub fn fuse(&mut self, text: String, recognition_confidence: f64) {
        let recognition_confidence = recognition_confidence.clamp(0.0, 1.0);
        self.combined_confidence = self.detection_confidence * recognition_confidence;
        self.recognized_text = Some(text);
        self.recognition_confidence = Some(recognition_confidence);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_keeps_valid_box() {
        let bbox = BoundingBox::new(-10.0, 5.0, 120.0, 40.0);
        let clamped = bbox.clamp_to(100, 50).unwrap();
        assert_eq!(clamped, BoundingBox::new(0.0, 5.0, 100.0, 40.0));
    }

    #[test]
    fn test_clamp_rejects_degenerate_box() {
        assert!(BoundingBox::new(110.0, 5.0, 150.0, 40.0).clamp_to(100, 50).is_none());
        assert!(BoundingBox::new(10.0, 20.0, 30.0, 20.0).clamp_to(100, 50).is_none());
    }

    #[test]
    fn test_expand_adds_margin_within_bounds() {
        let rect = BoundingBox::new(20.0, 10.0, 60.0, 30.0).expand_to_rect(CROP_MARGIN, 100, 50);
        assert_eq!(rect, PixelRect { x: 15, y: 5, width: 50, height: 30 });

        let edge = BoundingBox::new(2.0, 1.0, 98.0, 49.0).expand_to_rect(CROP_MARGIN, 100, 50);
        assert_eq!(edge, PixelRect { x: 0, y: 0, width: 100, height: 50 });
    }

    #[test]
    fn test_fuse_multiplies_confidences() {
        let mut candidate =
            DetectionCandidate::new(RoleClass::Date, BoundingBox::new(0.0, 0.0, 10.0, 10.0), 0.8);
        assert_eq!(candidate.combined_confidence, UNRECOGNIZED_PENALTY);
        candidate.fuse("09/2027".to_string(), 0.9);
        assert!((candidate.combined_confidence - 0.72).abs() < 1e-9);
    }

    #[test]
    fn test_low_recognition_drags_score_down() {
        let mut candidate =
            DetectionCandidate::new(RoleClass::Date, BoundingBox::new(0.0, 0.0, 10.0, 10.0), 0.99);
        candidate.fuse("1".to_string(), 0.05);
        assert!(candidate.combined_confidence < CONFIDENCE_FLOOR);
    }

    #[test]
    fn test_role_class_ids() {
        assert_eq!(RoleClass::from_class_id(0), Some(RoleClass::Due));
        assert_eq!(RoleClass::from_class_id(3), Some(RoleClass::Date));
        assert_eq!(RoleClass::from_class_id(4), None);
    }
}
