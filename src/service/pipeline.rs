use crate::capability::imaging::crop;
use crate::capability::{Capabilities, CapabilityError, RegionDetector, TextRecognizer};
use crate::error::AppError;
use crate::models::{
    BoundingBox, CropRect, DetectionCandidate, DetectorStatus, DisplaySize, PixelRect,
    Recognition, RoleClass, ScanDiagnostics, ScanPath, ScanResult, CONFIDENCE_FLOOR, CROP_MARGIN,
};
use image::DynamicImage;
use serde::Serialize;
use std::panic::{self, AssertUnwindSafe};

/// 区域检测阶段的结果
#[derive(Debug)]
enum DetectionOutcome {
    /// 按检测置信度降序, 框已裁剪到图像内
    Regions(Vec<DetectionCandidate>),
    Unavailable(String),
    Empty,
}

/// 仅做区域检测 (不识别) 的结果
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionReport {
    pub success: bool,
    pub message: String,
    pub region_count: usize,
    pub best_date: Option<DetectionCandidate>,
    pub candidates: Vec<DetectionCandidate>,
    pub image_info: ImageInfo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ImageInfo {
    pub width: u32,
    pub height: u32,
}

/// 日期检测流水线: 区域检测 -> 裁剪 -> 文字识别, 失败时退回手动框路径
pub struct DetectionPipeline {
    capabilities: Capabilities,
}

impl DetectionPipeline {
    pub fn new(capabilities: Capabilities) -> Self {
        Self { capabilities }
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    /// 释放模型句柄; 之后的扫描按识别器未加载处理
    pub fn shutdown(&mut self) {
        self.capabilities.shutdown();
    }

    /// 扫描一张图片
    ///
    /// 识别器未加载时直接拒绝 (ServiceUnavailable); 其余能力故障都降级为手动路径,
    /// 最终读数不满足置信度下限时返回 `success=false`。
    pub fn scan(
        &self,
        image: &DynamicImage,
        use_auto_detection: bool,
        manual_crop: Option<CropRect>,
        display_size: Option<DisplaySize>,
    ) -> Result<ScanResult, AppError> {
        let recognizer = self.capabilities.recognizer().ok_or_else(|| {
            AppError::ServiceUnavailable("text recognizer is not loaded".to_string())
        })?;

        let (width, height) = (image.width(), image.height());
        let mut diagnostics = ScanDiagnostics::new(use_auto_detection, width, height);

        let mut reading = None;
        if use_auto_detection {
            reading = self.auto_path(image, recognizer.as_ref(), &mut diagnostics);
        }

        let reading = match reading {
            Some(reading) => reading,
            None => manual_path(
                image,
                recognizer.as_ref(),
                manual_crop,
                display_size,
                &mut diagnostics,
            ),
        };

        tracing::info!(
            "Scan finished: path={:?}, detector={:?}, regions={}, confidence={:.3}",
            diagnostics.path,
            diagnostics.detector_status,
            diagnostics.region_count,
            reading.confidence
        );

        // 两条路径共用同一个下限
        if reading.is_empty() || reading.confidence < CONFIDENCE_FLOOR {
            return Ok(ScanResult {
                predicted_text: String::new(),
                confidence: 0.0,
                success: false,
                message: "no usable date could be read from the image".to_string(),
                diagnostics,
            });
        }

        Ok(ScanResult {
            predicted_text: reading.text.trim().to_string(),
            confidence: reading.confidence,
            success: true,
            message: "date detected".to_string(),
            diagnostics,
        })
    }

    /// 只做区域检测, 框按裁剪时的外扩范围给出
    pub fn detect_regions(&self, image: &DynamicImage) -> RegionReport {
        let (width, height) = (image.width(), image.height());
        let mut report = RegionReport {
            success: false,
            message: String::new(),
            region_count: 0,
            best_date: None,
            candidates: Vec::new(),
            image_info: ImageInfo { width, height },
        };

        match self.run_detector(image) {
            DetectionOutcome::Unavailable(message) => report.message = message,
            DetectionOutcome::Empty => report.message = "no date regions detected".to_string(),
            DetectionOutcome::Regions(candidates) => {
                let candidates: Vec<DetectionCandidate> = candidates
                    .into_iter()
                    .map(|mut c| {
                        let rect = c.bounding_box.expand_to_rect(CROP_MARGIN, width, height);
                        c.bounding_box = BoundingBox::new(
                            rect.x as f64,
                            rect.y as f64,
                            (rect.x + rect.width) as f64,
                            (rect.y + rect.height) as f64,
                        );
                        c
                    })
                    .collect();

                report.success = true;
                report.message = format!("detected {} regions", candidates.len());
                report.region_count = candidates.len();
                report.best_date = select_date_region(&candidates).map(|i| candidates[i].clone());
                report.candidates = candidates;
            }
        }

        report
    }

    /// 自动路径; 返回 None 表示需要走手动路径
    fn auto_path(
        &self,
        image: &DynamicImage,
        recognizer: &dyn TextRecognizer,
        diagnostics: &mut ScanDiagnostics,
    ) -> Option<Recognition> {
        let mut candidates = match self.run_detector(image) {
            DetectionOutcome::Unavailable(message) => {
                tracing::warn!(
                    "Region detector unavailable, falling back to manual path: {}",
                    message
                );
                diagnostics.detector_status = DetectorStatus::Unavailable;
                diagnostics.detector_message = Some(message);
                return None;
            }
            DetectionOutcome::Empty => {
                tracing::info!("Region detector found nothing, falling back to manual path");
                diagnostics.detector_status = DetectorStatus::Empty;
                return None;
            }
            DetectionOutcome::Regions(candidates) => candidates,
        };

        diagnostics.region_count = candidates.len();
        // 已按检测置信度排序, 第一个即全局最优 (不论类别)
        diagnostics.best_candidate = candidates.first().cloned();

        let Some(chosen) = select_date_region(&candidates) else {
            tracing::info!(
                "No date/due region among {} candidates, falling back to manual path",
                candidates.len()
            );
            diagnostics.detector_status = DetectorStatus::NoDateRegion;
            diagnostics.candidates = candidates;
            return None;
        };

        let (width, height) = (image.width(), image.height());
        let rect = candidates[chosen].bounding_box.expand_to_rect(CROP_MARGIN, width, height);
        diagnostics.chosen_box = Some(candidates[chosen].bounding_box);
        diagnostics.chosen_crop = Some(rect);

        if !rect.is_empty() {
            let recognition = recognize_guarded(recognizer, &crop(image, rect));
            candidates[chosen].fuse(recognition.text, recognition.confidence);
        }

        let candidate = &candidates[chosen];
        let reading = Recognition::new(
            candidate.recognized_text.clone().unwrap_or_default(),
            candidate.combined_confidence,
        );
        diagnostics.auto_confidence = Some(reading.confidence);
        diagnostics.candidates = candidates;

        if reading.is_empty() || reading.confidence < CONFIDENCE_FLOOR {
            tracing::info!(
                "Auto path below floor (combined={:.3}), falling back to manual path",
                reading.confidence
            );
            diagnostics.detector_status = DetectorStatus::BelowFloor;
            return None;
        }

        diagnostics.detector_status = DetectorStatus::Accepted;
        diagnostics.path = ScanPath::Auto;
        Some(reading)
    }

    /// 调用检测器并归一化结果; 检测器的任何故障都在这里转成标签
    fn run_detector(&self, image: &DynamicImage) -> DetectionOutcome {
        let Some(detector) = self.capabilities.detector() else {
            return DetectionOutcome::Unavailable("region detector is not loaded".to_string());
        };

        let raw = match detect_guarded(detector.as_ref(), image) {
            Ok(raw) => raw,
            Err(CapabilityError::Unavailable(message)) => {
                return DetectionOutcome::Unavailable(message);
            }
            Err(CapabilityError::Failed(message)) => {
                tracing::warn!("Region detector call failed: {}", message);
                return DetectionOutcome::Unavailable(format!("detector failed: {}", message));
            }
        };

        let (width, height) = (image.width(), image.height());
        let mut candidates: Vec<DetectionCandidate> = raw
            .into_iter()
            .filter_map(|mut c| {
                c.bounding_box = c.bounding_box.clamp_to(width, height)?;
                Some(c)
            })
            .collect();

        if candidates.is_empty() {
            return DetectionOutcome::Empty;
        }

        candidates.sort_by(|a, b| {
            b.detection_confidence
                .partial_cmp(&a.detection_confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        DetectionOutcome::Regions(candidates)
    }
}

/// 选择日期区域: 置信度最高的 date 类, 没有则取 due 类 (候选已按置信度降序)
fn select_date_region(candidates: &[DetectionCandidate]) -> Option<usize> {
    candidates
        .iter()
        .position(|c| c.role_class == RoleClass::Date)
        .or_else(|| candidates.iter().position(|c| c.role_class == RoleClass::Due))
}

/// 手动路径: 有扫描框和显示尺寸时换算裁剪, 否则用整张图
fn manual_path(
    image: &DynamicImage,
    recognizer: &dyn TextRecognizer,
    manual_crop: Option<CropRect>,
    display_size: Option<DisplaySize>,
    diagnostics: &mut ScanDiagnostics,
) -> Recognition {
    diagnostics.path = ScanPath::Manual;

    let rect = match (manual_crop, display_size) {
        (Some(rect), Some(display)) => {
            scale_manual_rect(rect, display, image.width(), image.height())
        }
        _ => None,
    };
    diagnostics.manual_crop = rect;

    let recognition = match rect {
        Some(rect) => recognize_guarded(recognizer, &crop(image, rect)),
        None => recognize_guarded(recognizer, image),
    };
    diagnostics.manual_confidence = Some(recognition.confidence);
    recognition
}

/// 显示坐标 -> 图像像素坐标, x / y 各自按 图像尺寸 / 显示尺寸 缩放并限制在图像内
fn scale_manual_rect(
    rect: CropRect,
    display: DisplaySize,
    width: u32,
    height: u32,
) -> Option<PixelRect> {
    if display.width <= 0.0 || display.height <= 0.0 || width == 0 || height == 0 {
        return None;
    }

    let scale_x = width as f64 / display.width;
    let scale_y = height as f64 / display.height;

    let x = ((rect.x * scale_x) as i64).clamp(0, width as i64 - 1);
    let y = ((rect.y * scale_y) as i64).clamp(0, height as i64 - 1);
    let w = ((rect.width * scale_x) as i64).min(width as i64 - x);
    let h = ((rect.height * scale_y) as i64).min(height as i64 - y);

    if w <= 0 || h <= 0 {
        return None;
    }

    Some(PixelRect {
        x: x as u32,
        y: y as u32,
        width: w as u32,
        height: h as u32,
    })
}

fn detect_guarded(
    detector: &dyn RegionDetector,
    image: &DynamicImage,
) -> Result<Vec<DetectionCandidate>, CapabilityError> {
    panic::catch_unwind(AssertUnwindSafe(|| detector.detect(image)))
        .unwrap_or_else(|_| Err(CapabilityError::Failed("region detector panicked".to_string())))
}

fn recognize_guarded(recognizer: &dyn TextRecognizer, image: &DynamicImage) -> Recognition {
    panic::catch_unwind(AssertUnwindSafe(|| recognizer.recognize(image))).unwrap_or_else(|_| {
        tracing::warn!("Text recognizer panicked, treating as empty reading");
        Recognition::empty()
    })
}
