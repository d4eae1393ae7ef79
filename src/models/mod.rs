pub mod detection;
pub mod line;
pub mod scan;

pub use detection::{
    BoundingBox, DetectionCandidate, PixelRect, RoleClass, CONFIDENCE_FLOOR, CROP_MARGIN,
    UNRECOGNIZED_PENALTY,
};
pub use line::{InventoryLine, LineKey, ProductMetadata};
pub use scan::{
    CropRect, DetectorStatus, DisplaySize, Recognition, ScanDiagnostics, ScanPath, ScanResult,
};
