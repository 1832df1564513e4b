use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Bounding box `[x1, y1, x2, y2]` as ratios of the image it was detected on.
pub type BBox = [f64; 4];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementKind {
    Text,
    Icon,
    #[serde(other)]
    Other,
}

impl ElementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ElementKind::Text => "text",
            ElementKind::Icon => "icon",
            ElementKind::Other => "other",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UIElement {
    /// Position in the parse result; matches the number drawn on the labeled overlay.
    pub index: usize,
    pub kind: ElementKind,
    pub content: String,
    pub interactive: bool,
    pub bbox: BBox,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenshotMeta {
    pub physical_width: u32,
    pub physical_height: u32,
}

pub struct Screenshot {
    pub path: PathBuf,
    /// PNG-encoded capture.
    pub image_bytes: Vec<u8>,
    pub meta: ScreenshotMeta,
}

/// Region of interest in source-image pixels. `None` at use sites means full frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// What the parsing service returns for one image.
#[derive(Debug, Clone, Default)]
pub struct ParseOutput {
    pub elements: Vec<UIElement>,
    /// PNG overlay with element numbers drawn on it.
    pub labeled_image: Option<Vec<u8>>,
}

/// Everything the rest of a step needs from perception, in full-frame coordinates.
#[derive(Debug, Clone)]
pub struct PerceptionContext {
    pub elements: Vec<UIElement>,
    pub raw_image_base64: String,
    pub labeled_image_base64: Option<String>,
    pub meta: ScreenshotMeta,
    pub crop: Option<CropRegion>,
}
