use async_trait::async_trait;

use crate::errors::VisorResult;
use crate::perception::types::{CropRegion, ParseOutput, Screenshot};

/// Produces a uniquely named screenshot per call.
#[async_trait]
pub trait ScreenCapture: Send + Sync {
    async fn capture(&self) -> VisorResult<Screenshot>;

    /// Deletes old capture files. Returns how many were removed.
    async fn purge(&self) -> VisorResult<usize>;
}

/// Remote UI-element detection. Boxes come back relative to the uploaded image.
#[async_trait]
pub trait UiParser: Send + Sync {
    async fn parse(&self, image_bytes: &[u8], crop_hint: Option<&CropRegion>) -> VisorResult<ParseOutput>;
}
