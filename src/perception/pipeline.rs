/// Perception glue for one step: prepares the image sent to the parser and
/// maps the parser's boxes back into full-screen ratios.
use base64::Engine as _;

use crate::perception::crop::crop_image;
use crate::perception::geometry::remap_to_full;
use crate::perception::types::{CropRegion, ParseOutput, PerceptionContext, Screenshot};

/// Returns the bytes to upload and the crop actually applied.
///
/// If cutting the region fails the full frame is used and the crop is dropped,
/// so boxes are never remapped against a crop that was not applied.
pub fn prepare_upload(shot: &Screenshot, crop: Option<CropRegion>) -> (Vec<u8>, Option<CropRegion>) {
    let Some(region) = crop else {
        return (shot.image_bytes.clone(), None);
    };
    match crop_image(&shot.image_bytes, &region) {
        Ok(bytes) => (bytes, Some(region)),
        Err(e) => {
            tracing::warn!(error = %e, "could not cut crop region, sending full frame");
            (shot.image_bytes.clone(), None)
        }
    }
}

/// Builds the step's perception context with every box in full-frame ratios.
pub fn into_context(shot: &Screenshot, parsed: ParseOutput, crop: Option<CropRegion>) -> PerceptionContext {
    let (w, h) = (shot.meta.physical_width, shot.meta.physical_height);
    let elements = parsed
        .elements
        .into_iter()
        .map(|mut e| {
            e.bbox = remap_to_full(e.bbox, crop.as_ref(), w, h);
            e
        })
        .collect();

    let engine = base64::engine::general_purpose::STANDARD;
    PerceptionContext {
        elements,
        raw_image_base64: engine.encode(&shot.image_bytes),
        labeled_image_base64: parsed.labeled_image.map(|b| engine.encode(b)),
        meta: shot.meta,
        crop,
    }
}
