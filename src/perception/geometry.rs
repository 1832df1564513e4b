//! Mapping between screen-ratio boxes, crop-relative boxes and screen pixels.

use crate::perception::types::{BBox, CropRegion};

/// Converts a box expressed relative to `crop` into ratios of the full frame.
///
/// `full = (crop_origin + box * crop_size) / full_size`. Identity when `crop` is `None`.
pub fn remap_to_full(bbox: BBox, crop: Option<&CropRegion>, full_w: u32, full_h: u32) -> BBox {
    let Some(c) = crop else {
        return bbox;
    };
    if full_w == 0 || full_h == 0 {
        return bbox;
    }
    let (fw, fh) = (full_w as f64, full_h as f64);
    let (ox, oy) = (c.x as f64, c.y as f64);
    let (cw, ch) = (c.width as f64, c.height as f64);
    [
        (ox + bbox[0] * cw) / fw,
        (oy + bbox[1] * ch) / fh,
        (ox + bbox[2] * cw) / fw,
        (oy + bbox[3] * ch) / fh,
    ]
}

/// Inverse of [`remap_to_full`]: full-frame ratios back into crop-relative ratios.
pub fn remap_to_crop(bbox: BBox, crop: Option<&CropRegion>, full_w: u32, full_h: u32) -> BBox {
    let Some(c) = crop else {
        return bbox;
    };
    if c.width == 0 || c.height == 0 {
        return bbox;
    }
    let (fw, fh) = (full_w as f64, full_h as f64);
    let (ox, oy) = (c.x as f64, c.y as f64);
    let (cw, ch) = (c.width as f64, c.height as f64);
    [
        (bbox[0] * fw - ox) / cw,
        (bbox[1] * fh - oy) / ch,
        (bbox[2] * fw - ox) / cw,
        (bbox[3] * fh - oy) / ch,
    ]
}

/// Centre of a ratio box in absolute screen pixels.
pub fn center_pixels(bbox: BBox, width: u32, height: u32) -> (i32, i32) {
    let cx = (bbox[0] + bbox[2]) / 2.0 * width as f64;
    let cy = (bbox[1] + bbox[3]) / 2.0 * height as f64;
    (cx.round() as i32, cy.round() as i32)
}

/// Ratio rectangle (origin + size) to rounded pixels. Values may be negative or
/// out of range; callers clamp.
pub fn ratio_rect_to_pixels(
    x_ratio: f64,
    y_ratio: f64,
    width_ratio: f64,
    height_ratio: f64,
    width: u32,
    height: u32,
) -> (i64, i64, i64, i64) {
    let (w, h) = (width as f64, height as f64);
    (
        (x_ratio * w).round() as i64,
        (y_ratio * h).round() as i64,
        (width_ratio * w).round() as i64,
        (height_ratio * h).round() as i64,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: BBox, b: BBox) -> bool {
        a.iter().zip(b.iter()).all(|(x, y)| (x - y).abs() < 1e-9)
    }

    #[test]
    fn remap_without_crop_is_identity() {
        let b = [0.1, 0.2, 0.3, 0.4];
        assert_eq!(remap_to_full(b, None, 1920, 1080), b);
        assert_eq!(remap_to_crop(b, None, 1920, 1080), b);
    }

    #[test]
    fn remap_scales_and_offsets_into_full_frame() {
        let crop = CropRegion { x: 500, y: 200, width: 1000, height: 400 };
        let full = remap_to_full([0.0, 0.0, 0.5, 0.5], Some(&crop), 2000, 1000);
        assert!(close(full, [0.25, 0.2, 0.5, 0.4]));
    }

    #[test]
    fn remap_round_trips_through_inverse() {
        let crop = CropRegion { x: 137, y: 91, width: 811, height: 577 };
        let boxes = [
            [0.0, 0.0, 1.0, 1.0],
            [0.12, 0.33, 0.18, 0.41],
            [0.9, 0.05, 0.99, 0.07],
        ];
        for b in boxes {
            let full = remap_to_full(b, Some(&crop), 1366, 768);
            let back = remap_to_crop(full, Some(&crop), 1366, 768);
            assert!(close(b, back), "{b:?} -> {full:?} -> {back:?}");
        }
    }

    #[test]
    fn center_of_box_in_pixels() {
        assert_eq!(center_pixels([0.4, 0.4, 0.5, 0.5], 1000, 800), (450, 360));
        assert_eq!(center_pixels([0.0, 0.0, 1.0, 1.0], 1920, 1080), (960, 540));
    }

    #[test]
    fn ratio_rect_rounds() {
        assert_eq!(
            ratio_rect_to_pixels(0.1, 0.25, 0.5, 0.333, 1000, 800),
            (100, 200, 500, 266)
        );
    }
}
