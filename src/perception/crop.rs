/// Crop pre-pass: ask the model which part of the screen matters for the
/// current task so the parsing service only sees that region.
///
/// Strictly best-effort. Every failure degrades to "use the full screen".
use std::sync::Arc;

use base64::Engine as _;
use serde::Deserialize;

use crate::agent_engine::response::strip_code_fences;
use crate::errors::{VisorError, VisorResult};
use crate::llm::types::{CallConfig, ChatMessage};
use crate::llm::{complete, LlmProvider};
use crate::perception::geometry::ratio_rect_to_pixels;
use crate::perception::types::{CropRegion, Screenshot};

/// Minimum share of each screen dimension a crop must keep.
pub const MIN_CROP_FRACTION: f64 = 0.25;

/// Ratios the model may use before clamping. Anything further out is nonsense.
const RATIO_RANGE: std::ops::RangeInclusive<f64> = -1.0..=2.0;

const CROP_INSTRUCTIONS: &str = "\
You select the region of a screenshot that is relevant to a user's task.
Reply with a single JSON object and nothing else:
{\"use_full_screen\": bool, \"region\": {\"x_ratio\": number, \"y_ratio\": number, \"width_ratio\": number, \"height_ratio\": number}, \"reasoning\": string}
Ratios are fractions (0-1) of the screen width and height; x/y is the top-left corner.
Prefer generous regions. If the relevant content is spread out or you are unsure, set use_full_screen to true.";

#[derive(Debug, Deserialize)]
struct CropDecision {
    #[serde(default)]
    use_full_screen: bool,
    region: Option<RatioRegion>,
    #[serde(default)]
    reasoning: String,
}

#[derive(Debug, Deserialize)]
struct RatioRegion {
    x_ratio: f64,
    y_ratio: f64,
    width_ratio: f64,
    height_ratio: f64,
}

pub struct CropSelector {
    provider: Arc<dyn LlmProvider>,
    cfg: CallConfig,
}

impl CropSelector {
    pub fn new(provider: Arc<dyn LlmProvider>, cfg: CallConfig) -> Self {
        Self { provider, cfg }
    }

    /// Region of interest for `task`, or `None` for the full frame.
    pub async fn select(&self, shot: &Screenshot, task: &str) -> Option<CropRegion> {
        if task.trim().is_empty() {
            return None;
        }
        match self.try_select(shot, task).await {
            Ok(region) => region,
            Err(e) => {
                tracing::warn!(error = %e, "crop pre-pass failed, using full screen");
                None
            }
        }
    }

    async fn try_select(&self, shot: &Screenshot, task: &str) -> VisorResult<Option<CropRegion>> {
        let b64 = base64::engine::general_purpose::STANDARD.encode(&shot.image_bytes);
        let messages = vec![
            ChatMessage::system(CROP_INSTRUCTIONS),
            ChatMessage::user_with_images(format!("Task: {task}"), &[b64]),
        ];
        let completion = complete(self.provider.as_ref(), messages, &self.cfg).await;
        if !completion.success {
            return Err(VisorError::CropHeuristic(
                completion.error.unwrap_or_else(|| "completion failed".into()),
            ));
        }
        let text = completion.response.unwrap_or_default();
        let region = region_from_response(&text, shot.meta.physical_width, shot.meta.physical_height)?;
        tracing::info!(?region, "crop pre-pass decided");
        Ok(region)
    }
}

/// Interprets the model's crop decision for an image of `width`×`height` pixels.
pub fn region_from_response(text: &str, width: u32, height: u32) -> VisorResult<Option<CropRegion>> {
    let cleaned = strip_code_fences(text);
    let decision: CropDecision = serde_json::from_str(&cleaned)
        .map_err(|e| VisorError::CropHeuristic(format!("unparsable crop decision: {e}")))?;
    tracing::debug!(reasoning = %decision.reasoning, full = decision.use_full_screen, "crop decision");

    if decision.use_full_screen {
        return Ok(None);
    }
    let r = decision
        .region
        .ok_or_else(|| VisorError::CropHeuristic("region missing".into()))?;
    let ratios = [r.x_ratio, r.y_ratio, r.width_ratio, r.height_ratio];
    if ratios.iter().any(|v| !v.is_finite() || !RATIO_RANGE.contains(v)) {
        return Err(VisorError::CropHeuristic(format!("ratio out of range: {ratios:?}")));
    }

    let (x, y, w, h) = ratio_rect_to_pixels(r.x_ratio, r.y_ratio, r.width_ratio, r.height_ratio, width, height);
    Ok(clamp_region(x, y, w, h, width, height))
}

/// Clamps a pixel rectangle into the image by shrinking its size, then enforces
/// the minimum-size rule. Returns `None` when the result would be too small.
pub fn clamp_region(x: i64, y: i64, w: i64, h: i64, img_w: u32, img_h: u32) -> Option<CropRegion> {
    let (iw, ih) = (img_w as i64, img_h as i64);
    let cx = x.clamp(0, iw);
    let cy = y.clamp(0, ih);
    // Width/height are measured from the clamped origin, never past the right/bottom edge.
    let right = x.saturating_add(w).min(iw);
    let bottom = y.saturating_add(h).min(ih);
    let cw = right - cx;
    let ch = bottom - cy;

    let min_w = (MIN_CROP_FRACTION * img_w as f64).ceil() as i64;
    let min_h = (MIN_CROP_FRACTION * img_h as f64).ceil() as i64;
    if cw < min_w || ch < min_h || cw <= 0 || ch <= 0 {
        tracing::debug!(cw, ch, min_w, min_h, "crop rejected as too small");
        return None;
    }

    Some(CropRegion {
        x: cx as u32,
        y: cy as u32,
        width: cw as u32,
        height: ch as u32,
    })
}

/// Cuts `region` out of a PNG/JPEG screenshot and re-encodes it as PNG.
pub fn crop_image(src_bytes: &[u8], region: &CropRegion) -> VisorResult<Vec<u8>> {
    let img = image::load_from_memory(src_bytes)
        .map_err(|e| VisorError::CropHeuristic(format!("crop load: {e}")))?;
    if region.x + region.width > img.width() || region.y + region.height > img.height() {
        return Err(VisorError::CropHeuristic("region outside image".into()));
    }
    let cropped = img.crop_imm(region.x, region.y, region.width, region.height);

    let mut png_bytes = Vec::new();
    cropped
        .write_to(&mut std::io::Cursor::new(&mut png_bytes), image::ImageFormat::Png)
        .map_err(|e| VisorError::CropHeuristic(format!("crop PNG encode: {e}")))?;
    Ok(png_bytes)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use async_trait::async_trait;

    use super::*;
    use crate::llm::types::LlmResponse;
    use crate::perception::types::ScreenshotMeta;

    struct CannedProvider(Option<&'static str>);

    #[async_trait]
    impl LlmProvider for CannedProvider {
        fn name(&self) -> &str {
            "canned"
        }

        async fn chat(&self, _messages: Vec<ChatMessage>, _cfg: &CallConfig) -> VisorResult<LlmResponse> {
            match self.0 {
                Some(text) => Ok(LlmResponse {
                    content: text.to_string(),
                    reasoning: String::new(),
                }),
                None => Err(VisorError::LlmInvocation("HTTP 503".into())),
            }
        }
    }

    fn selector(reply: Option<&'static str>) -> CropSelector {
        let cfg = CallConfig {
            model: "crop-model".into(),
            stream: false,
            temperature: 0.1,
        };
        CropSelector::new(Arc::new(CannedProvider(reply)), cfg)
    }

    fn shot(width: u32, height: u32) -> Screenshot {
        let img = image::RgbaImage::from_pixel(width, height, image::Rgba([0, 0, 0, 255]));
        let mut bytes = Vec::new();
        image::DynamicImage::ImageRgba8(img)
            .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        Screenshot {
            path: PathBuf::from("shot.png"),
            image_bytes: bytes,
            meta: ScreenshotMeta {
                physical_width: width,
                physical_height: height,
            },
        }
    }

    fn assert_invariants(r: &CropRegion, w: u32, h: u32) {
        assert!(r.x + r.width <= w, "{r:?}");
        assert!(r.y + r.height <= h, "{r:?}");
        assert!(r.width as f64 >= 0.25 * w as f64, "{r:?}");
        assert!(r.height as f64 >= 0.25 * h as f64, "{r:?}");
    }

    #[test]
    fn ratios_become_pixels() {
        let text = r#"{"use_full_screen":false,"region":{"x_ratio":0.1,"y_ratio":0.2,"width_ratio":0.5,"height_ratio":0.5},"reasoning":"left pane"}"#;
        let r = region_from_response(text, 1000, 800).unwrap().unwrap();
        assert_eq!(r, CropRegion { x: 100, y: 160, width: 500, height: 400 });
    }

    #[test]
    fn full_screen_signal_wins() {
        let text = r#"{"use_full_screen":true,"region":{"x_ratio":0.1,"y_ratio":0.1,"width_ratio":0.5,"height_ratio":0.5}}"#;
        assert_eq!(region_from_response(text, 1000, 800).unwrap(), None);
    }

    #[test]
    fn fenced_response_is_accepted() {
        let text = "```json\n{\"use_full_screen\":false,\"region\":{\"x_ratio\":0,\"y_ratio\":0,\"width_ratio\":0.5,\"height_ratio\":0.5}}\n```";
        assert!(region_from_response(text, 1920, 1080).unwrap().is_some());
    }

    #[test]
    fn too_small_regions_are_rejected() {
        let text = r#"{"use_full_screen":false,"region":{"x_ratio":0.1,"y_ratio":0.1,"width_ratio":0.2,"height_ratio":0.6}}"#;
        assert_eq!(region_from_response(text, 1000, 800).unwrap(), None);
    }

    #[test]
    fn invalid_responses_are_errors() {
        assert!(region_from_response("sure, the top left", 1000, 800).is_err());
        assert!(region_from_response(r#"{"use_full_screen":false}"#, 1000, 800).is_err());
        assert!(region_from_response(r#"{"use_full_screen":false,"region":{"x_ratio":0.1}}"#, 1000, 800).is_err());
    }

    #[test]
    fn overflowing_region_is_shrunk_not_shifted() {
        let r = clamp_region(700, 500, 600, 600, 1000, 800).unwrap();
        assert_eq!(r, CropRegion { x: 700, y: 500, width: 300, height: 300 });
        assert_invariants(&r, 1000, 800);
    }

    #[test]
    fn negative_origin_is_clamped_to_zero() {
        let r = clamp_region(-100, -50, 600, 500, 1000, 800).unwrap();
        assert_eq!(r, CropRegion { x: 0, y: 0, width: 500, height: 450 });
        assert_invariants(&r, 1000, 800);
    }

    #[test]
    fn clamping_that_leaves_too_little_is_rejected() {
        assert_eq!(clamp_region(900, 0, 500, 800, 1000, 800), None);
        assert_eq!(clamp_region(1200, 0, 500, 800, 1000, 800), None);
    }

    #[test]
    fn invariants_hold_over_a_grid_of_inputs() {
        let (w, h) = (1366u32, 768u32);
        let steps = [-0.5, -0.1, 0.0, 0.1, 0.3, 0.5, 0.74, 0.9, 1.0, 1.4];
        for &x in &steps {
            for &y in &steps {
                for &rw in &steps {
                    for &rh in &steps {
                        let (px, py, pw, ph) = ratio_rect_to_pixels(x, y, rw, rh, w, h);
                        if let Some(r) = clamp_region(px, py, pw, ph, w, h) {
                            assert_invariants(&r, w, h);
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn crop_image_cuts_the_region() {
        let img = image::RgbaImage::from_pixel(200, 100, image::Rgba([10, 20, 30, 255]));
        let mut src = Vec::new();
        image::DynamicImage::ImageRgba8(img)
            .write_to(&mut std::io::Cursor::new(&mut src), image::ImageFormat::Png)
            .unwrap();

        let region = CropRegion { x: 50, y: 25, width: 100, height: 50 };
        let out = crop_image(&src, &region).unwrap();
        let cropped = image::load_from_memory(&out).unwrap();
        assert_eq!((cropped.width(), cropped.height()), (100, 50));

        let outside = CropRegion { x: 150, y: 0, width: 100, height: 50 };
        assert!(crop_image(&src, &outside).is_err());
    }

    #[test]
    fn huge_ratios_are_rejected_without_overflow() {
        let text = r#"{"use_full_screen":false,"region":{"x_ratio":1e300,"y_ratio":0.0,"width_ratio":1e300,"height_ratio":0.5}}"#;
        assert!(region_from_response(text, 1000, 800).is_err());
    }

    #[test]
    fn saturated_pixel_rectangles_clamp_to_the_image() {
        assert_eq!(clamp_region(i64::MAX, 0, i64::MAX, 400, 1000, 800), None);
        let r = clamp_region(0, 0, i64::MAX, i64::MAX, 1000, 800).unwrap();
        assert_eq!(r, CropRegion { x: 0, y: 0, width: 1000, height: 800 });
    }

    #[tokio::test]
    async fn select_returns_the_chosen_region() {
        let reply = r#"{"use_full_screen":false,"region":{"x_ratio":0.5,"y_ratio":0.0,"width_ratio":0.5,"height_ratio":0.5},"reasoning":"toolbar"}"#;
        let region = selector(Some(reply)).select(&shot(400, 200), "open settings").await;
        assert_eq!(region, Some(CropRegion { x: 200, y: 0, width: 200, height: 100 }));
    }

    #[tokio::test]
    async fn select_falls_back_to_full_screen_on_failures() {
        let s = shot(400, 200);
        assert_eq!(selector(None).select(&s, "open settings").await, None);
        assert_eq!(selector(Some("the top right corner")).select(&s, "open settings").await, None);
        let huge = r#"{"use_full_screen":false,"region":{"x_ratio":1e300,"y_ratio":0,"width_ratio":1e300,"height_ratio":0.5}}"#;
        assert_eq!(selector(Some(huge)).select(&s, "open settings").await, None);
    }

    #[tokio::test]
    async fn select_skips_blank_tasks() {
        let reply = r#"{"use_full_screen":false,"region":{"x_ratio":0,"y_ratio":0,"width_ratio":0.5,"height_ratio":0.5}}"#;
        assert_eq!(selector(Some(reply)).select(&shot(400, 200), "   ").await, None);
    }
}
