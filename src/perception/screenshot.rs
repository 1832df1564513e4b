use std::path::PathBuf;

use async_trait::async_trait;

use crate::errors::{VisorError, VisorResult};
use crate::perception::traits::ScreenCapture;
use crate::perception::types::{Screenshot, ScreenshotMeta};

const FILE_PREFIX: &str = "screenshot-";

/// Captures the first monitor with xcap and stores each frame as a PNG in `dir`.
pub struct XcapCapture {
    dir: PathBuf,
}

impl XcapCapture {
    pub fn new(dir: PathBuf) -> VisorResult<Self> {
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }
}

#[async_trait]
impl ScreenCapture for XcapCapture {
    async fn capture(&self) -> VisorResult<Screenshot> {
        let path = self.dir.join(unique_file_name());
        let target = path.clone();
        let (image_bytes, meta) = tokio::task::spawn_blocking(move || capture_primary_png(&target))
            .await
            .map_err(|e| VisorError::Capture(format!("join: {e}")))??;

        tracing::info!(
            path = %path.display(),
            phys = %format!("{}×{}", meta.physical_width, meta.physical_height),
            "screenshot captured"
        );
        Ok(Screenshot { path, image_bytes, meta })
    }

    async fn purge(&self) -> VisorResult<usize> {
        let mut removed = 0;
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with(FILE_PREFIX) && name.ends_with(".png") {
                tokio::fs::remove_file(entry.path()).await?;
                removed += 1;
            }
        }
        tracing::debug!(removed, dir = %self.dir.display(), "screenshots purged");
        Ok(removed)
    }
}

fn unique_file_name() -> String {
    let ts = chrono::Utc::now().format("%Y-%m-%dT%H-%M-%S-%3fZ");
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("{FILE_PREFIX}{ts}-{}.png", &id[..8])
}

fn capture_primary_png(path: &std::path::Path) -> VisorResult<(Vec<u8>, ScreenshotMeta)> {
    let monitors = xcap::Monitor::all().map_err(|e| VisorError::Capture(e.to_string()))?;
    let monitor = monitors
        .into_iter()
        .next()
        .ok_or_else(|| VisorError::Capture("no monitor found".into()))?;
    let frame = monitor
        .capture_image()
        .map_err(|e| VisorError::Capture(e.to_string()))?;

    let (width, height) = (frame.width(), frame.height());
    let rgba = image::RgbaImage::from_raw(width, height, frame.into_raw())
        .ok_or_else(|| VisorError::Capture("frame buffer size mismatch".into()))?;

    let mut png = Vec::new();
    image::DynamicImage::ImageRgba8(rgba)
        .write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
        .map_err(|e| VisorError::Capture(format!("PNG encode: {e}")))?;
    std::fs::write(path, &png).map_err(|e| VisorError::Capture(format!("write {}: {e}", path.display())))?;

    Ok((
        png,
        ScreenshotMeta {
            physical_width: width,
            physical_height: height,
        },
    ))
}
