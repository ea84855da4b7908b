use std::io::Cursor;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use tracing::instrument;
use ::xcap::Monitor;

use super::{CaptureOutput, CaptureTarget, DisplayBounds, ScreenshotProvider};

fn describe(monitor: &Monitor) -> CaptureTarget {
    CaptureTarget {
        id: monitor.id().to_string(),
        name: Some(monitor.name().to_string()),
        bounds: Some(DisplayBounds {
            x: monitor.x(),
            y: monitor.y(),
            width: monitor.width(),
            height: monitor.height(),
        }),
        primary: monitor.is_primary(),
    }
}

fn capture_png(id: &str) -> Result<Vec<u8>> {
    let monitor = Monitor::all()?
        .into_iter()
        .find(|monitor| monitor.id().to_string() == id)
        .ok_or_else(|| anyhow!("Monitor {id} is no longer connected"))?;

    let frame = monitor.capture_image()?;
    let mut buffer = Vec::new();
    frame
        .write_to(&mut Cursor::new(&mut buffer), image::ImageFormat::Png)
        .context("Failed to encode capture as png")?;
    Ok(buffer)
}

/// Monitor capture through xcap. Platform calls block, so they run on the blocking pool.
#[derive(Default)]
pub struct XcapScreenshotProvider;

impl XcapScreenshotProvider {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ScreenshotProvider for XcapScreenshotProvider {
    #[instrument(skip(self))]
    async fn list_targets(&self) -> Result<Vec<CaptureTarget>> {
        tokio::task::spawn_blocking(|| -> Result<Vec<CaptureTarget>> {
            Ok(Monitor::all()?.iter().map(describe).collect())
        })
        .await?
    }

    #[instrument(skip(self))]
    async fn capture_target(&self, id: &str) -> Result<CaptureOutput> {
        let id = id.to_string();
        let bytes = tokio::task::spawn_blocking(move || capture_png(&id)).await??;
        Ok(CaptureOutput::Bytes(bytes))
    }
}
