//! Contains the abstraction over platform screen capture.
//! [GenericScreenshotProvider] is the main artifact of this module that picks the backend
//! enabled at compile time.

#[cfg(feature = "xcap")]
pub mod xcap;

use std::path::PathBuf;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

/// Informational position and size of a display in the virtual desktop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DisplayBounds {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

/// A display that can be captured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CaptureTarget {
    /// Provider defined identifier. Only meaningful to the provider that enumerated it.
    pub id: String,
    /// Human readable name, for example 'DP-1' or '\\.\DISPLAY1'
    pub name: Option<String>,
    pub bounds: Option<DisplayBounds>,
    pub primary: bool,
}

impl CaptureTarget {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            bounds: None,
            primary: false,
        }
    }
}

/// What a provider hands back for one capture. Some backends encode the image in memory,
/// others drop it into a scratch file and return its location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutput {
    Bytes(Vec<u8>),
    Path(PathBuf),
}

/// Intended to serve as a contract every capture backend must implement. Targets are listed
/// anew before every capture, as monitors come and go.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ScreenshotProvider: Send + Sync {
    async fn list_targets(&self) -> Result<Vec<CaptureTarget>>;

    async fn capture_target(&self, id: &str) -> Result<CaptureOutput>;
}

/// Serves as a cross-compatible [ScreenshotProvider] implementation.
pub struct GenericScreenshotProvider {
    inner: Box<dyn ScreenshotProvider>,
}

impl GenericScreenshotProvider {
    pub fn new() -> Result<Self> {
        cfg_if::cfg_if! {
            if #[cfg(feature = "xcap")] {
                use self::xcap::XcapScreenshotProvider;
                Ok(Self {
                    inner: Box::new(XcapScreenshotProvider::new()),
                })
            } else {
                // Lets the crate build and test on machines without a capture backend.
                Err(anyhow::anyhow!(
                    "No screenshot backend was compiled in. Rebuild with `--features xcap`"
                ))
            }
        }
    }
}

#[async_trait]
impl ScreenshotProvider for GenericScreenshotProvider {
    async fn list_targets(&self) -> Result<Vec<CaptureTarget>> {
        self.inner.list_targets().await
    }

    async fn capture_target(&self, id: &str) -> Result<CaptureOutput> {
        self.inner.capture_target(id).await
    }
}
