use std::{
    path::PathBuf,
    sync::{Arc, Mutex, PoisonError},
};

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::{
    capture::{CaptureOutput, CaptureTarget, ScreenshotProvider},
    error::CaptureError,
    fs::{
        path::{ensure_relative, sanitize_provider_path},
        BaseDirectory, FileSystem,
    },
    utils::{clock::Clock, dir::APPLICATION_DIR_NAME},
};

use super::naming::ArtifactNamer;

/// Where captures end up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageConfig {
    pub base: BaseDirectory,
    /// Relative to `base`. Empty means the base directory itself.
    pub subdirectory: PathBuf,
    pub extension: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base: BaseDirectory::Picture,
            subdirectory: PathBuf::from(APPLICATION_DIR_NAME).join("screenshots"),
            extension: "png".into(),
        }
    }
}

impl StorageConfig {
    /// Rejects settings that would make every tick fail or produce odd file names.
    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.subdirectory.as_os_str().is_empty() {
            ensure_relative(&self.subdirectory).map_err(|reason| {
                anyhow::anyhow!("Invalid screenshot directory {:?}: {reason}", self.subdirectory)
            })?;
        }

        let extension = &self.extension;
        if extension.is_empty()
            || extension.starts_with('.')
            || extension.ends_with('.')
            || extension.contains(['/', '\\', '\0'])
        {
            anyhow::bail!("Invalid screenshot extension {extension:?}");
        }
        Ok(())
    }
}

/// One captured image, held only until it is written out.
#[derive(Debug)]
pub struct CaptureArtifact {
    pub target_id: String,
    pub bytes: Vec<u8>,
    pub captured_at: DateTime<Utc>,
    pub captured_instant: Instant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing to capture. Not an error, monitors may simply be asleep or unplugged.
    NoTargets,
    /// Path of the new file, relative to the storage base directory.
    Persisted(PathBuf),
}

/// The capture-and-persist sequence run on every tick.
pub struct CapturePipeline {
    provider: Arc<dyn ScreenshotProvider>,
    fs: Arc<dyn FileSystem>,
    clock: Arc<dyn Clock>,
    storage: StorageConfig,
    namer: Mutex<ArtifactNamer>,
}

impl CapturePipeline {
    pub fn new(
        provider: Arc<dyn ScreenshotProvider>,
        fs: Arc<dyn FileSystem>,
        clock: Arc<dyn Clock>,
        storage: StorageConfig,
    ) -> Self {
        let namer = Mutex::new(ArtifactNamer::new(storage.extension.clone()));
        Self {
            provider,
            fs,
            clock,
            storage,
            namer,
        }
    }

    pub fn storage(&self) -> &StorageConfig {
        &self.storage
    }

    /// Captures the first enumerated target and writes it to storage.
    #[instrument(skip(self))]
    pub async fn capture_once(&self) -> Result<TickOutcome, CaptureError> {
        let started = self.clock.instant();
        let targets = self
            .provider
            .list_targets()
            .await
            .map_err(CaptureError::Enumeration)?;
        debug!("{} capture targets found", targets.len());

        // Always the first enumerated target, no fallback heuristics.
        let Some(target) = targets.into_iter().next() else {
            warn!("No capture targets found, skipping this tick");
            return Ok(TickOutcome::NoTargets);
        };

        let artifact = self.capture(target).await?;
        debug!(
            "Captured {} bytes from {} in {:?}",
            artifact.bytes.len(),
            artifact.target_id,
            artifact.captured_instant - started
        );

        let path = self.persist(artifact).await?;
        match self.storage.base.resolve() {
            Ok(base) => info!("Screenshot saved at {:?}", base.join(&path)),
            Err(_) => info!("Screenshot saved at {path:?} in {:?}", self.storage.base),
        }
        Ok(TickOutcome::Persisted(path))
    }

    async fn capture(&self, target: CaptureTarget) -> Result<CaptureArtifact, CaptureError> {
        let output = self
            .provider
            .capture_target(&target.id)
            .await
            .map_err(|source| CaptureError::Capture {
                target: target.id.clone(),
                source,
            })?;
        let captured_at = self.clock.time();
        let captured_instant = self.clock.instant();

        let bytes = match output {
            CaptureOutput::Bytes(bytes) => bytes,
            CaptureOutput::Path(raw) => {
                let path = sanitize_provider_path(&raw)?;
                if path != raw {
                    debug!("Sanitized provider path {raw:?} into {path:?}");
                }
                match self.fs.read_bytes(&path).await {
                    Ok(bytes) => bytes,
                    Err(source) => return Err(CaptureError::Read { path, source }),
                }
            }
        };

        Ok(CaptureArtifact {
            target_id: target.id,
            bytes,
            captured_at,
            captured_instant,
        })
    }

    async fn persist(&self, artifact: CaptureArtifact) -> Result<PathBuf, CaptureError> {
        let StorageConfig {
            base, subdirectory, ..
        } = &self.storage;

        if !subdirectory.as_os_str().is_empty() {
            let storage_error = |source| CaptureError::Storage {
                path: subdirectory.clone(),
                source,
            };
            let exists = self
                .fs
                .path_exists(subdirectory, base)
                .await
                .map_err(storage_error)?;
            if !exists {
                info!("Creating screenshot directory {subdirectory:?}");
                self.fs
                    .create_directory(subdirectory, base)
                    .await
                    .map_err(storage_error)?;
            }
        }

        let name = self
            .namer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .next_name(artifact.captured_at);
        let destination = subdirectory.join(name);

        self.fs
            .write_bytes(&destination, &artifact.bytes, base)
            .await
            .map_err(|source| CaptureError::Storage {
                path: destination.clone(),
                source,
            })?;

        Ok(destination)
    }
}
