//! Error types of the capture pipeline and the scheduler.
//!
//! [CaptureError] never leaves a tick: the scheduler logs it and keeps going.
//! [SchedulerError] is returned to whoever drives `start`/`stop`, since it means the caller
//! misused the state machine.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to enumerate capture targets")]
    Enumeration(#[source] anyhow::Error),

    #[error("failed to capture target {target}")]
    Capture {
        target: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("provider returned an unusable path {path:?}: {reason}")]
    PathSanitization { path: PathBuf, reason: &'static str },

    #[error("failed to read captured image at {path:?}")]
    Read {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to persist capture to {path:?}")]
    Storage {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },
}

impl CaptureError {
    /// Name of the pipeline step that failed, for log context.
    pub fn step(&self) -> &'static str {
        match self {
            CaptureError::Enumeration(_) => "enumerate",
            CaptureError::Capture { .. } => "capture",
            CaptureError::PathSanitization { .. } => "sanitize",
            CaptureError::Read { .. } => "read",
            CaptureError::Storage { .. } => "persist",
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("capture scheduler is already running")]
    AlreadyRunning,

    #[error("capture scheduler is still finishing its last capture")]
    Stopping,

    #[error("capture interval must be greater than zero")]
    InvalidInterval,

    #[error("capture scheduler must be started from within a tokio runtime")]
    NoRuntime,
}
