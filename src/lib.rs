//! Periodic screen capture for the trackono dashboard.
//! A [scheduler::CaptureScheduler] captures the first display on a fixed period and writes each
//! image under a per-user directory, one capture at a time.
//!

pub mod capture;
pub mod cli;
pub mod error;
pub mod fs;
pub mod scheduler;
pub mod utils;
