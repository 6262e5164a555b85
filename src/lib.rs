//! Core pipeline of a folder-based HDRI browser.
//!
//! Scans a directory of EXR/HDR images, decodes them on a bounded worker
//! pool, downsamples each into a small tone-mapped preview, and caches the
//! results for a UI grid. The consumer stays single-threaded: completed
//! thumbnails queue up until it pumps [`ScanEngine::pump`] at its own
//! cadence, so workers never touch UI state.
//!
//! Window, grid and host-integration code live in the host application.
//! This crate exposes only the scanning/caching pipeline plus the narrow
//! [`host::EnvironmentLightSink`] seam the UI uses to apply a picked image
//! as an environment light.

pub mod cache;
pub mod config;
pub mod decode;
pub mod error;
pub mod host;
pub mod models;
pub mod scanner;
pub mod scheduler;
pub mod thumbnail;
pub mod timing;

pub use cache::ThumbnailCache;
pub use config::Config;
pub use error::{Error, Result};
pub use host::{apply_environment, resolve_source_path, EnvironmentLightSink};
pub use models::{ChannelLayout, DecodedImage, ImageFileRef, Thumbnail};
pub use scanner::{ScanEngine, ScanProgress, ScanSession, ScanStatus, ThumbnailCallback};
pub use scheduler::{JobHandle, JobOutcome, JobState, Scheduler};
pub use timing::{ConsoleTimer, JobTimer};
