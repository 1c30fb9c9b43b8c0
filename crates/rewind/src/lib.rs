//! Rewind: live HLS recorder that also recovers the part of a stream that
//! already scrolled out of the playlist window.
//!
//! ## Core Types
//!
//! - [`Mission`] - Records one rendition from entry URL to merged file
//! - [`MissionRunner`] - Runs several missions, one thread and runtime each
//! - [`PlaylistResolver`] - Master/media playlist discovery and polling
//! - [`DownloadEngine`] - Polling loop with bounded concurrent downloads
//!
//! ## Backfill
//!
//! - [`backfill::find_range`] - Boundary search over contiguous ids
//! - [`backfill::GuessSearch`] - Backward walk over sparse ids
//! - [`probe::SequenceProbe`] - Existence check used by both searches
//!
//! ## Output
//!
//! - [`output::MissionLayout`] - Backup folders and the local manifest
//! - [`merge::FfmpegMerger`] - Stream-copy remux of a finished mission
//! - [`logging::MissionLogWriter`] - `backup/<title>.log` next to each backup

pub mod backfill;
pub mod config;
pub mod credentials;
pub mod decryption;
pub mod engine;
pub mod error;
pub mod events;
pub mod fetcher;
pub mod logging;
pub mod manifest;
pub mod merge;
pub mod mission;
pub mod output;
pub mod patch;
pub mod pattern;
pub mod probe;
pub mod proxy;
pub mod resolver;
pub mod retry;
pub mod session;
pub mod status;

pub use config::{DownloaderConfig, MissionConfig};
pub use credentials::{CredentialSource, NoCredentials, StaticCredentials};
pub use engine::{DownloadEngine, DownloadMode};
pub use error::{Result, RewindError};
pub use events::{EventSink, MissionEvent};
pub use mission::{Mission, MissionRunner, MissionSpec};
pub use proxy::{ProxyAuth, ProxyConfig, ProxyType};
pub use resolver::PlaylistResolver;
pub use status::{MissionReport, SegmentState};
