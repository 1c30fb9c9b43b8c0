//! One log file per mission.
//!
//! [`MissionRunner`](crate::MissionRunner) gives every mission its own thread
//! and opens `backup/<title>.log` on it for the mission's lifetime. Events
//! reach that file through [`MissionLogWriter`], used as the writer of a
//! `tracing_subscriber::fmt` layer:
//!
//! ```no_run
//! use rewind_engine::logging::MissionLogWriter;
//! use tracing_subscriber::{filter::filter_fn, fmt, prelude::*};
//!
//! tracing_subscriber::registry()
//!     .with(fmt::layer())
//!     .with(
//!         fmt::layer()
//!             .with_ansi(false)
//!             .with_writer(MissionLogWriter)
//!             .with_filter(filter_fn(|_| MissionLogWriter::is_active())),
//!     )
//!     .init();
//! ```
//!
//! Work moved to the blocking pool runs on other threads and is not captured.

use std::cell::RefCell;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;

use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::MakeWriter;

use crate::{Result, RewindError};

thread_local! {
    static CURRENT: RefCell<Option<Arc<RollingFileAppender>>> = const { RefCell::new(None) };
}

fn current() -> Option<Arc<RollingFileAppender>> {
    CURRENT.with(|slot| slot.borrow().clone())
}

/// Writes to the log file of the mission running on the calling thread;
/// discards output on any other thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct MissionLogWriter;

impl MissionLogWriter {
    /// Whether the calling thread currently has a mission log open.
    pub fn is_active() -> bool {
        CURRENT.with(|slot| slot.borrow().is_some())
    }
}

impl<'a> MakeWriter<'a> for MissionLogWriter {
    type Writer = MissionLog;

    fn make_writer(&'a self) -> Self::Writer {
        MissionLog(current())
    }
}

pub struct MissionLog(Option<Arc<RollingFileAppender>>);

impl Write for MissionLog {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &self.0 {
            Some(file) => file.as_ref().make_writer().write(buf),
            None => Ok(buf.len()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match &self.0 {
            Some(file) => file.as_ref().make_writer().flush(),
            None => Ok(()),
        }
    }
}

/// Keeps a mission log open on the current thread. Dropping it restores
/// whatever was open before.
#[must_use = "the log file is closed when the guard is dropped"]
pub struct MissionLogGuard {
    previous: Option<Arc<RollingFileAppender>>,
}

impl MissionLogGuard {
    /// Open (append to) `path` and route this thread's mission log there.
    pub fn install(path: &Path) -> Result<Self> {
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                RewindError::configuration(format!("invalid log file {}", path.display()))
            })?;
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)?;
        let appender = RollingFileAppender::builder()
            .rotation(Rotation::NEVER)
            .filename_prefix(name)
            .build(dir)
            .map_err(io::Error::other)?;

        let previous = CURRENT.with(|slot| slot.replace(Some(Arc::new(appender))));
        Ok(Self { previous })
    }
}

impl Drop for MissionLogGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT.with(|slot| *slot.borrow_mut() = previous);
    }
}
