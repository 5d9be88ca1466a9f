//! Wire log for a bridge session.
//!
//! Every raw line crossing the peer boundary is appended to
//! `{log_dir}/{log_id}.log` as `[timestamp] DIRECTION: line`. The file is a
//! diagnostic side channel; failing to open it never fails the bridge.

use std::{
    fs::{File, OpenOptions},
    io::Write,
    path::Path,
    sync::{Arc, Mutex, PoisonError},
};

use chrono::{SecondsFormat, Utc};

/// Direction tag for lines written to the agent's stdin.
pub const STDIN: &str = "STDIN";
/// Direction tag for lines read from the agent's stdout.
pub const STDOUT: &str = "STDOUT";
/// Direction tag for lines read from the agent's stderr.
pub const STDERR: &str = "STDERR";

/// Thread-safe handle to an append-only log file. `None` means logging is off.
pub type LogHandle = Arc<Mutex<Option<File>>>;

fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Write a timestamped line to the log file (if present).
pub fn log_line(handle: &LogHandle, direction: &str, data: &str) {
    let mut guard = handle.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(ref mut file) = *guard {
        let _ = writeln!(file, "[{}] {}: {}", timestamp(), direction, data);
        let _ = file.flush();
    }
}

/// Open (or create) `{log_dir}/{log_id}.log` and return a shared handle.
///
/// A missing `log_dir`, or one that cannot be created, yields a disabled handle.
pub fn open_log_file(log_dir: Option<&Path>, log_id: &str) -> LogHandle {
    let file = log_dir.and_then(|dir| {
        if let Err(err) = std::fs::create_dir_all(dir) {
            log::warn!("Wire log disabled, cannot create {}: {}", dir.display(), err);
            return None;
        }
        let path = dir.join(format!("{}.log", log_id));
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|err| log::warn!("Wire log disabled, cannot open {}: {}", path.display(), err))
            .ok()
    });
    Arc::new(Mutex::new(file))
}

/// Flush and drop the underlying file. Later writes become no-ops.
pub fn close_log(handle: &LogHandle) {
    let mut guard = handle.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(mut file) = guard.take() {
        let _ = file.flush();
    }
}
