//! Deferred removal of temporary artifacts
//!
//! Extraction scratch directories and exported archives are often handed to
//! another process before they can go. [`schedule_removal`] deletes them after
//! a delay on a background thread; the returned handle can cancel the removal
//! or wait for it.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// What happened to a scheduled removal
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupOutcome {
    Removed,
    /// The target was gone before the timer fired
    AlreadyAbsent,
    Cancelled,
    Failed(String),
}

#[derive(Default)]
struct Signal {
    cancelled: Mutex<bool>,
    wake: Condvar,
}

/// Handle to a pending removal
pub struct CleanupHandle {
    path: PathBuf,
    signal: Arc<Signal>,
    thread: Option<JoinHandle<CleanupOutcome>>,
}

impl CleanupHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stop the removal if the delay has not elapsed yet
    pub fn cancel(&self) {
        let mut cancelled = self
            .signal
            .cancelled
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *cancelled = true;
        self.signal.wake.notify_all();
    }

    /// Block until the timer has fired or been cancelled
    pub fn wait(mut self) -> CleanupOutcome {
        match self.thread.take().map(JoinHandle::join) {
            Some(Ok(outcome)) => outcome,
            Some(Err(_)) => CleanupOutcome::Failed("cleanup thread panicked".to_string()),
            None => CleanupOutcome::Cancelled,
        }
    }
}

/// Remove `path` (file or directory tree) once `delay` has elapsed
///
/// Dropping the handle detaches the timer; the removal still happens.
pub fn schedule_removal<P: Into<PathBuf>>(path: P, delay: Duration) -> CleanupHandle {
    let path = path.into();
    let signal = Arc::new(Signal::default());

    let thread = {
        let path = path.clone();
        let signal = Arc::clone(&signal);
        thread::spawn(move || {
            let guard = signal
                .cancelled
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let (guard, _) = signal
                .wake
                .wait_timeout_while(guard, delay, |cancelled| !*cancelled)
                .unwrap_or_else(PoisonError::into_inner);
            let cancelled = *guard;
            drop(guard);

            if cancelled {
                debug!("cleanup of {} cancelled", path.display());
                return CleanupOutcome::Cancelled;
            }
            remove_path(&path)
        })
    };

    debug!("scheduled removal of {} in {:?}", path.display(), delay);
    CleanupHandle {
        path,
        signal,
        thread: Some(thread),
    }
}

/// Remove a file or directory tree now; a missing target is not an error
pub fn remove_path(path: &Path) -> CleanupOutcome {
    let result = match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(e) => Err(e),
    };

    match result {
        Ok(()) => {
            info!("removed {}", path.display());
            CleanupOutcome::Removed
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => CleanupOutcome::AlreadyAbsent,
        Err(e) => {
            warn!("could not remove {}: {}", path.display(), e);
            CleanupOutcome::Failed(e.to_string())
        }
    }
}
