// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Process-wide execution lock
//!
//! At most one mutating run at a time per run directory.  The lock is a
//! file created with `O_EXCL`; its contents identify the holder so a
//! contending operator knows who to go ask.  A stale file (e.g. after a
//! crash) is surfaced in the contention message rather than silently
//! stolen.

use camino::Utf8Path;
use camino::Utf8PathBuf;
use chrono::DateTime;
use chrono::Utc;
use sdcadm_common::SdcadmError;
use serde::Deserialize;
use serde::Serialize;
use slog::debug;
use slog::warn;
use slog::Logger;

/// Identity of the lock holder, serialized into the lock file
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct LockInfo {
    pub owner: String,
    pub pid: u32,
    pub hostname: String,
    pub acquired: DateTime<Utc>,
}

/// Holds the execution lock until released
///
/// [`LockGuard::release`] is the normal path; `Drop` is the backstop for
/// error returns and panics, so the lock is removed exactly once on every
/// path.
#[derive(Debug)]
pub struct LockGuard {
    path: Utf8PathBuf,
    log: Logger,
    released: bool,
}

impl LockGuard {
    /// Removes the lock file.  Errors here are reported; the run itself has
    /// already succeeded or failed on its own terms.
    pub fn release(mut self) -> Result<(), SdcadmError> {
        self.released = true;
        std::fs::remove_file(&self.path).map_err(|e| {
            SdcadmError::internal(format!(
                "releasing lock {}: {}",
                self.path, e
            ))
        })?;
        debug!(self.log, "lock released"; "path" => %self.path);
        Ok(())
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if !self.released {
            if let Err(e) = std::fs::remove_file(&self.path) {
                warn!(self.log, "failed to remove lock file on drop";
                    "path" => %self.path,
                    "error" => %e,
                );
            }
            self.released = true;
        }
    }
}

/// Acquires the execution lock, failing immediately (no blocking, no
/// queueing) if another run holds it.
pub fn acquire(
    path: &Utf8Path,
    owner: &str,
    log: &Logger,
) -> Result<LockGuard, SdcadmError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            SdcadmError::internal(format!(
                "creating lock directory {}: {}",
                parent, e
            ))
        })?;
    }

    let info = LockInfo {
        owner: owner.to_string(),
        pid: std::process::id(),
        hostname: gethostname::gethostname().to_string_lossy().into_owned(),
        acquired: Utc::now(),
    };

    // create_new is the atomicity guarantee: exactly one contender sees
    // success.
    let file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path);
    match file {
        Ok(file) => {
            serde_json::to_writer_pretty(&file, &info).map_err(|e| {
                SdcadmError::internal(format!(
                    "writing lock file {}: {}",
                    path, e
                ))
            })?;
            debug!(log, "lock acquired";
                "path" => %path,
                "owner" => &info.owner,
            );
            Ok(LockGuard {
                path: path.to_path_buf(),
                log: log.clone(),
                released: false,
            })
        }
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            Err(SdcadmError::update(contention_message(path)))
        }
        Err(e) => Err(SdcadmError::internal(format!(
            "creating lock file {}: {}",
            path, e
        ))),
    }
}

fn contention_message(path: &Utf8Path) -> String {
    match std::fs::read_to_string(path)
        .ok()
        .and_then(|s| serde_json::from_str::<LockInfo>(&s).ok())
    {
        Some(info) => format!(
            "another operation is in progress: lock {} held by {} \
             (pid {} on {}) since {}",
            path, info.owner, info.pid, info.hostname, info.acquired
        ),
        None => format!(
            "another operation is in progress: lock {} exists but could \
             not be read; remove it manually if no run is active",
            path
        ),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use camino_tempfile::Utf8TempDir;

    fn test_logger() -> Logger {
        use slog::Drain;
        let decorator =
            slog_term::PlainDecorator::new(slog_term::TestStdoutWriter);
        let drain =
            std::sync::Mutex::new(slog_term::FullFormat::new(decorator).build())
                .fuse();
        Logger::root(drain, slog::o!())
    }

    #[test]
    fn test_second_acquire_fails_and_names_holder() {
        let dir = Utf8TempDir::new().unwrap();
        let path = dir.path().join("sdcadm.lock");
        let log = test_logger();

        let guard = acquire(&path, "alice", &log).unwrap();
        let error = acquire(&path, "bob", &log).unwrap_err();
        let message = error.to_string();
        assert!(message.contains("another operation is in progress"));
        assert!(message.contains("alice"));

        guard.release().unwrap();
        let guard = acquire(&path, "bob", &log).unwrap();
        guard.release().unwrap();
    }

    #[test]
    fn test_drop_releases_lock() {
        let dir = Utf8TempDir::new().unwrap();
        let path = dir.path().join("sdcadm.lock");
        let log = test_logger();

        {
            let _guard = acquire(&path, "alice", &log).unwrap();
            assert!(path.exists());
        }
        assert!(!path.exists());
        // dropping released it once; a fresh acquire works
        let guard = acquire(&path, "alice", &log).unwrap();
        guard.release().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_unreadable_lock_file_still_blocks() {
        let dir = Utf8TempDir::new().unwrap();
        let path = dir.path().join("sdcadm.lock");
        std::fs::write(&path, "not json").unwrap();

        let error = acquire(&path, "alice", &test_logger()).unwrap_err();
        assert!(error.to_string().contains("could not be read"));
    }
}
