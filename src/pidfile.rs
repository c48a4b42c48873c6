//! Singleton enforcement via `metasys.pid`: refuse to launch a second
//! supervisor against the same config/log directory, and let `-s`/`-k`
//! find the running instance to signal. Reads the pid, probes
//! liveness with a signal-0 `kill`, and cleans up stale files rather
//! than trusting their mere presence.

use std::fs;
use std::path::{Path, PathBuf};

use nix::sys::signal;
use nix::unistd::Pid;

use crate::error::{Error, Result};

pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn new(log_dir: &Path) -> Self {
        PidFile {
            path: log_dir.join("metasys.pid"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the pid of a still-live instance, if any, cleaning up the
    /// file first when it refers to a dead process.
    pub fn running_pid(&self) -> Option<i32> {
        let pid = read_pid(&self.path)?;
        if is_alive(pid) {
            Some(pid)
        } else {
            let _ = fs::remove_file(&self.path);
            None
        }
    }

    /// Claims the pidfile for `pid`, failing if another live instance
    /// already holds it.
    pub fn claim(&self, pid: i32) -> Result<()> {
        if let Some(existing) = self.running_pid() {
            return Err(Error::AlreadyRunning(existing));
        }
        fs::write(&self.path, pid.to_string()).map_err(|source| Error::Io {
            path: self.path.clone(),
            source,
        })?;
        Ok(())
    }

    pub fn release(&self) {
        let _ = fs::remove_file(&self.path);
    }
}

fn read_pid(path: &Path) -> Option<i32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

fn is_alive(pid: i32) -> bool {
    signal::kill(Pid::from_raw(pid), None).is_ok()
}
