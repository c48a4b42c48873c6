//! Shutdown signaling: `SIGINT`/`SIGTERM` flip a `static AtomicBool`
//! from handler context (async-signal-safe); the control loop is the
//! only thing that ever touches the filesystem sentinel or in-memory
//! state.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use nix::sys::signal::{self, SigHandler, Signal};

static SIGNAL_RECEIVED: AtomicBool = AtomicBool::new(false);

extern "C" fn handle_shutdown_signal(_signum: libc::c_int) {
    SIGNAL_RECEIVED.store(true, Ordering::SeqCst);
}

/// Installs handlers for `SIGINT`/`SIGTERM`. Must be called once, from
/// the control loop's own thread, before entering the tick loop.
pub fn install() {
    let handler = SigHandler::Handler(handle_shutdown_signal);
    unsafe {
        let _ = signal::sigaction(
            Signal::SIGINT,
            &nix::sys::signal::SigAction::new(
                handler,
                nix::sys::signal::SaFlags::empty(),
                nix::sys::signal::SigSet::empty(),
            ),
        );
        let _ = signal::sigaction(
            Signal::SIGTERM,
            &nix::sys::signal::SigAction::new(
                handler,
                nix::sys::signal::SaFlags::empty(),
                nix::sys::signal::SigSet::empty(),
            ),
        );
    }
}

/// The sentinel file (`metasys.term`) plus the in-memory flag a signal
/// handler can set without touching the filesystem. `is_set` is the
/// single source of truth the control loop checks at every phase
/// boundary and inside the staged sequencer's inner loops.
#[derive(Debug, Clone)]
pub struct ShutdownFlag {
    sentinel_path: PathBuf,
}

impl ShutdownFlag {
    pub fn new(log_dir: &Path) -> Self {
        ShutdownFlag {
            sentinel_path: log_dir.join("metasys.term"),
        }
    }

    pub fn sentinel_path(&self) -> &Path {
        &self.sentinel_path
    }

    /// True if a signal handler fired, or something else (e.g. a `-s`
    /// invocation of this binary) created the sentinel file directly.
    pub fn is_set(&self) -> bool {
        SIGNAL_RECEIVED.load(Ordering::SeqCst) || self.sentinel_path.exists()
    }

    /// Materializes the sentinel file if a signal was received but the
    /// file doesn't exist yet. Called by the control loop, never by
    /// the handler itself.
    pub fn sync_to_disk(&self) {
        if SIGNAL_RECEIVED.load(Ordering::SeqCst) && !self.sentinel_path.exists() {
            let _ = std::fs::write(&self.sentinel_path, b"");
        }
    }

    pub fn clear(&self) {
        SIGNAL_RECEIVED.store(false, Ordering::SeqCst);
        let _ = std::fs::remove_file(&self.sentinel_path);
    }

    /// Used by tests and by the `-s`/`-k` CLI path to request shutdown
    /// of *another* running instance without going through signals.
    pub fn request(&self) -> std::io::Result<()> {
        std::fs::write(&self.sentinel_path, b"")
    }
}
