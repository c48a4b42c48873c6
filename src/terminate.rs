//! The termination primitive: polite TERM, poll, escalate to KILL,
//! poll again, give up and log a potential zombie.
//!
//! Exit-status decoding deliberately reproduces a non-conventional
//! core-dump bitmask (`& 0x80` against the low byte of the raw wait
//! status, the same bit Perl's `$?` exposes) rather than the portable
//! `libc::WCOREDUMP` macro.

use std::thread;
use std::time::Duration;

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;

use crate::error::{Result, TerminateError};
use crate::signals::ShutdownFlag;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitReport {
    pub exit_value: i32,
    pub term_signal: Option<i32>,
    pub core_dumped: bool,
}

/// Decodes a raw `wait(2)` status the same way Perl's `$?` would.
pub fn classify_status(raw: i32) -> ExitReport {
    let low_byte = raw & 0x7f;
    let core_dumped = raw & 0x80 != 0;
    if low_byte == 0 {
        ExitReport {
            exit_value: (raw >> 8) & 0xff,
            term_signal: None,
            core_dumped,
        }
    } else {
        ExitReport {
            exit_value: 0,
            term_signal: Some(low_byte),
            core_dumped,
        }
    }
}

/// Non-blocking reap of `pid`. `Ok(None)` means still running.
pub fn try_reap(pid: i32) -> std::io::Result<Option<ExitReport>> {
    let mut status: libc::c_int = 0;
    let ret = unsafe { libc::waitpid(pid, &mut status, libc::WNOHANG) };
    match ret {
        0 => Ok(None),
        n if n == pid => Ok(Some(classify_status(status))),
        -1 => Err(std::io::Error::last_os_error()),
        _ => Ok(None),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminateOutcome {
    Reaped(ExitReport),
    Zombie,
}

/// Runs the escalation protocol for a live child, polling at 100ms
/// granularity up to `term_wait` seconds per stage, aborting early if
/// `shutdown` is already set (the sequencer's "trap door").
pub fn terminate(label: &str, pid: i32, term_wait: u64, shutdown: &ShutdownFlag) -> Result<TerminateOutcome> {
    send_signal(label, pid, Signal::SIGTERM)?;
    if let Some(report) = poll_for_exit(pid, term_wait, shutdown) {
        return Ok(TerminateOutcome::Reaped(report));
    }

    send_signal(label, pid, Signal::SIGKILL)?;
    if let Some(report) = poll_for_exit(pid, term_wait, shutdown) {
        return Ok(TerminateOutcome::Reaped(report));
    }

    log::warn!("'{label}' (pid {pid}) did not terminate, leaving (potential) zombie");
    Err(TerminateError::Zombie {
        label: label.to_string(),
        pid,
    }
    .into())
}

fn send_signal(label: &str, pid: i32, signal: Signal) -> Result<()> {
    signal::kill(Pid::from_raw(pid), signal).map_err(|source| {
        TerminateError::Signal {
            label: label.to_string(),
            pid,
            source,
        }
        .into()
    })
}

fn poll_for_exit(pid: i32, term_wait: u64, shutdown: &ShutdownFlag) -> Option<ExitReport> {
    let deadline = std::time::Instant::now() + Duration::from_secs(term_wait);
    loop {
        match try_reap(pid) {
            Ok(Some(report)) => return Some(report),
            Ok(None) => {}
            Err(_) => return None,
        }
        if std::time::Instant::now() >= deadline || shutdown.is_set() {
            return None;
        }
        thread::sleep(POLL_INTERVAL);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normal_exit_decodes_cleanly() {
        // status for "exited with code 0": low byte 0, high byte 0
        let report = classify_status(0);
        assert_eq!(report.exit_value, 0);
        assert!(report.term_signal.is_none());
        assert!(!report.core_dumped);
    }

    #[test]
    fn core_dump_status_139_reports_exit_value_zero() {
        // status 139 -> core dumped, exit value 0 (139 >> 8 == 0)
        let report = classify_status(139);
        assert!(report.core_dumped);
        assert_eq!(report.exit_value, 0);
        assert_eq!(report.term_signal, Some(139 & 0x7f));
    }

    #[test]
    fn non_zero_exit_code_is_high_byte() {
        let report = classify_status(1 << 8);
        assert_eq!(report.exit_value, 1);
        assert!(report.term_signal.is_none());
        assert!(!report.core_dumped);
    }
}
