//! The optional per-pid resource probe: an external collaborator the
//! core only ever sees through the `ResourceProbe` trait.
//! `ProcStatProbe` is a minimal Linux `/proc` reader that plays that
//! role by default; absence of a live process (or of `/proc` itself)
//! is a plain `None`, never an error.

use std::fs;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceSample {
    pub cpu_percent: f32,
    pub mem_percent: f32,
    pub vsize_kb: u64,
    pub rss_kb: u64,
    pub state: char,
}

pub trait ResourceProbe {
    fn sample(&self, pid: i32) -> Option<ResourceSample>;
}

/// Reads `/proc/<pid>/stat` for RSS/vsize/state. CPU% and mem% require
/// a baseline (total jiffies, total memory) this minimal probe doesn't
/// track across samples, so they're reported as `0.0`; the report
/// renderer still shows the columns it can compute accurately.
pub struct ProcStatProbe;

impl ResourceProbe for ProcStatProbe {
    fn sample(&self, pid: i32) -> Option<ResourceSample> {
        let stat = fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
        // Fields after the (possibly space-containing) comm field in
        // parens: find the closing paren, then split the remainder.
        let after_comm = stat.rsplit_once(')')?.1;
        let fields: Vec<&str> = after_comm.split_whitespace().collect();
        // field[0] here is state (proc(5) field 3), vsize is field 20
        // (index 20 - 3 = 17 in this zero-based slice), rss is field
        // 21 (index 18).
        let state = fields.first()?.chars().next()?;
        let vsize_kb = fields.get(17).and_then(|s| s.parse::<u64>().ok()).unwrap_or(0) / 1024;
        let rss_pages = fields.get(18).and_then(|s| s.parse::<u64>().ok()).unwrap_or(0);
        let page_size_kb = 4; // typical Linux page size; best-effort only
        Some(ResourceSample {
            cpu_percent: 0.0,
            mem_percent: 0.0,
            vsize_kb,
            rss_kb: rss_pages * page_size_kb,
            state,
        })
    }
}

/// A probe that always returns `None`, used when no resource
/// collaborator is configured; the report renderer omits resource
/// columns entirely in that case.
pub struct NoProbe;

impl ResourceProbe for NoProbe {
    fn sample(&self, _pid: i32) -> Option<ResourceSample> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_own_process_stat_without_erroring() {
        let probe = ProcStatProbe;
        let pid = std::process::id() as i32;
        let sample = probe.sample(pid);
        assert!(sample.is_some());
    }

    #[test]
    fn unknown_pid_returns_none() {
        let probe = ProcStatProbe;
        assert!(probe.sample(i32::MAX - 1).is_none());
    }

    #[test]
    fn no_probe_always_returns_none() {
        assert!(NoProbe.sample(1).is_none());
    }
}
