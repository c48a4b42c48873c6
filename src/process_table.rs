//! The process table: one `ChildRecord` per declared child, and the
//! three-state state machine that drives launch/restart/removal.

use std::collections::HashMap;

/// A child as tracked by the supervisor, independent of whatever the
/// configuration currently says about it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildRecord {
    pub label: String,
    pub command: String,
    pub group: Option<String>,
    /// `None` is the "never-run/stopped" sentinel.
    pub pid: Option<i32>,
    /// `0` == running, `>0` == pending-launch at that time, `<0` ==
    /// pending-removal.
    pub scheduled_start: i64,
    pub last_started: Option<i64>,
    pub restart_count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildState {
    PendingLaunch,
    Running,
    PendingRemoval,
}

impl ChildRecord {
    pub fn new_pending(label: String, command: String, group: Option<String>, now: i64) -> Self {
        ChildRecord {
            label,
            command,
            group,
            pid: None,
            scheduled_start: now,
            last_started: None,
            restart_count: 0,
        }
    }

    pub fn state(&self) -> ChildState {
        match self.scheduled_start.cmp(&0) {
            std::cmp::Ordering::Greater => ChildState::PendingLaunch,
            std::cmp::Ordering::Equal => ChildState::Running,
            std::cmp::Ordering::Less => ChildState::PendingRemoval,
        }
    }

    pub fn mark_running(&mut self, pid: i32, now: i64) {
        self.pid = Some(pid);
        self.last_started = Some(now);
        self.scheduled_start = 0;
    }

    pub fn mark_removed(&mut self) {
        self.scheduled_start = -1;
    }

    /// Backoff rule: a child that lived no longer than `restart_delay`
    /// since it was last started "died too quickly" and is penalized
    /// 100x.
    pub fn schedule_restart(&mut self, now: i64, restart_delay: u64) {
        self.pid = None;
        let lived = self
            .last_started
            .map(|started| now - started)
            .unwrap_or(i64::MAX);
        self.scheduled_start = if lived <= restart_delay as i64 {
            now + 100 * restart_delay as i64
        } else {
            now + restart_delay as i64
        };
        self.restart_count += 1;
    }
}

/// All known children, keyed by label. Order is *not* preserved here;
/// launch/shutdown order comes from the configuration's declared order
/// (see `sequencer.rs`), not from table iteration.
#[derive(Debug, Default)]
pub struct ProcessTable {
    children: HashMap<String, ChildRecord>,
}

impl ProcessTable {
    pub fn new() -> Self {
        ProcessTable {
            children: HashMap::new(),
        }
    }

    pub fn get(&self, label: &str) -> Option<&ChildRecord> {
        self.children.get(label)
    }

    pub fn get_mut(&mut self, label: &str) -> Option<&mut ChildRecord> {
        self.children.get_mut(label)
    }

    pub fn contains(&self, label: &str) -> bool {
        self.children.contains_key(label)
    }

    pub fn insert(&mut self, record: ChildRecord) {
        self.children.insert(record.label.clone(), record);
    }

    pub fn remove(&mut self, label: &str) -> Option<ChildRecord> {
        self.children.remove(label)
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.children.keys().map(|s| s.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = &ChildRecord> {
        self.children.values()
    }

    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut ChildRecord> {
        self.children.values_mut()
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }
}
