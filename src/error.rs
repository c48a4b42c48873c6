//! Error types for every concern metasys touches. One enum per concern,
//! folded into a single `Error` for anything that needs to bubble all
//! the way up to `main`.

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Launch(#[from] LaunchError),

    #[error(transparent)]
    Terminate(#[from] TerminateError),

    #[error(transparent)]
    Notify(#[from] NotifyError),

    #[error(transparent)]
    Report(#[from] ReportError),

    #[error("failed to read or write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("another metasys instance is already running with pid {0}")]
    AlreadyRunning(i32),

    #[error("no running metasys instance found")]
    NotRunning,
}

/// Accumulated during a single reparse; never fatal after the first
/// successful startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{path}: unable to read: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("line {line}: duplicate label '{label}'")]
    DuplicateLabel { line: usize, label: String },

    #[error("line {line}: '{directive}' requires a label and a command")]
    MissingCommand { line: usize, directive: String },

    #[error("line {line}: invalid address '{addr}'")]
    InvalidAddress { line: usize, addr: String },

    #[error("line {line}: '{directive}' has no valid recipients")]
    NoValidAddresses { line: usize, directive: String },

    #[error("line {line}: '{directive}' expects a non-negative integer, got '{value}'")]
    InvalidInteger {
        line: usize,
        directive: String,
        value: String,
    },

    #[error("line {line}: unrecognized SysReport value '{value}' (expected Daily or Hourly)")]
    InvalidSysReport { line: usize, value: String },
}

/// Collected config errors from a single reparse, suitable for one log
/// entry and one notification.
#[derive(Debug, Error)]
#[error("{} configuration error(s) while parsing {path}:\n{}", .errors.len(), format_errors(.errors))]
pub struct ConfigErrorReport {
    pub path: PathBuf,
    pub errors: Vec<ConfigError>,
}

fn format_errors(errors: &[ConfigError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {e}"))
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("label '{label}': command is empty after tokenizing")]
    EmptyCommand { label: String },

    #[error("label '{label}': program '{program}' not found on PATH")]
    ProgramNotFound { label: String, program: String },

    #[error("label '{label}': unable to open log file {path}: {source}")]
    LogFile {
        label: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("label '{label}': fork/exec failed: {source}")]
    Spawn {
        label: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum TerminateError {
    #[error("label '{label}' (pid {pid}): failed to send signal: {source}")]
    Signal {
        label: String,
        pid: i32,
        #[source]
        source: nix::Error,
    },

    #[error("label '{label}' (pid {pid}): did not terminate, leaving (potential) zombie")]
    Zombie { label: String, pid: i32 },
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("no recipients configured")]
    NoRecipients,

    #[error("unable to connect to mail transport {host}: {source}")]
    Connect {
        host: String,
        #[source]
        source: std::io::Error,
    },

    #[error("mail transport {host} rejected the message: {reply}")]
    Rejected { host: String, reply: String },
}

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("unable to write HTML report to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
