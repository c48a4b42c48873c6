//! The launch primitive: whitespace tokenizing with quote stripping
//! (deliberately not real shell quoting), PATH resolution augmented
//! with `./bin` and `.`, and per-child stdout/stderr redirection
//! straight to a log file.

use std::fs::OpenOptions;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use nix::unistd::{setpgid, Pid};

use crate::error::{LaunchError, Result};

/// Split `command` on whitespace and strip a single leading/trailing
/// quote character (`'` or `"`) from each token. No shell expansion,
/// no grouping of quoted substrings containing spaces: a token like
/// `"hello world"` tokenizes as two tokens, `"hello` and `world"`, each
/// then has its outer quote char stripped. This is a deliberate
/// limitation: no quoted-phrase grouping.
pub fn tokenize(command: &str) -> Vec<String> {
    command
        .split_whitespace()
        .map(strip_quotes)
        .collect()
}

fn strip_quotes(token: &str) -> String {
    let mut chars: Vec<char> = token.chars().collect();
    if chars.first().map(|c| *c == '\'' || *c == '"').unwrap_or(false) {
        chars.remove(0);
    }
    if chars.last().map(|c| *c == '\'' || *c == '"').unwrap_or(false) {
        chars.pop();
    }
    chars.into_iter().collect()
}

/// Builds the PATH search list used to resolve `argv[0]`: `./bin` and
/// `.`, ahead of whatever `PATH` the supervisor itself was started
/// with.
pub fn augmented_search_path() -> Vec<PathBuf> {
    let mut dirs = vec![PathBuf::from("./bin"), PathBuf::from(".")];
    if let Ok(path) = std::env::var("PATH") {
        dirs.extend(std::env::split_paths(&path));
    }
    dirs
}

fn resolve_program(program: &str, search_path: &[PathBuf]) -> Option<PathBuf> {
    if program.contains('/') {
        return Some(PathBuf::from(program));
    }
    for dir in search_path {
        let candidate = dir.join(program);
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}

/// Fork+exec `command` for `label`, redirecting stdout/stderr to
/// `<log_dir>/<label>` in append, line-buffered mode. Returns the new
/// pid. Does not mutate any supervisor state; the caller is
/// responsible for recording `pid`/`last_started` on success.
pub fn spawn(label: &str, command: &str, log_dir: &Path, search_path: &[PathBuf]) -> Result<i32> {
    let tokens = tokenize(command);
    let (program, args) = tokens.split_first().ok_or_else(|| LaunchError::EmptyCommand {
        label: label.to_string(),
    })?;

    let resolved = resolve_program(program, search_path).ok_or_else(|| LaunchError::ProgramNotFound {
        label: label.to_string(),
        program: program.clone(),
    })?;

    let log_path = log_dir.join(label);
    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .map_err(|source| LaunchError::LogFile {
            label: label.to_string(),
            path: log_path.clone(),
            source,
        })?;
    let stderr_file = log_file.try_clone().map_err(|source| LaunchError::LogFile {
        label: label.to_string(),
        path: log_path.clone(),
        source,
    })?;

    let mut cmd = Command::new(&resolved);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::from(log_file))
        .stderr(Stdio::from(stderr_file));

    // Run the child in its own process group so a signal the child
    // sends to its own group (e.g. a shell script's `kill 0`) can't
    // reach the supervisor.
    unsafe {
        cmd.pre_exec(|| {
            setpgid(Pid::from_raw(0), Pid::from_raw(0)).map_err(std::io::Error::from)?;
            Ok(())
        });
    }

    let child = cmd.spawn().map_err(|source| LaunchError::Spawn {
        label: label.to_string(),
        source,
    })?;
    Ok(child.id() as i32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizes_on_whitespace_and_strips_outer_quotes() {
        assert_eq!(
            tokenize(r#"/bin/echo "hello" 'world'"#),
            vec!["/bin/echo", "hello", "world"]
        );
    }

    #[test]
    fn does_not_group_quoted_spaces() {
        // no real shell quoting: each whitespace-delimited token is
        // stripped independently, so a quoted phrase becomes two
        // tokens rather than one
        assert_eq!(tokenize(r#""hello world""#), vec!["hello", "world"]);
    }

    #[test]
    fn resolves_relative_programs_through_search_path() {
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("mytool");
        std::fs::write(&bin, "#!/bin/sh\n").unwrap();
        let search = vec![dir.path().to_path_buf()];
        assert_eq!(resolve_program("mytool", &search), Some(bin));
    }

    #[test]
    fn absolute_or_slashed_programs_are_used_as_is() {
        let search: Vec<PathBuf> = vec![];
        assert_eq!(
            resolve_program("/bin/true", &search),
            Some(PathBuf::from("/bin/true"))
        );
    }

    #[test]
    fn spawn_redirects_stdout_to_per_label_log_file() {
        let dir = tempfile::tempdir().unwrap();
        let search = augmented_search_path();
        let pid = spawn("greeter", "/bin/echo hello", dir.path(), &search).unwrap();
        assert!(pid > 0);
        // give the child a moment to run and exit
        std::thread::sleep(std::time::Duration::from_millis(200));
        let contents = std::fs::read_to_string(dir.path().join("greeter")).unwrap();
        assert!(contents.contains("hello"));
        // reap so we don't leave a zombie behind in the test process
        let _ = nix::sys::wait::waitpid(nix::unistd::Pid::from_raw(pid), None);
    }
}
