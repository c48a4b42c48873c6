//! Line-oriented configuration parser and reconciler.
//!
//! Grammar is intentionally hand-rolled and case-insensitive on
//! keywords, `#` starts a comment anywhere on the line, blank lines are
//! ignored, and unknown directives are silently ignored for forward
//! compatibility.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use lazy_static::lazy_static;
use regex::Regex;

use crate::error::{ConfigError, ConfigErrorReport};
use crate::process_table::ProcessTable;

lazy_static! {
    // Tested first: a line is ungrouped iff its directive token is
    // *exactly* "process".
    static ref UNGROUPED_RE: Regex = Regex::new(r"(?i)^process$").unwrap();
    // Tested second: anything else starting with "process" names a
    // group via the suffix.
    static ref GROUPED_RE: Regex = Regex::new(r"(?i)^process(.+)$").unwrap();
    static ref EMAIL_RE: Regex =
        Regex::new(r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}$").unwrap();
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildDecl {
    pub label: String,
    pub group: Option<String>,
    pub command: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SysReportMode {
    None,
    Hourly,
    Daily,
}

impl SysReportMode {
    pub fn period_secs(self) -> i64 {
        match self {
            SysReportMode::None => 0,
            SysReportMode::Hourly => 3_600,
            SysReportMode::Daily => 86_400,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HtmlReportConfig {
    pub path: PathBuf,
    pub interval: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Declaration order as they appeared in the file.
    pub children: Vec<ChildDecl>,
    pub recipients: Vec<String>,
    pub mta_host: String,
    pub start_delay: u64,
    pub restart_delay: u64,
    pub term_wait: u64,
    pub description: String,
    pub sys_report: SysReportMode,
    pub html_report: Option<HtmlReportConfig>,
    pub log_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            children: Vec::new(),
            recipients: Vec::new(),
            mta_host: "localhost".to_string(),
            start_delay: 10,
            restart_delay: 30,
            term_wait: 30,
            description: String::new(),
            sys_report: SysReportMode::None,
            html_report: None,
            log_dir: PathBuf::from("."),
        }
    }
}

impl Config {
    /// `ungrouped_order`: labels of children declared without a group,
    /// in file order.
    pub fn ungrouped_order(&self) -> Vec<String> {
        self.children
            .iter()
            .filter(|c| c.group.is_none())
            .map(|c| c.label.clone())
            .collect()
    }

    /// Group name -> ordered labels (file order within the group).
    /// Groups themselves come back sorted by name.
    pub fn groups(&self) -> Vec<(String, Vec<String>)> {
        let mut names: Vec<String> = self
            .children
            .iter()
            .filter_map(|c| c.group.clone())
            .collect();
        names.sort();
        names.dedup();
        names
            .into_iter()
            .map(|name| {
                let labels = self
                    .children
                    .iter()
                    .filter(|c| c.group.as_deref() == Some(name.as_str()))
                    .map(|c| c.label.clone())
                    .collect();
                (name, labels)
            })
            .collect()
    }

    /// `launch_order`: ungrouped first, then each group in name-sort
    /// order.
    pub fn launch_order(&self) -> Vec<String> {
        let mut order = self.ungrouped_order();
        for (_, labels) in self.groups() {
            order.extend(labels);
        }
        order
    }
}

/// Parse `path` into a `Config`, accumulating non-fatal errors.
/// `first_parse` controls whether `LogDir` is honored.
pub fn parse(path: &Path, first_parse: bool, previous_log_dir: Option<&Path>) -> (Config, Vec<ConfigError>) {
    let mut cfg = Config::default();
    if let Some(dir) = previous_log_dir {
        cfg.log_dir = dir.to_path_buf();
    }
    let mut errors = Vec::new();

    let contents = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(source) => {
            errors.push(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            });
            return (cfg, errors);
        }
    };

    let mut seen_labels = std::collections::HashSet::new();

    for (idx, raw_line) in contents.lines().enumerate() {
        let line_no = idx + 1;
        let line = strip_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }
        let (directive, rest) = split_first_token(line);
        let value = rest.trim();

        if UNGROUPED_RE.is_match(directive) {
            parse_process_decl(&mut cfg, &mut errors, &mut seen_labels, line_no, None, value);
        } else if let Some(caps) = GROUPED_RE.captures(directive) {
            let group = caps.get(1).unwrap().as_str().to_string();
            parse_process_decl(
                &mut cfg,
                &mut errors,
                &mut seen_labels,
                line_no,
                Some(group),
                value,
            );
        } else if directive.eq_ignore_ascii_case("email") {
            apply_email(&mut cfg, &mut errors, line_no, value);
        } else if directive.eq_ignore_ascii_case("mta") {
            if !value.is_empty() {
                cfg.mta_host = value.to_string();
            }
        } else if directive.eq_ignore_ascii_case("startdelay") {
            apply_u64(&mut cfg.start_delay, &mut errors, line_no, "StartDelay", value);
        } else if directive.eq_ignore_ascii_case("restartdelay") {
            apply_u64(
                &mut cfg.restart_delay,
                &mut errors,
                line_no,
                "RestartDelay",
                value,
            );
        } else if directive.eq_ignore_ascii_case("termwait") {
            apply_u64(&mut cfg.term_wait, &mut errors, line_no, "TermWait", value);
        } else if directive.eq_ignore_ascii_case("description") {
            cfg.description = value.to_string();
        } else if directive.eq_ignore_ascii_case("sysreport") {
            apply_sys_report(&mut cfg, &mut errors, line_no, value);
        } else if directive.eq_ignore_ascii_case("htmlreport") {
            apply_html_report(&mut cfg, &mut errors, line_no, value);
        } else if directive.eq_ignore_ascii_case("logdir") {
            if first_parse && !value.is_empty() {
                cfg.log_dir = PathBuf::from(value);
            }
            // Silently ignored on reload.
        }
        // Unknown directives are silently ignored.
    }

    (cfg, errors)
}

fn parse_process_decl(
    cfg: &mut Config,
    errors: &mut Vec<ConfigError>,
    seen_labels: &mut std::collections::HashSet<String>,
    line_no: usize,
    group: Option<String>,
    value: &str,
) {
    let (label, command) = split_first_token(value);
    if label.is_empty() || command.trim().is_empty() {
        errors.push(ConfigError::MissingCommand {
            line: line_no,
            directive: group
                .as_ref()
                .map(|g| format!("Process{g}"))
                .unwrap_or_else(|| "Process".to_string()),
        });
        return;
    }
    if !seen_labels.insert(label.to_string()) {
        errors.push(ConfigError::DuplicateLabel {
            line: line_no,
            label: label.to_string(),
        });
        return;
    }
    cfg.children.push(ChildDecl {
        label: label.to_string(),
        group,
        command: command.trim().to_string(),
    });
}

fn apply_email(cfg: &mut Config, errors: &mut Vec<ConfigError>, line_no: usize, value: &str) {
    if value.is_empty() {
        cfg.recipients.clear();
        return;
    }
    let mut valid = Vec::new();
    for addr in value.split(',') {
        let addr = addr.trim();
        if addr.is_empty() {
            continue;
        }
        if EMAIL_RE.is_match(addr) {
            valid.push(addr.to_string());
        } else {
            errors.push(ConfigError::InvalidAddress {
                line: line_no,
                addr: addr.to_string(),
            });
        }
    }
    if valid.is_empty() {
        errors.push(ConfigError::NoValidAddresses {
            line: line_no,
            directive: "Email".to_string(),
        });
    } else {
        cfg.recipients = valid;
    }
}

fn apply_u64(
    field: &mut u64,
    errors: &mut Vec<ConfigError>,
    line_no: usize,
    directive: &str,
    value: &str,
) {
    match value.parse::<i64>() {
        Ok(n) if n >= 0 => *field = n as u64,
        _ => errors.push(ConfigError::InvalidInteger {
            line: line_no,
            directive: directive.to_string(),
            value: value.to_string(),
        }),
    }
}

fn apply_sys_report(cfg: &mut Config, errors: &mut Vec<ConfigError>, line_no: usize, value: &str) {
    if value.eq_ignore_ascii_case("daily") {
        cfg.sys_report = SysReportMode::Daily;
    } else if value.eq_ignore_ascii_case("hourly") {
        cfg.sys_report = SysReportMode::Hourly;
    } else if value.eq_ignore_ascii_case("none") {
        cfg.sys_report = SysReportMode::None;
    } else {
        errors.push(ConfigError::InvalidSysReport {
            line: line_no,
            value: value.to_string(),
        });
    }
}

fn apply_html_report(cfg: &mut Config, errors: &mut Vec<ConfigError>, line_no: usize, value: &str) {
    if value.is_empty() {
        return;
    }
    let (path_part, interval) = match value.rsplit_once(':') {
        Some((p, i)) => match i.parse::<u64>() {
            Ok(n) => (p, n),
            Err(_) => {
                errors.push(ConfigError::InvalidInteger {
                    line: line_no,
                    directive: "HTMLReport".to_string(),
                    value: i.to_string(),
                });
                (value, 60)
            }
        },
        None => (value, 60),
    };
    cfg.html_report = Some(HtmlReportConfig {
        path: PathBuf::from(path_part),
        interval,
    });
}

fn strip_comment(line: &str) -> &str {
    match line.find('#') {
        Some(idx) => &line[..idx],
        None => line,
    }
}

fn split_first_token(s: &str) -> (&str, &str) {
    let s = s.trim_start();
    match s.find(char::is_whitespace) {
        Some(idx) => (&s[..idx], &s[idx..]),
        None => (s, ""),
    }
}

/// Returns the file's last-modified time, used to detect whether a
/// reparse is needed.
pub fn mtime(path: &Path) -> std::io::Result<SystemTime> {
    fs::metadata(path)?.modified()
}

/// Reconcile a freshly parsed `Config` against the current process
/// table: new labels are created, labels whose command changed are
/// force-restarted immediately, and labels absent from the new file
/// are marked for removal.
pub fn reconcile(cfg: &Config, table: &mut ProcessTable, now: i64) {
    let mut declared = std::collections::HashSet::new();
    for decl in &cfg.children {
        declared.insert(decl.label.as_str());
        match table.get_mut(&decl.label) {
            Some(existing) => {
                if existing.command != decl.command {
                    existing.command = decl.command.clone();
                    existing.group = decl.group.clone();
                    existing.scheduled_start = now;
                }
            }
            None => {
                table.insert(crate::process_table::ChildRecord::new_pending(
                    decl.label.clone(),
                    decl.command.clone(),
                    decl.group.clone(),
                    now,
                ));
            }
        }
    }

    let to_remove: Vec<String> = table
        .labels()
        .filter(|label| !declared.contains(*label))
        .map(|s| s.to_string())
        .collect();
    for label in to_remove {
        if let Some(rec) = table.get_mut(&label) {
            rec.mark_removed();
        }
    }
}

/// Bundle accumulated errors into a single report for logging/notifying,
/// unless there were none.
pub fn error_report(path: &Path, errors: Vec<ConfigError>) -> Option<ConfigErrorReport> {
    if errors.is_empty() {
        None
    } else {
        Some(ConfigErrorReport {
            path: path.to_path_buf(),
            errors,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        f
    }

    #[test]
    fn parses_ungrouped_and_grouped_children() {
        let f = write_config(
            "Process A /bin/true\nProcessWeb B /bin/false\n# comment\nProcessWeb C /bin/false arg\n",
        );
        let (cfg, errors) = parse(f.path(), true, None);
        assert!(errors.is_empty());
        assert_eq!(cfg.ungrouped_order(), vec!["A"]);
        assert_eq!(
            cfg.groups(),
            vec![("Web".to_string(), vec!["B".to_string(), "C".to_string()])]
        );
        assert_eq!(cfg.launch_order(), vec!["A", "B", "C"]);
    }

    #[test]
    fn groups_sort_by_name() {
        let f = write_config(
            "Process A /bin/true\nProcessGrp2 X /bin/true\nProcessGrp1 Y /bin/true\n",
        );
        let (cfg, _) = parse(f.path(), true, None);
        assert_eq!(cfg.launch_order(), vec!["A", "Y", "X"]);
    }

    #[test]
    fn duplicate_label_is_an_error_and_keeps_first() {
        let f = write_config("Process A /bin/true\nProcess A /bin/false\n");
        let (cfg, errors) = parse(f.path(), true, None);
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], ConfigError::DuplicateLabel { .. }));
        assert_eq!(cfg.children.len(), 1);
        assert_eq!(cfg.children[0].command, "/bin/true");
    }

    #[test]
    fn email_accepts_valid_rejects_invalid_keeps_valid_ones() {
        let f = write_config("Email ops@example.com,not-an-address\n");
        let (cfg, errors) = parse(f.path(), true, None);
        assert_eq!(errors.len(), 1);
        assert_eq!(cfg.recipients, vec!["ops@example.com".to_string()]);
    }

    #[test]
    fn email_all_invalid_leaves_recipients_untouched() {
        let f = write_config("Email nope\n");
        let (cfg, errors) = parse(f.path(), true, None);
        assert_eq!(errors.len(), 1);
        assert!(cfg.recipients.is_empty());
    }

    #[test]
    fn empty_email_clears_recipients() {
        let f = write_config("Email\n");
        let (cfg, errors) = parse(f.path(), true, None);
        assert!(errors.is_empty());
        assert!(cfg.recipients.is_empty());
    }

    #[test]
    fn negative_integer_is_an_error() {
        let f = write_config("StartDelay -1\n");
        let (cfg, errors) = parse(f.path(), true, None);
        assert_eq!(errors.len(), 1);
        assert_eq!(cfg.start_delay, 10); // default kept
    }

    #[test]
    fn html_report_without_interval_defaults_to_60() {
        let f = write_config("HTMLReport /var/metasys/report.html\n");
        let (cfg, errors) = parse(f.path(), true, None);
        assert!(errors.is_empty());
        assert_eq!(cfg.html_report.unwrap().interval, 60);
    }

    #[test]
    fn html_report_with_interval_is_parsed() {
        let f = write_config("HTMLReport /var/metasys/report.html:15\n");
        let (cfg, _) = parse(f.path(), true, None);
        assert_eq!(cfg.html_report.unwrap().interval, 15);
    }

    #[test]
    fn logdir_is_ignored_on_reload() {
        let f = write_config("LogDir /var/log/new\n");
        let (cfg, errors) = parse(f.path(), false, Some(Path::new("/var/log/old")));
        assert!(errors.is_empty());
        assert_eq!(cfg.log_dir, PathBuf::from("/var/log/old"));
    }

    #[test]
    fn logdir_is_honored_on_first_parse() {
        let f = write_config("LogDir /var/log/new\n");
        let (cfg, _) = parse(f.path(), true, None);
        assert_eq!(cfg.log_dir, PathBuf::from("/var/log/new"));
    }

    #[test]
    fn unknown_directive_is_silently_ignored() {
        let f = write_config("FutureDirective something\nProcess A /bin/true\n");
        let (cfg, errors) = parse(f.path(), true, None);
        assert!(errors.is_empty());
        assert_eq!(cfg.children.len(), 1);
    }

    #[test]
    fn reconcile_marks_absent_labels_for_removal() {
        let mut table = ProcessTable::new();
        table.insert(crate::process_table::ChildRecord::new_pending(
            "old".into(),
            "/bin/true".into(),
            None,
            0,
        ));
        let cfg = Config::default();
        reconcile(&cfg, &mut table, 10);
        assert!(table.get("old").unwrap().state() == crate::process_table::ChildState::PendingRemoval);
    }

    #[test]
    fn reconcile_force_restarts_on_command_change() {
        let mut table = ProcessTable::new();
        let mut rec =
            crate::process_table::ChildRecord::new_pending("a".into(), "/bin/true".into(), None, 0);
        rec.mark_running(123, 0);
        table.insert(rec);

        let mut cfg = Config::default();
        cfg.children.push(ChildDecl {
            label: "a".into(),
            group: None,
            command: "/bin/false".into(),
        });
        reconcile(&cfg, &mut table, 50);
        let rec = table.get("a").unwrap();
        assert_eq!(rec.command, "/bin/false");
        assert_eq!(rec.scheduled_start, 50);
    }

    #[test]
    fn reconcile_unchanged_file_is_a_no_op() {
        let mut table = ProcessTable::new();
        let mut rec =
            crate::process_table::ChildRecord::new_pending("a".into(), "/bin/true".into(), None, 0);
        rec.mark_running(123, 0);
        table.insert(rec.clone());

        let mut cfg = Config::default();
        cfg.children.push(ChildDecl {
            label: "a".into(),
            group: None,
            command: "/bin/true".into(),
        });
        reconcile(&cfg, &mut table, 999);
        assert_eq!(table.get("a").unwrap(), &rec);
    }
}
