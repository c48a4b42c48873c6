//! The control loop: single-threaded, one iteration per wall-clock
//! second, owning every mutation of the process table. Each tick
//! computes a `next_check` deadline and sleeps whatever's left of the
//! second after its four phases run.

use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use chrono::{Local, TimeZone, Utc};
use log::{info, warn};

use crate::cli::Cli;
use crate::config::{self, Config};
use crate::error::{Error, Result};
use crate::launch;
use crate::notify::{self, Notification, NotificationSink, SmtpSink};
use crate::pidfile::PidFile;
use crate::process_table::{ChildState, ProcessTable};
use crate::report::{DefaultRenderer, ReportContext, ReportRenderer};
use crate::resources::{ProcStatProbe, ResourceProbe};
use crate::sequencer::{self, CohortKind};
use crate::signals::{self, ShutdownFlag};
use crate::terminate::{self, TerminateOutcome};

const TICK: Duration = Duration::from_millis(1000);

pub fn now_unix() -> i64 {
    Utc::now().timestamp()
}

/// Best-effort local hostname, used as the `<hostname>:<config-path>`
/// prefix on error notifications. Falls back to a placeholder rather
/// than failing the notification outright.
fn hostname() -> String {
    nix::unistd::gethostname()
        .ok()
        .and_then(|os| os.into_string().ok())
        .unwrap_or_else(|| "unknown-host".to_string())
}

pub struct Supervisor {
    config_path: PathBuf,
    config: Config,
    table: ProcessTable,
    last_mtime: Option<std::time::SystemTime>,
    shutdown: ShutdownFlag,
    pidfile: PidFile,
    search_path: Vec<PathBuf>,
    sink: Box<dyn NotificationSink>,
    probe: Box<dyn ResourceProbe>,
    renderer: Box<dyn ReportRenderer>,
    start_time: i64,
    next_notify_report: i64,
    next_html_report: i64,
}

impl Supervisor {
    /// Performs the very first parse (fatal on error) and claims the
    /// pid file.
    pub fn bootstrap(cli: &Cli) -> Result<Self> {
        let config_path = cli
            .config
            .clone()
            .expect("config path required unless -C was handled by the caller");

        let (config, errors) = config::parse(&config_path, true, None);
        if !errors.is_empty() {
            for e in &errors {
                warn!("{e}");
            }
            return Err(Error::Config(
                crate::error::ConfigError::Read {
                    path: config_path.clone(),
                    source: std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        format!("{} error(s) in initial configuration", errors.len()),
                    ),
                },
            ));
        }
        let mtime = config::mtime(&config_path).ok();

        std::fs::create_dir_all(&config.log_dir).map_err(|source| Error::Io {
            path: config.log_dir.clone(),
            source,
        })?;
        crate::logging::init(&config.log_dir, cli.verbose).map_err(|source| Error::Io {
            path: config.log_dir.join("metasys.log"),
            source,
        })?;

        let shutdown = ShutdownFlag::new(&config.log_dir);
        shutdown.clear();
        let pidfile = PidFile::new(&config.log_dir);
        pidfile.claim(std::process::id() as i32)?;

        let now = now_unix();
        let mut table = ProcessTable::new();
        config::reconcile(&config, &mut table, now);

        let sys_period = config.sys_report.period_secs();
        let next_notify_report = if sys_period > 0 {
            next_day_aligned_boundary(now, sys_period)
        } else {
            i64::MAX
        };
        let next_html_report = config
            .html_report
            .as_ref()
            .map(|h| advance_past(now, h.interval as i64, now))
            .unwrap_or(i64::MAX);

        signals::install();

        Ok(Supervisor {
            config_path,
            config,
            table,
            last_mtime: mtime,
            shutdown,
            pidfile,
            search_path: launch::augmented_search_path(),
            sink: Box::new(SmtpSink {
                host: config.mta_host.clone(),
                from: "metasys@localhost".to_string(),
            }),
            probe: Box::new(ProcStatProbe),
            renderer: Box::new(DefaultRenderer),
            start_time: now,
            next_notify_report,
            next_html_report,
        })
    }

    /// Runs until the shutdown sentinel appears, then tears down in
    /// reverse launch order.
    pub fn run(&mut self) -> Result<()> {
        loop {
            let tick_start = std::time::Instant::now();
            self.shutdown.sync_to_disk();
            if self.shutdown.is_set() {
                break;
            }

            self.refresh_config();
            if self.shutdown.is_set() {
                break;
            }

            self.reap_phase();
            self.terminate_phase();
            self.launch_phase();
            self.emit_reports();

            let elapsed = tick_start.elapsed();
            if elapsed < TICK {
                thread::sleep(TICK - elapsed);
            }
        }

        self.shutdown_all();
        self.pidfile.release();
        self.shutdown.clear();
        Ok(())
    }

    fn refresh_config(&mut self) {
        let mtime = match config::mtime(&self.config_path) {
            Ok(m) => m,
            Err(err) => {
                warn!("unable to stat {}: {err}", self.config_path.display());
                return;
            }
        };
        if Some(mtime) == self.last_mtime {
            return;
        }
        self.last_mtime = Some(mtime);

        let (new_config, errors) =
            config::parse(&self.config_path, false, Some(&self.config.log_dir));
        if let Some(report) = config::error_report(&self.config_path, errors) {
            warn!("{report}");
            notify::notify(
                self.sink.as_ref(),
                &self.config.recipients,
                Notification {
                    subject: "Metasys: configuration errors".to_string(),
                    body: format!("{}:{}\n\n{report}", hostname(), self.config_path.display()),
                    html: false,
                },
            );
        }

        let now = now_unix();
        config::reconcile(&new_config, &mut self.table, now);
        self.config = new_config;
    }

    fn reap_phase(&mut self) {
        let now = now_unix();
        let running: Vec<(String, i32)> = self
            .table
            .values()
            .filter(|r| r.state() == ChildState::Running)
            .filter_map(|r| r.pid.map(|pid| (r.label.clone(), pid)))
            .collect();

        for (label, pid) in running {
            match terminate::try_reap(pid) {
                Ok(Some(report)) => {
                    let summary = if report.core_dumped {
                        format!(
                            "'{label}' (pid {pid}) CORE was dumped, exit value {}",
                            report.exit_value
                        )
                    } else if let Some(sig) = report.term_signal {
                        format!("'{label}' (pid {pid}) died from signal {sig}")
                    } else {
                        format!(
                            "'{label}' (pid {pid}) died with exit value {}",
                            report.exit_value
                        )
                    };
                    info!("{summary}");
                    notify::notify(
                        self.sink.as_ref(),
                        &self.config.recipients,
                        Notification {
                            subject: format!("Metasys: {label} exited"),
                            body: summary,
                            html: false,
                        },
                    );
                    if let Some(rec) = self.table.get_mut(&label) {
                        rec.schedule_restart(now, self.config.restart_delay);
                    }
                }
                Ok(None) => {}
                Err(err) => warn!("error reaping '{label}' (pid {pid}): {err}"),
            }
        }
    }

    /// Terminates anything that should no longer hold its current pid:
    /// children marked for removal, and children whose command changed
    /// underneath a still-live process.
    fn terminate_phase(&mut self) {
        let targets: Vec<(String, i32)> = self
            .table
            .values()
            .filter(|r| {
                r.pid.is_some()
                    && matches!(
                        r.state(),
                        ChildState::PendingRemoval | ChildState::PendingLaunch
                    )
            })
            .filter_map(|r| r.pid.map(|pid| (r.label.clone(), pid)))
            .collect();

        for (label, pid) in targets {
            match terminate::terminate(&label, pid, self.config.term_wait, &self.shutdown) {
                Ok(TerminateOutcome::Reaped(report)) => {
                    info!(
                        "'{label}' (pid {pid}) terminated (exit value {}, core dumped: {})",
                        report.exit_value, report.core_dumped
                    );
                }
                Ok(TerminateOutcome::Zombie) => {}
                Err(err) => warn!("{err}"),
            }
            if let Some(rec) = self.table.get_mut(&label) {
                rec.pid = None;
            }
            if matches!(self.table.get(&label).map(|r| r.state()), Some(ChildState::PendingRemoval)) {
                self.table.remove(&label);
            }
            if self.shutdown.is_set() {
                break;
            }
        }
    }

    fn launch_phase(&mut self) {
        let now = now_unix();
        let plan = sequencer::build_launch_plan(&self.config, &self.table, now);
        let mut prior_was_ungrouped = false;

        for (idx, cohort) in plan.iter().enumerate() {
            if self.shutdown.is_set() {
                return;
            }
            if idx > 0 {
                let extra = prior_was_ungrouped && matches!(cohort.kind, CohortKind::Group(_));
                self.sleep_delay(self.config.start_delay);
                if extra {
                    self.sleep_delay(self.config.start_delay);
                }
                if self.shutdown.is_set() {
                    return;
                }
            }

            for (i, label) in cohort.labels.iter().enumerate() {
                if i > 0 {
                    self.sleep_delay(self.config.start_delay);
                    if self.shutdown.is_set() {
                        return;
                    }
                }
                self.launch_one(label);
                if self.shutdown.is_set() {
                    return;
                }
            }

            prior_was_ungrouped = matches!(cohort.kind, CohortKind::Ungrouped);
        }
    }

    fn launch_one(&mut self, label: &str) {
        let command = match self.table.get(label) {
            Some(rec) => rec.command.clone(),
            None => return,
        };
        match launch::spawn(label, &command, &self.config.log_dir, &self.search_path) {
            Ok(pid) => {
                let now = now_unix();
                if let Some(rec) = self.table.get_mut(label) {
                    rec.mark_running(pid, now);
                }
                info!("'{label}' launched as pid {pid}");
            }
            Err(err) => {
                warn!("failed to launch '{label}': {err}");
            }
        }
    }

    /// Sleeps up to `secs`, waking early (and leaving the remainder
    /// unslept) if the shutdown sentinel appears — the sequencer's
    /// "trap door".
    fn sleep_delay(&self, secs: u64) {
        let deadline = std::time::Instant::now() + Duration::from_secs(secs);
        while std::time::Instant::now() < deadline {
            if self.shutdown.is_set() {
                return;
            }
            thread::sleep(Duration::from_millis(100));
        }
    }

    fn emit_reports(&mut self) {
        let now = now_unix();

        if self.config.sys_report.period_secs() > 0 && now >= self.next_notify_report {
            let body = self.render_html_report(now);
            notify::notify(
                self.sink.as_ref(),
                &self.config.recipients,
                Notification {
                    subject: "Metasys: status report".to_string(),
                    body,
                    html: true,
                },
            );
            self.next_notify_report =
                next_day_aligned_boundary(now, self.config.sys_report.period_secs());
        }

        if let Some(html_cfg) = self.config.html_report.clone() {
            if now >= self.next_html_report {
                let html = self.render_html_report(now);
                if let Err(source) = std::fs::write(&html_cfg.path, html) {
                    let err = crate::error::ReportError::Write {
                        path: html_cfg.path.clone(),
                        source,
                    };
                    warn!("{err}");
                }
                self.next_html_report =
                    advance_past(self.next_html_report, html_cfg.interval as i64, now);
            }
        }
    }

    fn render_html_report(&self, now: i64) -> String {
        let probe: &dyn ResourceProbe = self.probe.as_ref();
        let ctx = ReportContext {
            description: &self.config.description,
            start_time: self.start_time,
            now,
            config: &self.config,
            table: &self.table,
            probe: Some(probe),
        };
        self.renderer.render(&ctx)
    }

    /// Tears down every still-tracked child, reverse of the current
    /// `launch_order`.
    fn shutdown_all(&mut self) {
        let order = sequencer::shutdown_order(&self.config.launch_order());
        for label in order {
            let pid = match self.table.get(&label).and_then(|r| r.pid) {
                Some(pid) => pid,
                None => continue,
            };
            match terminate::terminate(&label, pid, self.config.term_wait, &self.shutdown) {
                Ok(_) => info!("'{label}' (pid {pid}) stopped"),
                Err(err) => warn!("{err}"),
            }
        }
    }
}

/// The next boundary, strictly greater than `now`, that is both
/// aligned to local-day midnight and a whole multiple of `period`
/// seconds past it.
fn next_day_aligned_boundary(now: i64, period: i64) -> i64 {
    let local_now = match Local.timestamp_opt(now, 0) {
        chrono::LocalResult::Single(t) => t,
        _ => return now + period,
    };
    let midnight = local_now.date_naive().and_hms_opt(0, 0, 0).unwrap();
    let midnight_ts = match Local.from_local_datetime(&midnight) {
        chrono::LocalResult::Single(t) => t.timestamp(),
        _ => now,
    };
    let elapsed = now - midnight_ts;
    let periods_passed = elapsed / period + 1;
    midnight_ts + periods_passed * period
}

/// Advances `next` by `interval` until it is strictly greater than
/// `now`.
fn advance_past(mut next: i64, interval: i64, now: i64) -> i64 {
    if interval <= 0 {
        return now + 1;
    }
    while next <= now {
        next += interval;
    }
    next
}

/// Signals a running instance's pid file to stop (the `-s`/`-k` CLI
/// path).
pub fn request_shutdown(config_path: &Path) -> Result<()> {
    let (config, _) = config::parse(config_path, true, None);
    let pidfile = PidFile::new(&config.log_dir);
    match pidfile.running_pid() {
        Some(_) => {
            let shutdown = ShutdownFlag::new(&config.log_dir);
            shutdown.request().map_err(|source| Error::Io {
                path: shutdown.sentinel_path().to_path_buf(),
                source,
            })
        }
        None => Err(Error::NotRunning),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn html_report_advances_until_strictly_after_now() {
        assert_eq!(advance_past(0, 60, 59), 60);
        assert_eq!(advance_past(0, 60, 60), 120);
        assert_eq!(advance_past(0, 60, 0), 60);
    }

    #[test]
    fn day_aligned_boundary_is_in_the_future() {
        let now = now_unix();
        let next = next_day_aligned_boundary(now, 3_600);
        assert!(next > now);
        assert!(next - now <= 3_600);
    }
}
