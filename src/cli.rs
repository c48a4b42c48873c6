//! Command-line surface: one positional config path, plus verbosity,
//! shutdown, and example-config flags.

use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(
    name = "metasys",
    about = "A small process supervisor: staged startup, bounded-rate restarts, live config reload, and HTML/email status reports.",
    version
)]
pub struct Cli {
    /// Path to the configuration file.
    #[arg(required_unless_present = "example_config")]
    pub config: Option<PathBuf>,

    /// Increase verbosity; may be repeated.
    #[arg(short = 'v', action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Shut down the running instance found via the pid file next to
    /// the config's log directory, then exit.
    #[arg(short = 's', long = "stop")]
    pub stop: bool,

    /// Alias for `-s`.
    #[arg(short = 'k')]
    pub kill: bool,

    /// Print a commented example configuration to stdout and exit 0.
    #[arg(short = 'C', long = "example-config")]
    pub example_config: bool,
}

impl Cli {
    pub fn shutdown_requested(&self) -> bool {
        self.stop || self.kill
    }
}

/// The `-C` example configuration. Must parse with zero errors under
/// `config::parse`.
pub fn example_config() -> &'static str {
    r#"# Example metasys configuration.
#
# Each line is a directive. Unknown directives are ignored. Comments
# start with '#' and may follow a directive on the same line.

# An ungrouped child: launched first, in file order.
Process web /usr/bin/my-server --port 8080

# A grouped child: the group name is concatenated onto "Process" with
# no separator. Groups launch after all ungrouped children, in
# group-name sort order; start_delay seconds separate each launch.
Processworkers worker1 /usr/bin/my-worker --queue default
Processworkers worker2 /usr/bin/my-worker --queue low

# Seconds between launches within/between cohorts.
StartDelay 5

# Restart backoff base, in seconds; a child that dies within this
# many seconds of its own start waits 100x this instead.
RestartDelay 30

# Seconds to wait after SIGTERM, and again after SIGKILL, before
# logging a potential zombie.
TermWait 30

# Recipients for event notifications; repeatable.
Email ops@example.com

# Outgoing mail relay (default: localhost).
MTA localhost

# A short description used in log lines and reports.
Description "example metasys instance"

# Periodic plain-text status mail: None, Hourly, or Daily.
SysReport Daily

# Periodic HTML status report written to a file, with an optional
# interval in seconds (default 60).
HTMLReport /var/log/metasys/status.html:60
"#
}
