//! Supervisor log setup: a fixed-format append-only file
//! (`metasys.log`, each line `YYYY-MM-DD HH:MM:SS <message>`) plus an
//! optional terminal echo whose verbosity is raised by repeated `-v`.
//! Both are driven by a single `env_logger` instance so there's one
//! place deciding what gets written where.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use ansi_term::Colour::Red;
use chrono::Local;
use env_logger::{Builder, Target};
use log::{Level, LevelFilter};

/// `-v` count to terminal echo level: 0 = warn, 1 = info, 2 = debug,
/// 3+ = trace.
fn echo_level(verbose: u8) -> LevelFilter {
    match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

/// Installs the global logger. The file never drops below `Info`
/// regardless of `-v`; `-v` only raises the terminal echo (and, as a
/// side effect of sharing one filter, how much detail the file itself
/// captures above that floor).
pub fn init(log_dir: &Path, verbose: u8) -> std::io::Result<()> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("metasys.log"))?;

    let echo = echo_level(verbose);
    let file_level = LevelFilter::Info.max(echo);

    Builder::new()
        .filter_level(file_level)
        .format(move |buf, record| {
            let line = format!("{} {}", Local::now().format("%Y-%m-%d %H:%M:%S"), record.args());
            if record.level() <= echo {
                if record.level() == Level::Error {
                    eprintln!("{}", Red.paint(line.clone()));
                } else {
                    eprintln!("{line}");
                }
            }
            writeln!(buf, "{line}")
        })
        .target(Target::Pipe(Box::new(file)))
        .init();

    Ok(())
}
