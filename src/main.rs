use std::process;

use ansi_term::Colour::Red;
use clap::Parser;

use metasys::cli::{self, Cli};
use metasys::supervisor::{self, Supervisor};

fn die(err: impl std::fmt::Display) -> ! {
    eprintln!("{}", Red.paint(format!("error: {err}")));
    process::exit(1);
}

fn main() {
    let cli = Cli::parse();

    if cli.example_config {
        print!("{}", cli::example_config());
        process::exit(0);
    }

    let config_path = match &cli.config {
        Some(path) => path,
        None => die("a configuration file path is required"),
    };

    if cli.shutdown_requested() {
        match supervisor::request_shutdown(config_path) {
            Ok(()) => process::exit(0),
            Err(err) => die(err),
        }
    }

    let mut supervisor = match Supervisor::bootstrap(&cli) {
        Ok(s) => s,
        Err(err) => die(err),
    };

    if let Err(err) = supervisor.run() {
        die(err);
    }
}
