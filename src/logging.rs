/// Tracing setup.
///
/// The terminal UI owns stdout/stderr while it runs, so in that mode log
/// lines go to the configured file. Headless runs log to stderr.
/// `RUST_LOG` overrides the filter from `config.toml`.

use std::fs::OpenOptions;
use std::sync::Mutex;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::LogConfig;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum LogTarget {
    File,
    Stderr,
}

fn filter(cfg: &LogConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cfg.filter))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber. If the log file cannot be opened the
/// records are dropped (stderr would tear the screen) and the failure is
/// returned for the caller to show.
pub fn init(cfg: &LogConfig, target: LogTarget) -> Option<String> {
    if target == LogTarget::File {
        match OpenOptions::new().create(true).append(true).open(&cfg.file) {
            Ok(file) => {
                tracing_subscriber::registry()
                    .with(filter(cfg))
                    .with(fmt::layer().with_ansi(false).with_target(false).with_writer(Mutex::new(file)))
                    .init();
                return None;
            }
            Err(e) => {
                tracing_subscriber::registry()
                    .with(filter(cfg))
                    .with(fmt::layer().with_writer(std::io::sink))
                    .init();
                return Some(format!("could not open log file {}: {e}", cfg.file.display()));
            }
        }
    }

    tracing_subscriber::registry()
        .with(filter(cfg))
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();
    None
}
