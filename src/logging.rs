//! # Logging module
//!
//! This module provides logging facilities and helpers

use tracing::Level;

// -----------------------------------------------------------------------------
// Error enumeration

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to set global default subscriber, {0}")]
    GlobalDefaultSubscriber(tracing::subscriber::SetGlobalDefaultError),
}

// -----------------------------------------------------------------------------
// helpers

/// returns the maximum level of events for the number of `-v` flags
pub const fn level(verbosity: usize) -> Level {
    match verbosity {
        0 => Level::ERROR,
        1 => Level::WARN,
        2 => Level::INFO,
        3 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

/// installs the fmt subscriber, events of the rds sdk and sql drivers are
/// emitted at the same level as the broker ones
pub fn initialize(verbosity: usize) -> Result<(), Error> {
    tracing::subscriber::set_global_default(
        tracing_subscriber::fmt()
            .with_max_level(level(verbosity))
            .with_thread_names(true)
            .with_line_number(true)
            .with_target(true)
            .with_ansi(atty_stderr())
            .with_writer(std::io::stderr)
            .finish(),
    )
    .map_err(Error::GlobalDefaultSubscriber)
}

fn atty_stderr() -> bool {
    use std::io::IsTerminal;

    std::io::stderr().is_terminal()
}
