//! Tracing setup.
//!
//! Logs go to stderr. The console owns stdout, and interleaving the two would
//! scramble the prompt.

use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Crates whose logs are capped at `warn` unless `RUST_LOG` says otherwise.
const NOISY_CRATES: &[&str] = &["reqwest", "hyper_util"];

/// How much the binary logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    /// Errors only (`-q`).
    Quiet,
    /// Warnings and errors, so the console stays readable.
    #[default]
    Normal,
    /// Debug output (`-v`).
    Verbose,
    /// Everything (`-vv` and up).
    Trace,
}

impl Verbosity {
    /// Map the `-q` flag and the `-v` count to a level. `-q` wins.
    #[must_use]
    pub fn from_flags(quiet: bool, verbose: u8) -> Self {
        match (quiet, verbose) {
            (true, _) => Self::Quiet,
            (false, 0) => Self::Normal,
            (false, 1) => Self::Verbose,
            (false, _) => Self::Trace,
        }
    }

    /// The tracing level for this verbosity.
    #[must_use]
    pub fn level(self) -> Level {
        match self {
            Self::Quiet => Level::ERROR,
            Self::Normal => Level::WARN,
            Self::Verbose => Level::DEBUG,
            Self::Trace => Level::TRACE,
        }
    }

    /// Filter directives used when `RUST_LOG` is unset.
    #[must_use]
    pub fn filter_directives(self) -> String {
        let mut directives = vec![format!("rollcall={}", self.level())];
        // HTTP internals only matter at trace
        if self != Self::Trace {
            directives.extend(NOISY_CRATES.iter().map(|name| format!("{name}=warn")));
        }
        directives.join(",")
    }
}

/// Install the global subscriber. `RUST_LOG` overrides `verbosity`.
///
/// Calling it again is harmless; later calls are ignored.
///
/// ```no_run
/// use rollcall::{init_logging, logging::Verbosity};
///
/// init_logging(Verbosity::Verbose);
/// ```
pub fn init_logging(verbosity: Verbosity) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(verbosity.filter_directives()));

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .without_time(),
        )
        .try_init();
}

/// Route logs through the test harness's captured output.
#[cfg(test)]
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("rollcall=debug")
        .with_test_writer()
        .try_init();
}
