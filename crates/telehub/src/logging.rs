//! Logging setup for the API, dashboard and CLI.
//!
//! Output goes through `tracing`. The CLI flags and the deployment's
//! `ENVIRONMENT` pick a level for telehub's own targets and actix's request
//! log; a non-empty `RUST_LOG` replaces the whole filter.

use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Targets that log at the selected verbosity.
const APP_TARGETS: &[&str] = &["telehub", "actix_web"];

/// Noisy dependencies held at a fixed level.
const QUIET_TARGETS: &[(&str, LevelFilter)] = &[("mongodb", LevelFilter::WARN)];

/// How much the process logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    /// Errors only (`-q`).
    Quiet,
    /// Info and above.
    #[default]
    Normal,
    /// Debug and above (`-v`).
    Verbose,
    /// Everything (`-vv`).
    Trace,
}

impl Verbosity {
    /// Map the `-q` flag and the `-v` count onto a verbosity.
    #[must_use]
    pub fn from_flags(quiet: bool, verbose: u8) -> Self {
        match (quiet, verbose) {
            (true, _) => Self::Quiet,
            (false, 0) => Self::Normal,
            (false, 1) => Self::Verbose,
            (false, _) => Self::Trace,
        }
    }

    /// Level applied to telehub's own targets.
    #[must_use]
    pub fn level(self) -> LevelFilter {
        match self {
            Self::Quiet => LevelFilter::ERROR,
            Self::Normal => LevelFilter::INFO,
            Self::Verbose => LevelFilter::DEBUG,
            Self::Trace => LevelFilter::TRACE,
        }
    }

    /// Raise `Normal` to `Verbose` for development deployments.
    ///
    /// Explicit flags (`-q`, `-v`, `-vv`) are left alone.
    #[must_use]
    pub fn for_environment(self, development: bool) -> Self {
        match self {
            Self::Normal if development => Self::Verbose,
            other => other,
        }
    }

    /// Filter directives used when `RUST_LOG` is not set.
    fn directives(self) -> String {
        let level = self.level();
        // Startup and shutdown lines from the HTTP server stay visible
        let server = if self == Self::Quiet {
            LevelFilter::ERROR
        } else {
            LevelFilter::INFO
        };

        APP_TARGETS
            .iter()
            .map(|target| format!("{target}={level}"))
            .chain(std::iter::once(format!("actix_server={server}")))
            .chain(
                QUIET_TARGETS
                    .iter()
                    .map(|(target, cap)| format!("{target}={}", level.min(*cap))),
            )
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Build the filter for `verbosity`, unless `rust_log` overrides it.
fn env_filter(verbosity: Verbosity, rust_log: Option<&str>) -> EnvFilter {
    let spec = match rust_log.map(str::trim) {
        Some(spec) if !spec.is_empty() => spec.to_string(),
        _ => verbosity.directives(),
    };
    EnvFilter::builder().parse_lossy(spec)
}

/// Install the global subscriber.
///
/// Call once at startup; later calls are ignored.
///
/// ```no_run
/// use telehub::{init_logging, logging::Verbosity};
///
/// // A development deployment without flags logs at debug level
/// init_logging(Verbosity::Normal.for_environment(true));
/// ```
pub fn init_logging(verbosity: Verbosity) {
    let filter = env_filter(verbosity, std::env::var("RUST_LOG").ok().as_deref());
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
