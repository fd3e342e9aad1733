//! Logger bootstrap for the command-line front end.
//!
//! Library modules only talk to the `log` facade; this is the one place a
//! backend gets installed.

use flexi_logger::{FlexiLoggerError, Logger, LoggerHandle};

/// Log spec used when neither `--log-level` nor `RUST_LOG` is given.
pub const DEFAULT_LOG_SPEC: &str = "warn";

/// Starts logging to stderr.
///
/// An explicit `level` wins over `RUST_LOG`. The returned handle must stay
/// alive for as long as the process logs.
pub fn init_logging(level: Option<&str>) -> Result<LoggerHandle, FlexiLoggerError> {
    let logger = match level {
        Some(level) => Logger::try_with_str(level)?,
        None => Logger::try_with_env_or_str(DEFAULT_LOG_SPEC)?,
    };
    logger
        .log_to_stderr()
        .format(flexi_logger::default_format)
        .start()
}
