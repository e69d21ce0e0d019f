use anyhow::{Context, Result};
use flexi_logger::{Logger, LoggerHandle};

const DEFAULT_LOG_SPEC: &str = "warn, wgpu_core=error, wgpu_hal=error, naga=error";
const VERBOSE_LOG_SPEC: &str = "info, labellens=debug, wgpu_core=error, wgpu_hal=error, naga=error";

/// Start logging to stderr. `RUST_LOG` overrides the built-in spec.
///
/// The returned handle must stay alive for as long as logging is needed.
pub fn init(verbose: bool) -> Result<LoggerHandle> {
    let spec = if verbose {
        VERBOSE_LOG_SPEC
    } else {
        DEFAULT_LOG_SPEC
    };
    Logger::try_with_env_or_str(spec)
        .context("invalid log specification")?
        .log_to_stderr()
        .start()
        .context("failed to start logger")
}
