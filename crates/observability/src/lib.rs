//! Tracing and logging setup shared by farewatch binaries.

/// Initialize process-wide logging.
///
/// Format comes from `FAREWATCH_LOG_FORMAT` (`json` or `pretty`), filtering
/// from `RUST_LOG`. Safe to call multiple times; later calls are no-ops.
pub fn init() {
    tracing::init(tracing::LogFormat::from_env());
}

/// Tracing configuration (filters, layers).
pub mod tracing;

pub use self::tracing::LogFormat;
