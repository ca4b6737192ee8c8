//! Error taxonomy for the run supervisor, per spec.md §7.

use thiserror::Error;

/// Result type alias using [`SupervisorError`].
pub type Result<T> = std::result::Result<T, SupervisorError>;

/// Errors the supervisor can encounter assembling or running a capture.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// Invalid regex, invalid output location, incompatible rate options.
    /// Fatal, reported before any capture starts.
    #[error("configuration error: {0}")]
    Configuration(#[from] flowtap_types::error::Error),

    /// Failure to open or read a capture handle. Fatal for that pipeline.
    #[error(transparent)]
    Capture(#[from] flowtap_capture::CaptureError),

    /// A terminal sink failed to construct or to accept writes persistently.
    #[error(transparent)]
    Collector(#[from] flowtap_collector::CollectorError),

    /// Failure to create or look up the remote trace identifier. Fatal for
    /// the remote sink; fatal overall if no local sink is configured.
    #[error("remote trace resolution failed: {0}")]
    TraceResolution(String),

    /// The bracketed subprocess exited with a non-zero status. The
    /// supervisor propagates this code as its own exit status.
    #[error("subprocess exited with status {0}")]
    SubprocessFailed(i32),

    /// Spawning the subprocess itself failed (not found, permission, etc).
    #[error("failed to launch subprocess: {0}")]
    SubprocessLaunch(String),
}
