//! Run-wide flags decided once at pipeline construction and threaded
//! through every stage, rather than re-read from the environment mid-run.

/// Behavioral flags that apply to an entire supervisor run.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// When true, collector stages log their decisions (match/drop/sample)
    /// at debug level instead of staying silent on the hot path.
    pub debug: bool,
    /// When true, the self-traffic suppressor stage is disabled so the
    /// tool's own exchanges with its configured remote sink are captured
    /// instead of filtered out. Used when developing against the sink
    /// itself.
    pub dogfood: bool,
}

impl RunOptions {
    /// Standard production run: no debug logging, self-traffic suppressed.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method to enable debug mode.
    #[must_use]
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Builder method to enable dogfood mode.
    #[must_use]
    pub fn with_dogfood(mut self, dogfood: bool) -> Self {
        self.dogfood = dogfood;
        self
    }
}
