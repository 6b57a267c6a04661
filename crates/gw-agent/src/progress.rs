/// Cooperative progress channel for long operations. Implementations must
/// not block or alter timing; the supervisor and pipeline call these around
/// their phases and otherwise ignore the reporter entirely.
pub trait ProgressReporter: Send + Sync {
    /// A long step began.
    fn begin(&self, text: &str);
    /// The most recently begun step completed.
    fn finish(&self, text: &str);
    /// Operator-facing message outside the begin/finish flow.
    fn note(&self, text: &str);
}

/// Discards everything. The default when the caller supplies nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn begin(&self, _text: &str) {}
    fn finish(&self, _text: &str) {}
    fn note(&self, _text: &str) {}
}

/// Routes progress through the log stream.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogProgress;

impl ProgressReporter for LogProgress {
    fn begin(&self, text: &str) {
        tracing::info!("{text}");
    }

    fn finish(&self, text: &str) {
        tracing::info!("{text}");
    }

    fn note(&self, text: &str) {
        tracing::info!("{text}");
    }
}
