use std::sync::Arc;

// ACTIVE-MESSAGE RUNTIME
// ================================================================================================

/// The platform-specific active-message runtime the asynchronous driver advances during replay.
///
/// The engine only depends on this seam: a process-wide attach/shutdown lifecycle and a
/// progress hook. The attachment is scoped; dropping the [`AmAttachment`] shuts the runtime
/// down before the analyzer returns.
pub trait AmRuntime: Send + Sync {
    /// Makes progress on pending active messages.
    fn advance(&self);

    /// Tears the runtime down. Called exactly once, from the attachment guard.
    fn shutdown(&self);
}

/// Scoped attachment of an active-message runtime.
pub struct AmAttachment {
    runtime: Arc<dyn AmRuntime>,
}

impl AmAttachment {
    /// Attaches the runtime for the duration of the analysis.
    pub fn new(runtime: Arc<dyn AmRuntime>) -> Self {
        Self { runtime }
    }
}

impl Drop for AmAttachment {
    fn drop(&mut self) {
        self.runtime.shutdown();
    }
}

/// A runtime that does nothing; the default when asynchronous processing is enabled without a
/// platform runtime.
#[derive(Debug, Default)]
pub struct NoopAmRuntime;

impl AmRuntime for NoopAmRuntime {
    fn advance(&self) {}

    fn shutdown(&self) {}
}
