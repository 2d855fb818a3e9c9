//! Outbound effects of the session: user-facing notices and page navigation

use url::Url;

/// Fire-and-forget user-facing messages
pub trait Notifier: Send + Sync {
    fn success(&self, message: &str);
    fn error(&self, message: &str);
}

/// Writes notices to the log. Used when the host has no toast surface.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn success(&self, message: &str) {
        tracing::info!(notice = %message, "Session notice");
    }

    fn error(&self, message: &str) {
        tracing::warn!(notice = %message, "Session notice");
    }
}

/// Full-page navigation away from the application
pub trait Navigator: Send + Sync {
    fn navigate(&self, url: &Url);
}

impl<F> Navigator for F
where
    F: Fn(&Url) + Send + Sync,
{
    fn navigate(&self, url: &Url) {
        self(url)
    }
}
