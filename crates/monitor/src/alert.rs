//! Alert sink interface.
//!
//! Fan-out to channels (mail, chat, pager) lives outside the core; the
//! monitor only pushes (source, message) pairs into this trait.

use tracing::warn;

/// Receives threshold and health alerts from the monitor.
pub trait AlertSink: Send + Sync {
    fn alert(&self, source: &str, message: &str);
}

/// Default sink: structured warning logs.
#[derive(Debug, Default)]
pub struct LogAlertSink;

impl AlertSink for LogAlertSink {
    fn alert(&self, source: &str, message: &str) {
        warn!(source = %source, message = %message, "ALERT");
    }
}
