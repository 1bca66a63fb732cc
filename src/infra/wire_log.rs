//! Raw traffic logging
//!
//! Frame bodies can be mirrored to a [`MessageLog`] sink for diagnosis. The
//! sink is best effort: implementations swallow their own failures and the
//! transport behaves identically with [`NoLog`].

/// Line-oriented diagnostic sink.
pub trait MessageLog: Send + Sync {
    fn write(&self, line: &str);
}

/// Forwards lines to `tracing` at trace level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLog;

impl MessageLog for TracingLog {
    fn write(&self, line: &str) {
        tracing::trace!(target: "lspwire::wire", "{}", line);
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoLog;

impl MessageLog for NoLog {
    fn write(&self, _line: &str) {}
}

impl<F> MessageLog for F
where
    F: Fn(&str) + Send + Sync,
{
    fn write(&self, line: &str) {
        self(line)
    }
}

/// Render a frame body for logging without failing on invalid UTF-8.
pub(crate) fn preview(direction: &str, body: &[u8]) -> String {
    format!("{} {}", direction, String::from_utf8_lossy(body))
}
