//! Structured logging collaborator injected into the session owner.

use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Severity-leveled structured logging, injected so tests can capture or
/// silence session output without touching global logger state.
pub trait SessionLogger: Send + Sync {
    fn info(&self, message: &str, fields: &[(&str, &str)]);
    fn debug(&self, message: &str, fields: &[(&str, &str)]);
    fn warn(&self, message: &str, fields: &[(&str, &str)]);
    fn error(&self, message: &str, fields: &[(&str, &str)]);
}

fn render_fields(fields: &[(&str, &str)]) -> String {
    fields
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Forwards to the `tracing` crate's macros.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSessionLogger;

impl SessionLogger for TracingSessionLogger {
    fn info(&self, message: &str, fields: &[(&str, &str)]) {
        info!(fields = %render_fields(fields), "{message}");
    }

    fn debug(&self, message: &str, fields: &[(&str, &str)]) {
        debug!(fields = %render_fields(fields), "{message}");
    }

    fn warn(&self, message: &str, fields: &[(&str, &str)]) {
        warn!(fields = %render_fields(fields), "{message}");
    }

    fn error(&self, message: &str, fields: &[(&str, &str)]) {
        error!(fields = %render_fields(fields), "{message}");
    }
}

/// Initializes the global `tracing` subscriber. `EnvFilter` defaults to
/// `psx_fix_client=info` unless `RUST_LOG` is set. Call once, at process
/// startup.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("psx_fix_client=info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .ok();
}

#[cfg(any(test, feature = "test-util"))]
pub mod test_support {
    use super::SessionLogger;
    use std::sync::Mutex;

    /// Captures every log line for assertions instead of printing.
    #[derive(Default)]
    pub struct RecordingLogger {
        pub lines: Mutex<Vec<(String, String)>>,
    }

    impl SessionLogger for RecordingLogger {
        fn info(&self, message: &str, _fields: &[(&str, &str)]) {
            self.lines.lock().unwrap().push(("info".into(), message.into()));
        }
        fn debug(&self, message: &str, _fields: &[(&str, &str)]) {
            self.lines.lock().unwrap().push(("debug".into(), message.into()));
        }
        fn warn(&self, message: &str, _fields: &[(&str, &str)]) {
            self.lines.lock().unwrap().push(("warn".into(), message.into()));
        }
        fn error(&self, message: &str, _fields: &[(&str, &str)]) {
            self.lines.lock().unwrap().push(("error".into(), message.into()));
        }
    }
}
