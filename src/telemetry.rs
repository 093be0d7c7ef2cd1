//! Logging setup and standard spans.

use tracing_subscriber::EnvFilter;

/// Output format for [`init`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable lines.
    Pretty,
    /// One JSON object per event.
    Json,
}

impl LogFormat {
    /// `SLIRCBOT_LOG_FORMAT=json` selects JSON; anything else is pretty.
    pub fn from_env() -> Self {
        match std::env::var("SLIRCBOT_LOG_FORMAT") {
            Ok(v) if v.eq_ignore_ascii_case("json") => Self::Json,
            _ => Self::Pretty,
        }
    }
}

/// Install the global subscriber. `RUST_LOG` overrides the `info` default.
///
/// Only the binary calls this; the library never installs a subscriber.
pub fn init(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    match format {
        LogFormat::Pretty => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Standardized span constructors.
pub mod spans {
    use tracing::{Span, debug_span, info_span};

    /// Span for one connection's tick.
    pub fn connection(name: &str, network: &str) -> Span {
        info_span!("connection", name = %name, network = %network)
    }

    /// Span for one event fan-out.
    pub fn dispatch(event: &'static str, connection: Option<&str>) -> Span {
        if let Some(connection) = connection {
            debug_span!("dispatch", event, connection = %connection)
        } else {
            debug_span!("dispatch", event)
        }
    }

    /// Span for one timer callback.
    pub fn timer(id: u64, label: Option<&str>) -> Span {
        debug_span!("timer", id, label = label.unwrap_or("-"))
    }
}
