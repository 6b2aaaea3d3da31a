//! Process-wide logging setup shared by the vluks binaries.
//!
//! Library code only talks to the `log` facade; installing a backend is the
//! binary's decision and never affects control flow.

use env_logger::{Builder, Env};
use std::io::Write;

/// Output shape for log records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable lines for an operator terminal.
    #[default]
    Plain,
    /// One JSON object per line, for journald/collectors.
    Json,
}

/// Install the logger once. `RUST_LOG` takes precedence over `default_level`.
///
/// Repeated calls are ignored so tests and binaries can both call it.
pub fn init(default_level: &str, format: LogFormat) {
    let mut builder = Builder::from_env(Env::default().default_filter_or(default_level));
    match format {
        LogFormat::Plain => {
            builder.format_timestamp_secs();
        }
        LogFormat::Json => {
            builder.format(|buf, record| {
                let line = serde_json::json!({
                    "ts": chrono::Utc::now().to_rfc3339(),
                    "level": record.level().as_str(),
                    "target": record.target(),
                    "msg": record.args().to_string(),
                });
                writeln!(buf, "{line}")
            });
        }
    }
    let _ = builder.try_init();
}
