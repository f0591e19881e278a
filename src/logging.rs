//! Process-wide tracing setup.
//!
//! `RUST_LOG` takes precedence when set; otherwise the default filter is
//! `info` for our own crate and `warn` for dependencies, escalated to
//! `debug` when `MCP_DEBUG` is truthy (§6).

use std::sync::Once;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::FormatTime;

static INIT: Once = Once::new();

struct CompactTime;

impl FormatTime for CompactTime {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", chrono::Local::now().format("%H:%M:%S%.3f"))
    }
}

/// Initialize the global subscriber. Safe to call more than once; only the
/// first call takes effect.
pub fn init() {
    INIT.call_once(|| {
        let filter = if std::env::var("RUST_LOG").is_ok() {
            EnvFilter::from_default_env()
        } else if crate::config::debug_logging_enabled() {
            EnvFilter::new("debug,rusqlite=warn")
        } else {
            EnvFilter::new("info,rusqlite=warn")
        };

        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_timer(CompactTime)
            .with_target(true)
            // The `server` subcommand speaks JSON-RPC over stdio; any log
            // line on stdout would corrupt that stream, so logging always
            // goes to stderr regardless of which subcommand is running.
            .with_writer(std::io::stderr)
            .init();
    });
}
