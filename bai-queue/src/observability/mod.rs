pub mod metrics;

pub use metrics::{GlobalMetrics, JobTypeMetrics, LiveMetrics, MetricsSnapshot};

/// Install a global `tracing` subscriber for the process.
///
/// Filtering comes from `RUST_LOG` (default `info`). Set `BAI_QUEUE_LOG_JSON=1`
/// for JSON lines instead of the human-readable format. Safe to call more
/// than once; later calls are no-ops.
#[cfg(feature = "tracing-basic")]
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("BAI_QUEUE_LOG_JSON")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}
