//! Tracing setup, grounded directly on the teacher's `telemetry` module.
//!
//! The default build only wires `tracing-subscriber`'s `EnvFilter` + `fmt`
//! layers (honoring `RUST_LOG`); the teacher's full OpenTelemetry OTLP
//! exporter pipeline is reduced here to span/log plumbing appropriate for a
//! library with no HTTP service of its own, and is kept behind the
//! `telemetry` cargo feature the teacher also gates its OTEL code behind.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Installs a global `tracing` subscriber. Call once at process startup;
/// safe to call from tests via `try_init`, which ignores a "already set"
/// error.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .try_init();
}

#[cfg(feature = "telemetry")]
pub mod otel {
    //! Placeholder resource/exporter wiring for deployments that want OTLP
    //! export. Left intentionally minimal: this crate has no HTTP service
    //! whose request spans would anchor a trace, so there is no equivalent
    //! of the teacher's per-request `Resource` semantic conventions to
    //! reproduce.

    pub fn service_name() -> &'static str {
        env!("CARGO_PKG_NAME")
    }
}
