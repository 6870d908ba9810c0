//! Prometheus-backed metrics registry and snapshot helpers.
//!
//! # Design
//! - Encapsulates collector registration to keep the public API small.
//! - Exposes counters and gauges for playback sessions, buffering outcomes and
//!   archive extraction.

use std::sync::Arc;

use prometheus::core::Collector;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use serde::Serialize;

use crate::error::{Result, TelemetryError};

/// Prometheus-backed metrics registry shared across services.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    registry: Registry,
    sessions_started_total: IntCounter,
    active_sessions: IntGauge,
    buffering_outcomes_total: IntCounterVec,
    extractions_total: IntCounterVec,
    events_emitted_total: IntCounterVec,
}

/// Snapshot of selected gauges and counters for status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    /// Sessions created since start-up.
    pub sessions_started_total: u64,
    /// Sessions currently alive.
    pub active_sessions: i64,
    /// Buffering cycles that completed successfully.
    pub buffering_finished_total: u64,
    /// Archive extractions that succeeded (including reused outputs).
    pub extractions_succeeded_total: u64,
}

impl Metrics {
    /// Construct a new metrics registry with the standard collectors registered.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the Prometheus collectors cannot be built or
    /// registered.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let sessions_started_total = IntCounter::with_opts(Opts::new(
            "sessions_started_total",
            "Playback sessions created",
        ))
        .map_err(|source| collector_error("sessions_started_total", source))?;
        let active_sessions = IntGauge::with_opts(Opts::new(
            "active_sessions",
            "Playback sessions currently alive",
        ))
        .map_err(|source| collector_error("active_sessions", source))?;
        let buffering_outcomes_total = IntCounterVec::new(
            Opts::new(
                "buffering_outcomes_total",
                "Buffering cycles by terminal outcome",
            ),
            &["outcome"],
        )
        .map_err(|source| collector_error("buffering_outcomes_total", source))?;
        let extractions_total = IntCounterVec::new(
            Opts::new("extractions_total", "Archive extractions by status"),
            &["status"],
        )
        .map_err(|source| collector_error("extractions_total", source))?;
        let events_emitted_total = IntCounterVec::new(
            Opts::new("events_emitted_total", "Domain events emitted by type"),
            &["type"],
        )
        .map_err(|source| collector_error("events_emitted_total", source))?;

        register(&registry, "sessions_started_total", &sessions_started_total)?;
        register(&registry, "active_sessions", &active_sessions)?;
        register(&registry, "buffering_outcomes_total", &buffering_outcomes_total)?;
        register(&registry, "extractions_total", &extractions_total)?;
        register(&registry, "events_emitted_total", &events_emitted_total)?;

        Ok(Self {
            inner: Arc::new(MetricsInner {
                registry,
                sessions_started_total,
                active_sessions,
                buffering_outcomes_total,
                extractions_total,
                events_emitted_total,
            }),
        })
    }

    /// Record a newly created session.
    pub fn session_started(&self) {
        self.inner.sessions_started_total.inc();
        self.inner.active_sessions.inc();
    }

    /// Record a session that finished tearing down.
    pub fn session_closed(&self) {
        self.inner.active_sessions.dec();
    }

    /// Increment the buffering outcome counter (`finished`, `cancelled`, ...).
    pub fn inc_buffering_outcome(&self, outcome: &str) {
        self.inner
            .buffering_outcomes_total
            .with_label_values(&[outcome])
            .inc();
    }

    /// Increment the extraction counter for `status`.
    pub fn inc_extraction(&self, status: &str) {
        self.inner
            .extractions_total
            .with_label_values(&[status])
            .inc();
    }

    /// Increment the emitted event counter for the specific event type.
    pub fn inc_event(&self, event_type: &str) {
        self.inner
            .events_emitted_total
            .with_label_values(&[event_type])
            .inc();
    }

    /// Render the metrics registry using the Prometheus text exposition format.
    ///
    /// # Errors
    ///
    /// Returns an error if the metrics cannot be encoded or if the encoded
    /// buffer is not valid UTF-8.
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.inner.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|source| TelemetryError::MetricsEncode { source })?;
        String::from_utf8(buffer).map_err(|source| TelemetryError::MetricsUtf8 { source })
    }

    /// Take a point-in-time snapshot of the most relevant gauges and counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let extractions = &self.inner.extractions_total;
        MetricsSnapshot {
            sessions_started_total: self.inner.sessions_started_total.get(),
            active_sessions: self.inner.active_sessions.get(),
            buffering_finished_total: self
                .inner
                .buffering_outcomes_total
                .with_label_values(&["finished"])
                .get(),
            extractions_succeeded_total: extractions.with_label_values(&["extracted"]).get()
                + extractions.with_label_values(&["already_extracted"]).get(),
        }
    }
}

const fn collector_error(name: &'static str, source: prometheus::Error) -> TelemetryError {
    TelemetryError::MetricsCollector { name, source }
}

fn register<C>(registry: &Registry, name: &'static str, collector: &C) -> Result<()>
where
    C: Collector + Clone + 'static,
{
    registry
        .register(Box::new(collector.clone()))
        .map_err(|source| TelemetryError::MetricsRegister { name, source })
}
