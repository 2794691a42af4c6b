//! Pipeline Metrics
//!
//! Self-instrumentation of the convergence engine. Exposed on the operator's
//! `/metrics` endpoint alongside the process defaults.

use crate::error::Result;
use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry};

/// Counters and histograms for the event pipeline and convergence loop
#[derive(Clone)]
pub struct PipelineMetrics {
    /// Events seen, by kind and result (forwarded, filtered, unregistered, unmapped)
    pub events: IntCounterVec,
    /// Convergence runs, by result (succeeded, requeued, fatal)
    pub reconciles: IntCounterVec,
    /// Wall time of one convergence run
    pub reconcile_duration: Histogram,
    /// Events dropped because the ingress channel was full
    pub overflows: IntCounter,
    /// Full resyncs, by reason (periodic, overflow)
    pub resyncs: IntCounterVec,
}

impl PipelineMetrics {
    pub fn new() -> Result<Self> {
        Ok(Self {
            events: IntCounterVec::new(
                Opts::new("storagecluster_events_total", "Watch events seen by the dispatcher"),
                &["kind", "result"],
            )?,
            reconciles: IntCounterVec::new(
                Opts::new("storagecluster_reconcile_total", "Convergence runs by result"),
                &["result"],
            )?,
            reconcile_duration: Histogram::with_opts(
                HistogramOpts::new(
                    "storagecluster_reconcile_duration_seconds",
                    "Duration of convergence runs",
                )
                .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
            )?,
            overflows: IntCounter::new(
                "storagecluster_event_queue_overflow_total",
                "Events dropped on a full ingress channel",
            )?,
            resyncs: IntCounterVec::new(
                Opts::new("storagecluster_resyncs_total", "Full resyncs by reason"),
                &["reason"],
            )?,
        })
    }

    /// Register every collector with `registry`
    pub fn register(&self, registry: &Registry) -> Result<()> {
        registry.register(Box::new(self.events.clone()))?;
        registry.register(Box::new(self.reconciles.clone()))?;
        registry.register(Box::new(self.reconcile_duration.clone()))?;
        registry.register(Box::new(self.overflows.clone()))?;
        registry.register(Box::new(self.resyncs.clone()))?;
        Ok(())
    }

    pub fn event(&self, kind: &str, result: &str) {
        self.events.with_label_values(&[kind, result]).inc();
    }

    pub fn reconcile(&self, result: &str) {
        self.reconciles.with_label_values(&[result]).inc();
    }

    pub fn resync(&self, reason: &str) {
        self.resyncs.with_label_values(&[reason]).inc();
    }
}
