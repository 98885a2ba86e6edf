//! Prometheus metrics for the import/fork-choice kernel.
//!
//! All collectors live in a crate-local registry; hosts scrape it through
//! [`gather`].

use once_cell::sync::Lazy;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

pub static PROM_REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

fn register<C: prometheus::core::Collector + Clone + 'static>(collector: C) -> C {
    // ignore AlreadyReg when tests build several chains in one process
    let _ = PROM_REGISTRY.register(Box::new(collector.clone()));
    collector
}

pub static PROM_TANDEM_IMPORTS: Lazy<IntCounterVec> = Lazy::new(|| {
    register(
        IntCounterVec::new(
            Opts::new("tandem_imports_total", "Block import attempts by result"),
            &["result"],
        )
        .expect("create imports counter"),
    )
});

pub static PROM_TANDEM_IMPORT_SECONDS: Lazy<Histogram> = Lazy::new(|| {
    register(
        Histogram::with_opts(HistogramOpts::new(
            "tandem_import_duration_seconds",
            "Wall time of one import call",
        ))
        .expect("create import histogram"),
    )
});

pub static PROM_TANDEM_REORGS: Lazy<IntCounter> = Lazy::new(|| {
    register(
        IntCounter::new("tandem_reorgs_total", "Accepted re-branches").expect("create reorg counter"),
    )
});

pub static PROM_TANDEM_REORG_DEPTH_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register(
        IntCounter::new(
            "tandem_reorg_depth_blocks_total",
            "Cumulative depth of accepted re-branches",
        )
        .expect("create reorg depth counter"),
    )
});

pub static PROM_TANDEM_HEIGHT: Lazy<IntGauge> = Lazy::new(|| {
    register(IntGauge::new("tandem_best_height", "Published best height").expect("create height gauge"))
});

pub static PROM_TANDEM_TEMPLATES: Lazy<IntCounterVec> = Lazy::new(|| {
    register(
        IntCounterVec::new(
            Opts::new("tandem_templates_built_total", "Block templates built by seal"),
            &["seal"],
        )
        .expect("create template counter"),
    )
});

pub static PROM_TANDEM_RECOVERIES: Lazy<IntCounterVec> = Lazy::new(|| {
    register(
        IntCounterVec::new(
            Opts::new("tandem_recoveries_total", "Recovery walks by kind and outcome"),
            &["kind", "outcome"],
        )
        .expect("create recovery counter"),
    )
});

/// Encode the registry in the Prometheus text format.
pub fn gather() -> String {
    let encoder = TextEncoder::new();
    let metric_families = PROM_REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).ok();
    String::from_utf8_lossy(&buffer).into_owned()
}
