//! Host registry and dispatch metrics.
//!
//! Instruments are created lazily from the global meter, so `init_metrics` has to run first.

use once_cell::sync::Lazy;
use opentelemetry::metrics::{Counter, Histogram, Meter};

#[derive(Clone, Debug)]
pub struct HostMetrics {
    /// Labelled with `outcome` = ok | not_found | backend | storage | motif.
    pub queries_total: Counter<u64>,
    pub query_latency_ms: Histogram<f64>,
    /// Labelled with `source` = manifest | catalog.
    pub discovery_warnings_total: Counter<u64>,
    pub hosts_provisioned_total: Counter<u64>,
    pub uploads_total: Counter<u64>,
    pub records_swept_total: Counter<u64>,
    pub registry_reloads_total: Counter<u64>,
}

static HOST_METER: Lazy<Meter> = Lazy::new(|| opentelemetry::global::meter("motif_host"));

pub static HOST_METRICS: Lazy<HostMetrics> = Lazy::new(|| HostMetrics {
    queries_total: HOST_METER.u64_counter("motif_queries_total").with_description("Motif queries dispatched, by outcome").build(),
    query_latency_ms: HOST_METER
        .f64_histogram("motif_query_latency_ms")
        .with_description("Latency from host resolution to embeddings returned (ms)")
        .with_unit("ms")
        .build(),
    discovery_warnings_total: HOST_METER
        .u64_counter("motif_discovery_warnings_total")
        .with_description("Discovery entries skipped under the best-effort policy")
        .build(),
    hosts_provisioned_total: HOST_METER
        .u64_counter("motif_hosts_provisioned_total")
        .with_description("Manifest hosts newly written to the record store")
        .build(),
    uploads_total: HOST_METER.u64_counter("motif_uploads_total").with_description("Temporary host uploads accepted").build(),
    records_swept_total: HOST_METER
        .u64_counter("motif_records_swept_total")
        .with_description("Expired host records physically removed")
        .build(),
    registry_reloads_total: HOST_METER
        .u64_counter("motif_registry_reloads_total")
        .with_description("Atomic registry swaps after a manifest change")
        .build(),
});
