//! Lightweight operator-facing counters, in the spirit of the teacher's
//! per-repository stats: a handful of named gauges/counters recorded
//! through the `metrics` facade rather than a bespoke struct, so whatever
//! exporter the deployment wires up (statsd, Prometheus, ...) just works.

pub const STASH_SIZE: &str = "oram_proxy_stash_size";
pub const STASH_OVERFLOW_TOTAL: &str = "oram_proxy_stash_overflow_total";
pub const WRITE_BACK_BATCHES_TOTAL: &str = "oram_proxy_write_back_batches_total";
pub const WRITE_BACK_LATENCY_SECONDS: &str = "oram_proxy_write_back_latency_seconds";
pub const FLUSH_TOTAL: &str = "oram_proxy_flush_total";
pub const INFLIGHT_PATHS: &str = "oram_proxy_inflight_paths";

pub fn record_stash_size(len: usize) {
    metrics::gauge!(STASH_SIZE, len as f64);
}

pub fn record_stash_overflow() {
    metrics::counter!(STASH_OVERFLOW_TOTAL, 1);
}

pub fn record_flush() {
    metrics::counter!(FLUSH_TOTAL, 1);
}

pub fn record_write_back_batch(latency_seconds: f64) {
    metrics::counter!(WRITE_BACK_BATCHES_TOTAL, 1);
    metrics::histogram!(WRITE_BACK_LATENCY_SECONDS, latency_seconds);
}

pub fn record_inflight_paths(count: u64) {
    metrics::gauge!(INFLIGHT_PATHS, count as f64);
}
