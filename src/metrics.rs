//! Fetch-phase counters.
//!
//! Only the `metrics` facade is used here. Without an installed recorder
//! every call is a no-op, so embedding applications decide whether and how
//! to export.

/// Counters recorded by the ingestion orchestrator.
pub struct FetchMetrics;

impl FetchMetrics {
    pub fn record_success(source_type: &'static str) {
        ::metrics::counter!("kpi_fetch_success_total", "source" => source_type).increment(1);
    }

    pub fn record_failure(kind: &'static str) {
        ::metrics::counter!("kpi_fetch_failure_total", "kind" => kind).increment(1);
    }

    pub fn record_placeholder() {
        ::metrics::counter!("kpi_placeholders_total").increment(1);
    }

    pub fn record_skipped() {
        ::metrics::counter!("kpi_fetch_skipped_total").increment(1);
    }

    pub fn record_unknown_aliases(hits: usize) {
        if hits > 0 {
            ::metrics::counter!("kpi_mapping_unknown_total").increment(hits as u64);
        }
    }
}
