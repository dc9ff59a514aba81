use crate::apis::{AdapterContext, AdapterRegistry};
use crate::config::Config;
use crate::constants::{COUNTRIES_FILE, COUNTRY_MAP_FILE, COUNTRY_PENDING_FILE, DESCRIPTORS_FILE, LEDGER_FILE, UNKNOWN_SOURCE_DATE};
use crate::country::{load_aliases, load_pending, load_registry, CountryResolver, MappingTally};
use crate::descriptor::{load_descriptors, KpiDescriptor, RejectedDescriptor, SourceType};
use crate::error::{FetchFailure, Result};
use crate::freshness::should_fetch;
use crate::infra::HttpClientPort;
use crate::ledger::{FetchLedger, LedgerEntry};
use crate::metrics::FetchMetrics;
use crate::storage::{write_json_atomic, DatasetStore, PlaceholderAction};
use anyhow::Context;
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Human-facing statistics of one fetch run, folded from per-KPI outcomes.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub countries_loaded: usize,
    pub kpis_loaded: usize,
    pub saved_records: usize,
    /// Successful fetches keyed by source type.
    pub successes: BTreeMap<String, usize>,
    pub mapping_ok: usize,
    pub mapping_dropped: usize,
    pub mapping_pending: usize,
    pub new_pending: usize,
    pub placeholders: usize,
    pub kept_stale: usize,
    pub skipped: usize,
    pub rejected: usize,
    pub errors: usize,
}

impl RunReport {
    pub fn successes_for(&self, source_type: SourceType) -> usize {
        self.successes.get(source_type.as_str()).copied().unwrap_or(0)
    }

    fn apply_mapping(&mut self, tally: &MappingTally) {
        self.mapping_ok = tally.mapped;
        self.mapping_dropped = tally.dropped;
        self.mapping_pending = tally.unknown_hits;
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "==== KPI fetch summary ====")?;
        writeln!(f, "Countries loaded:     {}", self.countries_loaded)?;
        writeln!(f, "KPIs processed:       {}", self.kpis_loaded)?;
        writeln!(f, "Saved records:        {}", self.saved_records)?;
        writeln!(f, "Successes by source:")?;
        for source_type in SourceType::ALL {
            writeln!(f, "  {:<20}{}", source_type.as_str(), self.successes_for(source_type))?;
        }
        writeln!(f, "Mapping OK:           {}", self.mapping_ok)?;
        writeln!(f, "Mapping dropped:      {}", self.mapping_dropped)?;
        writeln!(f, "Mapping pending:      {}", self.mapping_pending)?;
        writeln!(f, "New pending aliases:  {}", self.new_pending)?;
        writeln!(f, "Placeholders created: {}", self.placeholders)?;
        writeln!(f, "Stale data kept:      {}", self.kept_stale)?;
        writeln!(f, "Skipped (up-to-date): {}", self.skipped)?;
        writeln!(f, "Rejected descriptors: {}", self.rejected)?;
        write!(f, "Errors:               {}", self.errors)
    }
}

/// What happened to one KPI.
#[derive(Debug)]
enum KpiStatus {
    Saved { source_type: SourceType, rows: usize },
    Skipped,
    Failed(PlaceholderAction),
}

/// Drives descriptors through freshness, adapters and the placeholder policy.
pub struct Orchestrator {
    config: Config,
    adapters: AdapterRegistry,
    store: DatasetStore,
}

impl Orchestrator {
    pub fn new(config: Config, adapters: AdapterRegistry) -> Self {
        let store = DatasetStore::new(config.paths.data_dir.clone(), config.paths.pending_dir());
        Self {
            config,
            adapters,
            store,
        }
    }

    /// Orchestrator with the built-in adapters over `http`.
    pub fn with_http(config: Config, http: Arc<dyn HttpClientPort>) -> Self {
        let adapters = AdapterRegistry::with_defaults(http, &config);
        Self::new(config, adapters)
    }

    /// Fetch every KPI (or only `only`), then persist the ledger and the
    /// pending alias table. Fails only when required meta inputs are missing
    /// or the end-of-run writes fail.
    #[instrument(skip(self, only))]
    pub async fn run(&self, only: Option<&[String]>) -> Result<RunReport> {
        let mut descriptors = load_descriptors(&self.config.meta_file(DESCRIPTORS_FILE))?;
        let registry = load_registry(&self.config.meta_file(COUNTRIES_FILE))?;
        let aliases = load_aliases(&self.config.meta_file(COUNTRY_MAP_FILE))?;
        let pending_path = self.config.meta_file(COUNTRY_PENDING_FILE);
        let mut pending = load_pending(&pending_path);
        let ledger_path = self.config.data_file(LEDGER_FILE);
        let mut ledger = FetchLedger::load(&ledger_path);

        if let Some(ids) = only {
            descriptors.retain_ids(ids);
            for id in ids {
                if !descriptors.descriptors.iter().any(|d| &d.id == id) {
                    warn!(kpi = %id, "Requested KPI not found among valid descriptors");
                }
            }
        }

        let resolver = CountryResolver::new(registry, &aliases);
        let ctx = AdapterContext {
            resolver: &resolver,
            store: &self.store,
        };

        let mut report = RunReport {
            countries_loaded: resolver.country_count(),
            kpis_loaded: descriptors.len(),
            rejected: descriptors.rejected.len(),
            ..Default::default()
        };
        info!(
            countries = report.countries_loaded,
            kpis = report.kpis_loaded,
            "Starting KPI fetch run"
        );

        for rejected in &descriptors.rejected {
            self.handle_rejected(rejected, &mut ledger, &mut report);
        }

        let mut mapping = MappingTally::default();
        for descriptor in &descriptors.descriptors {
            match self.process_kpi(descriptor, &ctx, &ledger, &mut mapping).await {
                Ok((status, entry)) => {
                    fold_status(&mut report, &status);
                    ledger.record(&descriptor.id, entry);
                }
                Err(e) => {
                    error!(kpi = %descriptor.id, error = ?e, "KPI processing failed");
                    report.errors += 1;
                    ledger.record(&descriptor.id, self.fallback_ledger_entry(descriptor));
                }
            }
        }

        report.apply_mapping(&mapping);
        report.new_pending = pending.absorb(&mapping.unknown);
        FetchMetrics::record_unknown_aliases(mapping.unknown_hits);
        if report.new_pending > 0 {
            warn!(count = report.new_pending, "New unmapped country aliases queued");
        }

        ledger.last_run = Some(now_timestamp());
        ledger.save(&ledger_path)?;
        write_json_atomic(&pending_path, &pending)?;

        info!(
            saved_records = report.saved_records,
            placeholders = report.placeholders,
            skipped = report.skipped,
            errors = report.errors,
            "KPI fetch run finished"
        );
        Ok(report)
    }

    #[instrument(
        skip(self, descriptor, ctx, ledger, mapping),
        fields(kpi = %descriptor.id, title = descriptor.title.as_deref().unwrap_or(""))
    )]
    async fn process_kpi(
        &self,
        descriptor: &KpiDescriptor,
        ctx: &AdapterContext<'_>,
        ledger: &FetchLedger,
        mapping: &mut MappingTally,
    ) -> anyhow::Result<(KpiStatus, LedgerEntry)> {
        let source_type = descriptor.source_type();
        let Some(adapter) = self.adapters.get(source_type) else {
            let failure = FetchFailure::Format(format!("no adapter registered for {source_type}"));
            let action = self.apply_placeholder(&descriptor.id, &failure)?;
            return Ok((
                KpiStatus::Failed(action),
                self.fallback_ledger_entry(descriptor),
            ));
        };

        let source_date = adapter.source_date(descriptor).await;
        let entry = LedgerEntry {
            source: self.source_label(descriptor),
            url: descriptor
                .source_url
                .clone()
                .unwrap_or_else(|| adapter.source_url(descriptor)),
            source_date: source_date.clone().unwrap_or_else(|| UNKNOWN_SOURCE_DATE.to_string()),
            last_fetch: now_timestamp(),
        };

        if !should_fetch(&descriptor.id, source_date.as_deref(), ledger) {
            info!(source_date = %entry.source_date, "Up to date, skipping");
            return Ok((KpiStatus::Skipped, entry));
        }

        let fetched = adapter.fetch(descriptor, ctx).await;
        mapping.merge(&fetched.mapping);

        let failure = match fetched.result {
            Ok(observations) if !observations.is_empty() => {
                self.store
                    .save_dataset(&descriptor.id, &observations)
                    .with_context(|| format!("saving dataset for {}", descriptor.id))?;
                info!(rows = observations.len(), source = %source_type, "KPI saved");
                return Ok((
                    KpiStatus::Saved {
                        source_type,
                        rows: observations.len(),
                    },
                    entry,
                ));
            }
            Ok(_) => FetchFailure::Empty("adapter returned no observations".to_string()),
            Err(failure) => failure,
        };

        let action = self.apply_placeholder(&descriptor.id, &failure)?;
        // Failed fetches are always retried next run.
        let entry = LedgerEntry {
            source_date: UNKNOWN_SOURCE_DATE.to_string(),
            ..entry
        };
        Ok((KpiStatus::Failed(action), entry))
    }

    fn apply_placeholder(&self, kpi_id: &str, failure: &FetchFailure) -> anyhow::Result<PlaceholderAction> {
        warn!(kpi = kpi_id, kind = failure.kind(), %failure, "Fetch failed");
        FetchMetrics::record_failure(failure.kind());
        let action = self
            .store
            .keep_or_placeholder(kpi_id, &failure.to_string())
            .with_context(|| format!("applying placeholder policy for {kpi_id}"))?;
        Ok(action)
    }

    fn handle_rejected(&self, rejected: &RejectedDescriptor, ledger: &mut FetchLedger, report: &mut RunReport) {
        let Some(id) = &rejected.id else {
            debug!(error = %rejected.error, "Rejected descriptor without identifier");
            return;
        };
        report.errors += 1;
        let failure = FetchFailure::Format(rejected.error.to_string());
        match self.apply_placeholder(id, &failure) {
            Ok(action) => fold_placeholder(report, action),
            Err(e) => error!(kpi = %id, error = ?e, "Placeholder for rejected descriptor failed"),
        }
        ledger.record(
            id,
            LedgerEntry {
                source: "invalid".to_string(),
                url: String::new(),
                source_date: UNKNOWN_SOURCE_DATE.to_string(),
                last_fetch: now_timestamp(),
            },
        );
    }

    fn source_label(&self, descriptor: &KpiDescriptor) -> String {
        descriptor
            .source_label
            .clone()
            .unwrap_or_else(|| descriptor.source_type().as_str().to_string())
    }

    /// Entry for a KPI whose outcome carries no source date.
    fn fallback_ledger_entry(&self, descriptor: &KpiDescriptor) -> LedgerEntry {
        let url = descriptor.source_url.clone().unwrap_or_else(|| {
            self.adapters
                .get(descriptor.source_type())
                .map(|a| a.source_url(descriptor))
                .unwrap_or_default()
        });
        LedgerEntry {
            source: self.source_label(descriptor),
            url,
            source_date: UNKNOWN_SOURCE_DATE.to_string(),
            last_fetch: now_timestamp(),
        }
    }
}

fn fold_status(report: &mut RunReport, status: &KpiStatus) {
    match status {
        KpiStatus::Saved { source_type, rows } => {
            report.saved_records += rows;
            *report
                .successes
                .entry(source_type.as_str().to_string())
                .or_insert(0) += 1;
            FetchMetrics::record_success(source_type.as_str());
        }
        KpiStatus::Skipped => {
            report.skipped += 1;
            FetchMetrics::record_skipped();
        }
        KpiStatus::Failed(action) => fold_placeholder(report, *action),
    }
}

fn fold_placeholder(report: &mut RunReport, action: PlaceholderAction) {
    match action {
        PlaceholderAction::Created => {
            report.placeholders += 1;
            FetchMetrics::record_placeholder();
        }
        PlaceholderAction::KeptStale => report.kept_stale += 1,
    }
}

fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_display_lists_every_source_type() {
        let mut report = RunReport {
            countries_loaded: 195,
            kpis_loaded: 3,
            ..Default::default()
        };
        fold_status(
            &mut report,
            &KpiStatus::Saved {
                source_type: SourceType::TabularApi,
                rows: 40,
            },
        );
        fold_status(&mut report, &KpiStatus::Skipped);
        fold_placeholder(&mut report, PlaceholderAction::Created);

        let text = report.to_string();
        assert!(text.contains("Countries loaded:     195"));
        assert!(text.contains("  tabular-api         1"));
        assert!(text.contains("  static-delimited    0"));
        assert!(text.contains("Saved records:        40"));
        assert!(text.contains("Skipped (up-to-date): 1"));
        assert!(text.contains("Placeholders created: 1"));
    }
}
