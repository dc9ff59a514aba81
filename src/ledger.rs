use crate::constants::UNKNOWN_SOURCE_DATE;
use crate::error::Result;
use crate::storage::write_json_atomic;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::warn;

/// Per-KPI fetch metadata, rewritten in full at the end of each run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FetchLedger {
    #[serde(rename = "lastRun", default, skip_serializing_if = "Option::is_none")]
    pub last_run: Option<String>,
    #[serde(default)]
    pub kpis: BTreeMap<String, LedgerEntry>,
}

/// Last known fetch metadata of one KPI.
///
/// `source_date` holds the provider date only after a successful fetch or a
/// skip. A failed fetch stores `"Unknown"` even when the provider reported a
/// date, so the next run refetches instead of skipping a KPI that is still a
/// placeholder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub url: String,
    #[serde(default = "unknown_source_date")]
    pub source_date: String,
    #[serde(default)]
    pub last_fetch: String,
}

fn unknown_source_date() -> String {
    UNKNOWN_SOURCE_DATE.to_string()
}

impl FetchLedger {
    /// A missing or unreadable ledger starts empty, which forces a full refetch.
    pub fn load(path: &Path) -> Self {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(_) => return Self::default(),
        };
        serde_json::from_str(&content).unwrap_or_else(|e| {
            warn!(path = %path.display(), error = %e, "Unreadable fetch ledger; starting fresh");
            Self::default()
        })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        write_json_atomic(path, self)
    }

    pub fn get(&self, kpi_id: &str) -> Option<&LedgerEntry> {
        self.kpis.get(kpi_id)
    }

    pub fn record(&mut self, kpi_id: &str, entry: LedgerEntry) {
        self.kpis.insert(kpi_id.to_string(), entry);
    }
}
