use crate::constants::DATASET_CSV_HEADER;
use crate::error::{KpiError, Result};
use crate::types::{DatasetFile, DatasetRow, Observation};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

static UNSAFE_FILENAME_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^a-zA-Z0-9_.-]").expect("valid filename pattern"));

const SAFE_FILENAME_MAX: usize = 150;
const SIDE_ARTIFACT_NAME_MAX: usize = 180;

/// Replace everything outside `[A-Za-z0-9_.-]` with `_` and cap the length.
pub fn safe_filename(text: &str) -> String {
    UNSAFE_FILENAME_CHARS
        .replace_all(text, "_")
        .chars()
        .take(SAFE_FILENAME_MAX)
        .collect()
}

/// Write to a sibling temp file, then rename over the target so readers
/// never observe a partially written file.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let mut tmp: OsString = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, bytes)?;
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }
    Ok(())
}

pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let payload = serde_json::to_vec_pretty(value)?;
    write_atomic(path, &payload)
}

/// What the placeholder policy did for a failed KPI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderAction {
    KeptStale,
    Created,
}

/// Per-KPI datasets (`<id>.json` + `<id>.csv`) and diagnostic side artifacts.
#[derive(Debug, Clone)]
pub struct DatasetStore {
    data_dir: PathBuf,
    pending_dir: PathBuf,
}

impl DatasetStore {
    pub fn new(data_dir: impl Into<PathBuf>, pending_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            pending_dir: pending_dir.into(),
        }
    }

    pub fn json_path(&self, kpi_id: &str) -> PathBuf {
        self.data_dir.join(format!("{kpi_id}.json"))
    }

    pub fn csv_path(&self, kpi_id: &str) -> PathBuf {
        self.data_dir.join(format!("{kpi_id}.csv"))
    }

    pub fn has_dataset(&self, kpi_id: &str) -> bool {
        self.json_path(kpi_id).exists()
    }

    /// Replace the KPI's dataset wholesale.
    pub fn save_dataset(&self, kpi_id: &str, observations: &[Observation]) -> Result<()> {
        write_json_atomic(&self.json_path(kpi_id), observations)?;
        write_atomic(&self.csv_path(kpi_id), &render_csv(observations)?)?;
        debug!(kpi = kpi_id, rows = observations.len(), "Dataset written");
        Ok(())
    }

    /// Keep an existing dataset untouched; otherwise write an empty one so
    /// consumers see a defined-but-empty KPI.
    pub fn keep_or_placeholder(&self, kpi_id: &str, reason: &str) -> Result<PlaceholderAction> {
        if self.has_dataset(kpi_id) {
            warn!(kpi = kpi_id, reason, "Kept stale data");
            return Ok(PlaceholderAction::KeptStale);
        }
        self.save_dataset(kpi_id, &[])?;
        warn!(kpi = kpi_id, reason, "Placeholder dataset created");
        Ok(PlaceholderAction::Created)
    }

    /// Read a dataset leniently; `Ok(None)` when the file does not exist.
    pub fn load_rows(&self, kpi_id: &str) -> Result<Option<Vec<DatasetRow>>> {
        let path = self.json_path(kpi_id);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)?;
        let file: DatasetFile = serde_json::from_str(&content).map_err(|e| KpiError::InvalidMeta {
            path: path.clone(),
            message: e.to_string(),
        })?;
        Ok(Some(file.into_rows()))
    }

    /// Persist raw material for manual diagnosis under the pending directory.
    pub fn write_side_artifact(
        &self,
        kpi_id: &str,
        source_code: &str,
        kind: &str,
        contents: &[u8],
    ) -> Result<PathBuf> {
        let name: String = format!("{}_{}_{}", kpi_id, safe_filename(source_code), kind)
            .chars()
            .take(SIDE_ARTIFACT_NAME_MAX)
            .collect();
        let path = self.pending_dir.join(name);
        write_atomic(&path, contents)?;
        debug!(kpi = kpi_id, path = %path.display(), "Side artifact written");
        Ok(path)
    }
}

fn render_csv(observations: &[Observation]) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(DATASET_CSV_HEADER)?;
    for obs in observations {
        let year = obs.year.to_string();
        let value = obs.value.to_string();
        writer.write_record([
            obs.country.as_str(),
            obs.iso2.as_str(),
            year.as_str(),
            value.as_str(),
        ])?;
    }
    writer
        .into_inner()
        .map_err(|e| KpiError::Io(e.into_error()))
}
