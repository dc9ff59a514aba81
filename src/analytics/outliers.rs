use crate::config::AnalyticsConfig;
use crate::descriptor::KpiDescriptor;
use crate::error::Result;
use crate::storage::{write_json_atomic, DatasetStore};
use crate::types::DatasetRow;
use indexmap::IndexMap;
use serde::Serialize;
use std::path::Path;
use tracing::{debug, info, warn};

/// Descriptive statistics of one KPI, as written to the summary artifact.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutlierSummary {
    pub count: usize,
    pub avg: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
    /// Flagged rows before truncation.
    pub outlier_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Extreme {
    pub value: f64,
    pub country: Option<String>,
    pub year: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlaggedValue {
    pub country: Option<String>,
    pub year: Option<i64>,
    pub value: f64,
    pub z_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutlierDetail {
    pub min: Extreme,
    pub max: Extreme,
    pub flagged: Vec<FlaggedValue>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct KpiOutliers {
    pub summary: OutlierSummary,
    pub detail: OutlierDetail,
}

/// Both artifacts, keyed by KPI id in descriptor order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutlierReport {
    pub summary: IndexMap<String, OutlierSummary>,
    pub detail: IndexMap<String, OutlierDetail>,
}

impl OutlierReport {
    pub fn is_empty(&self) -> bool {
        self.summary.is_empty()
    }

    pub fn write(&self, summary_path: &Path, detail_path: &Path) -> Result<()> {
        write_json_atomic(summary_path, &self.summary)?;
        write_json_atomic(detail_path, &self.detail)?;
        info!(kpis = self.summary.len(), "Outlier artifacts written");
        Ok(())
    }
}

pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Statistics and flagged rows for one dataset, or `None` when fewer than
/// `min_values` qualifying values exist. Rows of the aggregate pseudo-country
/// never qualify.
pub fn detect_outliers(rows: &[DatasetRow], settings: &AnalyticsConfig) -> Option<KpiOutliers> {
    let qualifying: Vec<(&DatasetRow, f64)> = rows
        .iter()
        .filter(|row| row.country.as_deref() != Some(settings.aggregate_country.as_str()))
        .filter_map(|row| row.value.map(|v| (row, v)))
        .collect();
    if qualifying.is_empty() || qualifying.len() < settings.min_values {
        return None;
    }

    let n = qualifying.len() as f64;
    let mean = qualifying.iter().map(|(_, v)| v).sum::<f64>() / n;
    let variance = qualifying.iter().map(|(_, v)| (v - mean).powi(2)).sum::<f64>() / n;
    let stdev = variance.sqrt();

    let min = qualifying.iter().map(|(_, v)| *v).fold(f64::INFINITY, f64::min);
    let max = qualifying.iter().map(|(_, v)| *v).fold(f64::NEG_INFINITY, f64::max);
    let extreme = |target: f64| {
        let origin = qualifying.iter().find(|(_, v)| *v == target).map(|(row, _)| *row);
        Extreme {
            value: target,
            country: origin.and_then(|r| r.country.clone()),
            year: origin.and_then(|r| r.year),
        }
    };

    let mut flagged = Vec::new();
    if stdev > 0.0 {
        for (row, value) in &qualifying {
            let z = (value - mean).abs() / stdev;
            if z >= settings.z_threshold {
                flagged.push(FlaggedValue {
                    country: row.country.clone(),
                    year: row.year,
                    value: *value,
                    z_score: round_to(z, 2),
                });
            }
        }
    }
    let outlier_count = flagged.len();
    flagged.truncate(settings.max_flagged);

    Some(KpiOutliers {
        summary: OutlierSummary {
            count: qualifying.len(),
            avg: round_to(mean, 3),
            std: round_to(stdev, 3),
            min,
            max,
            outlier_count,
        },
        detail: OutlierDetail {
            min: extreme(min),
            max: extreme(max),
            flagged,
        },
    })
}

/// Run the detector over every descriptor's dataset. Missing or unreadable
/// datasets are logged and skipped.
pub fn build_outlier_report(
    descriptors: &[KpiDescriptor],
    store: &DatasetStore,
    settings: &AnalyticsConfig,
) -> OutlierReport {
    let mut report = OutlierReport::default();
    for descriptor in descriptors {
        let rows = match store.load_rows(&descriptor.id) {
            Ok(Some(rows)) => rows,
            Ok(None) => {
                debug!(kpi = %descriptor.id, "No dataset on disk");
                continue;
            }
            Err(e) => {
                warn!(kpi = %descriptor.id, error = %e, "Could not read dataset");
                continue;
            }
        };
        match detect_outliers(&rows, settings) {
            Some(found) => {
                if found.summary.outlier_count > 0 {
                    info!(kpi = %descriptor.id, outliers = found.summary.outlier_count, "Outliers flagged");
                }
                report.summary.insert(descriptor.id.clone(), found.summary);
                report.detail.insert(descriptor.id.clone(), found.detail);
            }
            None => debug!(kpi = %descriptor.id, rows = rows.len(), "Too few values for statistics"),
        }
    }
    report
}
