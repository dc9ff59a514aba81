//! Consumers of the persisted per-KPI datasets.

pub mod outliers;
pub mod ranking;

use crate::config::Config;
use crate::constants::{DESCRIPTORS_FILE, OUTLIER_DETAIL_FILE, OUTLIER_SUMMARY_FILE, RANKING_FILE};
use crate::descriptor::load_descriptors;
use crate::error::Result;
use crate::storage::{write_json_atomic, DatasetStore};
use tracing::{info, instrument};

pub use outliers::{build_outlier_report, detect_outliers, OutlierReport};
pub use ranking::{build_ranking, RankingEntry};

fn dataset_store(config: &Config) -> DatasetStore {
    DatasetStore::new(config.paths.data_dir.clone(), config.paths.pending_dir())
}

/// Compute and write the outlier summary and detail artifacts.
#[instrument(skip(config))]
pub fn run_outliers(config: &Config) -> Result<OutlierReport> {
    let descriptors = load_descriptors(&config.meta_file(DESCRIPTORS_FILE))?;
    let report = build_outlier_report(&descriptors.descriptors, &dataset_store(config), &config.analytics);
    report.write(
        &config.data_file(OUTLIER_SUMMARY_FILE),
        &config.data_file(OUTLIER_DETAIL_FILE),
    )?;
    Ok(report)
}

/// Compute and write the overall ranking artifact.
#[instrument(skip(config))]
pub fn run_ranking(config: &Config) -> Result<Vec<RankingEntry>> {
    let descriptors = load_descriptors(&config.meta_file(DESCRIPTORS_FILE))?;
    let entries = build_ranking(&descriptors.descriptors, &dataset_store(config));
    write_json_atomic(&config.data_file(RANKING_FILE), &entries)?;
    info!(countries = entries.len(), "Overall ranking written");
    Ok(entries)
}
