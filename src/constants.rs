/// File and sentinel constants shared across the codebase.

// Meta inputs (under `paths.meta_dir`)
pub const DESCRIPTORS_FILE: &str = "available_kpis.json";
pub const COUNTRIES_FILE: &str = "countries.json";
pub const COUNTRY_MAP_FILE: &str = "country_mappings.json";
pub const COUNTRY_PENDING_FILE: &str = "country_mappings_pending.json";

// Outputs (under `paths.data_dir`)
pub const LEDGER_FILE: &str = "fetch_status.json";
pub const OUTLIER_SUMMARY_FILE: &str = "analysis_summary.json";
pub const OUTLIER_DETAIL_FILE: &str = "analysis_outliers.json";
pub const RANKING_FILE: &str = "overall_ranking.json";
pub const ANALYSIS_MARKDOWN_FILE: &str = "analysis.md";
pub const ANALYSIS_JSON_FILE: &str = "analysis.json";

pub const DATASET_CSV_HEADER: [&str; 4] = ["country", "iso2", "year", "value"];

/// Stored in the ledger when a source exposes no update timestamp.
pub const UNKNOWN_SOURCE_DATE: &str = "Unknown";

// Descriptor sentinels
pub const RELEVANCE_NONE: &str = "none";
pub const WORLD_KPI_GLOBAL_ONLY: &str = "e";

// Pending alias reasons
pub const REASON_UNKNOWN_ALIAS: &str = "Unknown alias; please map in country_mappings.json";
pub const REASON_INVALID_TARGET: &str = "Mapping target missing or invalid";

// Archived-delimited defaults
pub const ARCHIVED_DEFAULT_CODE: &str = "population?download=true";
pub const ARCHIVED_CODE_PREFIX: &str = "population";
