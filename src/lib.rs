pub mod analysis;
pub mod analytics;
pub mod apis;
pub mod config;
pub mod constants;
pub mod country;
pub mod descriptor;
pub mod error;
pub mod freshness;
pub mod infra;
pub mod ledger;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod storage;
pub mod types;

pub use config::Config;
pub use error::{FetchFailure, KpiError, Result};
pub use pipeline::{Orchestrator, RunReport};
