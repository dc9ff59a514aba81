use crate::error::{KpiError, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "config.toml";
pub const DATA_DIR_ENV: &str = "KPI_DATA_DIR";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub paths: PathsConfig,
    pub http: HttpConfig,
    pub endpoints: EndpointsConfig,
    pub analytics: AnalyticsConfig,
    pub completion: CompletionConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub data_dir: PathBuf,
    /// Defaults to `<data_dir>/meta`.
    pub meta_dir: Option<PathBuf>,
    pub source_csv_dir: PathBuf,
    /// Defaults to `<data_dir>/pending`.
    pub pending_dir: Option<PathBuf>,
    pub log_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            meta_dir: None,
            source_csv_dir: PathBuf::from("source_csv"),
            pending_dir: None,
            log_dir: PathBuf::from("logs"),
        }
    }
}

impl PathsConfig {
    pub fn meta_dir(&self) -> PathBuf {
        self.meta_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("meta"))
    }

    pub fn pending_dir(&self) -> PathBuf {
        self.pending_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("pending"))
    }

    /// Unset `meta_dir`/`pending_dir` follow the new data directory.
    pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.data_dir = data_dir.into();
        self
    }
}

/// Per-call timeouts in seconds. There is no retry.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub metadata_timeout_secs: u64,
    pub tabular_timeout_secs: u64,
    pub rendered_timeout_secs: u64,
    pub archived_timeout_secs: u64,
    pub completion_timeout_secs: u64,
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            metadata_timeout_secs: 20,
            tabular_timeout_secs: 40,
            rendered_timeout_secs: 30,
            archived_timeout_secs: 60,
            completion_timeout_secs: 300,
            user_agent: format!("kpi_ingest/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl HttpConfig {
    pub fn metadata_timeout(&self) -> Duration {
        Duration::from_secs(self.metadata_timeout_secs)
    }

    pub fn tabular_timeout(&self) -> Duration {
        Duration::from_secs(self.tabular_timeout_secs)
    }

    pub fn rendered_timeout(&self) -> Duration {
        Duration::from_secs(self.rendered_timeout_secs)
    }

    pub fn archived_timeout(&self) -> Duration {
        Duration::from_secs(self.archived_timeout_secs)
    }

    pub fn completion_timeout(&self) -> Duration {
        Duration::from_secs(self.completion_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EndpointsConfig {
    pub tabular_api_base: String,
    pub rendered_base: String,
    pub archived_base: String,
}

impl Default for EndpointsConfig {
    fn default() -> Self {
        Self {
            tabular_api_base: "https://api.worldbank.org/v2".to_string(),
            rendered_base: "https://ourworldindata.org".to_string(),
            archived_base: "https://api.unhcr.org/population/v1".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnalyticsConfig {
    /// Pseudo-country excluded from outlier statistics.
    pub aggregate_country: String,
    pub min_values: usize,
    pub z_threshold: f64,
    pub max_flagged: usize,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            aggregate_country: "World".to_string(),
            min_values: 5,
            z_threshold: 3.0,
            max_flagged: 20,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CompletionConfig {
    pub endpoint: String,
    pub model: String,
    pub api_key_env: String,
    pub max_prompt_chars: usize,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            model: "gpt-5".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            max_prompt_chars: 12_000,
        }
    }
}

impl Config {
    /// Load `config.toml` (or `path`). A missing default file yields the
    /// built-in defaults; a missing explicit file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (config_path, explicit) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (PathBuf::from(DEFAULT_CONFIG_PATH), false),
        };

        let mut config = if config_path.exists() {
            let content = fs::read_to_string(&config_path).map_err(|e| {
                KpiError::Config(format!(
                    "Failed to read config file '{}': {}",
                    config_path.display(),
                    e
                ))
            })?;
            toml::from_str::<Config>(&content)?
        } else if explicit {
            return Err(KpiError::Config(format!(
                "Config file '{}' does not exist",
                config_path.display()
            )));
        } else {
            Config::default()
        };

        if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
            if !dir.trim().is_empty() {
                config.paths = config.paths.with_data_dir(dir.trim());
            }
        }

        Ok(config)
    }

    pub fn meta_file(&self, name: &str) -> PathBuf {
        self.paths.meta_dir().join(name)
    }

    pub fn data_file(&self, name: &str) -> PathBuf {
        self.paths.data_dir.join(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            [paths]
            data_dir = "/srv/kpi"

            [http]
            tabular_timeout_secs = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.paths.data_dir, PathBuf::from("/srv/kpi"));
        assert_eq!(config.paths.meta_dir(), PathBuf::from("/srv/kpi/meta"));
        assert_eq!(config.paths.pending_dir(), PathBuf::from("/srv/kpi/pending"));
        assert_eq!(config.http.tabular_timeout(), Duration::from_secs(5));
        assert_eq!(config.http.archived_timeout_secs, 60);
        assert_eq!(config.analytics.aggregate_country, "World");
    }

    #[test]
    fn test_missing_explicit_config_is_error() {
        let err = Config::load(Some(Path::new("/definitely/not/here.toml"))).unwrap_err();
        assert!(matches!(err, KpiError::Config(_)));
    }
}
