//! KPI descriptors.
//!
//! `available_kpis.json` is a loosely typed, externally maintained list of
//! objects. Each entry is validated once at load time into a closed
//! [`SourceSpec`] union; entries that cannot be validated are reported as
//! [`RejectedDescriptor`]s instead of being defaulted silently.

use crate::constants::{ARCHIVED_CODE_PREFIX, ARCHIVED_DEFAULT_CODE, RELEVANCE_NONE, WORLD_KPI_GLOBAL_ONLY};
use crate::error::{DescriptorError, KpiError, Result};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceType {
    TabularApi,
    ArchivedDelimited,
    RenderedDelimited,
    StaticDelimited,
}

impl SourceType {
    pub const ALL: [SourceType; 4] = [
        SourceType::TabularApi,
        SourceType::ArchivedDelimited,
        SourceType::RenderedDelimited,
        SourceType::StaticDelimited,
    ];

    /// Accepts both the generic names and the provider names used by older
    /// descriptor files.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "tabular-api" | "worldbank" => Some(SourceType::TabularApi),
            "archived-delimited" | "unhcr" => Some(SourceType::ArchivedDelimited),
            "rendered-delimited" | "owid" => Some(SourceType::RenderedDelimited),
            "static-delimited" | "csv" => Some(SourceType::StaticDelimited),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::TabularApi => "tabular-api",
            SourceType::ArchivedDelimited => "archived-delimited",
            SourceType::RenderedDelimited => "rendered-delimited",
            SourceType::StaticDelimited => "static-delimited",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a KPI's data comes from, carrying only what its adapter needs.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceSpec {
    TabularApi { indicator: String },
    ArchivedDelimited { dataset: String, value_field: Option<String> },
    RenderedDelimited { chart: String },
    StaticDelimited { file_name: String },
}

impl SourceSpec {
    pub fn source_type(&self) -> SourceType {
        match self {
            SourceSpec::TabularApi { .. } => SourceType::TabularApi,
            SourceSpec::ArchivedDelimited { .. } => SourceType::ArchivedDelimited,
            SourceSpec::RenderedDelimited { .. } => SourceType::RenderedDelimited,
            SourceSpec::StaticDelimited { .. } => SourceType::StaticDelimited,
        }
    }

    /// The provider-side code used in URLs, file names and side artifacts.
    pub fn code(&self) -> &str {
        match self {
            SourceSpec::TabularApi { indicator } => indicator,
            SourceSpec::ArchivedDelimited { dataset, .. } => dataset,
            SourceSpec::RenderedDelimited { chart } => chart,
            SourceSpec::StaticDelimited { file_name } => file_name,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortPolicy {
    Higher,
    Lower,
    Target,
    None,
}

impl SortPolicy {
    fn parse(raw: Option<&str>) -> std::result::Result<Self, DescriptorError> {
        match raw.map(|s| s.trim().to_lowercase()) {
            None => Ok(SortPolicy::None),
            Some(s) => match s.as_str() {
                "" | "none" => Ok(SortPolicy::None),
                "higher" => Ok(SortPolicy::Higher),
                "lower" => Ok(SortPolicy::Lower),
                "target" => Ok(SortPolicy::Target),
                _ => Err(DescriptorError::InvalidSort(s)),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct KpiDescriptor {
    /// Unique identifier; also the dataset file stem.
    pub id: String,
    pub title: Option<String>,
    pub source: SourceSpec,
    pub sort: SortPolicy,
    pub target_value: Option<f64>,
    pub relevance: Option<String>,
    pub world_kpi: Option<String>,
    /// Free-text provenance label for the ledger.
    pub source_label: Option<String>,
    pub source_url: Option<String>,
}

impl KpiDescriptor {
    pub fn source_type(&self) -> SourceType {
        self.source.source_type()
    }

    pub fn is_relevance_none(&self) -> bool {
        self.relevance.as_deref() == Some(RELEVANCE_NONE)
    }

    pub fn is_global_only(&self) -> bool {
        self.world_kpi.as_deref() == Some(WORLD_KPI_GLOBAL_ONLY)
    }

    /// Validate one raw descriptor object.
    pub fn from_json(value: &Value) -> std::result::Result<Self, DescriptorError> {
        let obj = value.as_object().ok_or(DescriptorError::NotAnObject)?;

        let id = text_field(obj, &["filename"]).ok_or(DescriptorError::MissingFilename)?;

        let raw_type = text_field(obj, &["source_type", "type"]).unwrap_or_default();
        let source_type = SourceType::parse(&raw_type)
            .ok_or_else(|| DescriptorError::UnknownSourceType(raw_type.clone()))?;
        let code = text_field(obj, &["source_code", "code"]);

        let source = match source_type {
            SourceType::TabularApi => SourceSpec::TabularApi {
                indicator: code.ok_or_else(|| DescriptorError::MissingSourceCode(raw_type.clone()))?,
            },
            SourceType::RenderedDelimited => SourceSpec::RenderedDelimited {
                chart: code.ok_or_else(|| DescriptorError::MissingSourceCode(raw_type.clone()))?,
            },
            SourceType::ArchivedDelimited => SourceSpec::ArchivedDelimited {
                dataset: match code {
                    Some(c) if c.starts_with(ARCHIVED_CODE_PREFIX) => c,
                    _ => ARCHIVED_DEFAULT_CODE.to_string(),
                },
                value_field: text_field(obj, &["value_field", "unhcr_field"]),
            },
            SourceType::StaticDelimited => SourceSpec::StaticDelimited {
                file_name: code.unwrap_or_else(|| format!("{id}.csv")),
            },
        };

        let sort = SortPolicy::parse(text_field(obj, &["sort"]).as_deref())?;
        let target_value = match obj.get("target_value") {
            None | Some(Value::Null) => None,
            Some(Value::Number(n)) => n.as_f64(),
            Some(Value::String(s)) if s.trim().is_empty() => None,
            Some(Value::String(s)) => Some(
                s.trim()
                    .parse::<f64>()
                    .map_err(|_| DescriptorError::InvalidTarget(s.clone()))?,
            ),
            Some(other) => return Err(DescriptorError::InvalidTarget(other.to_string())),
        };

        Ok(Self {
            id,
            title: text_field(obj, &["title"]),
            source,
            sort,
            target_value,
            relevance: text_field(obj, &["relevance"]),
            world_kpi: text_field(obj, &["world_kpi"]),
            source_label: text_field(obj, &["source"]),
            source_url: text_field(obj, &["source_url", "url"]),
        })
    }
}

/// A descriptor that failed validation. `id` is kept when it could be read so
/// the orchestrator can still apply the placeholder policy for it.
#[derive(Debug, Clone, PartialEq)]
pub struct RejectedDescriptor {
    pub id: Option<String>,
    pub error: DescriptorError,
}

#[derive(Debug, Clone, Default)]
pub struct DescriptorSet {
    pub descriptors: Vec<KpiDescriptor>,
    pub rejected: Vec<RejectedDescriptor>,
}

impl DescriptorSet {
    pub fn len(&self) -> usize {
        self.descriptors.len() + self.rejected.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Build from the parsed file. Accepts a list, or an object whose values
    /// are descriptors.
    pub fn from_json(root: Value) -> Self {
        let items: Vec<Value> = match root {
            Value::Array(items) => items,
            Value::Object(map) => map.into_iter().map(|(_, v)| v).collect(),
            _ => Vec::new(),
        };

        let mut set = DescriptorSet::default();
        let mut seen = HashSet::new();
        for item in &items {
            match KpiDescriptor::from_json(item) {
                Ok(descriptor) => {
                    if seen.insert(descriptor.id.clone()) {
                        set.descriptors.push(descriptor);
                    } else {
                        // The first occurrence owns the dataset file; no placeholder here.
                        warn!(kpi = %descriptor.id, "Duplicate KPI identifier ignored");
                        set.rejected.push(RejectedDescriptor {
                            id: None,
                            error: DescriptorError::Duplicate(descriptor.id),
                        });
                    }
                }
                Err(error) => {
                    let id = item
                        .as_object()
                        .and_then(|obj| text_field(obj, &["filename"]))
                        .filter(|id| !seen.contains(id));
                    if let Some(id) = &id {
                        seen.insert(id.clone());
                    }
                    warn!(kpi = ?id, %error, "Rejected KPI descriptor");
                    set.rejected.push(RejectedDescriptor { id, error });
                }
            }
        }
        set
    }

    pub fn retain_ids(&mut self, ids: &[String]) {
        self.descriptors.retain(|d| ids.contains(&d.id));
        self.rejected
            .retain(|r| r.id.as_ref().is_some_and(|id| ids.contains(id)));
    }
}

/// Load the descriptor list; a missing file aborts the run.
pub fn load_descriptors(path: &Path) -> Result<DescriptorSet> {
    if !path.exists() {
        return Err(KpiError::MissingMeta(path.to_path_buf()));
    }
    let content = fs::read_to_string(path)?;
    let root: Value = serde_json::from_str(&content).map_err(|e| KpiError::InvalidMeta {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    if !root.is_array() && !root.is_object() {
        return Err(KpiError::InvalidMeta {
            path: path.to_path_buf(),
            message: "expected a JSON array of descriptors".to_string(),
        });
    }
    let set = DescriptorSet::from_json(root);
    info!(
        valid = set.descriptors.len(),
        rejected = set.rejected.len(),
        "Loaded KPI descriptors"
    );
    Ok(set)
}

fn text_field(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match obj.get(*key) {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}
