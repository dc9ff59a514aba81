use super::{AdapterContext, AdapterReport, SourceAdapter};
use crate::config::Config;
use crate::country::MappingTally;
use crate::descriptor::{KpiDescriptor, SourceSpec, SourceType};
use crate::error::FetchFailure;
use crate::infra::HttpClientPort;
use crate::types::{parse_year, Observation};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

static DATE_ONLY: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").expect("valid date pattern"));

const LAST_UPDATED_KEYS: &[&str] = &["lastupdated", "LastUpdated", "lastUpdated", "lastupdate"];
const PAGE_SIZE: u32 = 20_000;

/// Indicator time series served as `[pagination, rows]` JSON.
pub struct TabularApiAdapter {
    http: Arc<dyn HttpClientPort>,
    base_url: String,
    data_timeout: Duration,
    metadata_timeout: Duration,
}

impl TabularApiAdapter {
    pub fn new(http: Arc<dyn HttpClientPort>, config: &Config) -> Self {
        Self {
            http,
            base_url: config.endpoints.tabular_api_base.trim_end_matches('/').to_string(),
            data_timeout: config.http.tabular_timeout(),
            metadata_timeout: config.http.metadata_timeout(),
        }
    }

    pub fn data_url(&self, indicator: &str) -> String {
        format!(
            "{}/country/all/indicator/{}?format=json&per_page={}",
            self.base_url, indicator, PAGE_SIZE
        )
    }

    pub fn metadata_url(&self, indicator: &str) -> String {
        format!("{}/indicator/{}?format=json", self.base_url, indicator)
    }

    fn artifact(&self, ctx: &AdapterContext<'_>, descriptor: &KpiDescriptor, kind: &str, bytes: &[u8]) {
        if let Err(e) = ctx
            .store
            .write_side_artifact(&descriptor.id, descriptor.source.code(), kind, bytes)
        {
            warn!(kpi = %descriptor.id, kind, error = %e, "Could not persist side artifact");
        }
    }
}

/// Extract the row array from a `[pagination, rows]` payload.
fn parse_rows(bytes: &[u8]) -> Result<Vec<Value>, FetchFailure> {
    let payload: Value =
        serde_json::from_slice(bytes).map_err(|e| FetchFailure::Format(format!("invalid JSON: {e}")))?;
    match payload {
        Value::Array(mut parts) if parts.len() >= 2 && parts[1].is_array() => match parts.swap_remove(1) {
            Value::Array(rows) => Ok(rows),
            _ => Ok(Vec::new()),
        },
        _ => Err(FetchFailure::Format("unexpected top-level JSON shape".to_string())),
    }
}

/// Widen a bare `YYYY-MM-DD` to a UTC timestamp.
pub fn normalize_last_updated(raw: &str) -> String {
    if DATE_ONLY.is_match(raw) {
        format!("{raw}T00:00:00Z")
    } else {
        raw.to_string()
    }
}

/// Map one API row to an observation, or `None` when it must be skipped.
fn row_to_observation(row: &Value, ctx: &AdapterContext<'_>, tally: &mut MappingTally) -> Option<Observation> {
    let value = row.get("value").filter(|v| !v.is_null())?;
    let label = row
        .pointer("/country/value")
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .or_else(|| row.get("countryiso3code").and_then(Value::as_str))
        .unwrap_or("")
        .trim();
    if label.is_empty() {
        return None;
    }
    let country = ctx.resolver.canonicalize(label, tally)?;

    let year = match row.get("date") {
        Some(Value::String(s)) => parse_year(s)?,
        Some(Value::Number(n)) => i32::try_from(n.as_i64()?).ok()?,
        _ => return None,
    };
    let value = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    if !value.is_finite() {
        return None;
    }
    let iso2 = row
        .pointer("/country/id")
        .and_then(Value::as_str)
        .filter(|id| id.len() == 2)
        .unwrap_or("");
    Some(Observation::new(country, iso2, year, value))
}

#[async_trait]
impl SourceAdapter for TabularApiAdapter {
    fn source_type(&self) -> SourceType {
        SourceType::TabularApi
    }

    fn source_url(&self, descriptor: &KpiDescriptor) -> String {
        self.data_url(descriptor.source.code())
    }

    #[instrument(skip(self, descriptor), fields(kpi = %descriptor.id))]
    async fn source_date(&self, descriptor: &KpiDescriptor) -> Option<String> {
        let url = self.metadata_url(descriptor.source.code());
        let resp = match self.http.get(&url, self.metadata_timeout).await {
            Ok(resp) if resp.is_success() => resp,
            Ok(resp) => {
                warn!(status = resp.status, "Metadata request rejected");
                return None;
            }
            Err(e) => {
                warn!(error = %e, "Could not get source date");
                return None;
            }
        };
        let meta: Value = serde_json::from_slice(&resp.bytes).ok()?;
        let first = meta.as_array()?.first()?.as_object()?;
        LAST_UPDATED_KEYS.iter().find_map(|key| {
            first
                .get(*key)
                .and_then(Value::as_str)
                .filter(|s| !s.trim().is_empty())
                .map(|s| normalize_last_updated(s.trim()))
        })
    }

    #[instrument(skip(self, descriptor, ctx), fields(kpi = %descriptor.id))]
    async fn fetch(&self, descriptor: &KpiDescriptor, ctx: &AdapterContext<'_>) -> AdapterReport {
        let SourceSpec::TabularApi { indicator } = &descriptor.source else {
            return AdapterReport::failed(FetchFailure::Format(
                "descriptor is not a tabular-api source".to_string(),
            ));
        };

        let url = self.data_url(indicator);
        let resp = match self.http.get(&url, self.data_timeout).await.and_then(|r| r.ensure_success()) {
            Ok(resp) => resp,
            Err(failure) => {
                warn!(%url, %failure, "Tabular API fetch failed");
                return AdapterReport::failed(failure);
            }
        };
        let rows = match parse_rows(&resp.bytes) {
            Ok(rows) => rows,
            Err(failure) => {
                warn!(indicator = %indicator, %failure, "Tabular API payload rejected");
                self.artifact(ctx, descriptor, "raw.json", &resp.bytes);
                return AdapterReport::failed(failure);
            }
        };
        debug!(rows = rows.len(), "Tabular API rows received");

        let mut tally = MappingTally::default();
        let observations: Vec<Observation> = rows
            .iter()
            .filter_map(|row| row_to_observation(row, ctx, &mut tally))
            .collect();

        if observations.is_empty() {
            self.artifact(ctx, descriptor, "nodata.json", &resp.bytes);
            return AdapterReport::new(
                Err(FetchFailure::Empty(format!("no usable rows for {indicator}"))),
                tally,
            );
        }

        info!(rows = observations.len(), "Tabular API KPI parsed");
        AdapterReport::new(Ok(observations), tally)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apis::testing::CannedHttp;
    use crate::country::CountryResolver;
    use crate::infra::HttpGetResult;
    use crate::storage::DatasetStore;
    use serde_json::json;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    const DATA_URL: &str =
        "https://api.worldbank.org/v2/country/all/indicator/SP.POP.TOTL?format=json&per_page=20000";
    const META_URL: &str = "https://api.worldbank.org/v2/indicator/SP.POP.TOTL?format=json";

    fn descriptor() -> KpiDescriptor {
        KpiDescriptor::from_json(&json!({
            "filename": "population",
            "source_type": "worldbank",
            "source_code": "SP.POP.TOTL",
        }))
        .unwrap()
    }

    async fn fetch_body(body: serde_json::Value) -> (AdapterReport, TempDir) {
        let tmp = TempDir::new().unwrap();
        let store = DatasetStore::new(tmp.path().join("data"), tmp.path().join("pending"));
        let http = CannedHttp::default().with(
            DATA_URL,
            Ok(HttpGetResult::ok(body.to_string(), "application/json")),
        );
        let adapter = TabularApiAdapter::new(Arc::new(http), &Config::default());
        let aliases: BTreeMap<String, String> = [
            ("Chad Republic".to_string(), "Chad".to_string()),
            ("World".to_string(), String::new()),
        ]
        .into_iter()
        .collect();
        let resolver = CountryResolver::new(["Chad", "France"], &aliases);
        let ctx = AdapterContext {
            resolver: &resolver,
            store: &store,
        };
        let report = adapter.fetch(&descriptor(), &ctx).await;
        (report, tmp)
    }

    #[tokio::test]
    async fn test_rows_are_canonicalized_and_nulls_skipped() {
        let body = json!([
            { "page": 1, "pages": 1 },
            [
                { "country": { "id": "TD", "value": "Chad Republic" }, "countryiso3code": "TCD", "date": "2022", "value": 17_723_315 },
                { "country": { "id": "FR", "value": "France" }, "date": "2022", "value": null },
                { "country": { "id": "1W", "value": "World" }, "date": "2022", "value": 7.9e9 },
                { "country": { "id": "FRA", "value": "" }, "countryiso3code": "France", "date": "2021", "value": "67.5" }
            ]
        ]);
        let (report, _tmp) = fetch_body(body).await;

        assert_eq!(
            report.result.unwrap(),
            vec![
                Observation::new("Chad", "TD", 2022, 17_723_315.0),
                Observation::new("France", "", 2021, 67.5),
            ]
        );
        assert_eq!(report.mapping.mapped, 2);
        assert_eq!(report.mapping.dropped, 1);
    }

    #[tokio::test]
    async fn test_unexpected_shape_is_format_failure() {
        let (report, tmp) = fetch_body(json!([{ "message": [{ "key": "Invalid value" }] }])).await;
        assert!(matches!(report.result, Err(FetchFailure::Format(_))));
        let raw = std::fs::read_to_string(tmp.path().join("pending/population_SP.POP.TOTL_raw.json")).unwrap();
        assert!(raw.contains("Invalid value"));
    }

    #[tokio::test]
    async fn test_all_null_rows_is_empty_with_artifact() {
        let body = json!([{}, [{ "country": { "value": "Chad" }, "date": "2022", "value": null }]]);
        let (report, tmp) = fetch_body(body).await;
        assert!(matches!(report.result, Err(FetchFailure::Empty(_))));
        assert!(tmp.path().join("pending/population_SP.POP.TOTL_nodata.json").exists());
    }

    #[tokio::test]
    async fn test_source_date_from_indicator_metadata() {
        let meta = json!([{ "id": "SP.POP.TOTL", "lastupdated": "2025-07-01" }]);
        let http = CannedHttp::default().with(
            META_URL,
            Ok(HttpGetResult::ok(meta.to_string(), "application/json")),
        );
        let adapter = TabularApiAdapter::new(Arc::new(http), &Config::default());
        assert_eq!(
            adapter.source_date(&descriptor()).await.as_deref(),
            Some("2025-07-01T00:00:00Z")
        );
    }

    #[test]
    fn test_normalize_last_updated() {
        assert_eq!(normalize_last_updated("2025-10-07"), "2025-10-07T00:00:00Z");
        assert_eq!(normalize_last_updated("2025-10-07T10:00:00Z"), "2025-10-07T10:00:00Z");
    }
}
