use super::decode::{decode_text, normalize_newlines};
use super::{AdapterContext, AdapterReport, DelimitedTable, RowColumns, SourceAdapter};
use crate::config::Config;
use crate::country::MappingTally;
use crate::descriptor::{KpiDescriptor, SourceSpec, SourceType};
use crate::error::FetchFailure;
use crate::infra::HttpClientPort;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

const ENTITY: &str = "Entity";
const CODE: &str = "Code";
const YEAR: &str = "Year";

const METADATA_DATE_KEYS: &[&str] = &[
    "last_updated",
    "updatedAt",
    "lastUpdatedAtSource",
    "dataEditedAt",
    "publishedAt",
];

/// Chart data rendered as CSV with fixed `Entity,Code,Year,<value>` columns.
pub struct RenderedDelimitedAdapter {
    http: Arc<dyn HttpClientPort>,
    base_url: String,
    timeout: Duration,
    metadata_timeout: Duration,
}

impl RenderedDelimitedAdapter {
    pub fn new(http: Arc<dyn HttpClientPort>, config: &Config) -> Self {
        Self {
            http,
            base_url: config.endpoints.rendered_base.trim_end_matches('/').to_string(),
            timeout: config.http.rendered_timeout(),
            metadata_timeout: config.http.metadata_timeout(),
        }
    }

    pub fn data_url(&self, chart: &str) -> String {
        format!("{}/grapher/{}", self.base_url, chart)
    }

    pub fn metadata_url(&self, chart: &str) -> String {
        format!("{}/grapher/data/metadata/{}", self.base_url, chart)
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

/// First non-empty string among the known metadata date keys.
fn metadata_date(meta: &Value) -> Option<String> {
    METADATA_DATE_KEYS.iter().find_map(|key| {
        meta.get(*key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    })
}

#[async_trait]
impl SourceAdapter for RenderedDelimitedAdapter {
    fn source_type(&self) -> SourceType {
        SourceType::RenderedDelimited
    }

    fn source_url(&self, descriptor: &KpiDescriptor) -> String {
        self.data_url(descriptor.source.code())
    }

    #[instrument(skip(self, descriptor), fields(kpi = %descriptor.id))]
    async fn source_date(&self, descriptor: &KpiDescriptor) -> Option<String> {
        let url = self.metadata_url(descriptor.source.code());
        match self.http.get(&url, self.metadata_timeout).await {
            Ok(resp) if resp.is_success() => serde_json::from_slice::<Value>(&resp.bytes)
                .ok()
                .and_then(|meta| metadata_date(&meta)),
            Ok(resp) => {
                warn!(status = resp.status, "Metadata request rejected");
                None
            }
            Err(e) => {
                warn!(error = %e, "Could not get source date");
                None
            }
        }
    }

    #[instrument(skip(self, descriptor, ctx), fields(kpi = %descriptor.id))]
    async fn fetch(&self, descriptor: &KpiDescriptor, ctx: &AdapterContext<'_>) -> AdapterReport {
        let SourceSpec::RenderedDelimited { chart } = &descriptor.source else {
            return AdapterReport::failed(FetchFailure::Format(
                "descriptor is not a rendered-delimited source".to_string(),
            ));
        };

        let url = self.data_url(chart);
        let resp = match self.http.get(&url, self.timeout).await.and_then(|r| r.ensure_success()) {
            Ok(resp) => resp,
            Err(failure) => {
                warn!(%url, %failure, "Rendered download failed");
                self.artifact(ctx, descriptor, "error.txt", failure.to_string().as_bytes());
                return AdapterReport::failed(failure);
            }
        };

        let text = match decode_text(&resp.bytes) {
            Ok(text) => normalize_newlines(&text),
            Err(failure) => return AdapterReport::failed(failure),
        };
        let table = match DelimitedTable::parse(&text, b',') {
            Ok(table) => table,
            Err(failure) => return AdapterReport::failed(failure),
        };

        let (Some(country), Some(code), Some(year)) =
            (table.index_of(ENTITY), table.index_of(CODE), table.index_of(YEAR))
        else {
            self.artifact(ctx, descriptor, "raw.csv", &resp.bytes);
            return AdapterReport::failed(FetchFailure::Format(format!(
                "expected {ENTITY},{CODE},{YEAR} columns, got {:?}",
                table.headers
            )));
        };
        let Some(value) = (0..table.headers.len()).find(|idx| ![country, code, year].contains(idx)) else {
            self.artifact(ctx, descriptor, "raw.csv", &resp.bytes);
            return AdapterReport::failed(FetchFailure::Format("no data column".to_string()));
        };
        let columns = RowColumns {
            country,
            year,
            value,
            iso2: Some(code),
        };

        let mut tally = MappingTally::default();
        let observations = table.observations(&columns, ctx.resolver, &mut tally);
        if observations.is_empty() {
            self.artifact(ctx, descriptor, "nodata.csv", &resp.bytes);
            return AdapterReport::new(
                Err(FetchFailure::Empty(format!("no usable rows in {chart}"))),
                tally,
            );
        }

        info!(rows = observations.len(), value_column = %table.headers[value], "Rendered KPI parsed");
        AdapterReport::new(Ok(observations), tally)
    }
}
