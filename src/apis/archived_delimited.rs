use super::columns::resolve_columns;
use super::decode::{
    decode_plain_body, decode_text, extract_first_csv, looks_like_zip, normalize_newlines, sniff_delimiter,
};
use super::{AdapterContext, AdapterReport, DelimitedTable, RowColumns, SourceAdapter};
use crate::config::Config;
use crate::country::MappingTally;
use crate::descriptor::{KpiDescriptor, SourceSpec, SourceType};
use crate::error::FetchFailure;
use crate::infra::HttpClientPort;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Population statistics downloaded as a (possibly zipped) delimited file
/// whose encoding, delimiter and column names all vary between releases.
pub struct ArchivedDelimitedAdapter {
    http: Arc<dyn HttpClientPort>,
    base_url: String,
    timeout: Duration,
}

impl ArchivedDelimitedAdapter {
    pub fn new(http: Arc<dyn HttpClientPort>, config: &Config) -> Self {
        Self {
            http,
            base_url: config.endpoints.archived_base.trim_end_matches('/').to_string(),
            timeout: config.http.archived_timeout(),
        }
    }

    pub fn data_url(&self, dataset: &str) -> String {
        format!("{}/{}", self.base_url, dataset.trim_start_matches('/'))
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

#[async_trait]
impl SourceAdapter for ArchivedDelimitedAdapter {
    fn source_type(&self) -> SourceType {
        SourceType::ArchivedDelimited
    }

    fn source_url(&self, descriptor: &KpiDescriptor) -> String {
        self.data_url(descriptor.source.code())
    }

    #[instrument(skip(self, descriptor, ctx), fields(kpi = %descriptor.id))]
    async fn fetch(&self, descriptor: &KpiDescriptor, ctx: &AdapterContext<'_>) -> AdapterReport {
        let SourceSpec::ArchivedDelimited { dataset, value_field } = &descriptor.source else {
            return AdapterReport::failed(FetchFailure::Format(
                "descriptor is not an archived-delimited source".to_string(),
            ));
        };

        let url = self.data_url(dataset);
        let resp = match self.http.get(&url, self.timeout).await.and_then(|r| r.ensure_success()) {
            Ok(resp) => resp,
            Err(failure) => {
                warn!(%url, %failure, "Archived download failed");
                self.artifact(ctx, descriptor, "error.txt", failure.to_string().as_bytes());
                return AdapterReport::failed(failure);
            }
        };

        let text = if looks_like_zip(&resp.content_type, &resp.bytes) {
            match extract_first_csv(&resp.bytes).and_then(|(name, raw)| {
                debug!(entry = %name, "Extracted archive entry");
                decode_text(&raw)
            }) {
                Ok(text) => text,
                Err(failure) => return AdapterReport::failed(failure),
            }
        } else {
            match decode_plain_body(&resp.bytes) {
                Ok(text) => text,
                Err(failure) => return AdapterReport::failed(failure),
            }
        };
        let text = normalize_newlines(&text);

        let delimiter = sniff_delimiter(&text).unwrap_or(b',');
        let table = match DelimitedTable::parse(&text, delimiter) {
            Ok(table) => table,
            Err(failure) => return AdapterReport::failed(failure),
        };
        if !table.has_header() {
            self.artifact(ctx, descriptor, "empty.csv", text.as_bytes());
            return AdapterReport::failed(FetchFailure::Format("delimited file has no header".to_string()));
        }

        let Some(map) = resolve_columns(&table.headers, value_field.as_deref()) else {
            let cols = table.headers.join("\n");
            self.artifact(ctx, descriptor, "cols.txt", cols.as_bytes());
            self.artifact(ctx, descriptor, "raw.csv", text.as_bytes());
            warn!(headers = ?table.headers, "Required columns not found");
            return AdapterReport::failed(FetchFailure::Format(
                "required country/year/value columns not found".to_string(),
            ));
        };
        debug!(country = %map.country, year = %map.year, value = %map.value, "Columns resolved");

        let (Some(country), Some(year), Some(value)) = (
            table.index_of(&map.country),
            table.index_of(&map.year),
            table.index_of(&map.value),
        ) else {
            return AdapterReport::failed(FetchFailure::Format("resolved column vanished".to_string()));
        };
        let columns = RowColumns {
            country,
            year,
            value,
            iso2: None,
        };

        let mut tally = MappingTally::default();
        let observations = table.observations(&columns, ctx.resolver, &mut tally);
        if observations.is_empty() {
            self.artifact(ctx, descriptor, "nodata.csv", text.as_bytes());
            return AdapterReport::new(
                Err(FetchFailure::Empty(format!("no usable rows in {dataset}"))),
                tally,
            );
        }

        info!(rows = observations.len(), "Archived KPI parsed");
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
    use crate::types::Observation;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::io::{Cursor, Write};
    use tempfile::TempDir;

    const URL: &str = "https://api.unhcr.org/population/v1/population?download=true";

    fn descriptor(value_field: Option<&str>) -> KpiDescriptor {
        let mut raw = json!({
            "filename": "refugees",
            "source_type": "unhcr",
        });
        if let Some(field) = value_field {
            raw["value_field"] = json!(field);
        }
        KpiDescriptor::from_json(&raw).unwrap()
    }

    fn resolver() -> CountryResolver {
        let aliases: BTreeMap<String, String> =
            [("Türkiye".to_string(), "Turkey".to_string())].into_iter().collect();
        CountryResolver::new(["Chad", "Turkey"], &aliases)
    }

    fn zipped(name: &str, data: &[u8]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = zip::write::FileOptions::default().compression_method(zip::CompressionMethod::Stored);
        writer.start_file(name, options).unwrap();
        writer.write_all(data).unwrap();
        writer.finish().unwrap().into_inner()
    }

    async fn run(body: HttpGetResult, value_field: Option<&str>) -> (AdapterReport, TempDir) {
        let tmp = TempDir::new().unwrap();
        let store = DatasetStore::new(tmp.path().join("data"), tmp.path().join("pending"));
        let http = Arc::new(CannedHttp::default().with(URL, Ok(body)));
        let adapter = ArchivedDelimitedAdapter::new(http, &Config::default());
        let resolver = resolver();
        let ctx = AdapterContext {
            resolver: &resolver,
            store: &store,
        };
        let report = adapter.fetch(&descriptor(value_field), &ctx).await;
        (report, tmp)
    }

    #[tokio::test]
    async fn test_zipped_semicolon_file_is_parsed() {
        let csv = "Year;Country of origin;Country of asylum;Refugees under UNHCR's mandate\r\n\
                   2022;Sudan;Chad;\"1,5\"\r\n\
                   2022;Syria;Türkiye;3000\r\n";
        let body = HttpGetResult::ok(zipped("export/population.csv", csv.as_bytes()), "application/zip");
        let (report, _tmp) = run(body, None).await;

        assert_eq!(
            report.result.unwrap(),
            vec![
                Observation::new("Chad", "", 2022, 1.5),
                Observation::new("Turkey", "", 2022, 3000.0),
            ]
        );
        assert_eq!(report.mapping.mapped, 2);
    }

    #[tokio::test]
    async fn test_mislabeled_utf16_body_is_decoded() {
        let csv = "Year\tCountry of asylum\tRefugees\n2021\tChad\t10\n";
        let mut bytes = vec![0xFF, 0xFE];
        for unit in csv.encode_utf16() {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        let (report, _tmp) = run(HttpGetResult::ok(bytes, "text/csv"), None).await;
        assert_eq!(report.result.unwrap(), vec![Observation::new("Chad", "", 2021, 10.0)]);
    }

    #[tokio::test]
    async fn test_missing_columns_leave_diagnostics() {
        let csv = "Year,Origin,Total\n2021,Chad,10\n";
        let (report, tmp) = run(HttpGetResult::ok(csv, "text/csv"), None).await;

        assert!(matches!(report.result, Err(FetchFailure::Format(_))));
        let pending = tmp.path().join("pending");
        assert!(pending.join("refugees_population_download_true_cols.txt").exists());
        assert!(pending.join("refugees_population_download_true_raw.csv").exists());
    }

    #[tokio::test]
    async fn test_value_field_override_without_match_is_format_failure() {
        let csv = "Year,Country of asylum,Refugees\n2021,Chad,10\n";
        let (report, _tmp) = run(HttpGetResult::ok(csv, "text/csv"), Some("Stateless")).await;
        assert!(matches!(report.result, Err(FetchFailure::Format(_))));
    }

    #[tokio::test]
    async fn test_no_usable_rows_is_empty() {
        let csv = "Year,Country of asylum,Refugees\n2021,Atlantis,10\n";
        let (report, tmp) = run(HttpGetResult::ok(csv, "text/csv"), None).await;

        assert!(matches!(report.result, Err(FetchFailure::Empty(_))));
        assert!(report.mapping.unknown.contains_key("Atlantis"));
        assert!(tmp
            .path()
            .join("pending/refugees_population_download_true_nodata.csv")
            .exists());
    }

    #[tokio::test]
    async fn test_http_error_is_network_failure() {
        let body = HttpGetResult {
            status: 503,
            ..Default::default()
        };
        let (report, tmp) = run(body, None).await;
        assert!(matches!(report.result, Err(FetchFailure::Network(_))));
        assert!(tmp
            .path()
            .join("pending/refugees_population_download_true_error.txt")
            .exists());
    }
}
