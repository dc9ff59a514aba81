use super::decode::{decode_text, normalize_newlines};
use super::{AdapterContext, AdapterReport, DelimitedTable, RowColumns, SourceAdapter};
use crate::config::Config;
use crate::country::MappingTally;
use crate::descriptor::{KpiDescriptor, SourceSpec, SourceType};
use crate::error::FetchFailure;
use async_trait::async_trait;
use std::path::PathBuf;
use tracing::{info, instrument, warn};

/// Curated local files with `country,iso2,year,value` columns.
pub struct StaticDelimitedAdapter {
    source_dir: PathBuf,
}

impl StaticDelimitedAdapter {
    pub fn new(config: &Config) -> Self {
        Self {
            source_dir: config.paths.source_csv_dir.clone(),
        }
    }

    pub fn file_path(&self, file_name: &str) -> PathBuf {
        self.source_dir.join(file_name)
    }
}

#[async_trait]
impl SourceAdapter for StaticDelimitedAdapter {
    fn source_type(&self) -> SourceType {
        SourceType::StaticDelimited
    }

    fn source_url(&self, descriptor: &KpiDescriptor) -> String {
        self.file_path(descriptor.source.code()).display().to_string()
    }

    #[instrument(skip(self, descriptor, ctx), fields(kpi = %descriptor.id))]
    async fn fetch(&self, descriptor: &KpiDescriptor, ctx: &AdapterContext<'_>) -> AdapterReport {
        let SourceSpec::StaticDelimited { file_name } = &descriptor.source else {
            return AdapterReport::failed(FetchFailure::Format(
                "descriptor is not a static-delimited source".to_string(),
            ));
        };

        let path = self.file_path(file_name);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Static source unavailable");
                return AdapterReport::failed(FetchFailure::MissingSource(format!("{}: {e}", path.display())));
            }
        };

        let table = match decode_text(&bytes).and_then(|text| DelimitedTable::parse(&normalize_newlines(&text), b',')) {
            Ok(table) => table,
            Err(failure) => return AdapterReport::failed(failure),
        };
        let (Some(country), Some(year), Some(value)) = (
            table.index_of("country"),
            table.index_of("year"),
            table.index_of("value"),
        ) else {
            if let Err(e) = ctx.store.write_side_artifact(
                &descriptor.id,
                file_name,
                "cols.txt",
                table.headers.join("\n").as_bytes(),
            ) {
                warn!(kpi = %descriptor.id, error = %e, "Could not persist side artifact");
            }
            return AdapterReport::failed(FetchFailure::Format(format!(
                "{} lacks country/year/value columns",
                path.display()
            )));
        };
        let columns = RowColumns {
            country,
            year,
            value,
            iso2: table.index_of("iso2"),
        };

        let mut tally = MappingTally::default();
        let observations = table.observations(&columns, ctx.resolver, &mut tally);
        if observations.is_empty() {
            return AdapterReport::new(
                Err(FetchFailure::Empty(format!("no usable rows in {}", path.display()))),
                tally,
            );
        }

        info!(rows = observations.len(), "Static KPI parsed");
        AdapterReport::new(Ok(observations), tally)
    }
}
