//! Source adapters: one per source type, each turning a KPI's raw source
//! into canonicalized observations.

pub mod archived_delimited;
pub mod columns;
pub mod decode;
pub mod rendered_delimited;
pub mod static_delimited;
pub mod tabular_api;

use crate::config::Config;
use crate::country::{CountryResolver, MappingTally};
use crate::descriptor::{KpiDescriptor, SourceType};
use crate::error::FetchFailure;
use crate::infra::HttpClientPort;
use crate::storage::DatasetStore;
use crate::types::{parse_number, parse_year, Observation};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

pub use archived_delimited::ArchivedDelimitedAdapter;
pub use rendered_delimited::RenderedDelimitedAdapter;
pub use static_delimited::StaticDelimitedAdapter;
pub use tabular_api::TabularApiAdapter;

/// Shared, read-only collaborators handed to every fetch.
pub struct AdapterContext<'a> {
    pub resolver: &'a CountryResolver,
    /// Only used for diagnostic side artifacts; datasets are written by the orchestrator.
    pub store: &'a DatasetStore,
}

/// Outcome of one fetch plus the mapping tally gathered on the way. The tally
/// is kept even on failure so unknown aliases still reach the pending table.
#[derive(Debug)]
pub struct AdapterReport {
    pub result: Result<Vec<Observation>, FetchFailure>,
    pub mapping: MappingTally,
}

impl AdapterReport {
    pub fn new(result: Result<Vec<Observation>, FetchFailure>, mapping: MappingTally) -> Self {
        Self { result, mapping }
    }

    pub fn failed(failure: FetchFailure) -> Self {
        Self {
            result: Err(failure),
            mapping: MappingTally::default(),
        }
    }
}

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn source_type(&self) -> SourceType;

    /// Where the data is read from, recorded in the ledger.
    fn source_url(&self, descriptor: &KpiDescriptor) -> String;

    /// The provider's published update timestamp, when it exposes one.
    async fn source_date(&self, _descriptor: &KpiDescriptor) -> Option<String> {
        None
    }

    async fn fetch(&self, descriptor: &KpiDescriptor, ctx: &AdapterContext<'_>) -> AdapterReport;
}

/// Adapters keyed by the source type they serve.
pub struct AdapterRegistry {
    adapters: HashMap<SourceType, Box<dyn SourceAdapter>>,
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self {
            adapters: HashMap::new(),
        }
    }

    /// All four built-in adapters sharing one HTTP client.
    pub fn with_defaults(http: Arc<dyn HttpClientPort>, config: &Config) -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(TabularApiAdapter::new(http.clone(), config)));
        registry.register(Box::new(ArchivedDelimitedAdapter::new(http.clone(), config)));
        registry.register(Box::new(RenderedDelimitedAdapter::new(http, config)));
        registry.register(Box::new(StaticDelimitedAdapter::new(config)));
        registry
    }

    pub fn register(&mut self, adapter: Box<dyn SourceAdapter>) {
        self.adapters.insert(adapter.source_type(), adapter);
    }

    pub fn get(&self, source_type: SourceType) -> Option<&dyn SourceAdapter> {
        self.adapters.get(&source_type).map(|a| a.as_ref())
    }
}

/// A parsed delimited document.
#[derive(Debug, Clone)]
pub struct DelimitedTable {
    pub headers: Vec<String>,
    pub records: Vec<csv::StringRecord>,
}

impl DelimitedTable {
    pub fn parse(text: &str, delimiter: u8) -> Result<Self, FetchFailure> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(text.as_bytes());
        let headers = reader
            .headers()
            .map_err(|e| FetchFailure::Format(format!("unreadable header: {e}")))?
            .iter()
            .map(|h| h.trim_start_matches('\u{feff}').to_string())
            .collect::<Vec<_>>();
        let records = reader
            .records()
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| FetchFailure::Format(format!("malformed row: {e}")))?;
        Ok(Self { headers, records })
    }

    pub fn has_header(&self) -> bool {
        self.headers.iter().any(|h| !h.is_empty())
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    /// Canonicalize and parse every row; rows that do not resolve or lack a
    /// numeric year/value are skipped.
    pub fn observations(
        &self,
        columns: &RowColumns,
        resolver: &CountryResolver,
        tally: &mut MappingTally,
    ) -> Vec<Observation> {
        let mut out = Vec::new();
        for record in &self.records {
            let country_raw = record.get(columns.country).unwrap_or("").trim();
            if country_raw.is_empty() {
                continue;
            }
            let Some(country) = resolver.canonicalize(country_raw, tally) else {
                continue;
            };
            let year = record.get(columns.year).and_then(parse_year);
            let value = record.get(columns.value).and_then(parse_number);
            let (Some(year), Some(value)) = (year, value) else {
                continue;
            };
            let iso2 = columns
                .iso2
                .and_then(|idx| record.get(idx))
                .unwrap_or("")
                .to_string();
            out.push(Observation::new(country, iso2, year, value));
        }
        out
    }
}

/// Column positions used by [`DelimitedTable::observations`].
#[derive(Debug, Clone, Copy)]
pub struct RowColumns {
    pub country: usize,
    pub year: usize,
    pub value: usize,
    pub iso2: Option<usize>,
}


#[cfg(test)]
pub(crate) mod testing {
    use crate::error::FetchFailure;
    use crate::infra::{HttpClientPort, HttpGetResult};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Canned responses keyed by URL; unknown URLs fail as network errors.
    #[derive(Default)]
    pub struct CannedHttp {
        responses: HashMap<String, Result<HttpGetResult, FetchFailure>>,
        pub requested: Mutex<Vec<String>>,
    }

    impl CannedHttp {
        pub fn with(mut self, url: &str, response: Result<HttpGetResult, FetchFailure>) -> Self {
            self.responses.insert(url.to_string(), response);
            self
        }
    }

    #[async_trait]
    impl HttpClientPort for CannedHttp {
        async fn get(&self, url: &str, _timeout: Duration) -> Result<HttpGetResult, FetchFailure> {
            self.requested.lock().unwrap().push(url.to_string());
            self.responses
                .get(url)
                .cloned()
                .unwrap_or_else(|| Err(FetchFailure::Network(format!("no route to {url}"))))
        }
    }
}
