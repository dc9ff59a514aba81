use crate::descriptor::{KpiDescriptor, SortPolicy};
use crate::storage::DatasetStore;
use crate::types::DatasetRow;
use indexmap::IndexMap;
use serde::Serialize;
use std::cmp::Ordering;
use tracing::{debug, info, warn};

/// One output record of the overall ranking.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankingEntry {
    pub country: String,
    pub ranks: IndexMap<String, usize>,
    pub kpi_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatestValue {
    pub year: i64,
    pub value: f64,
}

/// Whether a KPI takes part in the ranking at all.
pub fn participates(descriptor: &KpiDescriptor) -> bool {
    !descriptor.is_relevance_none()
        && !descriptor.is_global_only()
        && matches!(
            descriptor.sort,
            SortPolicy::Higher | SortPolicy::Lower | SortPolicy::Target
        )
}

/// Most recent value per country. On equal years the later row wins; a
/// country keeps the position of its first appearance.
pub fn latest_values(rows: &[DatasetRow]) -> IndexMap<String, LatestValue> {
    let mut latest: IndexMap<String, LatestValue> = IndexMap::new();
    for row in rows {
        let (Some(country), Some(year), Some(value)) = (row.country.as_deref(), row.year, row.value) else {
            continue;
        };
        match latest.get_mut(country) {
            Some(existing) if year >= existing.year => *existing = LatestValue { year, value },
            Some(_) => {}
            None => {
                latest.insert(country.to_string(), LatestValue { year, value });
            }
        }
    }
    latest
}

/// Countries ordered best-first. The sort is stable, so equal keys keep
/// their first-appearance order and still get distinct ranks.
pub fn order_countries<'a>(
    latest: &'a IndexMap<String, LatestValue>,
    sort: SortPolicy,
    target_value: Option<f64>,
) -> Vec<&'a str> {
    let target = target_value.unwrap_or(0.0);
    let mut entries: Vec<(&str, f64)> = latest.iter().map(|(c, l)| (c.as_str(), l.value)).collect();
    let compare: fn(f64, f64, f64) -> Ordering = match sort {
        SortPolicy::Higher => |a, b, _| b.total_cmp(&a),
        SortPolicy::Lower => |a, b, _| a.total_cmp(&b),
        SortPolicy::Target => |a, b, t| (a - t).abs().total_cmp(&(b - t).abs()),
        SortPolicy::None => return Vec::new(),
    };
    entries.sort_by(|(_, a), (_, b)| compare(*a, *b, target));
    entries.into_iter().map(|(country, _)| country).collect()
}

/// Rank every participating KPI and fold the ranks per country.
pub fn build_ranking(descriptors: &[KpiDescriptor], store: &DatasetStore) -> Vec<RankingEntry> {
    let participating: Vec<&KpiDescriptor> = descriptors.iter().filter(|d| participates(d)).collect();
    info!(kpis = participating.len(), "KPIs considered for ranking");

    let mut by_country: IndexMap<String, RankingEntry> = IndexMap::new();
    let mut missing = Vec::new();
    for descriptor in participating {
        let rows = match store.load_rows(&descriptor.id) {
            Ok(Some(rows)) => rows,
            Ok(None) => {
                warn!(kpi = %descriptor.id, "Dataset missing; not ranked");
                missing.push(descriptor.id.as_str());
                continue;
            }
            Err(e) => {
                warn!(kpi = %descriptor.id, error = %e, "Could not read dataset; not ranked");
                continue;
            }
        };

        let latest = latest_values(&rows);
        if latest.is_empty() {
            debug!(kpi = %descriptor.id, "No numeric values");
            continue;
        }
        for (idx, country) in order_countries(&latest, descriptor.sort, descriptor.target_value)
            .into_iter()
            .enumerate()
        {
            let entry = by_country
                .entry(country.to_string())
                .or_insert_with(|| RankingEntry {
                    country: country.to_string(),
                    ranks: IndexMap::new(),
                    kpi_count: 0,
                });
            entry.ranks.insert(descriptor.id.clone(), idx + 1);
            entry.kpi_count += 1;
        }
    }

    if !missing.is_empty() {
        warn!(count = missing.len(), kpis = ?missing, "Ranking skipped KPIs without datasets");
    }
    by_country.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Observation;
    use serde_json::json;
    use tempfile::TempDir;

    fn descriptor(id: &str, extra: serde_json::Value) -> KpiDescriptor {
        let mut raw = json!({ "filename": id, "source_type": "csv" });
        for (k, v) in extra.as_object().unwrap() {
            raw[k] = v.clone();
        }
        KpiDescriptor::from_json(&raw).unwrap()
    }

    fn store_with(datasets: &[(&str, Vec<Observation>)]) -> (TempDir, DatasetStore) {
        let tmp = TempDir::new().unwrap();
        let store = DatasetStore::new(tmp.path().join("data"), tmp.path().join("pending"));
        for (id, obs) in datasets {
            store.save_dataset(id, obs).unwrap();
        }
        (tmp, store)
    }

    fn obs(country: &str, year: i32, value: f64) -> Observation {
        Observation::new(country, "", year, value)
    }

    fn ranks_of(entries: &[RankingEntry], kpi: &str) -> Vec<(String, usize)> {
        entries
            .iter()
            .filter_map(|e| e.ranks.get(kpi).map(|r| (e.country.clone(), *r)))
            .collect()
    }

    #[test]
    fn test_latest_value_per_country() {
        let rows: Vec<DatasetRow> = [
            obs("A", 2019, 1.0),
            obs("B", 2020, 2.0),
            obs("A", 2021, 3.0),
            obs("A", 2020, 4.0),
            obs("B", 2020, 5.0),
        ]
        .iter()
        .map(DatasetRow::from)
        .collect();
        let latest = latest_values(&rows);
        assert_eq!(latest.keys().collect::<Vec<_>>(), vec!["A", "B"]);
        assert_eq!(latest["A"], LatestValue { year: 2021, value: 3.0 });
        assert_eq!(latest["B"], LatestValue { year: 2020, value: 5.0 });
    }

    #[test]
    fn test_higher_and_target_policies() {
        let data = vec![obs("C", 2020, 20.0), obs("A", 2020, 10.0), obs("B", 2020, 30.0)];
        let (_tmp, store) = store_with(&[("gdp", data.clone()), ("temp", data)]);
        let descriptors = vec![
            descriptor("gdp", json!({ "sort": "higher" })),
            descriptor("temp", json!({ "sort": "target", "target_value": 15 })),
        ];
        let entries = build_ranking(&descriptors, &store);

        let mut gdp = ranks_of(&entries, "gdp");
        gdp.sort_by_key(|(_, r)| *r);
        assert_eq!(gdp, vec![("B".into(), 1), ("C".into(), 2), ("A".into(), 3)]);

        let mut temp = ranks_of(&entries, "temp");
        temp.sort_by_key(|(_, r)| *r);
        assert_eq!(temp, vec![("C".into(), 1), ("A".into(), 2), ("B".into(), 3)]);

        assert!(entries.iter().all(|e| e.kpi_count == 2));
    }

    #[test]
    fn test_lower_policy_keeps_distinct_ranks_for_ties() {
        let latest: IndexMap<String, LatestValue> = [("X", 3.0), ("Y", 1.0), ("Z", 1.0)]
            .into_iter()
            .map(|(c, v)| (c.to_string(), LatestValue { year: 2020, value: v }))
            .collect();
        assert_eq!(order_countries(&latest, SortPolicy::Lower, None), vec!["Y", "Z", "X"]);
        assert_eq!(order_countries(&latest, SortPolicy::Target, None), vec!["Y", "Z", "X"]);
        assert_eq!(order_countries(&latest, SortPolicy::Higher, None), vec!["X", "Y", "Z"]);
    }

    #[test]
    fn test_excluded_kpis_never_rank() {
        let data = vec![obs("A", 2020, 1.0), obs("B", 2020, 2.0)];
        let (_tmp, store) = store_with(&[
            ("muted", data.clone()),
            ("global", data.clone()),
            ("unsorted", data.clone()),
            ("kept", data),
        ]);
        let descriptors = vec![
            descriptor("muted", json!({ "sort": "higher", "relevance": "none" })),
            descriptor("global", json!({ "sort": "higher", "world_kpi": "e" })),
            descriptor("unsorted", json!({})),
            descriptor("kept", json!({ "sort": "lower" })),
        ];
        let entries = build_ranking(&descriptors, &store);
        for entry in &entries {
            assert_eq!(entry.ranks.keys().collect::<Vec<_>>(), vec!["kept"]);
            assert_eq!(entry.kpi_count, 1);
        }
    }

    #[test]
    fn test_countries_without_values_are_absent() {
        let (_tmp, store) = store_with(&[("gdp", vec![obs("A", 2020, 1.0)]), ("empty", vec![])]);
        let descriptors = vec![
            descriptor("gdp", json!({ "sort": "higher" })),
            descriptor("empty", json!({ "sort": "higher" })),
            descriptor("missing", json!({ "sort": "higher" })),
        ];
        let entries = build_ranking(&descriptors, &store);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].country, "A");
        assert_eq!(entries[0].ranks.len(), 1);
    }
}
