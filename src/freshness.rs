//! Staleness decision per KPI. Whenever staleness cannot be proven the
//! answer is "fetch".

use crate::constants::UNKNOWN_SOURCE_DATE;
use crate::ledger::FetchLedger;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

pub fn should_fetch(kpi_id: &str, source_date: Option<&str>, ledger: &FetchLedger) -> bool {
    let Some(entry) = ledger.get(kpi_id) else {
        return true;
    };
    let (Some(fresh), Some(stored)) = (known(source_date), known(Some(&entry.source_date))) else {
        return true;
    };
    match (parse_source_date(fresh), parse_source_date(stored)) {
        (Some(fresh), Some(stored)) => fresh > stored,
        _ => true,
    }
}

fn known(date: Option<&str>) -> Option<&str> {
    date.map(str::trim)
        .filter(|d| !d.is_empty() && *d != UNKNOWN_SOURCE_DATE)
}

/// Parse the timestamp shapes providers report. Offset-less values are UTC.
pub fn parse_source_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(dt.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::LedgerEntry;

    fn ledger_with(source_date: &str) -> FetchLedger {
        let mut ledger = FetchLedger::default();
        ledger.record(
            "gdp",
            LedgerEntry {
                source: "wb".into(),
                url: String::new(),
                source_date: source_date.into(),
                last_fetch: "2025-01-01T00:00:00Z".into(),
            },
        );
        ledger
    }

    #[test]
    fn test_no_entry_fetches() {
        assert!(should_fetch("gdp", Some("2025-01-01T00:00:00Z"), &FetchLedger::default()));
    }

    #[test]
    fn test_missing_or_unknown_dates_fetch() {
        let ledger = ledger_with("2025-01-01T00:00:00Z");
        assert!(should_fetch("gdp", None, &ledger));
        assert!(should_fetch("gdp", Some("Unknown"), &ledger));
        assert!(should_fetch("gdp", Some(""), &ledger));

        let unknown = ledger_with("Unknown");
        assert!(should_fetch("gdp", Some("2020-01-01T00:00:00Z"), &unknown));
    }

    #[test]
    fn test_unparseable_dates_fetch() {
        let ledger = ledger_with("2025-01-01T00:00:00Z");
        assert!(should_fetch("gdp", Some("last tuesday"), &ledger));
        let garbage = ledger_with("soon");
        assert!(should_fetch("gdp", Some("2020-01-01T00:00:00Z"), &garbage));
    }

    #[test]
    fn test_fetches_only_when_strictly_newer() {
        let ledger = ledger_with("2025-01-01T00:00:00Z");
        let pairs = [
            ("2025-01-02T00:00:00Z", true),
            ("2025-01-01T00:00:00Z", false),
            ("2024-12-31T23:59:59Z", false),
            ("2025-01-01T01:00:00+02:00", false),
            ("2025-01-01T00:00:01", true),
            ("2025-01-01", false),
            ("2025-01-02", true),
        ];
        for (fresh, expected) in pairs {
            assert_eq!(should_fetch("gdp", Some(fresh), &ledger), expected, "fresh={fresh}");
        }
    }

    #[test]
    fn test_parse_source_date_shapes() {
        assert!(parse_source_date("2025-10-07T12:30:00.123Z").is_some());
        assert!(parse_source_date("2025-10-07 12:30:00").is_some());
        assert!(parse_source_date("2025-10-07").is_some());
        assert!(parse_source_date("07/10/2025").is_none());
    }
}
