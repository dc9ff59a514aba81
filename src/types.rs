use serde::{Deserialize, Deserializer, Serialize};

/// One canonicalized data point of a KPI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub country: String,
    #[serde(default)]
    pub iso2: String,
    pub year: i32,
    pub value: f64,
}

impl Observation {
    pub fn new(country: impl Into<String>, iso2: impl Into<String>, year: i32, value: f64) -> Self {
        Self {
            country: country.into(),
            iso2: iso2.into(),
            year,
            value,
        }
    }
}

/// A row of a persisted per-KPI dataset, read leniently by the analytics.
///
/// Files written by this crate always hold full `Observation`s, but older or
/// hand-edited files may carry nulls or text where numbers belong.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DatasetRow {
    #[serde(default, deserialize_with = "lenient_string")]
    pub country: Option<String>,
    #[serde(default, deserialize_with = "lenient_year")]
    pub year: Option<i64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub value: Option<f64>,
}

impl From<&Observation> for DatasetRow {
    fn from(obs: &Observation) -> Self {
        Self {
            country: Some(obs.country.clone()),
            year: Some(obs.year as i64),
            value: Some(obs.value),
        }
    }
}

/// Top-level shape of a dataset file: a bare array or `{ "data": [...] }`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum DatasetFile {
    Rows(Vec<DatasetRow>),
    Wrapped { data: Vec<DatasetRow> },
}

impl DatasetFile {
    pub fn into_rows(self) -> Vec<DatasetRow> {
        match self {
            DatasetFile::Rows(rows) | DatasetFile::Wrapped { data: rows } => rows,
        }
    }
}

fn lenient_string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    let value = serde_json::Value::deserialize(d)?;
    Ok(match value {
        serde_json::Value::String(s) if !s.is_empty() => Some(s),
        _ => None,
    })
}

fn lenient_number<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
    let value = serde_json::Value::deserialize(d)?;
    Ok(value.as_f64().filter(|v| v.is_finite()))
}

fn lenient_year<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i64>, D::Error> {
    let value = serde_json::Value::deserialize(d)?;
    Ok(match value {
        serde_json::Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        serde_json::Value::String(s) => parse_year(&s).map(i64::from),
        _ => None,
    })
}

/// Parse a value cell. Decimal commas are accepted ("1,5" is 1.5).
pub fn parse_number(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed
        .replace(',', ".")
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
}

/// Parse a year cell; "2020.0" style text is truncated to 2020.
pub fn parse_year(raw: &str) -> Option<i32> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(year) = trimmed.parse::<i32>() {
        return Some(year);
    }
    trimmed
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite() && v.abs() < i32::MAX as f64)
        .map(|v| v.trunc() as i32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_number_accepts_decimal_comma() {
        assert_eq!(parse_number("1,5"), Some(1.5));
        assert_eq!(parse_number(" 42 "), Some(42.0));
        assert_eq!(parse_number(""), None);
        assert_eq!(parse_number("n/a"), None);
        assert_eq!(parse_number("NaN"), None);
    }

    #[test]
    fn test_parse_year_truncates_float_text() {
        assert_eq!(parse_year("2020"), Some(2020));
        assert_eq!(parse_year("2020.0"), Some(2020));
        assert_eq!(parse_year("twenty"), None);
    }

    #[test]
    fn test_dataset_file_accepts_wrapped_and_nulls() {
        let wrapped: DatasetFile = serde_json::from_str(
            r#"{"data": [{"country": "France", "year": 2020, "value": null},
                         {"country": "Spain", "year": "2021", "value": 3.5}]}"#,
        )
        .unwrap();
        let rows = wrapped.into_rows();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].value, None);
        assert_eq!(rows[1].year, Some(2021));
        assert_eq!(rows[1].value, Some(3.5));
    }
}
