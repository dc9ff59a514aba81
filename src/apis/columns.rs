//! Header matching for delimited sources whose column names drift between
//! releases.

use crate::country::fold_text;

/// Return the first header (in header order) containing the highest-priority
/// phrase that matches any header. Matching is case- and diacritic-insensitive.
pub fn find_column<'a, S: AsRef<str>>(headers: &'a [S], phrases: &[&str]) -> Option<&'a str> {
    let folded: Vec<String> = headers.iter().map(|h| fold_text(h.as_ref())).collect();
    phrases
        .iter()
        .map(|p| fold_text(p))
        .filter(|p| !p.is_empty())
        .find_map(|phrase| {
            folded
                .iter()
                .position(|h| h.contains(&phrase))
                .map(|idx| headers[idx].as_ref())
        })
}

pub const COUNTRY_PHRASES: &[&str] = &[
    "country of asylum",
    "territory of asylum",
    "country / territory of asylum",
    "country of asylum/residence",
    "asylum",
];

pub const YEAR_PHRASES: &[&str] = &["year"];

pub const VALUE_PHRASES: &[&str] = &[
    "refugees under unhcr's mandate",
    "refugees (incl. refugee-like situations)",
    "refugees",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMap {
    pub country: String,
    pub year: String,
    pub value: String,
}

/// Resolve the three required columns. An explicit value field replaces the
/// heuristic value phrases entirely.
pub fn resolve_columns<S: AsRef<str>>(headers: &[S], value_field: Option<&str>) -> Option<ColumnMap> {
    let country = find_column(headers, COUNTRY_PHRASES)?;
    let year = find_column(headers, YEAR_PHRASES)?;
    let value = match value_field {
        Some(field) => find_column(headers, &[field])?,
        None => find_column(headers, VALUE_PHRASES)?,
    };
    Some(ColumnMap {
        country: country.to_string(),
        year: year.to_string(),
        value: value.to_string(),
    })
}
