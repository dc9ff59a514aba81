//! Country registry and alias canonicalization.
//!
//! A raw country label resolves to exactly one of three outcomes:
//! a canonical registry name, an explicit drop (the alias table maps it to
//! the empty string), or unknown (no mapping yet; queued for curation).

use crate::constants::{REASON_INVALID_TARGET, REASON_UNKNOWN_ALIAS};
use crate::error::{KpiError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::Path;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Case-fold, strip diacritics and collapse every run of non-alphanumeric
/// characters into a single space.
pub fn fold_text(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_sep = false;
    for c in raw.nfkd().filter(|c| !is_combining_mark(*c)) {
        if c.is_alphanumeric() {
            if pending_sep && !out.is_empty() {
                out.push(' ');
            }
            pending_sep = false;
            out.extend(c.to_lowercase());
        } else {
            pending_sep = true;
        }
    }
    out
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Canonical(String),
    Dropped,
    Unknown { reason: &'static str },
}

/// Immutable lookup built once per run from the registry and alias table.
#[derive(Debug, Clone, Default)]
pub struct CountryResolver {
    registry: HashSet<String>,
    registry_index: HashMap<String, String>,
    /// Folded alias -> mapping outcome.
    alias_index: HashMap<String, AliasTarget>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum AliasTarget {
    Drop,
    Canonical(String),
    /// The mapped name is not in the registry.
    Invalid,
}

impl CountryResolver {
    pub fn new<I, S>(registry: I, aliases: &BTreeMap<String, String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let registry: HashSet<String> = registry.into_iter().map(Into::into).collect();
        let registry_index: HashMap<String, String> = registry
            .iter()
            .map(|name| (fold_text(name), name.clone()))
            .collect();

        let alias_index = aliases
            .iter()
            .map(|(alias, target)| {
                let resolved = if target.trim().is_empty() {
                    AliasTarget::Drop
                } else if registry.contains(target) {
                    AliasTarget::Canonical(target.clone())
                } else {
                    registry_index
                        .get(&fold_text(target))
                        .map(|name| AliasTarget::Canonical(name.clone()))
                        .unwrap_or(AliasTarget::Invalid)
                };
                (fold_text(alias), resolved)
            })
            .collect();

        Self {
            registry,
            registry_index,
            alias_index,
        }
    }

    pub fn country_count(&self) -> usize {
        self.registry.len()
    }

    pub fn resolve(&self, raw: &str) -> Resolution {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Resolution::Dropped;
        }
        if self.registry.contains(trimmed) {
            return Resolution::Canonical(trimmed.to_string());
        }

        let folded = fold_text(trimmed);
        if let Some(name) = self.registry_index.get(&folded) {
            return Resolution::Canonical(name.clone());
        }

        match self.alias_index.get(&folded) {
            Some(AliasTarget::Drop) => Resolution::Dropped,
            Some(AliasTarget::Canonical(name)) => Resolution::Canonical(name.clone()),
            Some(AliasTarget::Invalid) => Resolution::Unknown {
                reason: REASON_INVALID_TARGET,
            },
            None => Resolution::Unknown {
                reason: REASON_UNKNOWN_ALIAS,
            },
        }
    }

    /// Resolve and tally in one step; `None` means the row must be skipped.
    pub fn canonicalize(&self, raw: &str, tally: &mut MappingTally) -> Option<String> {
        let resolution = self.resolve(raw);
        tally.record(raw.trim(), &resolution);
        match resolution {
            Resolution::Canonical(name) => Some(name),
            Resolution::Dropped | Resolution::Unknown { .. } => None,
        }
    }
}

/// Mapping outcomes of one adapter call, folded into the run report.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MappingTally {
    pub mapped: usize,
    pub dropped: usize,
    pub unknown_hits: usize,
    /// Raw alias -> diagnostic reason.
    pub unknown: BTreeMap<String, String>,
}

impl MappingTally {
    pub fn record(&mut self, raw: &str, resolution: &Resolution) {
        match resolution {
            Resolution::Canonical(_) => self.mapped += 1,
            Resolution::Dropped => self.dropped += 1,
            Resolution::Unknown { reason } => {
                self.unknown_hits += 1;
                self.unknown.insert(raw.to_string(), (*reason).to_string());
            }
        }
    }

    pub fn merge(&mut self, other: &MappingTally) {
        self.mapped += other.mapped;
        self.dropped += other.dropped;
        self.unknown_hits += other.unknown_hits;
        for (alias, reason) in &other.unknown {
            self.unknown.insert(alias.clone(), reason.clone());
        }
    }
}

/// Aliases awaiting a human mapping. Entries are only ever added or
/// overwritten, never removed automatically.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PendingAliases(BTreeMap<String, String>);

impl PendingAliases {
    /// Merge newly seen unknown aliases; returns how many were not pending before.
    pub fn absorb(&mut self, unknown: &BTreeMap<String, String>) -> usize {
        let mut added = 0;
        for (alias, reason) in unknown {
            if self.0.insert(alias.clone(), reason.clone()).is_none() {
                added += 1;
            }
        }
        added
    }

    pub fn contains(&self, alias: &str) -> bool {
        self.0.contains_key(alias)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Registry file: canonical name -> arbitrary metadata. Required.
pub fn load_registry(path: &Path) -> Result<Vec<String>> {
    if !path.exists() {
        return Err(KpiError::MissingMeta(path.to_path_buf()));
    }
    let content = fs::read_to_string(path)?;
    let root: Value = serde_json::from_str(&content).map_err(|e| KpiError::InvalidMeta {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    match root {
        Value::Object(map) => Ok(map.into_iter().map(|(name, _)| name).collect()),
        _ => Err(KpiError::InvalidMeta {
            path: path.to_path_buf(),
            message: "expected a JSON object keyed by country name".to_string(),
        }),
    }
}

/// Alias table: alias -> canonical name or "" for an explicit drop.
/// Optional; non-string targets are ignored.
pub fn load_aliases(path: &Path) -> Result<BTreeMap<String, String>> {
    if !path.exists() {
        return Ok(BTreeMap::new());
    }
    let content = fs::read_to_string(path)?;
    let root: Value = serde_json::from_str(&content).map_err(|e| KpiError::InvalidMeta {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    let Value::Object(map) = root else {
        return Err(KpiError::InvalidMeta {
            path: path.to_path_buf(),
            message: "expected a JSON object of alias -> country".to_string(),
        });
    };
    Ok(map
        .into_iter()
        .filter_map(|(alias, target)| match target {
            Value::String(s) => Some((alias, s)),
            Value::Null => Some((alias, String::new())),
            _ => None,
        })
        .collect())
}

/// Pending table; an unreadable file starts a fresh table.
pub fn load_pending(path: &Path) -> PendingAliases {
    fs::read_to_string(path)
        .ok()
        .and_then(|content| serde_json::from_str(&content).ok())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> CountryResolver {
        let aliases: BTreeMap<String, String> = [
            ("Türkiye", "Turkey"),
            ("Viet Nam", "Vietnam"),
            ("World", ""),
            ("Euro area", ""),
            ("Kosovo (UNSCR 1244)", "Kosova"),
        ]
        .into_iter()
        .map(|(a, c)| (a.to_string(), c.to_string()))
        .collect();
        CountryResolver::new(
            ["Turkey", "Vietnam", "Côte d'Ivoire", "Germany"],
            &aliases,
        )
    }

    #[test]
    fn test_fold_text() {
        assert_eq!(fold_text("Côte d'Ivoire"), "cote d ivoire");
        assert_eq!(fold_text("  KOREA,  Rep. "), "korea rep");
        assert_eq!(fold_text("Türkiye"), "turkiye");
        assert_eq!(fold_text("---"), "");
    }

    #[test]
    fn test_registry_names_resolve_exactly_and_folded() {
        let r = resolver();
        assert_eq!(r.resolve("Germany"), Resolution::Canonical("Germany".into()));
        assert_eq!(r.resolve("GERMANY"), Resolution::Canonical("Germany".into()));
        assert_eq!(r.resolve("cote d'ivoire"), Resolution::Canonical("Côte d'Ivoire".into()));
    }

    #[test]
    fn test_aliases_resolve_case_and_diacritic_insensitive() {
        let r = resolver();
        assert_eq!(r.resolve("Türkiye"), Resolution::Canonical("Turkey".into()));
        assert_eq!(r.resolve("turkiye"), Resolution::Canonical("Turkey".into()));
        assert_eq!(r.resolve("VIET-NAM"), Resolution::Canonical("Vietnam".into()));
    }

    #[test]
    fn test_empty_alias_target_is_dropped_not_unknown() {
        let r = resolver();
        assert_eq!(r.resolve("World"), Resolution::Dropped);
        assert_eq!(r.resolve("euro area"), Resolution::Dropped);
    }

    #[test]
    fn test_unknown_and_invalid_target_are_unknown_with_reason() {
        let r = resolver();
        assert_eq!(
            r.resolve("Atlantis"),
            Resolution::Unknown { reason: REASON_UNKNOWN_ALIAS }
        );
        assert_eq!(
            r.resolve("Kosovo (UNSCR 1244)"),
            Resolution::Unknown { reason: REASON_INVALID_TARGET }
        );
    }

    #[test]
    fn test_canonicalize_tallies_every_outcome() {
        let r = resolver();
        let mut tally = MappingTally::default();
        assert_eq!(r.canonicalize("Viet Nam", &mut tally), Some("Vietnam".into()));
        assert_eq!(r.canonicalize("World", &mut tally), None);
        assert_eq!(r.canonicalize("Atlantis", &mut tally), None);
        assert_eq!(r.canonicalize("Atlantis", &mut tally), None);

        assert_eq!(tally.mapped, 1);
        assert_eq!(tally.dropped, 1);
        assert_eq!(tally.unknown_hits, 2);
        assert_eq!(tally.unknown.len(), 1);
        assert_eq!(tally.unknown["Atlantis"], REASON_UNKNOWN_ALIAS);
    }

    #[test]
    fn test_pending_absorb_overwrites_and_counts_new() {
        let mut pending = PendingAliases::default();
        let mut unknown = BTreeMap::new();
        unknown.insert("Atlantis".to_string(), "old".to_string());
        assert_eq!(pending.absorb(&unknown), 1);

        unknown.insert("Atlantis".to_string(), REASON_UNKNOWN_ALIAS.to_string());
        unknown.insert("Lemuria".to_string(), REASON_UNKNOWN_ALIAS.to_string());
        assert_eq!(pending.absorb(&unknown), 1);
        assert_eq!(pending.len(), 2);
        assert!(pending.contains("Atlantis"));
    }
}
