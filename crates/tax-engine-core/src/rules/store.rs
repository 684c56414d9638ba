use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::TaxEngineError;
use crate::rules::schema::RuleSet;
use crate::types::Country;
use crate::TaxEngineResult;

/// Rule documents shipped with the crate, one per country for tax year 2024.
const BUILTIN_DOCUMENTS: [&str; 5] = [
    include_str!("../../rules/us_2024.json"),
    include_str!("../../rules/ca_2024.json"),
    include_str!("../../rules/uk_2024.json"),
    include_str!("../../rules/au_2024.json"),
    include_str!("../../rules/de_2024.json"),
];

struct StoredRules {
    rules: Arc<RuleSet>,
    hash: String,
    loaded_at: DateTime<Utc>,
    source: Option<PathBuf>,
}

/// Loads, validates, and versions per-country/per-year rule documents.
///
/// The table is swapped under a `RwLock` so a hot reload is atomic from the
/// readers' perspective: a calculation in flight sees either the old or the
/// new rule set in its entirety. An invalid replacement document is rejected
/// and the previously loaded version stays active.
pub struct RuleStore {
    table: RwLock<HashMap<(Country, i32), StoredRules>>,
    dir: Option<PathBuf>,
}

impl RuleStore {
    /// Empty store; documents are added via `insert_document` or `load_all`.
    pub fn new() -> Self {
        RuleStore {
            table: RwLock::new(HashMap::new()),
            dir: None,
        }
    }

    /// Store pre-loaded with the built-in documents.
    pub fn builtin() -> TaxEngineResult<Self> {
        let store = RuleStore::new();
        store.load_all()?;
        Ok(store)
    }

    /// Store backed by a directory of `*.json` rule documents.
    pub fn from_dir(dir: impl Into<PathBuf>) -> TaxEngineResult<Self> {
        let store = RuleStore {
            table: RwLock::new(HashMap::new()),
            dir: Some(dir.into()),
        };
        store.load_all()?;
        Ok(store)
    }

    /// (Re)load every document from the backing source. Invalid documents are
    /// logged and skipped; previously loaded versions remain active. Returns
    /// the number of documents activated.
    pub fn load_all(&self) -> TaxEngineResult<usize> {
        let mut loaded = 0;
        match &self.dir {
            Some(dir) => {
                for path in rule_files(dir)? {
                    match fs::read_to_string(&path) {
                        Ok(contents) => {
                            if self.insert_document(&contents, Some(path.clone())).is_ok() {
                                loaded += 1;
                            }
                        }
                        Err(e) => warn!(path = %path.display(), error = %e, "failed to read rule document"),
                    }
                }
            }
            None => {
                for contents in BUILTIN_DOCUMENTS {
                    if self.insert_document(contents, None).is_ok() {
                        loaded += 1;
                    }
                }
            }
        }
        Ok(loaded)
    }

    /// Parse, validate, and activate a single rule document. On validation
    /// failure the document is not cached and the error is returned.
    pub fn insert_document(
        &self,
        contents: &str,
        source: Option<PathBuf>,
    ) -> TaxEngineResult<(Country, i32)> {
        let rules: RuleSet = serde_json::from_str(contents).map_err(|e| {
            warn!(error = %e, "rejected unparseable rule document");
            TaxEngineError::Serialization(e.to_string())
        })?;
        let key = (rules.country, rules.tax_year);
        if let Err(e) = rules.validate(key.0, key.1) {
            warn!(country = %key.0, tax_year = key.1, error = %e, "rejected invalid rule document");
            return Err(e);
        }

        let hash = content_hash(&rules)?;
        debug!(country = %key.0, tax_year = key.1, hash = %hash, "activated rule document");
        self.table.write().insert(
            key,
            StoredRules {
                rules: Arc::new(rules),
                hash,
                loaded_at: Utc::now(),
                source,
            },
        );
        Ok(key)
    }

    /// Re-read documents from the backing source, optionally restricted to one
    /// country and/or year. Keys that fail to reload keep their prior version.
    pub fn reload(&self, country: Option<Country>, year: Option<i32>) -> TaxEngineResult<usize> {
        let matches = |key: (Country, i32)| {
            country.map_or(true, |c| c == key.0) && year.map_or(true, |y| y == key.1)
        };

        let mut reloaded = 0;
        match &self.dir {
            Some(dir) => {
                for path in rule_files(dir)? {
                    let contents = match fs::read_to_string(&path) {
                        Ok(c) => c,
                        Err(e) => {
                            warn!(path = %path.display(), error = %e, "failed to read rule document");
                            continue;
                        }
                    };
                    // Peek at the key before activating, so a filtered reload
                    // does not touch unrelated documents.
                    if let Ok(parsed) = serde_json::from_str::<RuleSet>(&contents) {
                        if !matches((parsed.country, parsed.tax_year)) {
                            continue;
                        }
                    }
                    if self.insert_document(&contents, Some(path)).is_ok() {
                        reloaded += 1;
                    }
                }
            }
            None => {
                for contents in BUILTIN_DOCUMENTS {
                    if let Ok(parsed) = serde_json::from_str::<RuleSet>(contents) {
                        if !matches((parsed.country, parsed.tax_year)) {
                            continue;
                        }
                    }
                    if self.insert_document(contents, None).is_ok() {
                        reloaded += 1;
                    }
                }
            }
        }
        Ok(reloaded)
    }

    pub fn get_rules(&self, country: Country, year: i32) -> TaxEngineResult<Arc<RuleSet>> {
        let table = self.table.read();
        if let Some(stored) = table.get(&(country, year)) {
            return Ok(Arc::clone(&stored.rules));
        }
        if table.keys().any(|(c, _)| *c == country) {
            Err(TaxEngineError::YearNotSupported {
                country,
                tax_year: year,
            })
        } else {
            Err(TaxEngineError::CountryNotSupported {
                code: country.code().to_string(),
            })
        }
    }

    /// Look up a value inside a rule document by dotted path, e.g.
    /// `"social_security.rate"` or `"federal.tax_brackets.single.0.rate"`.
    pub fn get_rule_path(
        &self,
        country: Country,
        year: i32,
        path: &str,
    ) -> TaxEngineResult<Option<serde_json::Value>> {
        let rules = self.get_rules(country, year)?;
        let root = serde_json::to_value(rules.as_ref())?;
        let mut current = &root;
        for segment in path.split('.') {
            let next = match current {
                serde_json::Value::Object(map) => map.get(segment),
                serde_json::Value::Array(items) => segment
                    .parse::<usize>()
                    .ok()
                    .and_then(|index| items.get(index)),
                _ => None,
            };
            match next {
                Some(value) => current = value,
                None => return Ok(None),
            }
        }
        Ok(Some(current.clone()))
    }

    pub fn supported_countries(&self) -> Vec<Country> {
        let mut countries: Vec<Country> =
            self.table.read().keys().map(|(c, _)| *c).collect();
        countries.sort();
        countries.dedup();
        countries
    }

    pub fn supported_years(&self, country: Country) -> Vec<i32> {
        let mut years: Vec<i32> = self
            .table
            .read()
            .keys()
            .filter(|(c, _)| *c == country)
            .map(|(_, y)| *y)
            .collect();
        years.sort_unstable();
        years
    }

    /// Content digest of the active document, used by the orchestrator to key
    /// cached results. Changes whenever any rule value changes.
    pub fn rules_hash(&self, country: Country, year: i32) -> TaxEngineResult<String> {
        let table = self.table.read();
        match table.get(&(country, year)) {
            Some(stored) => Ok(stored.hash.clone()),
            None => Err(TaxEngineError::YearNotSupported {
                country,
                tax_year: year,
            }),
        }
    }

    pub fn loaded_at(&self, country: Country, year: i32) -> Option<DateTime<Utc>> {
        self.table
            .read()
            .get(&(country, year))
            .map(|stored| stored.loaded_at)
    }

    pub fn source_path(&self, country: Country, year: i32) -> Option<PathBuf> {
        self.table
            .read()
            .get(&(country, year))
            .and_then(|stored| stored.source.clone())
    }
}

impl Default for RuleStore {
    fn default() -> Self {
        RuleStore::new()
    }
}

/// SHA-256 of the canonical JSON serialization, hex-encoded. Serialization of
/// the typed document is deterministic (struct field order, BTreeMap keys).
fn content_hash(rules: &RuleSet) -> TaxEngineResult<String> {
    let canonical = serde_json::to_vec(rules)?;
    let digest = Sha256::digest(&canonical);
    Ok(digest.iter().map(|b| format!("{b:02x}")).collect())
}

fn rule_files(dir: &Path) -> TaxEngineResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().map_or(false, |ext| ext == "json") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FilingStatus;
    use rust_decimal_macros::dec;

    #[test]
    fn builtin_store_loads_all_five_countries() {
        let store = RuleStore::builtin().unwrap();
        assert_eq!(store.supported_countries(), Country::ALL.to_vec());
        assert_eq!(store.supported_years(Country::Us), vec![2024]);
        // Built-in documents carry a load timestamp but no file source.
        assert!(store.loaded_at(Country::Us, 2024).is_some());
        assert!(store.source_path(Country::Us, 2024).is_none());
    }

    #[test]
    fn get_rules_distinguishes_missing_country_from_missing_year() {
        let store = RuleStore::builtin().unwrap();
        match store.get_rules(Country::Us, 1999) {
            Err(TaxEngineError::YearNotSupported { tax_year, .. }) => assert_eq!(tax_year, 1999),
            other => panic!("expected YearNotSupported, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn rule_path_lookup_walks_maps_and_arrays() {
        let store = RuleStore::builtin().unwrap();
        let rate: rust_decimal::Decimal = serde_json::from_value(
            store
                .get_rule_path(Country::Us, 2024, "social_security.rate")
                .unwrap()
                .unwrap(),
        )
        .unwrap();
        assert_eq!(rate, dec!(0.062));

        let first_rate: rust_decimal::Decimal = serde_json::from_value(
            store
                .get_rule_path(Country::Us, 2024, "federal.tax_brackets.single.0.rate")
                .unwrap()
                .unwrap(),
        )
        .unwrap();
        assert_eq!(first_rate, dec!(0.10));

        let missing = store
            .get_rule_path(Country::Us, 2024, "federal.no_such_field")
            .unwrap();
        assert!(missing.is_none());
    }

    #[test]
    fn invalid_document_is_rejected_and_prior_version_retained() {
        let store = RuleStore::builtin().unwrap();
        let before = store.rules_hash(Country::Us, 2024).unwrap();

        // Same key, but the bracket table has a gap.
        let broken = r#"{
            "version": "2024.2",
            "country": "US",
            "tax_year": 2024,
            "currency": "USD",
            "federal": {
                "tax_brackets": {
                    "single": [
                        { "rate": 0.10, "min": 0, "max": 11000 },
                        { "rate": 0.12, "min": 11001 }
                    ],
                    "married_filing_jointly": [{ "rate": 0.10, "min": 0 }],
                    "married_filing_separately": [{ "rate": 0.10, "min": 0 }],
                    "head_of_household": [{ "rate": 0.10, "min": 0 }]
                },
                "standard_deduction": {
                    "single": 14600,
                    "married_filing_jointly": 29200,
                    "married_filing_separately": 14600,
                    "head_of_household": 21900
                }
            },
            "social_security": { "rate": 0.062, "wage_base": 168600 },
            "medicare": { "rate": 0.0145 }
        }"#;

        let result = store.insert_document(broken, None);
        assert!(matches!(result, Err(TaxEngineError::RuleValidation { .. })));
        assert_eq!(store.rules_hash(Country::Us, 2024).unwrap(), before);
        let active = store.get_rules(Country::Us, 2024).unwrap();
        assert_eq!(active.version, "2024.1");
    }

    #[test]
    fn key_mismatch_is_rejected() {
        let store = RuleStore::new();
        // Document claims CA but carries a US-shaped body under country US 2025
        let mismatched = r#"{
            "version": "2025.1",
            "country": "CA",
            "tax_year": 2025,
            "currency": "CAD",
            "federal": {
                "tax_brackets": { "single": [{ "rate": 0.15, "min": 0 }] },
                "standard_deduction": {}
            },
            "cpp": { "rate": 0.0595, "exemption": 3500, "maximum": 68500 }
        }"#;
        // Missing basic_personal_amount: structural check fails
        let result = store.insert_document(mismatched, None);
        assert!(matches!(result, Err(TaxEngineError::RuleValidation { .. })));
        assert!(store.supported_countries().is_empty());
    }

    #[test]
    fn rules_hash_changes_when_a_rate_changes() {
        let store = RuleStore::builtin().unwrap();
        let before = store.rules_hash(Country::Au, 2024).unwrap();

        let mut doc: serde_json::Value =
            serde_json::from_str(BUILTIN_DOCUMENTS[3]).unwrap();
        doc["federal"]["tax_brackets"]["single"][1]["rate"] =
            serde_json::json!(0.17);
        doc["version"] = serde_json::json!("2024.2");
        store
            .insert_document(&doc.to_string(), None)
            .unwrap();

        let after = store.rules_hash(Country::Au, 2024).unwrap();
        assert_ne!(before, after);

        let rules = store.get_rules(Country::Au, 2024).unwrap();
        let single = &rules.federal.tax_brackets[&FilingStatus::Single];
        assert_eq!(single[1].rate, dec!(0.17));
    }
}
