use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use rust_decimal::Decimal;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::cache::{MemoryCache, ResponseCache};
use crate::calculators::{self, Calculator};
use crate::error::TaxEngineError;
use crate::rules::{RuleSet, RuleStore};
use crate::types::{
    BracketTables, Country, CountryInfo, FilingStatus, TaxCalculationRequest,
    TaxCalculationResponse,
};
use crate::TaxEngineResult;

/// Supported tax-year window for incoming requests.
pub const MIN_TAX_YEAR: i32 = 2020;
pub const MAX_TAX_YEAR: i32 = 2030;

/// Validates requests, resolves calculator instances, and caches results.
///
/// Calculator instances are cached per `(country, year)`; under a racing
/// first use both callers may construct, but exactly one instance is retained
/// and subsequent calls observe it. Results are cached under a digest of the
/// request and the current rules hash, so a hot reload orphans stale entries
/// without explicit invalidation.
pub struct TaxOrchestrator {
    store: Arc<RuleStore>,
    calculators: DashMap<(Country, i32), (String, Arc<dyn Calculator>)>,
    results: Arc<dyn ResponseCache>,
}

impl TaxOrchestrator {
    pub fn new(store: Arc<RuleStore>) -> Self {
        TaxOrchestrator {
            store,
            calculators: DashMap::new(),
            results: Arc::new(MemoryCache::new(Duration::from_secs(300))),
        }
    }

    pub fn with_cache(store: Arc<RuleStore>, results: Arc<dyn ResponseCache>) -> Self {
        TaxOrchestrator {
            store,
            calculators: DashMap::new(),
            results,
        }
    }

    pub fn store(&self) -> &Arc<RuleStore> {
        &self.store
    }

    pub fn rules(&self, country: Country, year: i32) -> TaxEngineResult<Arc<RuleSet>> {
        self.store.get_rules(country, year)
    }

    /// Validate, dispatch, and cache one calculation. Validation order:
    /// country supported, year in window, request invariants, then the
    /// filing-status check against the resolved calculator. No computation
    /// runs until every check has passed.
    pub fn calculate_tax(
        &self,
        request: &TaxCalculationRequest,
    ) -> TaxEngineResult<TaxCalculationResponse> {
        if !self.store.supported_countries().contains(&request.country) {
            return Err(TaxEngineError::CountryNotSupported {
                code: request.country.code().to_string(),
            });
        }
        validate_request(request)?;

        let calculator = self.calculator(request.country, request.tax_year)?;
        if !calculator.filing_statuses().contains(&request.filing_status) {
            return Err(TaxEngineError::InvalidRequest {
                field: "filing_status".into(),
                reason: format!(
                    "{} is not supported for {}",
                    request.filing_status, request.country
                ),
            });
        }

        let rules_hash = self.store.rules_hash(request.country, request.tax_year)?;
        let cache_key = result_cache_key(request, &rules_hash)?;
        if let Some(cached) = self.results.get(&cache_key) {
            debug!(key = %cache_key, "result cache hit");
            return Ok(cached);
        }

        let response = calculator.calculate(request)?;
        self.results.put(&cache_key, &response);
        Ok(response)
    }

    pub fn get_tax_brackets(
        &self,
        country: Country,
        year: i32,
        filing_status: FilingStatus,
        region: Option<&str>,
    ) -> TaxEngineResult<BracketTables> {
        self.calculator(country, year)?
            .tax_brackets(filing_status, region)
    }

    pub fn get_supported_countries(&self) -> BTreeMap<String, String> {
        self.store
            .supported_countries()
            .into_iter()
            .map(|c| (c.code().to_string(), c.name().to_string()))
            .collect()
    }

    pub fn get_country_info(&self, country: Country) -> TaxEngineResult<CountryInfo> {
        let years = self.store.supported_years(country);
        let latest = *years.last().ok_or_else(|| TaxEngineError::CountryNotSupported {
            code: country.code().to_string(),
        })?;
        let calculator = self.calculator(country, latest)?;
        Ok(CountryInfo {
            code: country.code().to_string(),
            name: country.name().to_string(),
            currency: country.currency(),
            supported_years: years,
            filing_statuses: calculator.filing_statuses(),
        })
    }

    /// Resolve the calculator for a key, constructing it lazily on first use.
    /// The cached instance carries the rules hash it was built against; a hot
    /// reload makes the entry stale and the next caller rebuilds it.
    fn calculator(&self, country: Country, year: i32) -> TaxEngineResult<Arc<dyn Calculator>> {
        let rules = self.store.get_rules(country, year)?;
        let hash = self.store.rules_hash(country, year)?;
        if let Some(existing) = self.calculators.get(&(country, year)) {
            if existing.0 == hash {
                return Ok(Arc::clone(&existing.1));
            }
        }
        debug!(country = %country, year, "constructing calculator");
        let built = calculators::for_country(country, rules);
        let entry = self
            .calculators
            .entry((country, year))
            .and_modify(|stored| {
                if stored.0 != hash {
                    *stored = (hash.clone(), Arc::clone(&built));
                }
            })
            .or_insert_with(|| (hash.clone(), Arc::clone(&built)));
        Ok(Arc::clone(&entry.1))
    }
}

/// Request invariants, checked in order before any computation runs. The
/// filing-status check lives in `calculate_tax` because it needs the resolved
/// calculator.
fn validate_request(request: &TaxCalculationRequest) -> TaxEngineResult<()> {
    if request.tax_year < MIN_TAX_YEAR || request.tax_year > MAX_TAX_YEAR {
        return Err(TaxEngineError::InvalidRequest {
            field: "tax_year".into(),
            reason: format!(
                "{} outside supported range [{MIN_TAX_YEAR}, {MAX_TAX_YEAR}]",
                request.tax_year
            ),
        });
    }
    if request.total_income < Decimal::ZERO {
        return Err(TaxEngineError::InvalidRequest {
            field: "total_income".into(),
            reason: "must be non-negative".into(),
        });
    }
    if request.income_items.is_empty() {
        return Err(TaxEngineError::InvalidRequest {
            field: "income_items".into(),
            reason: "at least one income item is required".into(),
        });
    }
    let item_sum: Decimal = request.income_items.iter().map(|i| i.amount).sum();
    if item_sum != request.total_income {
        return Err(TaxEngineError::InvalidRequest {
            field: "total_income".into(),
            reason: format!(
                "income items sum to {item_sum}, declared total is {}",
                request.total_income
            ),
        });
    }
    for item in &request.income_items {
        if item.amount < Decimal::ZERO {
            return Err(TaxEngineError::InvalidRequest {
                field: "income_items".into(),
                reason: "income amounts must be non-negative".into(),
            });
        }
    }
    for item in &request.deduction_items {
        if item.amount < Decimal::ZERO {
            return Err(TaxEngineError::InvalidRequest {
                field: "deduction_items".into(),
                reason: "deduction amounts must be non-negative".into(),
            });
        }
    }
    if request.include_regional_tax && request.region.is_none() {
        return Err(TaxEngineError::InvalidRequest {
            field: "region".into(),
            reason: "required when include_regional_tax is set".into(),
        });
    }
    Ok(())
}

/// `{country}:{tax_year}:{digest(request)}:{rules_hash}`
fn result_cache_key(request: &TaxCalculationRequest, rules_hash: &str) -> TaxEngineResult<String> {
    let serialized = serde_json::to_vec(request)?;
    let digest = Sha256::digest(&serialized);
    let request_hash: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    Ok(format!(
        "{}:{}:{}:{}",
        request.country, request.tax_year, request_hash, rules_hash
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{IncomeItem, IncomeKind};
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    fn orchestrator() -> TaxOrchestrator {
        TaxOrchestrator::new(Arc::new(RuleStore::builtin().unwrap()))
    }

    fn request(country: Country, total: Decimal) -> TaxCalculationRequest {
        TaxCalculationRequest {
            country,
            tax_year: 2024,
            filing_status: FilingStatus::Single,
            income_items: vec![IncomeItem {
                kind: IncomeKind::Salary,
                amount: total,
                description: "Salary".into(),
                taxable: true,
            }],
            deduction_items: vec![],
            total_income: total,
            age: None,
            region: None,
            include_regional_tax: false,
        }
    }

    #[test]
    fn dispatches_to_every_country() {
        let orch = orchestrator();
        for country in Country::ALL {
            let response = orch.calculate_tax(&request(country, dec!(60_000))).unwrap();
            assert_eq!(response.country, country);
            assert!(response.total_tax >= dec!(0));
        }
    }

    #[test]
    fn rejects_year_outside_window() {
        let orch = orchestrator();
        let mut req = request(Country::Us, dec!(50_000));
        req.tax_year = 2019;
        match orch.calculate_tax(&req) {
            Err(TaxEngineError::InvalidRequest { field, .. }) => assert_eq!(field, "tax_year"),
            other => panic!("expected InvalidRequest, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn rejects_income_item_sum_mismatch() {
        let orch = orchestrator();
        let mut req = request(Country::Us, dec!(50_000));
        req.income_items[0].amount = dec!(49_999);
        match orch.calculate_tax(&req) {
            Err(TaxEngineError::InvalidRequest { field, .. }) => {
                assert_eq!(field, "total_income")
            }
            other => panic!("expected InvalidRequest, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn rejects_empty_income_items() {
        let orch = orchestrator();
        let mut req = request(Country::Us, dec!(0));
        req.income_items.clear();
        match orch.calculate_tax(&req) {
            Err(TaxEngineError::InvalidRequest { field, .. }) => {
                assert_eq!(field, "income_items")
            }
            other => panic!("expected InvalidRequest, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn rejects_regional_request_without_region() {
        let orch = orchestrator();
        let mut req = request(Country::Us, dec!(50_000));
        req.include_regional_tax = true;
        match orch.calculate_tax(&req) {
            Err(TaxEngineError::InvalidRequest { field, .. }) => assert_eq!(field, "region"),
            other => panic!("expected InvalidRequest, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn rejects_unsupported_filing_status() {
        let orch = orchestrator();
        let mut req = request(Country::Au, dec!(50_000));
        req.filing_status = FilingStatus::MarriedFilingJointly;
        match orch.calculate_tax(&req) {
            Err(TaxEngineError::InvalidRequest { field, .. }) => {
                assert_eq!(field, "filing_status")
            }
            other => panic!("expected InvalidRequest, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn identical_requests_hit_the_cache_and_match_exactly() {
        let store = Arc::new(RuleStore::builtin().unwrap());
        let cache = Arc::new(MemoryCache::new(Duration::from_secs(300)));
        let orch = TaxOrchestrator::with_cache(store, cache.clone());

        let req = request(Country::Us, dec!(80_000));
        let first = orch.calculate_tax(&req).unwrap();
        assert_eq!(cache.len(), 1);

        // The second call is served from the stored entry, not recomputed.
        let second = orch.calculate_tax(&req).unwrap();
        assert_eq!(cache.len(), 1);
        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }

    #[test]
    fn rules_reload_changes_cache_key_and_result() {
        let store = Arc::new(RuleStore::builtin().unwrap());
        let orch = TaxOrchestrator::with_cache(
            Arc::clone(&store),
            Arc::new(MemoryCache::new(Duration::from_secs(300))),
        );
        let req = request(Country::Au, dec!(90_000));
        let before = orch.calculate_tax(&req).unwrap();

        // Raise the middle-band rate and re-activate the document.
        let mut doc: serde_json::Value = serde_json::from_str(
            &serde_json::to_string(store.get_rules(Country::Au, 2024).unwrap().as_ref()).unwrap(),
        )
        .unwrap();
        doc["federal"]["tax_brackets"]["single"][2]["rate"] = serde_json::json!(0.32);
        doc["version"] = serde_json::json!("2024.2");
        store.insert_document(&doc.to_string(), None).unwrap();

        // Same orchestrator: the stale calculator instance and the stale
        // cached result must both be bypassed after the reload.
        let after = orch.calculate_tax(&req).unwrap();
        assert!(after.federal_tax > before.federal_tax);
        assert_eq!(after.rules_version, "2024.2");
    }

    #[test]
    fn supported_countries_lists_all_builtin() {
        let orch = orchestrator();
        let countries = orch.get_supported_countries();
        assert_eq!(countries.len(), 5);
        assert_eq!(countries["US"], "United States");
        assert_eq!(countries["DE"], "Germany");
    }

    #[test]
    fn country_info_reports_filing_statuses() {
        let orch = orchestrator();
        let info = orch.get_country_info(Country::Us).unwrap();
        assert_eq!(info.code, "US");
        assert_eq!(info.supported_years, vec![2024]);
        assert_eq!(info.filing_statuses.len(), 4);

        let de = orch.get_country_info(Country::De).unwrap();
        assert_eq!(
            de.filing_statuses,
            vec![FilingStatus::Single, FilingStatus::MarriedFilingJointly]
        );
    }

    #[test]
    fn brackets_exposed_through_orchestrator() {
        let orch = orchestrator();
        let tables = orch
            .get_tax_brackets(Country::Us, 2024, FilingStatus::Single, Some("NY"))
            .unwrap();
        assert!(!tables.federal.is_empty());
        assert!(tables.regional.is_some());
    }
}
