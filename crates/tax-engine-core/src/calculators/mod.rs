pub mod au;
pub mod brackets;
pub mod ca;
pub mod de;
pub mod uk;
pub mod us;

use std::sync::Arc;

use rust_decimal::Decimal;

use crate::error::TaxEngineError;
use crate::rules::RuleSet;
use crate::types::{
    BracketTables, Country, FilingStatus, Money, TaxBracket, TaxCalculationRequest,
    TaxCalculationResponse,
};
use crate::TaxEngineResult;

/// Common contract implemented by every jurisdiction.
///
/// Implementations are pure: no I/O, no shared mutable state. A calculator is
/// constructed from one immutable rule set and may be shared across threads.
pub trait Calculator: Send + Sync {
    fn country(&self) -> Country;

    /// Filing statuses this jurisdiction accepts.
    fn filing_statuses(&self) -> Vec<FilingStatus>;

    /// Standard deduction (or deduction-like allowance) before any taper.
    fn standard_deduction(&self, filing_status: FilingStatus, age: Option<u32>)
        -> TaxEngineResult<Money>;

    /// Federal and, when `region` is given, sub-national bracket tables.
    fn tax_brackets(
        &self,
        filing_status: FilingStatus,
        region: Option<&str>,
    ) -> TaxEngineResult<BracketTables>;

    /// Full breakdown for one request. Callers are expected to have validated
    /// the request invariants (the orchestrator does).
    fn calculate(&self, request: &TaxCalculationRequest) -> TaxEngineResult<TaxCalculationResponse>;
}

/// Resolve the calculator for a jurisdiction. Exhaustive over `Country`, so a
/// newly added variant fails compilation until it has a handler.
pub fn for_country(country: Country, rules: Arc<RuleSet>) -> Arc<dyn Calculator> {
    match country {
        Country::Us => Arc::new(us::UsCalculator::new(rules)),
        Country::Ca => Arc::new(ca::CaCalculator::new(rules)),
        Country::Uk => Arc::new(uk::UkCalculator::new(rules)),
        Country::Au => Arc::new(au::AuCalculator::new(rules)),
        Country::De => Arc::new(de::DeCalculator::new(rules)),
    }
}

/// Income flow shared by every jurisdiction: gross → AGI → taxable.
pub(crate) struct IncomeFlow {
    pub gross: Money,
    pub agi: Money,
    pub taxable: Money,
}

/// AGI is taxable gross income minus above-the-line deductions; taxable
/// income subtracts `deduction` (standard/itemized/allowance, per country)
/// and is floored at zero.
pub(crate) fn income_flow(request: &TaxCalculationRequest, deduction: Money) -> IncomeFlow {
    let gross = request.total_income;
    let agi = (request.taxable_income_total() - request.above_the_line_deductions())
        .max(Decimal::ZERO);
    let taxable = (agi - deduction).max(Decimal::ZERO);
    IncomeFlow { gross, agi, taxable }
}

pub(crate) fn federal_brackets(
    rules: &RuleSet,
    filing_status: FilingStatus,
) -> TaxEngineResult<Vec<TaxBracket>> {
    rules
        .federal
        .tax_brackets
        .get(&filing_status)
        .cloned()
        .ok_or_else(|| TaxEngineError::MissingRule {
            path: format!("federal.tax_brackets.{filing_status}"),
        })
}

pub(crate) fn regional_brackets(rules: &RuleSet, region: &str) -> TaxEngineResult<Vec<TaxBracket>> {
    rules
        .regional
        .as_ref()
        .and_then(|map| map.get(region))
        .cloned()
        .ok_or_else(|| TaxEngineError::MissingRule {
            path: format!("regional.{region}"),
        })
}
