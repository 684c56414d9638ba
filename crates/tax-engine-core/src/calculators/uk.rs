use std::sync::Arc;

use rust_decimal::Decimal;

use crate::calculators::{brackets, federal_brackets, income_flow, Calculator};
use crate::error::TaxEngineError;
use crate::rules::RuleSet;
use crate::types::{
    round_money, BracketTables, Country, FilingStatus, Money, PayrollTax, TaxCalculationRequest,
    TaxCalculationResponse,
};
use crate::TaxEngineResult;

/// United Kingdom: a tapered personal allowance, income-tax bands applied to
/// post-allowance income, and national insurance as a separate layer with a
/// main rate between thresholds and an upper rate above.
pub struct UkCalculator {
    rules: Arc<RuleSet>,
}

impl UkCalculator {
    pub fn new(rules: Arc<RuleSet>) -> Self {
        UkCalculator { rules }
    }

    /// Allowance after the £1-per-£2 taper above the threshold.
    fn tapered_allowance(&self, income: Money) -> TaxEngineResult<Money> {
        let allowance = self
            .rules
            .personal_allowance
            .as_ref()
            .ok_or_else(|| TaxEngineError::MissingRule {
                path: "personal_allowance".into(),
            })?;
        let two = Decimal::from(2);
        let reduction = ((income - allowance.taper_threshold).max(Decimal::ZERO)) / two;
        Ok((allowance.amount - reduction).max(Decimal::ZERO))
    }

    fn national_insurance(&self, wages: Money) -> TaxEngineResult<Money> {
        let ni = self
            .rules
            .national_insurance
            .as_ref()
            .ok_or_else(|| TaxEngineError::MissingRule {
                path: "national_insurance".into(),
            })?;
        let main_band = (wages.min(ni.upper_threshold) - ni.lower_threshold).max(Decimal::ZERO);
        let upper_band = (wages - ni.upper_threshold).max(Decimal::ZERO);
        Ok(main_band * ni.main_rate + upper_band * ni.upper_rate)
    }
}

impl Calculator for UkCalculator {
    fn country(&self) -> Country {
        Country::Uk
    }

    fn filing_statuses(&self) -> Vec<FilingStatus> {
        self.rules.federal.tax_brackets.keys().copied().collect()
    }

    fn standard_deduction(&self, _: FilingStatus, _: Option<u32>) -> TaxEngineResult<Money> {
        // Pre-taper personal allowance; the taper depends on income and is
        // applied inside `calculate`.
        self.rules
            .personal_allowance
            .as_ref()
            .map(|pa| pa.amount)
            .ok_or_else(|| TaxEngineError::MissingRule {
                path: "personal_allowance".into(),
            })
    }

    fn tax_brackets(
        &self,
        filing_status: FilingStatus,
        _region: Option<&str>,
    ) -> TaxEngineResult<BracketTables> {
        Ok(BracketTables {
            federal: federal_brackets(&self.rules, filing_status)?,
            regional: None,
        })
    }

    fn calculate(&self, request: &TaxCalculationRequest) -> TaxEngineResult<TaxCalculationResponse> {
        let pre_allowance = income_flow(request, request.itemized_deductions());
        let allowance = self.tapered_allowance(pre_allowance.agi)?;
        // Bands are defined on post-allowance income.
        let taxable = (pre_allowance.taxable - allowance).max(Decimal::ZERO);

        let tables = self.tax_brackets(request.filing_status, None)?;
        let (income_tax, _) = brackets::progressive_tax(taxable, &tables.federal)?;
        let income_tax = round_money(income_tax);

        let wages = request.earned_income();
        let payroll_taxes = vec![PayrollTax {
            name: "national_insurance".into(),
            amount: round_money(self.national_insurance(wages)?),
        }];

        let total_tax = income_tax + payroll_taxes.iter().map(|p| p.amount).sum::<Money>();

        Ok(TaxCalculationResponse {
            country: Country::Uk,
            tax_year: request.tax_year,
            filing_status: request.filing_status,
            currency: self.rules.currency,
            gross_income: round_money(pre_allowance.gross),
            adjusted_gross_income: round_money(pre_allowance.agi),
            taxable_income: round_money(taxable),
            federal_tax: income_tax,
            payroll_taxes,
            regional_tax: None,
            total_tax,
            marginal_rate: brackets::marginal_rate(taxable, &tables.federal)?,
            effective_rate: brackets::effective_rate(income_tax, pre_allowance.gross),
            rules_version: self.rules.version.clone(),
        })
    }
}
