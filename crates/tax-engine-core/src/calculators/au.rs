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

/// Australia: a progressive table whose first band is zero-rated (the
/// tax-free threshold) plus the medicare levy as a flat-rate layer above a
/// low-income threshold. There is no standard deduction.
pub struct AuCalculator {
    rules: Arc<RuleSet>,
}

impl AuCalculator {
    pub fn new(rules: Arc<RuleSet>) -> Self {
        AuCalculator { rules }
    }

    fn medicare_levy(&self, taxable: Money) -> TaxEngineResult<Money> {
        let levy = self
            .rules
            .medicare_levy
            .as_ref()
            .ok_or_else(|| TaxEngineError::MissingRule {
                path: "medicare_levy".into(),
            })?;
        if taxable > levy.low_income_threshold {
            Ok(taxable * levy.rate)
        } else {
            Ok(Decimal::ZERO)
        }
    }
}

impl Calculator for AuCalculator {
    fn country(&self) -> Country {
        Country::Au
    }

    fn filing_statuses(&self) -> Vec<FilingStatus> {
        self.rules.federal.tax_brackets.keys().copied().collect()
    }

    fn standard_deduction(&self, _: FilingStatus, _: Option<u32>) -> TaxEngineResult<Money> {
        Ok(Decimal::ZERO)
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
        let flow = income_flow(request, request.itemized_deductions());

        let tables = self.tax_brackets(request.filing_status, None)?;
        let (income_tax, _) = brackets::progressive_tax(flow.taxable, &tables.federal)?;
        let income_tax = round_money(income_tax);

        let payroll_taxes = vec![PayrollTax {
            name: "medicare_levy".into(),
            amount: round_money(self.medicare_levy(flow.taxable)?),
        }];

        let total_tax = income_tax + payroll_taxes.iter().map(|p| p.amount).sum::<Money>();

        Ok(TaxCalculationResponse {
            country: Country::Au,
            tax_year: request.tax_year,
            filing_status: request.filing_status,
            currency: self.rules.currency,
            gross_income: round_money(flow.gross),
            adjusted_gross_income: round_money(flow.agi),
            taxable_income: round_money(flow.taxable),
            federal_tax: income_tax,
            payroll_taxes,
            regional_tax: None,
            total_tax,
            marginal_rate: brackets::marginal_rate(flow.taxable, &tables.federal)?,
            effective_rate: brackets::effective_rate(income_tax, flow.gross),
            rules_version: self.rules.version.clone(),
        })
    }
}
