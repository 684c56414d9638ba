use std::sync::Arc;

use rust_decimal::Decimal;

use crate::calculators::{brackets, federal_brackets, income_flow, regional_brackets, Calculator};
use crate::error::TaxEngineError;
use crate::rules::RuleSet;
use crate::types::{
    round_money, BracketTables, Country, FilingStatus, Money, PayrollTax, TaxCalculationRequest,
    TaxCalculationResponse,
};
use crate::TaxEngineResult;

/// Canada: federal brackets with the basic personal amount applied as a
/// non-refundable credit at the lowest rate, CPP between the exemption floor
/// and maximum pensionable earnings, EI up to maximum insurable earnings, and
/// provincial brackets when requested.
pub struct CaCalculator {
    rules: Arc<RuleSet>,
}

impl CaCalculator {
    pub fn new(rules: Arc<RuleSet>) -> Self {
        CaCalculator { rules }
    }

    fn cpp_contribution(&self, wages: Money) -> TaxEngineResult<Money> {
        let cpp = self
            .rules
            .cpp
            .as_ref()
            .ok_or_else(|| TaxEngineError::MissingRule { path: "cpp".into() })?;
        let pensionable = (wages.min(cpp.maximum) - cpp.exemption).max(Decimal::ZERO);
        Ok(pensionable * cpp.rate)
    }

    fn ei_premium(&self, wages: Money) -> TaxEngineResult<Money> {
        let ei = self
            .rules
            .employment_insurance
            .as_ref()
            .ok_or_else(|| TaxEngineError::MissingRule {
                path: "employment_insurance".into(),
            })?;
        Ok(wages.min(ei.wage_base) * ei.rate)
    }
}

impl Calculator for CaCalculator {
    fn country(&self) -> Country {
        Country::Ca
    }

    fn filing_statuses(&self) -> Vec<FilingStatus> {
        self.rules.federal.tax_brackets.keys().copied().collect()
    }

    fn standard_deduction(&self, _: FilingStatus, _: Option<u32>) -> TaxEngineResult<Money> {
        // The basic personal amount is a credit, not a deduction.
        Ok(Decimal::ZERO)
    }

    fn tax_brackets(
        &self,
        filing_status: FilingStatus,
        region: Option<&str>,
    ) -> TaxEngineResult<BracketTables> {
        let federal = federal_brackets(&self.rules, filing_status)?;
        let regional = match region {
            Some(region) => Some(regional_brackets(&self.rules, region)?),
            None => None,
        };
        Ok(BracketTables { federal, regional })
    }

    fn calculate(&self, request: &TaxCalculationRequest) -> TaxEngineResult<TaxCalculationResponse> {
        let flow = income_flow(request, request.itemized_deductions());

        let tables = self.tax_brackets(
            request.filing_status,
            request
                .region
                .as_deref()
                .filter(|_| request.include_regional_tax),
        )?;
        let (gross_federal, _) = brackets::progressive_tax(flow.taxable, &tables.federal)?;

        let bpa = self
            .rules
            .basic_personal_amount
            .ok_or_else(|| TaxEngineError::MissingRule {
                path: "basic_personal_amount".into(),
            })?;
        let lowest_rate = tables
            .federal
            .first()
            .map(|b| b.rate)
            .unwrap_or(Decimal::ZERO);
        let credit = bpa.min(flow.taxable) * lowest_rate;
        let federal_tax = round_money((gross_federal - credit).max(Decimal::ZERO));

        let wages = request.earned_income();
        let payroll_taxes = vec![
            PayrollTax {
                name: "cpp".into(),
                amount: round_money(self.cpp_contribution(wages)?),
            },
            PayrollTax {
                name: "employment_insurance".into(),
                amount: round_money(self.ei_premium(wages)?),
            },
        ];

        let regional_tax = match &tables.regional {
            Some(table) => {
                let (tax, _) = brackets::progressive_tax(flow.taxable, table)?;
                Some(round_money(tax))
            }
            None => None,
        };

        let total_tax = federal_tax
            + payroll_taxes.iter().map(|p| p.amount).sum::<Money>()
            + regional_tax.unwrap_or(Decimal::ZERO);

        Ok(TaxCalculationResponse {
            country: Country::Ca,
            tax_year: request.tax_year,
            filing_status: request.filing_status,
            currency: self.rules.currency,
            gross_income: round_money(flow.gross),
            adjusted_gross_income: round_money(flow.agi),
            taxable_income: round_money(flow.taxable),
            federal_tax,
            payroll_taxes,
            regional_tax,
            total_tax,
            marginal_rate: brackets::marginal_rate(flow.taxable, &tables.federal)?,
            effective_rate: brackets::effective_rate(federal_tax, flow.gross),
            rules_version: self.rules.version.clone(),
        })
    }
}
