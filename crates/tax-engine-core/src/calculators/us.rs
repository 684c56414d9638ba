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

/// United States: progressive federal brackets per filing status, the greater
/// of the standard and itemized deduction, social security capped at the wage
/// base, uncapped medicare with an additional rate above a threshold, and
/// optional state tax.
pub struct UsCalculator {
    rules: Arc<RuleSet>,
}

impl UsCalculator {
    pub fn new(rules: Arc<RuleSet>) -> Self {
        UsCalculator { rules }
    }

    fn social_security_tax(&self, wages: Money) -> TaxEngineResult<Money> {
        let ss = self
            .rules
            .social_security
            .as_ref()
            .ok_or_else(|| TaxEngineError::MissingRule {
                path: "social_security".into(),
            })?;
        Ok(wages.min(ss.wage_base) * ss.rate)
    }

    fn medicare_tax(&self, wages: Money) -> TaxEngineResult<Money> {
        let medicare = self
            .rules
            .medicare
            .as_ref()
            .ok_or_else(|| TaxEngineError::MissingRule {
                path: "medicare".into(),
            })?;
        let mut tax = wages * medicare.rate;
        if let (Some(additional_rate), Some(threshold)) =
            (medicare.additional_rate, medicare.additional_threshold)
        {
            tax += (wages - threshold).max(Decimal::ZERO) * additional_rate;
        }
        Ok(tax)
    }
}

impl Calculator for UsCalculator {
    fn country(&self) -> Country {
        Country::Us
    }

    fn filing_statuses(&self) -> Vec<FilingStatus> {
        self.rules.federal.tax_brackets.keys().copied().collect()
    }

    fn standard_deduction(
        &self,
        filing_status: FilingStatus,
        age: Option<u32>,
    ) -> TaxEngineResult<Money> {
        let base = self
            .rules
            .federal
            .standard_deduction
            .get(&filing_status)
            .copied()
            .ok_or_else(|| TaxEngineError::MissingRule {
                path: format!("federal.standard_deduction.{filing_status}"),
            })?;
        let additional = match (age, self.rules.federal.additional_deduction_over_65) {
            (Some(age), Some(extra)) if age >= 65 => extra,
            _ => Decimal::ZERO,
        };
        Ok(base + additional)
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
        let standard = self.standard_deduction(request.filing_status, request.age)?;
        let deduction = standard.max(request.itemized_deductions());
        let flow = income_flow(request, deduction);

        let tables = self.tax_brackets(
            request.filing_status,
            request
                .region
                .as_deref()
                .filter(|_| request.include_regional_tax),
        )?;
        let (federal_tax, _) = brackets::progressive_tax(flow.taxable, &tables.federal)?;
        let federal_tax = round_money(federal_tax);

        let wages = request.earned_income();
        let payroll_taxes = vec![
            PayrollTax {
                name: "social_security".into(),
                amount: round_money(self.social_security_tax(wages)?),
            },
            PayrollTax {
                name: "medicare".into(),
                amount: round_money(self.medicare_tax(wages)?),
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
            country: Country::Us,
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calculators::test_support::rules_2024;
    use crate::types::{DeductionItem, DeductionKind, IncomeItem, IncomeKind, TaxBracket};
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;
    use std::collections::BTreeMap;

    fn request(total: Decimal) -> TaxCalculationRequest {
        TaxCalculationRequest {
            country: Country::Us,
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

    /// Rule set matching the reference scenario: four brackets and a $14,600
    /// standard deduction.
    fn scenario_rules() -> Arc<RuleSet> {
        let mut rules = (*rules_2024(Country::Us)).clone();
        let table = vec![
            TaxBracket { rate: dec!(0.10), min: dec!(0), max: Some(dec!(11_000)) },
            TaxBracket { rate: dec!(0.12), min: dec!(11_000), max: Some(dec!(44_725)) },
            TaxBracket { rate: dec!(0.22), min: dec!(44_725), max: Some(dec!(95_375)) },
            TaxBracket { rate: dec!(0.24), min: dec!(95_375), max: None },
        ];
        let mut tables = BTreeMap::new();
        tables.insert(FilingStatus::Single, table);
        rules.federal.tax_brackets = tables;
        let mut deductions = BTreeMap::new();
        deductions.insert(FilingStatus::Single, dec!(14_600));
        rules.federal.standard_deduction = deductions;
        Arc::new(rules)
    }

    #[test]
    fn single_filer_80k_reference_scenario() {
        let calc = UsCalculator::new(scenario_rules());
        let mut req = request(dec!(80_000));
        req.income_items = vec![
            IncomeItem {
                kind: IncomeKind::Salary,
                amount: dec!(75_000),
                description: "Salary".into(),
                taxable: true,
            },
            IncomeItem {
                kind: IncomeKind::Investment,
                amount: dec!(5_000),
                description: "Dividends".into(),
                taxable: true,
            },
        ];
        req.deduction_items = vec![DeductionItem {
            kind: DeductionKind::Charitable,
            amount: dec!(3_500),
            description: "Donations".into(),
            above_the_line: false,
        }];

        let response = calc.calculate(&req).unwrap();

        // Itemized 3,500 loses to the 14,600 standard deduction.
        assert_eq!(response.taxable_income, dec!(65_400));
        // 11,000 × 0.10 + 33,725 × 0.12 + 20,675 × 0.22
        assert_eq!(response.federal_tax, dec!(9_695.50));
        assert_eq!(response.marginal_rate, dec!(0.22));
        // 9,695.50 / 80,000 ≈ 12.12%
        assert_eq!(response.effective_rate.round_dp(4), dec!(0.1212));
        assert!(response.effective_rate <= response.marginal_rate);
    }

    #[test]
    fn itemized_deductions_win_when_larger() {
        let calc = UsCalculator::new(scenario_rules());
        let mut req = request(dec!(80_000));
        req.deduction_items = vec![DeductionItem {
            kind: DeductionKind::MortgageInterest,
            amount: dec!(20_000),
            description: "Mortgage interest".into(),
            above_the_line: false,
        }];

        let response = calc.calculate(&req).unwrap();
        assert_eq!(response.taxable_income, dec!(60_000));
    }

    #[test]
    fn social_security_caps_at_wage_base() {
        let calc = UsCalculator::new(rules_2024(Country::Us));
        let response = calc.calculate(&request(dec!(500_000))).unwrap();

        let ss = response
            .payroll_taxes
            .iter()
            .find(|p| p.name == "social_security")
            .unwrap();
        // 168,600 wage base × 6.2%
        assert_eq!(ss.amount, dec!(10_453.20));

        // Medicare is uncapped: 1.45% of 500k plus 0.9% above 200k.
        let medicare = response
            .payroll_taxes
            .iter()
            .find(|p| p.name == "medicare")
            .unwrap();
        assert_eq!(medicare.amount, dec!(500_000) * dec!(0.0145) + dec!(300_000) * dec!(0.009));
    }

    #[test]
    fn additional_standard_deduction_at_65() {
        let calc = UsCalculator::new(rules_2024(Country::Us));
        let at_64 = calc
            .standard_deduction(FilingStatus::Single, Some(64))
            .unwrap();
        let at_65 = calc
            .standard_deduction(FilingStatus::Single, Some(65))
            .unwrap();
        assert_eq!(at_65 - at_64, dec!(1_950));
    }

    #[test]
    fn state_tax_included_when_requested() {
        let calc = UsCalculator::new(rules_2024(Country::Us));
        let mut req = request(dec!(100_000));
        req.region = Some("CO".into());
        req.include_regional_tax = true;

        let response = calc.calculate(&req).unwrap();
        let regional = response.regional_tax.unwrap();
        // Flat 4.4% on taxable income (100,000 − 14,600).
        assert_eq!(regional, dec!(85_400) * dec!(0.044));
        assert_eq!(
            response.total_tax,
            response.federal_tax + response.total_payroll_tax() + regional
        );
    }

    #[test]
    fn unknown_state_fails_loudly() {
        let calc = UsCalculator::new(rules_2024(Country::Us));
        let mut req = request(dec!(100_000));
        req.region = Some("ZZ".into());
        req.include_regional_tax = true;

        assert!(matches!(
            calc.calculate(&req),
            Err(TaxEngineError::MissingRule { .. })
        ));
    }

    #[test]
    fn effective_rate_never_exceeds_marginal_at_low_income() {
        // Payroll taxes are flat-rate layers; if they leaked into the
        // effective rate it would exceed the 10% bracket rate here.
        let calc = UsCalculator::new(rules_2024(Country::Us));
        let response = calc.calculate(&request(dec!(20_000))).unwrap();
        assert!(response.taxable_income > dec!(0));
        assert!(response.effective_rate <= response.marginal_rate);
    }

    #[test]
    fn zero_income_yields_zero_tax_and_rates() {
        let calc = UsCalculator::new(rules_2024(Country::Us));
        let response = calc.calculate(&request(dec!(0))).unwrap();
        assert_eq!(response.total_tax, dec!(0));
        assert_eq!(response.effective_rate, dec!(0));
    }
}
