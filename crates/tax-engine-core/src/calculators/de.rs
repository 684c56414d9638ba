use std::sync::Arc;

use rust_decimal::Decimal;

use crate::calculators::{brackets, income_flow, Calculator};
use crate::error::TaxEngineError;
use crate::rules::{RuleSet, SolidarityTax, TaxFormulaZone};
use crate::types::{
    round_money, BracketTables, Country, FilingStatus, Money, PayrollTax, Rate,
    TaxBracket, TaxCalculationRequest, TaxCalculationResponse,
};
use crate::TaxEngineResult;

/// Germany: a continuous zone formula instead of a discrete bracket table,
/// income splitting for joint filers (twice the tax on half the income), and
/// the solidarity surcharge on top of the income-tax result.
pub struct DeCalculator {
    rules: Arc<RuleSet>,
}

impl DeCalculator {
    pub fn new(rules: Arc<RuleSet>) -> Self {
        DeCalculator { rules }
    }

    fn zones(&self) -> TaxEngineResult<&[TaxFormulaZone]> {
        self.rules
            .tax_formula
            .as_deref()
            .ok_or_else(|| TaxEngineError::MissingRule {
                path: "tax_formula".into(),
            })
    }

    fn solidarity(&self) -> TaxEngineResult<&SolidarityTax> {
        self.rules
            .solidarity_tax
            .as_ref()
            .ok_or_else(|| TaxEngineError::MissingRule {
                path: "solidarity_tax".into(),
            })
    }

    fn income_tax(&self, taxable: Money, filing_status: FilingStatus) -> TaxEngineResult<Money> {
        let zones = self.zones()?;
        match filing_status {
            FilingStatus::MarriedFilingJointly => {
                // Splitting procedure: twice the tax on half the income.
                let half = taxable / Decimal::from(2);
                Ok(Decimal::from(2) * formula_tax(zones, half)?)
            }
            _ => formula_tax(zones, taxable),
        }
    }

    fn solidarity_surcharge(
        &self,
        income_tax: Money,
        filing_status: FilingStatus,
    ) -> TaxEngineResult<Money> {
        let soli = self.solidarity()?;
        let threshold = match filing_status {
            FilingStatus::MarriedFilingJointly => {
                soli.exemption_threshold * Decimal::from(2)
            }
            _ => soli.exemption_threshold,
        };
        if income_tax <= threshold {
            return Ok(Decimal::ZERO);
        }
        let full = income_tax * soli.rate;
        let phased = (income_tax - threshold) * soli.phase_in_rate;
        Ok(full.min(phased))
    }
}

impl Calculator for DeCalculator {
    fn country(&self) -> Country {
        Country::De
    }

    fn filing_statuses(&self) -> Vec<FilingStatus> {
        vec![FilingStatus::Single, FilingStatus::MarriedFilingJointly]
    }

    fn standard_deduction(
        &self,
        filing_status: FilingStatus,
        _: Option<u32>,
    ) -> TaxEngineResult<Money> {
        // Employee lump-sum deduction; the basic allowance is built into the
        // formula's zero zone.
        Ok(self
            .rules
            .federal
            .standard_deduction
            .get(&filing_status)
            .copied()
            .unwrap_or(Decimal::ZERO))
    }

    /// The continuous formula has no discrete table; this derives one from
    /// the zone boundaries with each zone's entry marginal rate.
    fn tax_brackets(
        &self,
        _filing_status: FilingStatus,
        _region: Option<&str>,
    ) -> TaxEngineResult<BracketTables> {
        let ten_thousand = Decimal::from(10_000);
        let federal = self
            .zones()?
            .iter()
            .map(|zone| {
                let rate = match zone {
                    TaxFormulaZone::Free { .. } => Decimal::ZERO,
                    TaxFormulaZone::Progressive { b, .. } => *b / ten_thousand,
                    TaxFormulaZone::Linear { rate, .. } => *rate,
                };
                TaxBracket {
                    rate,
                    min: zone.lower_bound(),
                    max: zone.upper_bound(),
                }
            })
            .collect();
        Ok(BracketTables {
            federal,
            regional: None,
        })
    }

    fn calculate(&self, request: &TaxCalculationRequest) -> TaxEngineResult<TaxCalculationResponse> {
        let standard = self.standard_deduction(request.filing_status, request.age)?;
        let deduction = standard.max(request.itemized_deductions());
        let flow = income_flow(request, deduction);

        let income_tax = round_money(self.income_tax(flow.taxable, request.filing_status)?);
        let surcharge = round_money(self.solidarity_surcharge(income_tax, request.filing_status)?);
        let payroll_taxes = vec![PayrollTax {
            name: "solidarity_surcharge".into(),
            amount: surcharge,
        }];

        let total_tax = income_tax + surcharge;

        let marginal_income = match request.filing_status {
            FilingStatus::MarriedFilingJointly => flow.taxable / Decimal::from(2),
            _ => flow.taxable,
        };

        Ok(TaxCalculationResponse {
            country: Country::De,
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
            marginal_rate: formula_marginal(self.zones()?, marginal_income),
            effective_rate: brackets::effective_rate(income_tax, flow.gross),
            rules_version: self.rules.version.clone(),
        })
    }
}

/// Evaluate the zone formula at `income`.
fn formula_tax(zones: &[TaxFormulaZone], income: Money) -> TaxEngineResult<Money> {
    if income <= Decimal::ZERO {
        return Ok(Decimal::ZERO);
    }
    let zone = zones
        .iter()
        .find(|zone| zone.contains(income))
        .ok_or_else(|| TaxEngineError::Calculation("income outside every formula zone".into()))?;
    let ten_thousand = Decimal::from(10_000);
    Ok(match zone {
        TaxFormulaZone::Free { .. } => Decimal::ZERO,
        TaxFormulaZone::Progressive { min, a, b, c, .. } => {
            let y = (income - min) / ten_thousand;
            (*a * y + *b) * y + *c
        }
        TaxFormulaZone::Linear { rate, subtract, .. } => *rate * income - *subtract,
    })
}

/// Analytic derivative of the zone formula at `income`.
fn formula_marginal(zones: &[TaxFormulaZone], income: Money) -> Rate {
    let ten_thousand = Decimal::from(10_000);
    let two = Decimal::from(2);
    zones
        .iter()
        .find(|zone| zone.contains(income.max(Decimal::ZERO)))
        .map(|zone| match zone {
            TaxFormulaZone::Free { .. } => Decimal::ZERO,
            TaxFormulaZone::Progressive { min, a, b, .. } => {
                let y = (income - min) / ten_thousand;
                (two * *a * y + *b) / ten_thousand
            }
            TaxFormulaZone::Linear { rate, .. } => *rate,
        })
        .unwrap_or(Decimal::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calculators::test_support::rules_2024;
    use crate::types::{IncomeItem, IncomeKind};
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    fn request(total: Decimal, filing_status: FilingStatus) -> TaxCalculationRequest {
        TaxCalculationRequest {
            country: Country::De,
            tax_year: 2024,
            filing_status,
            income_items: vec![IncomeItem {
                kind: IncomeKind::Salary,
                amount: total,
                description: "Gehalt".into(),
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
    fn income_below_basic_allowance_is_tax_free() {
        let calc = DeCalculator::new(rules_2024(Country::De));
        let response = calc
            .calculate(&request(dec!(11_000), FilingStatus::Single))
            .unwrap();
        assert_eq!(response.federal_tax, dec!(0));
        assert_eq!(response.total_tax, dec!(0));
    }

    #[test]
    fn linear_zone_matches_statutory_formula() {
        let calc = DeCalculator::new(rules_2024(Country::De));
        // Taxable 100,000 sits in the 42% zone: 0.42 × 100,000 − 10,602.13.
        let mut req = request(dec!(100_000), FilingStatus::Single);
        // Itemize exactly the lump-sum amount so taxable stays at 100,000.
        req.total_income = dec!(101_230);
        req.income_items[0].amount = dec!(101_230);

        let response = calc.calculate(&req).unwrap();
        assert_eq!(response.taxable_income, dec!(100_000));
        assert_eq!(response.federal_tax, dec!(31_397.87));
        assert_eq!(response.marginal_rate, dec!(0.42));
    }

    #[test]
    fn solidarity_surcharge_phases_in_above_threshold() {
        let calc = DeCalculator::new(rules_2024(Country::De));
        let mut req = request(dec!(101_230), FilingStatus::Single);
        req.income_items[0].amount = dec!(101_230);

        let response = calc.calculate(&req).unwrap();
        let surcharge = &response.payroll_taxes[0];
        // Income tax 31,397.87: phase-in 0.119 × (31,397.87 − 18,130) beats
        // the full 5.5% rate.
        let expected = round_money(dec!(0.119) * (dec!(31_397.87) - dec!(18_130)));
        assert_eq!(surcharge.amount, expected);
    }

    #[test]
    fn no_surcharge_below_exemption_threshold() {
        let calc = DeCalculator::new(rules_2024(Country::De));
        let response = calc
            .calculate(&request(dec!(40_000), FilingStatus::Single))
            .unwrap();
        assert_eq!(response.payroll_taxes[0].amount, dec!(0));
    }

    #[test]
    fn splitting_lowers_tax_for_joint_filers() {
        let calc = DeCalculator::new(rules_2024(Country::De));
        let single = calc
            .calculate(&request(dec!(100_000), FilingStatus::Single))
            .unwrap();
        let joint = calc
            .calculate(&request(dec!(100_000), FilingStatus::MarriedFilingJointly))
            .unwrap();
        assert!(joint.federal_tax < single.federal_tax);
    }

    #[test]
    fn effective_rate_never_exceeds_marginal_for_high_earners() {
        // The surcharge rides on top of income tax; if it leaked into the
        // effective rate it would exceed the 45% top zone rate here.
        let calc = DeCalculator::new(rules_2024(Country::De));
        let response = calc
            .calculate(&request(dec!(10_000_000), FilingStatus::Single))
            .unwrap();
        assert_eq!(response.marginal_rate, dec!(0.45));
        assert!(response.effective_rate <= response.marginal_rate);
    }

    #[test]
    fn progressive_zone_continuous_at_boundary() {
        let zones_rules = rules_2024(Country::De);
        let zones = zones_rules.tax_formula.as_deref().unwrap();
        // Tax just below and at a zone boundary should differ by well under
        // one currency unit.
        let below = formula_tax(zones, dec!(17_004.99)).unwrap();
        let at = formula_tax(zones, dec!(17_005)).unwrap();
        assert!((at - below).abs() < dec!(1));
    }

    #[test]
    fn derived_bracket_table_covers_all_zones() {
        let calc = DeCalculator::new(rules_2024(Country::De));
        let tables = calc.tax_brackets(FilingStatus::Single, None).unwrap();
        assert_eq!(tables.federal.len(), 5);
        assert_eq!(tables.federal[0].rate, dec!(0));
        assert_eq!(tables.federal[3].rate, dec!(0.42));
        assert!(tables.federal.last().unwrap().max.is_none());
    }
}
