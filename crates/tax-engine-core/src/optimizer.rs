use std::sync::Arc;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::orchestrator::TaxOrchestrator;
use crate::types::{
    round_money, Country, DeductionItem, DeductionKind, FilingStatus, IncomeItem, IncomeKind,
    Money, Rate, TaxCalculationRequest, TaxCalculationResponse,
};
use crate::TaxEngineResult;

/// Cash charitable gifts are deductible up to this share of AGI.
const CHARITABLE_AGI_CEILING: Decimal = dec!(0.6);

/// Proposed charitable gift as a share of gross income.
const CHARITABLE_PROPOSAL_RATE: Decimal = dec!(0.05);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxOptimizationRequest {
    pub base: TaxCalculationRequest,
    /// Second income for the joint-vs-separate comparison, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spouse_income: Option<Money>,
    #[serde(default = "default_max_suggestions")]
    pub max_suggestions: usize,
}

fn default_max_suggestions() -> usize {
    5
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Easy,
    Medium,
    Complex,
}

impl Difficulty {
    /// Declared heuristic, not a statistical estimate.
    pub fn confidence(&self) -> Rate {
        match self {
            Difficulty::Easy => dec!(0.9),
            Difficulty::Medium => dec!(0.75),
            Difficulty::Complex => dec!(0.6),
        }
    }
}

/// One evaluated strategy. Transient: built per optimization run, never
/// persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationScenario {
    pub name: String,
    pub description: String,
    pub modified_request: TaxCalculationRequest,
    pub estimated_savings: Money,
    pub difficulty: Difficulty,
    pub confidence: Rate,
    pub requirements: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilingStatusComparison {
    pub recommended: FilingStatus,
    pub joint_tax: Money,
    pub separate_tax: Money,
    pub savings: Money,
    /// Savings relative to the higher of the two taxes.
    pub savings_pct: Rate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxOptimizationResponse {
    pub baseline_tax: Money,
    pub scenarios: Vec<OptimizationScenario>,
    pub total_potential_savings: Money,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filing_status_comparison: Option<FilingStatusComparison>,
}

/// A candidate before evaluation: the modified request plus presentation
/// metadata. Savings and confidence are attached after the orchestrator has
/// priced it.
struct Candidate {
    name: &'static str,
    description: String,
    difficulty: Difficulty,
    requirements: Vec<String>,
    modified_request: TaxCalculationRequest,
}

/// Searches a bounded space of request modifications for tax savings. Every
/// candidate is priced through the orchestrator so scenario tax uses exactly
/// the baseline's logic, never a shortcut formula.
pub struct TaxOptimizer {
    orchestrator: Arc<TaxOrchestrator>,
}

impl TaxOptimizer {
    pub fn new(orchestrator: Arc<TaxOrchestrator>) -> Self {
        TaxOptimizer { orchestrator }
    }

    pub fn optimize_tax(
        &self,
        request: &TaxOptimizationRequest,
    ) -> TaxEngineResult<TaxOptimizationResponse> {
        let baseline = self.orchestrator.calculate_tax(&request.base)?;

        let mut candidates = Vec::new();
        self.retirement_contribution(&request.base, &mut candidates);
        self.income_deferral(&request.base, &baseline, &mut candidates);
        self.charitable_giving(&request.base, &baseline, &mut candidates);
        self.medical_bunching(&request.base, &mut candidates);

        let mut scenarios = Vec::new();
        for candidate in candidates {
            let evaluated = match self.orchestrator.calculate_tax(&candidate.modified_request) {
                Ok(response) => response,
                Err(err) => {
                    // One bad scenario never aborts the batch.
                    warn!(scenario = candidate.name, %err, "dropping scenario");
                    continue;
                }
            };
            let savings = baseline.total_tax - evaluated.total_tax;
            if savings <= Decimal::ZERO {
                continue;
            }
            scenarios.push(OptimizationScenario {
                name: candidate.name.to_string(),
                description: candidate.description,
                modified_request: candidate.modified_request,
                estimated_savings: round_money(savings),
                difficulty: candidate.difficulty,
                confidence: candidate.difficulty.confidence(),
                requirements: candidate.requirements,
            });
        }
        scenarios.sort_by(|a, b| b.estimated_savings.cmp(&a.estimated_savings));
        scenarios.truncate(request.max_suggestions);
        let total_potential_savings = scenarios.iter().map(|s| s.estimated_savings).sum();

        let filing_status_comparison = match request.spouse_income {
            Some(spouse) => match self.compare_filing_status(
                request.base.country,
                request.base.tax_year,
                request.base.total_income,
                spouse,
            ) {
                Ok(comparison) => Some(comparison),
                Err(err) => {
                    warn!(%err, "filing-status comparison unavailable");
                    None
                }
            },
            None => None,
        };

        Ok(TaxOptimizationResponse {
            baseline_tax: baseline.total_tax,
            scenarios,
            total_potential_savings,
            filing_status_comparison,
        })
    }

    /// Joint-vs-separate comparison on federal tax only. Both sides run
    /// through the orchestrator with salary-only requests; the lower total
    /// wins, with a tie going to joint filing.
    pub fn compare_filing_status(
        &self,
        country: Country,
        year: i32,
        income_a: Money,
        income_b: Money,
    ) -> TaxEngineResult<FilingStatusComparison> {
        let joint = status_request(
            country,
            year,
            FilingStatus::MarriedFilingJointly,
            &[income_a, income_b],
        );
        let joint_tax = self.orchestrator.calculate_tax(&joint)?.federal_tax;

        let separate = FilingStatus::MarriedFilingSeparately;
        let tax_a = self
            .orchestrator
            .calculate_tax(&status_request(country, year, separate, &[income_a]))?
            .federal_tax;
        let tax_b = self
            .orchestrator
            .calculate_tax(&status_request(country, year, separate, &[income_b]))?
            .federal_tax;
        let separate_tax = tax_a + tax_b;

        let (recommended, savings) = if joint_tax <= separate_tax {
            (FilingStatus::MarriedFilingJointly, separate_tax - joint_tax)
        } else {
            (FilingStatus::MarriedFilingSeparately, joint_tax - separate_tax)
        };
        let higher = joint_tax.max(separate_tax);
        let savings_pct = if higher.is_zero() {
            Decimal::ZERO
        } else {
            (savings / higher).round_dp(4)
        };

        Ok(FilingStatusComparison {
            recommended,
            joint_tax,
            separate_tax,
            savings: round_money(savings),
            savings_pct,
        })
    }

    /// Above-the-line contribution up to the account's remaining annual
    /// limit, capped at earned income.
    fn retirement_contribution(&self, base: &TaxCalculationRequest, out: &mut Vec<Candidate>) {
        let rules = match self.orchestrator.rules(base.country, base.tax_year) {
            Ok(rules) => rules,
            Err(_) => return,
        };
        let Some(retirement) = rules.retirement.as_ref() else {
            return;
        };
        let existing: Money = base
            .deduction_items
            .iter()
            .filter(|d| d.above_the_line && d.kind == DeductionKind::Retirement)
            .map(|d| d.amount)
            .sum();
        let contribution = (retirement.annual_limit - existing)
            .max(Decimal::ZERO)
            .min(base.earned_income());
        if contribution <= Decimal::ZERO {
            return;
        }

        let mut modified = base.clone();
        modified.deduction_items.push(DeductionItem {
            kind: DeductionKind::Retirement,
            amount: contribution,
            description: format!("{} contribution", retirement.account_name),
            above_the_line: true,
        });
        out.push(Candidate {
            name: "max_retirement_contributions",
            description: format!(
                "Contribute {} to your {} to reduce taxable income",
                round_money(contribution),
                retirement.account_name
            ),
            difficulty: Difficulty::Easy,
            requirements: vec![
                format!("Access to a {} with contribution room", retirement.account_name),
                "Cash flow to fund the contribution".to_string(),
            ],
            modified_request: modified,
        });
    }

    /// Defer income that falls in the top bracket into the following year.
    fn income_deferral(
        &self,
        base: &TaxCalculationRequest,
        baseline: &TaxCalculationResponse,
        out: &mut Vec<Candidate>,
    ) {
        let tables = match self.orchestrator.get_tax_brackets(
            base.country,
            base.tax_year,
            base.filing_status,
            None,
        ) {
            Ok(tables) => tables,
            Err(_) => return,
        };
        let top = match tables.federal.last() {
            Some(bracket) if bracket.min > Decimal::ZERO => bracket.clone(),
            _ => return,
        };
        let excess = baseline.taxable_income - top.min;
        if excess <= Decimal::ZERO {
            return;
        }
        let Some((idx, largest)) = base
            .income_items
            .iter()
            .enumerate()
            .filter(|(_, item)| item.taxable)
            .max_by(|a, b| a.1.amount.cmp(&b.1.amount))
        else {
            return;
        };
        let deferral = excess.min(largest.amount);
        if deferral <= Decimal::ZERO {
            return;
        }

        let mut modified = base.clone();
        modified.income_items[idx].amount -= deferral;
        modified.total_income -= deferral;
        out.push(Candidate {
            name: "defer_income",
            description: format!(
                "Defer {} of income taxed at the top {} rate into next year",
                round_money(deferral),
                top.rate
            ),
            difficulty: Difficulty::Medium,
            requirements: vec![
                "Payer willing to shift the payment date across the year boundary".to_string(),
                "No cash-flow need for the deferred amount this year".to_string(),
            ],
            modified_request: modified,
        });
    }

    /// Additional itemized charitable giving, bounded by the AGI ceiling.
    fn charitable_giving(
        &self,
        base: &TaxCalculationRequest,
        baseline: &TaxCalculationResponse,
        out: &mut Vec<Candidate>,
    ) {
        if baseline.adjusted_gross_income <= Decimal::ZERO {
            return;
        }
        let current: Money = base
            .deduction_items
            .iter()
            .filter(|d| !d.above_the_line && d.kind == DeductionKind::Charitable)
            .map(|d| d.amount)
            .sum();
        let headroom =
            (baseline.adjusted_gross_income * CHARITABLE_AGI_CEILING - current).max(Decimal::ZERO);
        let gift = round_money(baseline.gross_income * CHARITABLE_PROPOSAL_RATE).min(headroom);
        if gift <= Decimal::ZERO {
            return;
        }

        let mut modified = base.clone();
        modified.deduction_items.push(DeductionItem {
            kind: DeductionKind::Charitable,
            amount: gift,
            description: "Additional charitable giving".to_string(),
            above_the_line: false,
        });
        out.push(Candidate {
            name: "increase_charitable_giving",
            description: format!("Donate an additional {gift} to qualified charities"),
            difficulty: Difficulty::Easy,
            requirements: vec![
                "Cash or appreciated assets available to donate".to_string(),
                "Receipts from qualified charitable organizations".to_string(),
            ],
            modified_request: modified,
        });
    }

    /// Bunch next year's planned medical expenses into the current year so
    /// the itemized total clears the standard deduction once instead of
    /// falling short twice.
    fn medical_bunching(&self, base: &TaxCalculationRequest, out: &mut Vec<Candidate>) {
        let current: Money = base
            .deduction_items
            .iter()
            .filter(|d| !d.above_the_line && d.kind == DeductionKind::Medical)
            .map(|d| d.amount)
            .sum();
        if current <= Decimal::ZERO {
            return;
        }

        let mut modified = base.clone();
        modified.deduction_items.push(DeductionItem {
            kind: DeductionKind::Medical,
            amount: current,
            description: "Bunched medical expenses".to_string(),
            above_the_line: false,
        });
        out.push(Candidate {
            name: "bunch_medical_expenses",
            description: format!(
                "Schedule {} of next year's planned medical expenses this year",
                round_money(current)
            ),
            difficulty: Difficulty::Complex,
            requirements: vec![
                "Elective medical procedures that can be rescheduled".to_string(),
                "Expense records for every claimed item".to_string(),
            ],
            modified_request: modified,
        });
    }
}

fn status_request(
    country: Country,
    year: i32,
    filing_status: FilingStatus,
    incomes: &[Money],
) -> TaxCalculationRequest {
    TaxCalculationRequest {
        country,
        tax_year: year,
        filing_status,
        income_items: incomes
            .iter()
            .map(|&amount| IncomeItem {
                kind: IncomeKind::Salary,
                amount,
                description: String::new(),
                taxable: true,
            })
            .collect(),
        deduction_items: vec![],
        total_income: incomes.iter().copied().sum(),
        age: None,
        region: None,
        include_regional_tax: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::RuleStore;
    use pretty_assertions::assert_eq;

    fn optimizer() -> TaxOptimizer {
        let store = Arc::new(RuleStore::builtin().unwrap());
        TaxOptimizer::new(Arc::new(TaxOrchestrator::new(store)))
    }

    fn salary_request(country: Country, total: Decimal) -> TaxCalculationRequest {
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

    fn optimization_request(base: TaxCalculationRequest) -> TaxOptimizationRequest {
        TaxOptimizationRequest {
            base,
            spouse_income: None,
            max_suggestions: 5,
        }
    }

    #[test]
    fn retirement_contribution_suggested_for_salaried_filer() {
        let opt = optimizer();
        let response = opt
            .optimize_tax(&optimization_request(salary_request(
                Country::Us,
                dec!(80_000),
            )))
            .unwrap();

        let scenario = response
            .scenarios
            .iter()
            .find(|s| s.name == "max_retirement_contributions")
            .expect("retirement scenario missing");
        assert!(scenario.estimated_savings > dec!(0));
        assert_eq!(scenario.confidence, dec!(0.9));
        assert_eq!(scenario.difficulty, Difficulty::Easy);
        // The modified request must still satisfy the income-sum invariant.
        let item_sum: Decimal = scenario
            .modified_request
            .income_items
            .iter()
            .map(|i| i.amount)
            .sum();
        assert_eq!(item_sum, scenario.modified_request.total_income);
    }

    #[test]
    fn all_scenarios_have_positive_savings_sorted_descending() {
        let opt = optimizer();
        let response = opt
            .optimize_tax(&optimization_request(salary_request(
                Country::Us,
                dec!(800_000),
            )))
            .unwrap();

        assert!(response.scenarios.len() >= 2);
        for pair in response.scenarios.windows(2) {
            assert!(pair[0].estimated_savings >= pair[1].estimated_savings);
        }
        for scenario in &response.scenarios {
            assert!(scenario.estimated_savings > dec!(0));
        }
        let total: Decimal = response.scenarios.iter().map(|s| s.estimated_savings).sum();
        assert_eq!(response.total_potential_savings, total);
    }

    #[test]
    fn respects_max_suggestions() {
        let opt = optimizer();
        let mut req = optimization_request(salary_request(Country::Us, dec!(800_000)));
        req.max_suggestions = 1;
        let response = opt.optimize_tax(&req).unwrap();
        assert_eq!(response.scenarios.len(), 1);
    }

    #[test]
    fn deferral_suggested_only_above_top_bracket() {
        let opt = optimizer();
        let response = opt
            .optimize_tax(&optimization_request(salary_request(
                Country::Us,
                dec!(80_000),
            )))
            .unwrap();
        assert!(response.scenarios.iter().all(|s| s.name != "defer_income"));

        let high = opt
            .optimize_tax(&optimization_request(salary_request(
                Country::Us,
                dec!(800_000),
            )))
            .unwrap();
        assert!(high.scenarios.iter().any(|s| s.name == "defer_income"));
    }

    #[test]
    fn joint_filing_recommended_for_uneven_spouse_incomes() {
        let opt = optimizer();
        let comparison = opt
            .compare_filing_status(Country::Us, 2024, dec!(90_000), dec!(40_000))
            .unwrap();

        // Joint: taxable 130,000 − 29,200 = 100,800 under joint brackets.
        assert_eq!(comparison.joint_tax, dec!(12_282));
        // Separate: 75,400 and 25,400 taxable under separate brackets.
        assert_eq!(comparison.separate_tax, dec!(14_457));
        assert_eq!(
            comparison.recommended,
            FilingStatus::MarriedFilingJointly
        );
        assert_eq!(comparison.savings, dec!(2_175));
        assert_eq!(comparison.savings_pct, (dec!(2_175) / dec!(14_457)).round_dp(4));
    }

    #[test]
    fn spouse_income_triggers_filing_status_comparison() {
        let opt = optimizer();
        let mut base = salary_request(Country::Us, dec!(90_000));
        base.filing_status = FilingStatus::MarriedFilingSeparately;
        let req = TaxOptimizationRequest {
            base,
            spouse_income: Some(dec!(40_000)),
            max_suggestions: 5,
        };
        let response = opt.optimize_tax(&req).unwrap();
        let comparison = response.filing_status_comparison.expect("comparison missing");
        assert_eq!(
            comparison.recommended,
            FilingStatus::MarriedFilingJointly
        );
    }

    #[test]
    fn unsupported_comparison_degrades_to_none() {
        let opt = optimizer();
        // Germany has no separate-filing status, so the comparison is
        // dropped rather than failing the whole optimization.
        let req = TaxOptimizationRequest {
            base: salary_request(Country::De, dec!(90_000)),
            spouse_income: Some(dec!(40_000)),
            max_suggestions: 5,
        };
        let response = opt.optimize_tax(&req).unwrap();
        assert!(response.filing_status_comparison.is_none());
    }

    #[test]
    fn medical_bunching_requires_existing_expenses() {
        let opt = optimizer();
        let mut base = salary_request(Country::Us, dec!(120_000));
        base.deduction_items.push(DeductionItem {
            kind: DeductionKind::Medical,
            amount: dec!(9_000),
            description: "Surgery".into(),
            above_the_line: false,
        });
        let response = opt.optimize_tax(&optimization_request(base)).unwrap();
        let bunching = response
            .scenarios
            .iter()
            .find(|s| s.name == "bunch_medical_expenses")
            .expect("bunching scenario missing");
        assert_eq!(bunching.confidence, dec!(0.6));
        assert!(bunching.estimated_savings > dec!(0));
    }
}
