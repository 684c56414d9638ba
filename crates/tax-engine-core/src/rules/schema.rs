use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::TaxEngineError;
use crate::types::{Country, Currency, FilingStatus, Money, Rate, TaxBracket};
use crate::TaxEngineResult;

/// A versioned, immutable tax-rule document for one `(country, tax_year)`.
///
/// Country-specific sections are optional fields; `validate` enforces which of
/// them must be present for each jurisdiction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleSet {
    pub version: String,
    pub country: Country,
    pub tax_year: i32,
    pub currency: Currency,
    pub federal: FederalRules,

    // US
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub social_security: Option<CappedTax>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub medicare: Option<MedicareRules>,

    // Canada
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub basic_personal_amount: Option<Money>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpp: Option<FlooredCappedTax>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub employment_insurance: Option<CappedTax>,

    // United Kingdom
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub personal_allowance: Option<PersonalAllowance>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub national_insurance: Option<NationalInsurance>,

    // Australia
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub medicare_levy: Option<MedicareLevy>,

    // Germany
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub basic_allowance: Option<Money>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tax_formula: Option<Vec<TaxFormulaZone>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub solidarity_tax: Option<SolidarityTax>,

    /// Jurisdiction-specific tax-advantaged retirement account ceiling,
    /// consumed by the optimization engine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retirement: Option<RetirementRules>,

    /// Sub-national bracket tables keyed by state/province code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regional: Option<BTreeMap<String, Vec<TaxBracket>>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FederalRules {
    #[serde(default)]
    pub tax_brackets: BTreeMap<FilingStatus, Vec<TaxBracket>>,
    #[serde(default)]
    pub standard_deduction: BTreeMap<FilingStatus, Money>,
    /// Extra standard deduction for filers aged 65 or older.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_deduction_over_65: Option<Money>,
}

/// A payroll tax that accrues on earnings up to a wage base.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CappedTax {
    pub rate: Rate,
    pub wage_base: Money,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MedicareRules {
    pub rate: Rate,
    /// Additional medicare rate on earnings above `additional_threshold`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_rate: Option<Rate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_threshold: Option<Money>,
}

/// Contributions accrue only between an exemption floor and a maximum
/// insurable/pensionable amount (CPP-style).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlooredCappedTax {
    pub rate: Rate,
    pub exemption: Money,
    pub maximum: Money,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonalAllowance {
    pub amount: Money,
    /// Allowance is reduced by £1 for every £2 of income above this threshold.
    pub taper_threshold: Money,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NationalInsurance {
    pub lower_threshold: Money,
    pub upper_threshold: Money,
    pub main_rate: Rate,
    pub upper_rate: Rate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MedicareLevy {
    pub rate: Rate,
    pub low_income_threshold: Money,
}

/// Solidarity surcharge on top of the income-tax result:
/// `min(rate * tax, phase_in_rate * (tax - exemption_threshold))`, zero below
/// the threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolidarityTax {
    pub rate: Rate,
    pub exemption_threshold: Money,
    pub phase_in_rate: Rate,
}

/// One zone of the continuous German income-tax formula.
///
/// `Progressive` zones evaluate `(a*y + b)*y + c` with `y = (income - min) / 10_000`;
/// `Linear` zones evaluate `rate * income - subtract`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaxFormulaZone {
    Free {
        max: Money,
    },
    Progressive {
        min: Money,
        max: Money,
        a: Decimal,
        b: Decimal,
        c: Decimal,
    },
    Linear {
        min: Money,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max: Option<Money>,
        rate: Rate,
        subtract: Money,
    },
}

impl TaxFormulaZone {
    pub fn lower_bound(&self) -> Money {
        match self {
            TaxFormulaZone::Free { .. } => Decimal::ZERO,
            TaxFormulaZone::Progressive { min, .. } => *min,
            TaxFormulaZone::Linear { min, .. } => *min,
        }
    }

    pub fn upper_bound(&self) -> Option<Money> {
        match self {
            TaxFormulaZone::Free { max } => Some(*max),
            TaxFormulaZone::Progressive { max, .. } => Some(*max),
            TaxFormulaZone::Linear { max, .. } => *max,
        }
    }

    pub fn contains(&self, income: Money) -> bool {
        income >= self.lower_bound()
            && match self.upper_bound() {
                Some(max) => income < max,
                None => true,
            }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetirementRules {
    pub annual_limit: Money,
    pub account_name: String,
}

impl RuleSet {
    /// Structural validation, run once at load time. Calculation code may
    /// assume every invariant checked here.
    pub fn validate(&self, expected_country: Country, expected_year: i32) -> TaxEngineResult<()> {
        let fail = |reason: String| TaxEngineError::RuleValidation {
            country: expected_country.code().to_string(),
            tax_year: expected_year,
            reason,
        };

        if self.country != expected_country {
            return Err(fail(format!(
                "document country {} does not match key {}",
                self.country, expected_country
            )));
        }
        if self.tax_year != expected_year {
            return Err(fail(format!(
                "document tax_year {} does not match key {}",
                self.tax_year, expected_year
            )));
        }
        if self.version.is_empty() {
            return Err(fail("version must not be empty".into()));
        }

        for (status, brackets) in &self.federal.tax_brackets {
            validate_bracket_table(brackets)
                .map_err(|reason| fail(format!("federal brackets for {status}: {reason}")))?;
        }
        if let Some(regional) = &self.regional {
            for (region, brackets) in regional {
                validate_bracket_table(brackets)
                    .map_err(|reason| fail(format!("regional brackets for {region}: {reason}")))?;
            }
        }
        for (status, amount) in &self.federal.standard_deduction {
            if *amount < Decimal::ZERO {
                return Err(fail(format!("standard deduction for {status} is negative")));
            }
        }

        match self.country {
            Country::Us => self.validate_us(&fail),
            Country::Ca => self.validate_ca(&fail),
            Country::Uk => self.validate_uk(&fail),
            Country::Au => self.validate_au(&fail),
            Country::De => self.validate_de(&fail),
        }
    }

    fn validate_us(&self, fail: &dyn Fn(String) -> TaxEngineError) -> TaxEngineResult<()> {
        const STATUSES: [FilingStatus; 4] = [
            FilingStatus::Single,
            FilingStatus::MarriedFilingJointly,
            FilingStatus::MarriedFilingSeparately,
            FilingStatus::HeadOfHousehold,
        ];
        for status in STATUSES {
            if !self.federal.tax_brackets.contains_key(&status) {
                return Err(fail(format!("missing bracket table for {status}")));
            }
            if !self.federal.standard_deduction.contains_key(&status) {
                return Err(fail(format!("missing standard deduction for {status}")));
            }
        }
        if self.social_security.is_none() {
            return Err(fail("missing social_security".into()));
        }
        if self.medicare.is_none() {
            return Err(fail("missing medicare".into()));
        }
        Ok(())
    }

    fn validate_ca(&self, fail: &dyn Fn(String) -> TaxEngineError) -> TaxEngineResult<()> {
        if self.federal.tax_brackets.is_empty() {
            return Err(fail("missing federal bracket table".into()));
        }
        if self.basic_personal_amount.is_none() {
            return Err(fail("missing basic_personal_amount".into()));
        }
        if self.cpp.is_none() {
            return Err(fail("missing cpp".into()));
        }
        Ok(())
    }

    fn validate_uk(&self, fail: &dyn Fn(String) -> TaxEngineError) -> TaxEngineResult<()> {
        if self.federal.tax_brackets.is_empty() {
            return Err(fail("missing income_tax bracket table".into()));
        }
        if self.personal_allowance.is_none() {
            return Err(fail("missing personal_allowance".into()));
        }
        if self.national_insurance.is_none() {
            return Err(fail("missing national_insurance".into()));
        }
        Ok(())
    }

    fn validate_au(&self, fail: &dyn Fn(String) -> TaxEngineError) -> TaxEngineResult<()> {
        if self.federal.tax_brackets.is_empty() {
            return Err(fail("missing federal bracket table".into()));
        }
        if self.medicare_levy.is_none() {
            return Err(fail("missing medicare_levy".into()));
        }
        Ok(())
    }

    fn validate_de(&self, fail: &dyn Fn(String) -> TaxEngineError) -> TaxEngineResult<()> {
        if self.basic_allowance.is_none() {
            return Err(fail("missing basic_allowance".into()));
        }
        let zones = self
            .tax_formula
            .as_ref()
            .ok_or_else(|| fail("missing tax_formula".into()))?;
        if self.solidarity_tax.is_none() {
            return Err(fail("missing solidarity_tax".into()));
        }
        validate_formula_zones(zones).map_err(|reason| fail(format!("tax_formula: {reason}")))
    }
}

/// Brackets must be sorted ascending, contiguous (`next.min == prev.max`),
/// non-overlapping, with the final bracket open-ended and rates in `[0, 1]`.
pub fn validate_bracket_table(brackets: &[TaxBracket]) -> Result<(), String> {
    if brackets.is_empty() {
        return Err("bracket table is empty".into());
    }
    let first = &brackets[0];
    if first.min != Decimal::ZERO {
        return Err(format!("first bracket starts at {} instead of 0", first.min));
    }
    for (index, bracket) in brackets.iter().enumerate() {
        if bracket.rate < Decimal::ZERO || bracket.rate > Decimal::ONE {
            return Err(format!("bracket {index} rate {} out of [0, 1]", bracket.rate));
        }
        if bracket.min < Decimal::ZERO {
            return Err(format!("bracket {index} has negative lower bound"));
        }
        let is_last = index == brackets.len() - 1;
        match bracket.max {
            None if !is_last => {
                return Err(format!("bracket {index} is open-ended but not last"));
            }
            Some(max) if max <= bracket.min => {
                return Err(format!("bracket {index} has max {} <= min {}", max, bracket.min));
            }
            Some(max) if is_last => {
                return Err(format!("last bracket must be open-ended, found max {max}"));
            }
            _ => {}
        }
        if let Some(next) = brackets.get(index + 1) {
            let max = bracket
                .max
                .ok_or_else(|| format!("bracket {index} is open-ended but not last"))?;
            if next.min != max {
                return Err(format!(
                    "gap or overlap between brackets {index} and {}: {} vs {}",
                    index + 1,
                    max,
                    next.min
                ));
            }
        }
    }
    Ok(())
}

fn validate_formula_zones(zones: &[TaxFormulaZone]) -> Result<(), String> {
    if zones.is_empty() {
        return Err("zone list is empty".into());
    }
    if zones[0].lower_bound() != Decimal::ZERO {
        return Err("first zone must start at 0".into());
    }
    for (index, zone) in zones.iter().enumerate() {
        let is_last = index == zones.len() - 1;
        match zone.upper_bound() {
            None if !is_last => return Err(format!("zone {index} is open-ended but not last")),
            Some(_) if is_last => return Err("last zone must be open-ended".into()),
            _ => {}
        }
        if let Some(next) = zones.get(index + 1) {
            let max = zone
                .upper_bound()
                .ok_or_else(|| format!("zone {index} is open-ended but not last"))?;
            if next.lower_bound() != max {
                return Err(format!("gap or overlap between zones {index} and {}", index + 1));
            }
        }
    }
    Ok(())
}
