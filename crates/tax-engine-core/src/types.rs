use std::fmt;
use std::str::FromStr;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::error::TaxEngineError;

/// All monetary values. Wraps Decimal to prevent accidental f64 usage.
pub type Money = Decimal;

/// Rates expressed as decimals (0.22 = 22%). Never as percentages.
pub type Rate = Decimal;

/// Round a monetary amount to two fractional digits, half-up.
///
/// Applied only at emission points; intermediate math stays at full precision.
pub fn round_money(value: Money) -> Money {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Currency code
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Currency {
    #[default]
    USD,
    CAD,
    GBP,
    AUD,
    EUR,
}

/// Supported jurisdictions. Closed enum so that dispatch is exhaustive at
/// compile time rather than a runtime string lookup.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum Country {
    Us,
    Ca,
    Uk,
    Au,
    De,
}

impl Country {
    pub const ALL: [Country; 5] = [
        Country::Us,
        Country::Ca,
        Country::Uk,
        Country::Au,
        Country::De,
    ];

    /// ISO-3166 alpha-2 code.
    pub fn code(&self) -> &'static str {
        match self {
            Country::Us => "US",
            Country::Ca => "CA",
            Country::Uk => "UK",
            Country::Au => "AU",
            Country::De => "DE",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Country::Us => "United States",
            Country::Ca => "Canada",
            Country::Uk => "United Kingdom",
            Country::Au => "Australia",
            Country::De => "Germany",
        }
    }

    pub fn currency(&self) -> Currency {
        match self {
            Country::Us => Currency::USD,
            Country::Ca => Currency::CAD,
            Country::Uk => Currency::GBP,
            Country::Au => Currency::AUD,
            Country::De => Currency::EUR,
        }
    }
}

impl fmt::Display for Country {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Country {
    type Err = TaxEngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "US" | "USA" => Ok(Country::Us),
            "CA" | "CAN" => Ok(Country::Ca),
            "UK" | "GB" | "GBR" => Ok(Country::Uk),
            "AU" | "AUS" => Ok(Country::Au),
            "DE" | "DEU" => Ok(Country::De),
            other => Err(TaxEngineError::CountryNotSupported {
                code: other.to_string(),
            }),
        }
    }
}

/// Filing status for a tax return.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum FilingStatus {
    Single,
    MarriedFilingJointly,
    MarriedFilingSeparately,
    HeadOfHousehold,
}

impl fmt::Display for FilingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FilingStatus::Single => "single",
            FilingStatus::MarriedFilingJointly => "married_filing_jointly",
            FilingStatus::MarriedFilingSeparately => "married_filing_separately",
            FilingStatus::HeadOfHousehold => "head_of_household",
        };
        f.write_str(s)
    }
}

/// A single progressive-tax bracket. Tables are half-open slices `[min, max)`;
/// the final bracket of a table has `max == None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxBracket {
    pub rate: Rate,
    pub min: Money,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<Money>,
}

/// Federal plus optional sub-national bracket tables for one filing status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BracketTables {
    pub federal: Vec<TaxBracket>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regional: Option<Vec<TaxBracket>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncomeKind {
    Salary,
    SelfEmployment,
    Investment,
    CapitalGains,
    Rental,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeductionKind {
    Charitable,
    Retirement,
    Medical,
    MortgageInterest,
    StudentLoanInterest,
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncomeItem {
    pub kind: IncomeKind,
    pub amount: Money,
    #[serde(default)]
    pub description: String,
    /// Non-taxable items count toward gross income but not toward AGI.
    #[serde(default = "default_true")]
    pub taxable: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeductionItem {
    pub kind: DeductionKind,
    pub amount: Money,
    #[serde(default)]
    pub description: String,
    /// Above-the-line deductions reduce AGI; the rest compete with the
    /// standard deduction.
    #[serde(default)]
    pub above_the_line: bool,
}

fn default_true() -> bool {
    true
}

/// A single tax calculation request. Pure input: the engine never retains it
/// beyond the result-cache entry derived from its digest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxCalculationRequest {
    pub country: Country,
    pub tax_year: i32,
    pub filing_status: FilingStatus,
    pub income_items: Vec<IncomeItem>,
    #[serde(default)]
    pub deduction_items: Vec<DeductionItem>,
    pub total_income: Money,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age: Option<u32>,
    /// State or province code, required when `include_regional_tax` is set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default)]
    pub include_regional_tax: bool,
}

impl TaxCalculationRequest {
    /// Sum of income items that are flagged taxable.
    pub fn taxable_income_total(&self) -> Money {
        self.income_items
            .iter()
            .filter(|i| i.taxable)
            .map(|i| i.amount)
            .sum()
    }

    /// Earned income (salary + self-employment) subject to payroll taxes.
    pub fn earned_income(&self) -> Money {
        self.income_items
            .iter()
            .filter(|i| {
                i.taxable
                    && matches!(i.kind, IncomeKind::Salary | IncomeKind::SelfEmployment)
            })
            .map(|i| i.amount)
            .sum()
    }

    pub fn above_the_line_deductions(&self) -> Money {
        self.deduction_items
            .iter()
            .filter(|d| d.above_the_line)
            .map(|d| d.amount)
            .sum()
    }

    pub fn itemized_deductions(&self) -> Money {
        self.deduction_items
            .iter()
            .filter(|d| !d.above_the_line)
            .map(|d| d.amount)
            .sum()
    }
}

/// One payroll or social-insurance layer in a breakdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayrollTax {
    pub name: String,
    pub amount: Money,
}

/// Full tax breakdown returned to callers. All monetary fields are rounded to
/// two fractional digits; cached responses are returned byte-identically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxCalculationResponse {
    pub country: Country,
    pub tax_year: i32,
    pub filing_status: FilingStatus,
    pub currency: Currency,
    pub gross_income: Money,
    pub adjusted_gross_income: Money,
    pub taxable_income: Money,
    pub federal_tax: Money,
    pub payroll_taxes: Vec<PayrollTax>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regional_tax: Option<Money>,
    pub total_tax: Money,
    pub marginal_rate: Rate,
    pub effective_rate: Rate,
    pub rules_version: String,
}

impl TaxCalculationResponse {
    pub fn total_payroll_tax(&self) -> Money {
        self.payroll_taxes.iter().map(|p| p.amount).sum()
    }
}

/// Static information about a supported jurisdiction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CountryInfo {
    pub code: String,
    pub name: String,
    pub currency: Currency,
    pub supported_years: Vec<i32>,
    pub filing_statuses: Vec<FilingStatus>,
}
