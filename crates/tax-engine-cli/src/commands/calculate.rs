use clap::Args;
use rust_decimal::Decimal;
use serde_json::Value;

use tax_engine_core::types::{Country, IncomeItem, IncomeKind, TaxCalculationRequest};

use crate::commands;
use crate::input;

/// Arguments for a tax calculation
#[derive(Args)]
pub struct CalculateArgs {
    /// Path to a JSON or YAML request file (overrides individual flags)
    #[arg(long)]
    pub input: Option<String>,

    /// Country code (US, CA, UK, AU, DE)
    #[arg(long)]
    pub country: Option<String>,

    /// Tax year
    #[arg(long, default_value = "2024")]
    pub tax_year: i32,

    /// Filing status (single, married_filing_jointly, ...)
    #[arg(long, default_value = "single")]
    pub filing_status: String,

    /// Salary income, as a shortcut for a one-item request
    #[arg(long)]
    pub income: Option<Decimal>,

    /// Age of the filer
    #[arg(long)]
    pub age: Option<u32>,

    /// State or province code; enables the regional tax layer
    #[arg(long)]
    pub region: Option<String>,

    /// Directory of rule documents overriding the built-in set
    #[arg(long)]
    pub rules_dir: Option<String>,
}

pub fn run_calculate(args: CalculateArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let request: TaxCalculationRequest = if let Some(ref path) = args.input {
        input::file::read_typed(path)?
    } else if let Some(data) = input::stdin::read_stdin()? {
        serde_json::from_value(data)?
    } else {
        request_from_flags(&args)?
    };

    let orchestrator = commands::orchestrator(args.rules_dir.as_deref())?;
    let response = orchestrator.calculate_tax(&request)?;
    Ok(serde_json::to_value(response)?)
}

pub fn request_from_flags(
    args: &CalculateArgs,
) -> Result<TaxCalculationRequest, Box<dyn std::error::Error>> {
    let income = args
        .income
        .ok_or("--income is required (or provide --input)")?;
    let country: Country = args
        .country
        .as_deref()
        .ok_or("--country is required (or provide --input)")?
        .parse()?;

    Ok(TaxCalculationRequest {
        country,
        tax_year: args.tax_year,
        filing_status: commands::parse_filing_status(&args.filing_status)?,
        income_items: vec![IncomeItem {
            kind: IncomeKind::Salary,
            amount: income,
            description: "Salary".to_string(),
            taxable: true,
        }],
        deduction_items: vec![],
        total_income: income,
        age: args.age,
        region: args.region.clone(),
        include_regional_tax: args.region.is_some(),
    })
}
