use clap::Args;
use serde_json::Value;

use tax_engine_core::types::Country;

use crate::commands;

/// Arguments for bracket-table display
#[derive(Args)]
pub struct BracketsArgs {
    /// Country code (US, CA, UK, AU, DE)
    #[arg(long)]
    pub country: String,

    /// Tax year
    #[arg(long, default_value = "2024")]
    pub tax_year: i32,

    /// Filing status (single, married_filing_jointly, ...)
    #[arg(long, default_value = "single")]
    pub filing_status: String,

    /// State or province code for the regional table
    #[arg(long)]
    pub region: Option<String>,

    /// Directory of rule documents overriding the built-in set
    #[arg(long)]
    pub rules_dir: Option<String>,
}

pub fn run_brackets(args: BracketsArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let country: Country = args.country.parse()?;
    let filing_status = commands::parse_filing_status(&args.filing_status)?;

    let orchestrator = commands::orchestrator(args.rules_dir.as_deref())?;
    let tables = orchestrator.get_tax_brackets(
        country,
        args.tax_year,
        filing_status,
        args.region.as_deref(),
    )?;
    Ok(serde_json::to_value(tables)?)
}
