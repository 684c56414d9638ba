use clap::Args;
use serde_json::Value;

use tax_engine_core::types::Country;

use crate::commands;

/// Arguments for per-country detail
#[derive(Args)]
pub struct CountryInfoArgs {
    /// Country code (US, CA, UK, AU, DE)
    #[arg(long)]
    pub country: String,

    /// Directory of rule documents overriding the built-in set
    #[arg(long)]
    pub rules_dir: Option<String>,
}

pub fn run_countries() -> Result<Value, Box<dyn std::error::Error>> {
    let orchestrator = commands::orchestrator(None)?;
    Ok(serde_json::to_value(orchestrator.get_supported_countries())?)
}

pub fn run_country_info(args: CountryInfoArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let country: Country = args.country.parse()?;
    let orchestrator = commands::orchestrator(args.rules_dir.as_deref())?;
    let info = orchestrator.get_country_info(country)?;

    // Provenance of each active rule document, alongside the static info.
    let store = orchestrator.store();
    let documents: Vec<Value> = info
        .supported_years
        .iter()
        .map(|&year| {
            serde_json::json!({
                "tax_year": year,
                "version": store
                    .get_rules(country, year)
                    .map(|rules| rules.version.clone())
                    .unwrap_or_default(),
                "rules_hash": store.rules_hash(country, year).unwrap_or_default(),
                "loaded_at": store.loaded_at(country, year),
                "source": store.source_path(country, year),
            })
        })
        .collect();

    let mut value = serde_json::to_value(info)?;
    value["rule_documents"] = Value::Array(documents);
    Ok(value)
}
