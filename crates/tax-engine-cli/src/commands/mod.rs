pub mod brackets;
pub mod calculate;
pub mod countries;
pub mod optimize;

use std::sync::Arc;

use tax_engine_core::orchestrator::TaxOrchestrator;
use tax_engine_core::rules::RuleStore;
use tax_engine_core::types::FilingStatus;

/// Build an orchestrator over the built-in rule documents, or over a
/// directory of rule files when one is given.
pub fn orchestrator(
    rules_dir: Option<&str>,
) -> Result<Arc<TaxOrchestrator>, Box<dyn std::error::Error>> {
    let store = match rules_dir {
        Some(dir) => RuleStore::from_dir(dir)?,
        None => RuleStore::builtin()?,
    };
    Ok(Arc::new(TaxOrchestrator::new(Arc::new(store))))
}

/// Parse a filing status from its wire spelling (e.g. "married_filing_jointly").
pub fn parse_filing_status(s: &str) -> Result<FilingStatus, Box<dyn std::error::Error>> {
    serde_json::from_value(serde_json::Value::String(s.to_string()))
        .map_err(|_| format!("unknown filing status '{s}'").into())
}
