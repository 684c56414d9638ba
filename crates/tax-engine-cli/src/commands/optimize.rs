use clap::Args;
use rust_decimal::Decimal;
use serde_json::Value;

use tax_engine_core::optimizer::{TaxOptimizationRequest, TaxOptimizer};

use crate::commands;
use crate::commands::calculate::{request_from_flags, CalculateArgs};
use crate::input;

/// Arguments for scenario optimization
#[derive(Args)]
pub struct OptimizeArgs {
    #[command(flatten)]
    pub base: CalculateArgs,

    /// Spouse income, enabling the joint-vs-separate comparison
    #[arg(long)]
    pub spouse_income: Option<Decimal>,

    /// Maximum number of scenarios to return
    #[arg(long, default_value = "5")]
    pub max_suggestions: usize,
}

pub fn run_optimize(args: OptimizeArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let request: TaxOptimizationRequest = if let Some(ref path) = args.base.input {
        input::file::read_typed(path)?
    } else if let Some(data) = input::stdin::read_stdin()? {
        serde_json::from_value(data)?
    } else {
        TaxOptimizationRequest {
            base: request_from_flags(&args.base)?,
            spouse_income: args.spouse_income,
            max_suggestions: args.max_suggestions,
        }
    };

    let orchestrator = commands::orchestrator(args.base.rules_dir.as_deref())?;
    let response = TaxOptimizer::new(orchestrator).optimize_tax(&request)?;
    Ok(serde_json::to_value(response)?)
}
