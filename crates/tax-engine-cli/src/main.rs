mod commands;
mod input;
mod output;

use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::process;

use commands::brackets::BracketsArgs;
use commands::calculate::CalculateArgs;
use commands::countries::CountryInfoArgs;
use commands::optimize::OptimizeArgs;

/// Multi-jurisdiction tax calculation and optimization
#[derive(Parser)]
#[command(
    name = "taxe",
    version,
    about = "Multi-jurisdiction tax calculation and optimization",
    long_about = "A CLI for computing progressive-bracket tax liabilities with decimal \
                  precision across the US, CA, UK, AU, and DE, and for searching \
                  tax-reduction scenarios against a baseline request."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format
    #[arg(long, default_value = "json", global = true)]
    output: OutputFormat,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute a full tax breakdown for one request
    Calculate(CalculateArgs),
    /// Search tax-saving scenarios for a baseline request
    Optimize(OptimizeArgs),
    /// Show federal and regional bracket tables
    Brackets(BracketsArgs),
    /// List supported countries
    Countries,
    /// Show currency, filing statuses, and supported years for one country
    CountryInfo(CountryInfoArgs),
    /// Print version information
    Version,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Csv,
    Minimal,
}

fn main() {
    let cli = Cli::parse();

    let result: Result<serde_json::Value, Box<dyn std::error::Error>> = match cli.command {
        Commands::Calculate(args) => commands::calculate::run_calculate(args),
        Commands::Optimize(args) => commands::optimize::run_optimize(args),
        Commands::Brackets(args) => commands::brackets::run_brackets(args),
        Commands::Countries => commands::countries::run_countries(),
        Commands::CountryInfo(args) => commands::countries::run_country_info(args),
        Commands::Version => {
            println!("taxe {}", env!("CARGO_PKG_VERSION"));
            return;
        }
    };

    match result {
        Ok(value) => {
            output::format_output(&cli.output, &value);
            process::exit(0);
        }
        Err(e) => {
            eprintln!("{}: {}", "error".red().bold(), e);
            process::exit(1);
        }
    }
}
