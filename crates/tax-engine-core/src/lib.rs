pub mod cache;
pub mod calculators;
pub mod error;
pub mod optimizer;
pub mod orchestrator;
pub mod rules;
pub mod types;

pub use error::TaxEngineError;
pub use types::*;

/// Standard result type for all tax-engine operations
pub type TaxEngineResult<T> = Result<T, TaxEngineError>;
