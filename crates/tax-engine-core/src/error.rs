use thiserror::Error;

use crate::types::Country;

#[derive(Debug, Error)]
pub enum TaxEngineError {
    #[error("Invalid rule document for {country}/{tax_year}: {reason}")]
    RuleValidation {
        country: String,
        tax_year: i32,
        reason: String,
    },

    #[error("Country not supported: {code}")]
    CountryNotSupported { code: String },

    #[error("No rules loaded for {country} tax year {tax_year}")]
    YearNotSupported { country: Country, tax_year: i32 },

    #[error("Invalid request field {field}: {reason}")]
    InvalidRequest { field: String, reason: String },

    #[error("Missing rule: {path}")]
    MissingRule { path: String },

    #[error("Calculation error: {0}")]
    Calculation(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for TaxEngineError {
    fn from(e: serde_json::Error) -> Self {
        TaxEngineError::Serialization(e.to_string())
    }
}

impl From<std::io::Error> for TaxEngineError {
    fn from(e: std::io::Error) -> Self {
        TaxEngineError::Io(e.to_string())
    }
}
