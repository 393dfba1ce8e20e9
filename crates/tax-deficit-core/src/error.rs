use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TaxDeficitError {
    #[error("Invalid input: {field} — {reason}")]
    InvalidInput { field: String, reason: String },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Missing data: no {key} in {dataset}")]
    MissingData { dataset: String, key: String },

    #[error("Data format error: {0}")]
    DataFormat(String),

    #[error("Reconciliation failure in {check} for {key}: expected {expected}, got {actual}")]
    Reconciliation {
        check: String,
        key: String,
        expected: Decimal,
        actual: Decimal,
    },

    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Division by zero in {context}")]
    DivisionByZero { context: String },

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl TaxDeficitError {
    pub fn missing(dataset: &str, key: impl Into<String>) -> Self {
        TaxDeficitError::MissingData {
            dataset: dataset.to_string(),
            key: key.into(),
        }
    }

    pub fn invalid(field: &str, reason: impl Into<String>) -> Self {
        TaxDeficitError::InvalidInput {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for TaxDeficitError {
    fn from(e: serde_json::Error) -> Self {
        TaxDeficitError::SerializationError(e.to_string())
    }
}

impl From<std::io::Error> for TaxDeficitError {
    fn from(e: std::io::Error) -> Self {
        TaxDeficitError::Io(e.to_string())
    }
}

#[cfg(feature = "loader")]
impl From<csv::Error> for TaxDeficitError {
    fn from(e: csv::Error) -> Self {
        TaxDeficitError::DataFormat(e.to_string())
    }
}
