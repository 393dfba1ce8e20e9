pub mod allocation;
pub mod deficit;
pub mod error;
pub mod imputation;
pub mod reconcile;
pub mod reference;
pub mod types;

pub use error::TaxDeficitError;
pub use types::*;

/// Standard result type for all tax-deficit computations
pub type TaxDeficitResult<T> = Result<T, TaxDeficitError>;
