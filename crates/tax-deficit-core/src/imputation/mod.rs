//! Domestic / non-haven / tax-haven decomposition for every parent, imputing
//! the split of parents that report too few partner jurisdictions.

pub mod breakdown;
pub mod granularity;

pub use breakdown::{
    impute_missing_breakdowns, DecomposedDeficit, DecomposedDeficitTable, ImputationBasis,
};
pub use granularity::{breakdown_counts, DEFAULT_MINIMUM_BREAKDOWN};
