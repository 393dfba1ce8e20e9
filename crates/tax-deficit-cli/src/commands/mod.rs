pub mod allocate;
pub mod carve_outs;
pub mod deficits;
pub mod impute;
pub mod reconcile;
