//! Country totals and the reconciliation of the allocation engine against
//! independently coded computations.

pub mod apportionment;
pub mod intermediary;
pub mod legacy;
pub mod reconciler;
pub mod shares;
pub mod totals;

pub use apportionment::compute_full_apportionment;
pub use intermediary::compute_selected_intermediary_scenario_gain;
pub use legacy::{compute_all_tax_deficits, compute_qdmtt_revenue_gains, StratifiedDeficit};
pub use reconciler::{
    aggregate_and_reconcile, reconcile_scenario, within_tolerance, ReconciledAllocation,
    ReconciliationCheck, ReconciliationReport, ScenarioShape, RECONCILIATION_TOLERANCE,
};
pub use shares::{apportionment_shares, ApportionmentShares};
pub use totals::{CountryTotals, CountryTotalsRow};
