//! Bilateral allocation of tax deficits among collecting countries.
//!
//! Each (parent, partner) deficit runs through an explicit waterfall: the
//! source country's QDMTT, then the parent's IIR, then the UTPR apportioned
//! by formulary keys. Whatever no instrument reaches stays unallocated.

pub mod config;
pub mod engine;
pub mod keys;
pub mod ledger;
pub mod presets;
pub mod waterfall;

pub use config::{AllocationScenarioConfig, Instrument, Location};
pub use engine::{allocate_bilateral_tax_deficits, AllocationRun};
pub use keys::{AllocationKey, PresenceTable};
pub use ledger::{
    AggregateAllocation, AllocationTable, BilateralAllocationRecord, BilateralLedger,
    CountryAllocation, ParentDeficit, UnallocatedDeficit,
};
pub use waterfall::UnallocatedReason;
