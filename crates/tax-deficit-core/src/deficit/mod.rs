pub mod carve_out;
pub mod computer;
pub mod impact;
pub mod params;
pub mod prepare;
pub mod treatments;
pub mod twz;

pub use computer::{compute_tax_deficits, tabulate_deficits, DeficitTable, TaxDeficitRow};
pub use params::{CarveOutSettings, DeficitParams, MinimumTax};
pub use prepare::{prepare_panel, PreparedPanel};
