use clap::Args;
use rust_decimal::Decimal;
use serde_json::Value;

use tax_deficit_core::deficit::prepare_panel;
use tax_deficit_core::reconcile::reconcile_scenario;

use super::allocate::resolve_scenario;
use crate::input;

/// Arguments for the reconciled country totals
#[derive(Args)]
pub struct ReconcileArgs {
    /// Path to a JSON or YAML run file (stdin when omitted)
    #[arg(long)]
    pub input: Option<String>,

    /// headquarter | qdmtt | unilateral:<ISO> | full-apportionment
    #[arg(long)]
    pub preset: Option<String>,

    /// Minimum effective tax rate (overrides the scenario's)
    #[arg(long)]
    pub minimum_rate: Option<Decimal>,

    /// Convert totals from USD of the income year to 2021 EUR
    #[arg(long)]
    pub upgrade_to_2021: bool,
}

pub fn run_reconcile(args: ReconcileArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let run = input::load_run(args.input.as_deref())?;
    let config = resolve_scenario(&run, args.preset.as_deref(), args.minimum_rate)?;

    let prepared = prepare_panel(&run.reference, &run.deficit)?;
    let mut out = reconcile_scenario(&prepared, &config)?;
    if args.upgrade_to_2021 {
        let uprating = run.reference.growth.uprating(run.deficit.year)?;
        tracing::info!(factor = %uprating.factor(), "uprating totals to 2021 EUR");
        out.result.totals = out.result.totals.uprated(uprating.factor());
    }
    Ok(serde_json::to_value(out)?)
}
