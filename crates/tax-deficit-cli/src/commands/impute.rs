use clap::Args;
use rust_decimal::Decimal;
use serde_json::Value;

use tax_deficit_core::deficit::compute_tax_deficits;
use tax_deficit_core::imputation::{impute_missing_breakdowns, DEFAULT_MINIMUM_BREAKDOWN};

use crate::input;

/// Arguments for the origin decomposition
#[derive(Args)]
pub struct ImputeArgs {
    /// Path to a JSON or YAML run file (stdin when omitted)
    #[arg(long)]
    pub input: Option<String>,

    /// Minimum effective tax rate (defaults to the scenario's)
    #[arg(long)]
    pub minimum_rate: Option<Decimal>,

    /// Partner jurisdictions a parent must report to keep its own split
    #[arg(long)]
    pub minimum_breakdown: Option<usize>,
}

pub fn run_impute(args: ImputeArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let run = input::load_run(args.input.as_deref())?;
    let rate = run.minimum_rate(args.minimum_rate)?;
    let minimum_breakdown = args
        .minimum_breakdown
        .or_else(|| run.scenario.as_ref().map(|s| s.minimum_breakdown))
        .unwrap_or(DEFAULT_MINIMUM_BREAKDOWN);

    let deficits = compute_tax_deficits(&run.reference, &run.deficit, rate)?;
    let mut out = impute_missing_breakdowns(
        &deficits.result,
        &run.reference.classification,
        minimum_breakdown,
    )?;
    let mut warnings = deficits.warnings;
    warnings.append(&mut out.warnings);
    out.warnings = warnings;
    Ok(serde_json::to_value(out)?)
}
