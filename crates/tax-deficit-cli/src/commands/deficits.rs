use clap::Args;
use rust_decimal::Decimal;
use serde_json::Value;

use tax_deficit_core::deficit::compute_tax_deficits;

use crate::input;

/// Arguments for the deficit table
#[derive(Args)]
pub struct DeficitsArgs {
    /// Path to a JSON or YAML run file (stdin when omitted)
    #[arg(long)]
    pub input: Option<String>,

    /// Minimum effective tax rate (defaults to the scenario's)
    #[arg(long)]
    pub minimum_rate: Option<Decimal>,

    /// Only list the rows of this parent
    #[arg(long)]
    pub parent: Option<String>,
}

pub fn run_deficits(args: DeficitsArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let run = input::load_run(args.input.as_deref())?;
    let rate = run.minimum_rate(args.minimum_rate)?;
    let mut out = compute_tax_deficits(&run.reference, &run.deficit, rate)?;
    if let Some(parent) = args.parent {
        out.result = out.result.only_parent(&parent.to_uppercase())?;
    }
    Ok(serde_json::to_value(out)?)
}
