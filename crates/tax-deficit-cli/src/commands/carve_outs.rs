use clap::Args;
use rust_decimal::Decimal;
use serde_json::Value;

use tax_deficit_core::deficit::impact::assess_carve_out_impact;
use tax_deficit_core::deficit::CarveOutSettings;

use crate::input;

/// Arguments for the carve-out impact assessment
#[derive(Args)]
pub struct CarveOutArgs {
    /// Path to a JSON or YAML run file (stdin when omitted)
    #[arg(long)]
    pub input: Option<String>,

    /// Minimum effective tax rate (defaults to the scenario's)
    #[arg(long)]
    pub minimum_rate: Option<Decimal>,

    /// Use the first-year carve-out rates instead of the run file's settings
    #[arg(long, conflicts_with = "long_term")]
    pub first_year: bool,

    /// Use the long-term carve-out rates instead of the run file's settings
    #[arg(long)]
    pub long_term: bool,
}

pub fn run_carve_out_impact(args: CarveOutArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let mut run = input::load_run(args.input.as_deref())?;
    let rate = run.minimum_rate(args.minimum_rate)?;
    if args.first_year {
        run.deficit.carve_outs = CarveOutSettings::first_year();
    } else if args.long_term {
        run.deficit.carve_outs = CarveOutSettings::long_term();
    }
    let out = assess_carve_out_impact(&run.reference, &run.deficit, rate)?;
    Ok(serde_json::to_value(out)?)
}
