use clap::Args;
use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;

use tax_deficit_core::allocation::presets::{
    full_apportionment, headquarter, qdmtt_scenario, unilateral,
};
use tax_deficit_core::allocation::{allocate_bilateral_tax_deficits, AllocationScenarioConfig};
use tax_deficit_core::deficit::prepare_panel;
use tax_deficit_core::reference::classification::CountryClassification;

use crate::input::{self, Run};

/// Ready-made scenario selectable from the command line or the run file.
#[derive(Debug, Clone, PartialEq)]
pub enum Preset {
    Headquarter,
    Qdmtt,
    Unilateral(String),
    FullApportionment,
}

impl FromStr for Preset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "headquarter" | "hq" => Ok(Preset::Headquarter),
            "qdmtt" => Ok(Preset::Qdmtt),
            "full-apportionment" | "full_apportionment" => Ok(Preset::FullApportionment),
            other => match other.strip_prefix("unilateral:") {
                Some(code) if code.len() == 3 => Ok(Preset::Unilateral(code.to_ascii_uppercase())),
                _ => Err(format!(
                    "unknown preset '{s}' (expected headquarter, qdmtt, unilateral:<ISO> or full-apportionment)"
                )),
            },
        }
    }
}

impl Preset {
    pub fn config(
        &self,
        classification: &CountryClassification,
        rate: Decimal,
    ) -> AllocationScenarioConfig {
        match self {
            Preset::Headquarter => headquarter(classification, rate),
            Preset::Qdmtt => qdmtt_scenario(classification, rate),
            Preset::Unilateral(code) => unilateral(code, rate),
            Preset::FullApportionment => full_apportionment(classification, rate),
        }
    }
}

/// Scenario from `--preset`, else the run file's preset, else its scenario.
///
/// A preset keeps the key weights and breakdown threshold of the run file's
/// scenario when one is given.
pub fn resolve_scenario(
    run: &Run,
    preset: Option<&str>,
    minimum_rate: Option<Decimal>,
) -> Result<AllocationScenarioConfig, Box<dyn std::error::Error>> {
    let preset = preset
        .or(run.preset.as_deref())
        .map(Preset::from_str)
        .transpose()?;

    let config = match (preset, &run.scenario) {
        (Some(preset), scenario) => {
            let rate = run.minimum_rate(minimum_rate)?;
            let mut config = preset.config(&run.reference.classification, rate);
            if let Some(s) = scenario {
                config = config
                    .with_weights(s.weight_upr, s.weight_assets, s.weight_employees)
                    .with_minimum_breakdown(s.minimum_breakdown)
                    .with_etr_increment(s.etr_increment);
            }
            config
        }
        (None, Some(scenario)) => {
            let mut config = scenario.clone();
            if let Some(rate) = minimum_rate {
                config.minimum_rate = rate;
            }
            config
        }
        (None, None) => return Err("the run file has no scenario; pass --preset".into()),
    };
    config.validate()?;
    Ok(config)
}

/// Arguments for the allocation engine
#[derive(Args)]
pub struct AllocateArgs {
    /// Path to a JSON or YAML run file (stdin when omitted)
    #[arg(long)]
    pub input: Option<String>,

    /// headquarter | qdmtt | unilateral:<ISO> | full-apportionment
    #[arg(long)]
    pub preset: Option<String>,

    /// Minimum effective tax rate (overrides the scenario's)
    #[arg(long)]
    pub minimum_rate: Option<Decimal>,

    /// Return the (parent, collector, instrument, location) ledger
    #[arg(long)]
    pub details: bool,
}

pub fn run_allocate(args: AllocateArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let run = input::load_run(args.input.as_deref())?;
    let mut config = resolve_scenario(&run, args.preset.as_deref(), args.minimum_rate)?;
    if args.details {
        config.return_bilateral_details = true;
    }

    let prepared = prepare_panel(&run.reference, &run.deficit)?;
    let out = allocate_bilateral_tax_deficits(&prepared, &config)?;
    Ok(serde_json::to_value(out)?)
}
