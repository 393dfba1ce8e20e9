pub mod file;
pub mod stdin;

use rust_decimal::Decimal;
use serde::Deserialize;

use tax_deficit_core::allocation::AllocationScenarioConfig;
use tax_deficit_core::deficit::DeficitParams;
use tax_deficit_core::reference::loader::{load_reference_data, DataPaths};
use tax_deficit_core::reference::ReferenceData;

/// Contents of a run file: where the reference tables live and how to use them.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunFile {
    pub data: DataPaths,
    pub deficit: DeficitParams,
    #[serde(default)]
    pub scenario: Option<AllocationScenarioConfig>,
    #[serde(default)]
    pub preset: Option<String>,
}

/// A run file with its reference data loaded.
pub struct Run {
    pub reference: ReferenceData,
    pub deficit: DeficitParams,
    pub scenario: Option<AllocationScenarioConfig>,
    pub preset: Option<String>,
}

impl Run {
    /// Minimum rate from the flag, else from the scenario.
    pub fn minimum_rate(
        &self,
        flag: Option<Decimal>,
    ) -> Result<Decimal, Box<dyn std::error::Error>> {
        flag.or_else(|| self.scenario.as_ref().map(|s| s.minimum_rate))
            .ok_or_else(|| "--minimum-rate is required when the run file has no scenario".into())
    }
}

/// Read the run file from `--input`, or from stdin when piped.
pub fn load_run(path: Option<&str>) -> Result<Run, Box<dyn std::error::Error>> {
    let (run, base) = if let Some(path) = path {
        file::read_run(path)?
    } else if let Some(run) = stdin::read_stdin()? {
        (run, std::env::current_dir()?)
    } else {
        return Err("--input <run.json|run.yaml> or stdin required".into());
    };

    run.deficit.validate()?;
    let paths = run.data.relative_to(&base);
    tracing::info!(panel = %paths.panel.display(), year = run.deficit.year, "loading reference data");
    let reference = load_reference_data(&paths)?;
    Ok(Run {
        reference,
        deficit: run.deficit,
        scenario: run.scenario,
        preset: run.preset,
    })
}
