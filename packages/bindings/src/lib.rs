use napi::Result as NapiResult;
use napi_derive::napi;
use rust_decimal::Decimal;
use serde::Deserialize;

use tax_deficit_core::allocation::{allocate_bilateral_tax_deficits, AllocationScenarioConfig};
use tax_deficit_core::deficit::{compute_tax_deficits, prepare_panel, DeficitParams};
use tax_deficit_core::imputation::{impute_missing_breakdowns, DEFAULT_MINIMUM_BREAKDOWN};
use tax_deficit_core::reconcile::reconcile_scenario;
use tax_deficit_core::reference::{ReferenceData, ReferenceDataBuilder};

/// Convert any Display error into a napi::Error.
fn to_napi_error(e: impl std::fmt::Display) -> napi::Error {
    napi::Error::from_reason(e.to_string())
}

/// JSON payload shared by every binding.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RunInput {
    reference: ReferenceDataBuilder,
    deficit: DeficitParams,
    #[serde(default)]
    scenario: Option<AllocationScenarioConfig>,
    /// Overrides the scenario's rate for the deficit and imputation tables
    #[serde(default)]
    minimum_rate: Option<Decimal>,
    #[serde(default)]
    upgrade_to_2021: bool,
}

impl RunInput {
    fn parse(input_json: &str) -> NapiResult<(Self, ReferenceData)> {
        let mut input: RunInput = serde_json::from_str(input_json).map_err(to_napi_error)?;
        input.deficit.validate().map_err(to_napi_error)?;
        let reference = std::mem::take(&mut input.reference)
            .build()
            .map_err(to_napi_error)?;
        Ok((input, reference))
    }

    fn rate(&self) -> NapiResult<Decimal> {
        self.minimum_rate
            .or_else(|| self.scenario.as_ref().map(|s| s.minimum_rate))
            .ok_or_else(|| to_napi_error("minimum_rate or scenario is required"))
    }

    fn scenario(&self) -> NapiResult<&AllocationScenarioConfig> {
        self.scenario
            .as_ref()
            .ok_or_else(|| to_napi_error("scenario is required"))
    }
}

// ---------------------------------------------------------------------------
// Deficits
// ---------------------------------------------------------------------------

#[napi(js_name = "computeTaxDeficits")]
pub fn compute_tax_deficits_json(input_json: String) -> NapiResult<String> {
    let (input, reference) = RunInput::parse(&input_json)?;
    let output =
        compute_tax_deficits(&reference, &input.deficit, input.rate()?).map_err(to_napi_error)?;
    serde_json::to_string(&output).map_err(to_napi_error)
}

#[napi(js_name = "imputeMissingBreakdowns")]
pub fn impute_missing_breakdowns_json(input_json: String) -> NapiResult<String> {
    let (input, reference) = RunInput::parse(&input_json)?;
    let deficits =
        compute_tax_deficits(&reference, &input.deficit, input.rate()?).map_err(to_napi_error)?;
    let minimum_breakdown = input
        .scenario
        .as_ref()
        .map(|s| s.minimum_breakdown)
        .unwrap_or(DEFAULT_MINIMUM_BREAKDOWN);
    let output =
        impute_missing_breakdowns(&deficits.result, &reference.classification, minimum_breakdown)
            .map_err(to_napi_error)?;
    serde_json::to_string(&output).map_err(to_napi_error)
}

// ---------------------------------------------------------------------------
// Allocation
// ---------------------------------------------------------------------------

#[napi(js_name = "allocateBilateralTaxDeficits")]
pub fn allocate_bilateral_tax_deficits_json(input_json: String) -> NapiResult<String> {
    let (input, reference) = RunInput::parse(&input_json)?;
    let prepared = prepare_panel(&reference, &input.deficit).map_err(to_napi_error)?;
    let output =
        allocate_bilateral_tax_deficits(&prepared, input.scenario()?).map_err(to_napi_error)?;
    serde_json::to_string(&output).map_err(to_napi_error)
}

#[napi(js_name = "aggregateAndReconcile")]
pub fn aggregate_and_reconcile_json(input_json: String) -> NapiResult<String> {
    let (input, reference) = RunInput::parse(&input_json)?;
    let prepared = prepare_panel(&reference, &input.deficit).map_err(to_napi_error)?;
    let mut output = reconcile_scenario(&prepared, input.scenario()?).map_err(to_napi_error)?;
    if input.upgrade_to_2021 {
        let uprating = reference
            .growth
            .uprating(input.deficit.year)
            .map_err(to_napi_error)?;
        output.result.totals = output.result.totals.uprated(uprating.factor());
    }
    serde_json::to_string(&output).map_err(to_napi_error)
}
