use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use super::carve_out::{apply_carve_outs, CarveOutImpacts};
use super::params::{CarveOutParams, DeficitParams};
use super::treatments::{treatment_registry, TreatmentEffect};
use crate::error::TaxDeficitError;
use crate::reference::classification::{is_aggregate_code, CountryClassification};
use crate::reference::panel::JurisdictionObservation;
use crate::reference::ReferenceData;
use crate::types::{Money, Origin, Rate};
use crate::TaxDeficitResult;

const DE_MINIMIS_REVENUE_EUR: Decimal = dec!(10_000_000);
const DE_MINIMIS_PROFIT_EUR: Decimal = dec!(1_000_000);

// ---------------------------------------------------------------------------
// Output Types
// ---------------------------------------------------------------------------

/// A CbCR observation ready for deficit computation at any rate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreparedObservation {
    pub observation: JurisdictionObservation,
    pub origin: Origin,
    pub aggregate_partner: bool,
    pub carve_out: Money,
    pub carve_out_imputed: bool,
    /// Profit subject to top-up tax, net of carve-outs and never negative
    pub profit_base: Money,
    pub etr: Option<Rate>,
    pub de_minimis: bool,
}

impl PreparedObservation {
    pub fn parent_code(&self) -> &str {
        &self.observation.parent_code
    }

    pub fn partner_code(&self) -> &str {
        &self.observation.partner_code
    }
}

/// TWZ statistics for one parent after carve-outs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TwzParent {
    pub code: String,
    pub name: String,
    pub haven_profits: Money,
    pub domestic_profits: Option<Money>,
    pub domestic_etr: Option<Rate>,
    /// The parent also has CbCR rows; TWZ only tops up its tax-haven deficit
    pub has_cbcr: bool,
}

/// Rate-independent snapshot of one income year, owned by the caller.
#[derive(Debug, Clone, Serialize)]
pub struct PreparedPanel {
    pub year: i32,
    pub params: DeficitParams,
    pub carve_out_params: Option<CarveOutParams>,
    pub carve_out_impacts: Option<CarveOutImpacts>,
    pub classification: CountryClassification,
    /// Statutory CIT rates of the income year
    pub statutory_rates: BTreeMap<String, Rate>,
    pub rows: Vec<PreparedObservation>,
    pub twz: Vec<TwzParent>,
    pub treatments: Vec<TreatmentEffect>,
    pub warnings: Vec<String>,
}

impl PreparedPanel {
    pub fn cbcr_parents(&self) -> BTreeSet<String> {
        self.rows.iter().map(|r| r.parent_code().to_string()).collect()
    }

    pub fn rows_of<'a>(&'a self, parent: &'a str) -> impl Iterator<Item = &'a PreparedObservation> {
        self.rows.iter().filter(move |r| r.parent_code() == parent)
    }

    pub fn has_coarse_reporting(&self, code: &str) -> bool {
        self.classification.has_coarse_reporting(code, self.year)
    }

    pub fn statutory_rate(&self, code: &str) -> Option<Rate> {
        self.statutory_rates.get(code).copied()
    }

    pub fn parent_name(&self, code: &str) -> String {
        self.rows_of(code)
            .next()
            .map(|r| r.observation.parent_name.clone())
            .or_else(|| self.twz.iter().find(|t| t.code == code).map(|t| t.name.clone()))
            .unwrap_or_else(|| self.classification.name_of(code))
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

pub fn classify_origin(
    obs: &JurisdictionObservation,
    classification: &CountryClassification,
) -> Origin {
    if obs.is_domestic() {
        Origin::Domestic
    } else if is_aggregate_code(&obs.partner_code) {
        Origin::UnclassifiedForeign
    } else if classification.is_tax_haven(&obs.partner_code) {
        Origin::TaxHavenForeign
    } else {
        Origin::NonHavenForeign
    }
}

fn average_etrs(
    reference: &ReferenceData,
    years: &[i32],
) -> BTreeMap<(String, String), Rate> {
    let mut sums: BTreeMap<(String, String), (Decimal, Decimal)> = BTreeMap::new();
    for obs in reference
        .panel
        .observations()
        .iter()
        .filter(|o| years.contains(&o.year))
    {
        let entry = sums
            .entry((obs.parent_code.clone(), obs.partner_code.clone()))
            .or_default();
        entry.0 += obs.tax_paid;
        entry.1 += obs.profit_before_tax;
    }
    sums.into_iter()
        .filter(|(_, (_, profit))| *profit > Decimal::ZERO)
        .map(|(k, (tax, profit))| (k, (tax / profit).max(Decimal::ZERO)))
        .collect()
}

// ---------------------------------------------------------------------------
// Preparation
// ---------------------------------------------------------------------------

/// Clean, treat and carve out one income year of the panel.
pub fn prepare_panel(
    reference: &ReferenceData,
    params: &DeficitParams,
) -> TaxDeficitResult<PreparedPanel> {
    params.validate()?;
    let carve_out_params = params.carve_outs.resolve()?;
    let year = params.year;
    let classification = reference.classification.clone();
    let mut warnings = Vec::new();

    if !reference.panel.has_year(year) {
        return Err(TaxDeficitError::missing("CbCR panel", year.to_string()));
    }

    let mut observations: Vec<JurisdictionObservation> =
        reference.panel.for_year(year).cloned().collect();

    if params.use_adjusted_profits {
        for obs in observations.iter_mut() {
            if let Some(adjusted) = obs.adjusted_profit_before_tax {
                obs.profit_before_tax = adjusted;
            }
        }
    }

    let mut treatments = Vec::new();
    let mut excluded = BTreeSet::new();
    for treatment in treatment_registry(&params.treatments, year, reference)? {
        let effect = treatment.apply(&mut observations, year, reference)?;
        if let Some(parent) = &effect.excluded_parent {
            excluded.insert(parent.clone());
        }
        treatments.push(effect);
    }

    let averaged = match &params.average_etrs_over {
        Some(years) => average_etrs(reference, years),
        None => BTreeMap::new(),
    };

    let classified: Vec<(JurisdictionObservation, Origin)> = observations
        .into_iter()
        .map(|o| {
            let origin = classify_origin(&o, &classification);
            (o, origin)
        })
        .collect();

    let (carve_outs, carve_out_impacts) = match &carve_out_params {
        Some(p) => {
            let (cos, impacts) = apply_carve_outs(&classified, p, &reference.mean_wages, year);
            let imputed = cos.iter().filter(|c| c.imputed).count();
            if imputed > 0 {
                warnings.push(format!(
                    "{imputed} carve-outs imputed from average impacts (missing payroll or assets)"
                ));
            }
            (Some(cos), Some(impacts))
        }
        None => (None, None),
    };
    let ex_post = carve_out_params.map(|p| p.ex_post_etrs).unwrap_or(false);

    let de_minimis_thresholds = if params.de_minimis_exclusion {
        let fx = reference.growth.get(year)?.usd_to_eur;
        Some((DE_MINIMIS_REVENUE_EUR / fx, DE_MINIMIS_PROFIT_EUR / fx))
    } else {
        None
    };

    let rows: Vec<PreparedObservation> = classified
        .into_iter()
        .enumerate()
        .map(|(i, (observation, origin))| {
            let (carve_out, carve_out_imputed) = carve_outs
                .as_ref()
                .map(|c| (c[i].amount, c[i].imputed))
                .unwrap_or((Decimal::ZERO, false));
            let profit_base = (observation.profit_before_tax - carve_out).max(Decimal::ZERO);
            let key = (
                observation.parent_code.clone(),
                observation.partner_code.clone(),
            );
            let etr = match averaged.get(&key) {
                Some(avg) if observation.profit_before_tax > Decimal::ZERO => Some(*avg),
                _ if ex_post => (profit_base > Decimal::ZERO)
                    .then(|| (observation.tax_paid / profit_base).max(Decimal::ZERO)),
                _ => observation.etr(),
            };
            let de_minimis = de_minimis_thresholds
                .map(|(revenue, profit)| {
                    observation.total_revenues < revenue && observation.profit_before_tax < profit
                })
                .unwrap_or(false);
            PreparedObservation {
                aggregate_partner: is_aggregate_code(&observation.partner_code),
                observation,
                origin,
                carve_out,
                carve_out_imputed,
                profit_base,
                etr,
                de_minimis,
            }
        })
        .collect();

    let cbcr_parents: BTreeSet<String> =
        rows.iter().map(|r| r.parent_code().to_string()).collect();

    let mut twz = Vec::new();
    if params.include_twz {
        let impacts = carve_out_impacts.unwrap_or_default();
        for entry in reference.twz.for_year(year) {
            if is_aggregate_code(&entry.country_code) {
                continue;
            }
            twz.push(TwzParent {
                code: entry.country_code.clone(),
                name: entry.country_name.clone(),
                haven_profits: entry.profits_in_tax_havens.max(Decimal::ZERO)
                    * (Decimal::ONE - impacts.tax_haven),
                domestic_profits: entry
                    .domestic_profits
                    .map(|p| p.max(Decimal::ZERO) * (Decimal::ONE - impacts.domestic)),
                domestic_etr: entry.domestic_etr,
                has_cbcr: cbcr_parents.contains(&entry.country_code),
            });
        }
        for parent in &excluded {
            if !twz.iter().any(|t| &t.code == parent) {
                warnings.push(format!(
                    "{parent} CbCR rows were excluded but no TWZ statistics exist for {year}"
                ));
            }
        }
    }

    let statutory_rates = classification
        .all_codes()
        .into_iter()
        .filter_map(|c| reference.statutory_rates.get(year, &c).map(|r| (c, r)))
        .collect();

    for w in &warnings {
        tracing::warn!(year, "{w}");
    }
    tracing::debug!(
        year,
        rows = rows.len(),
        twz_parents = twz.len(),
        "panel prepared"
    );

    Ok(PreparedPanel {
        year,
        params: params.clone(),
        carve_out_params,
        carve_out_impacts,
        classification,
        statutory_rates,
        rows,
        twz,
        treatments,
        warnings,
    })
}
