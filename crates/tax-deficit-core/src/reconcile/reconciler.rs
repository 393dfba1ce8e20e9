use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

use super::apportionment::compute_full_apportionment;
use super::intermediary::compute_selected_intermediary_scenario_gain;
use super::legacy::{compute_all_tax_deficits, compute_qdmtt_revenue_gains};
use super::shares::apportionment_shares;
use super::totals::CountryTotals;
use crate::allocation::{AllocationRun, AllocationScenarioConfig, AllocationTable, Instrument};
use crate::deficit::{MinimumTax, PreparedPanel};
use crate::error::TaxDeficitError;
use crate::types::{with_metadata, ComputationOutput, Money};
use crate::TaxDeficitResult;

/// Absolute, and relative, tolerance between two computation paths.
pub const RECONCILIATION_TOLERANCE: Decimal = dec!(0.0001);

pub fn within_tolerance(a: Decimal, b: Decimal) -> bool {
    let diff = (a - b).abs();
    diff <= RECONCILIATION_TOLERANCE || diff <= RECONCILIATION_TOLERANCE * a.abs().max(b.abs())
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationCheck {
    pub name: String,
    /// Number of keys compared
    pub compared: usize,
    /// Largest absolute difference seen, within tolerance
    pub max_difference: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub year: i32,
    pub tolerance: Decimal,
    pub shape: ScenarioShape,
    pub checks: Vec<ReconciliationCheck>,
}

impl ReconciliationReport {
    pub fn check(&self, name: &str) -> Option<&ReconciliationCheck> {
        self.checks.iter().find(|c| c.name == name)
    }
}

/// Country totals together with the checks they passed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciledAllocation {
    pub totals: CountryTotals,
    pub report: ReconciliationReport,
}

/// Which alternate path a scenario can be compared against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioShape {
    IirOnly,
    QdmttOnly,
    SelectedIntermediary,
    UtprOnly,
    Mixed,
}

impl ScenarioShape {
    pub fn of(config: &AllocationScenarioConfig) -> Self {
        let qdmtt = !config.coverage(Instrument::Qdmtt).is_empty();
        let iir = !config.coverage(Instrument::Iir).is_empty();
        let utpr = !config.coverage(Instrument::Utpr).is_empty();
        let safe_harbor = config.stat_rate_condition_for_utpr;

        if iir && !qdmtt && !utpr {
            ScenarioShape::IirOnly
        } else if qdmtt && !iir && !utpr {
            ScenarioShape::QdmttOnly
        } else if !qdmtt
            && !safe_harbor
            && config.iir_excl_domestic.is_empty()
            && config.utpr_excl_domestic.is_empty()
            && !config.iir_incl_domestic.is_empty()
            && config.iir_incl_domestic == config.utpr_incl_domestic
        {
            ScenarioShape::SelectedIntermediary
        } else if utpr && !qdmtt && !iir && !safe_harbor {
            ScenarioShape::UtprOnly
        } else {
            ScenarioShape::Mixed
        }
    }
}

/// Compare two keyed results; missing keys count as zero.
fn compare(
    name: &str,
    expected: &BTreeMap<String, Money>,
    actual: &BTreeMap<String, Money>,
) -> TaxDeficitResult<ReconciliationCheck> {
    let keys: BTreeSet<&String> = expected.keys().chain(actual.keys()).collect();
    let mut max_difference = Decimal::ZERO;
    for key in &keys {
        let e = expected.get(*key).copied().unwrap_or_default();
        let a = actual.get(*key).copied().unwrap_or_default();
        if !within_tolerance(e, a) {
            tracing::error!(
                check = name,
                key = %key,
                expected = %e,
                actual = %a,
                "reconciliation failed"
            );
            return Err(TaxDeficitError::Reconciliation {
                check: name.to_string(),
                key: key.to_string(),
                expected: e,
                actual: a,
            });
        }
        max_difference = max_difference.max((e - a).abs());
    }
    tracing::debug!(check = name, compared = keys.len(), %max_difference, "reconciled");
    Ok(ReconciliationCheck {
        name: name.to_string(),
        compared: keys.len(),
        max_difference,
    })
}

fn single(key: &str, value: Money) -> BTreeMap<String, Money> {
    BTreeMap::from([(key.to_string(), value)])
}

// ---------------------------------------------------------------------------
// Aggregation and reconciliation
// ---------------------------------------------------------------------------

/// Roll an allocation table up to country totals and check it against
/// independently computed paths. Any disagreement is an error.
pub fn aggregate_and_reconcile(
    prepared: &PreparedPanel,
    config: &AllocationScenarioConfig,
    table: &AllocationTable,
) -> TaxDeficitResult<(CountryTotals, ReconciliationReport)> {
    let run = AllocationRun::new(prepared, config)?;
    let (ledger, aggregate) = match table {
        AllocationTable::Bilateral(ledger) => (ledger.clone(), run.aggregate()),
        AllocationTable::Aggregate(aggregate) => (run.bilateral(), aggregate.clone()),
    };
    let mut checks = Vec::new();

    // allocated + unallocated = deficit, per parent
    let expected = run.deficits().parent_totals();
    let mut accounted: BTreeMap<String, Money> = BTreeMap::new();
    for r in &ledger.records {
        *accounted.entry(r.parent_code.clone()).or_default() += r.allocated;
    }
    for u in &ledger.unallocated {
        *accounted.entry(u.parent_code.clone()).or_default() += u.amount;
    }
    checks.push(compare("parent_conservation", &expected, &accounted)?);

    let aggregate_totals: BTreeMap<String, Money> = aggregate
        .countries
        .iter()
        .map(|c| (c.code.clone(), c.allocated))
        .collect();
    checks.push(compare(
        "detailed_vs_aggregate",
        &ledger.country_totals(),
        &aggregate_totals,
    )?);
    checks.push(compare(
        "detailed_vs_aggregate_unallocated",
        &single("unallocated", ledger.total_unallocated()),
        &single("unallocated", aggregate.unallocated),
    )?);

    let shape = ScenarioShape::of(config);
    let tax = MinimumTax::new(config.minimum_rate, config.etr_increment)?;
    let allocated = ledger.country_totals();
    match shape {
        ScenarioShape::IirOnly => {
            let iir = config.coverage(Instrument::Iir);
            let legacy: BTreeMap<String, Money> =
                compute_all_tax_deficits(prepared, &tax, &config.iir_excl_domestic)
                    .into_iter()
                    .filter(|(parent, _)| iir.adopts(parent))
                    .map(|(parent, d)| (parent, d.total()))
                    .collect();
            checks.push(compare("iir_vs_legacy", &legacy, &allocated)?);
        }
        ScenarioShape::QdmttOnly => {
            let legacy = compute_qdmtt_revenue_gains(prepared, config)?;
            checks.push(compare("qdmtt_vs_legacy", &legacy, &allocated)?);
        }
        ScenarioShape::SelectedIntermediary => {
            let gains = compute_selected_intermediary_scenario_gain(
                prepared,
                config,
                &config.iir_incl_domestic,
            )?;
            checks.push(compare("selected_intermediary", &gains, &allocated)?);
        }
        ScenarioShape::UtprOnly => {
            let gains = compute_full_apportionment(prepared, config)?;
            checks.push(compare("full_apportionment", &gains, &allocated)?);

            // Every parent's deficit is collectible when each has shares and
            // every jurisdiction holding one adopts the UTPR at home.
            let utpr = config.coverage(Instrument::Utpr);
            let deficits = compute_all_tax_deficits(prepared, &tax, &BTreeSet::new());
            let adopters = config.implementing_countries();
            let universe = config.among_countries_implementing.then_some(&adopters);
            let shares = apportionment_shares(prepared, config, deficits.keys(), universe);
            let everyone_adopts = deficits.iter().all(|(parent, d)| {
                let key = shares.get(parent);
                d.total() <= Decimal::ZERO
                    || key.is_some_and(|k| {
                        !k.is_empty() && k.keys().all(|c| utpr.incl_domestic.contains(c))
                    })
            });
            if everyone_adopts {
                let global: Money = deficits.values().map(|d| d.total()).sum();
                checks.push(compare(
                    "global_total",
                    &single("total", global),
                    &single("total", ledger.total_allocated()),
                )?);
            }
        }
        ScenarioShape::Mixed => {}
    }

    tracing::info!(
        year = prepared.year,
        shape = ?shape,
        checks = checks.len(),
        "allocation reconciled"
    );

    let report = ReconciliationReport {
        year: prepared.year,
        tolerance: RECONCILIATION_TOLERANCE,
        shape,
        checks,
    };
    Ok((CountryTotals::from_ledger(&ledger), report))
}

/// Allocate, roll up and reconcile in one call.
pub fn reconcile_scenario(
    prepared: &PreparedPanel,
    config: &AllocationScenarioConfig,
) -> TaxDeficitResult<ComputationOutput<ReconciledAllocation>> {
    let start = Instant::now();
    let detailed = config.clone().with_details(true);
    let run = AllocationRun::new(prepared, &detailed)?;
    let table = AllocationTable::Bilateral(run.bilateral());
    let (totals, report) = aggregate_and_reconcile(prepared, &detailed, &table)?;

    let mut warnings = prepared.warnings.clone();
    warnings.extend(run.warnings().iter().cloned());
    if totals.unallocated > Decimal::ZERO {
        warnings.push(format!("{} of tax deficit unallocated", totals.unallocated));
    }
    Ok(with_metadata(
        "Bilateral ledger rolled up by collecting country and reconciled against independent paths",
        config,
        warnings,
        start.elapsed().as_micros() as u64,
        ReconciledAllocation { totals, report },
    ))
}
