use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Instant;

use super::computer::{tabulate_deficits, DeficitTable};
use super::params::{DeficitParams, MinimumTax};
use super::prepare::prepare_panel;
use crate::error::TaxDeficitError;
use crate::reference::ReferenceData;
use crate::types::{with_metadata, ComputationOutput, Money, Origin, Rate};
use crate::TaxDeficitResult;

/// Deficit of one parent split by origin.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct OriginSplit {
    pub total: Money,
    pub domestic: Money,
    pub non_haven: Money,
    pub tax_haven: Money,
}

impl OriginSplit {
    fn add(&mut self, origin: Origin, amount: Money) {
        self.total += amount;
        match origin {
            Origin::Domestic => self.domestic += amount,
            Origin::TaxHavenForeign => self.tax_haven += amount,
            Origin::NonHavenForeign | Origin::UnclassifiedForeign => self.non_haven += amount,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CarveOutImpactRow {
    pub parent_code: String,
    pub parent_name: String,
    pub without_carve_outs: OriginSplit,
    pub with_carve_outs: OriginSplit,
    /// Change in the total deficit, in percent; `None` when there is no deficit to begin with
    pub change_pct: Option<Decimal>,
}

fn split_by_parent(table: &DeficitTable) -> BTreeMap<(String, String), OriginSplit> {
    let mut splits: BTreeMap<(String, String), OriginSplit> = BTreeMap::new();
    for r in &table.rows {
        splits
            .entry((r.parent_code.clone(), r.parent_name.clone()))
            .or_default()
            .add(r.origin, r.tax_deficit);
    }
    splits
}

/// Compare tax deficits with and without carve-outs, parent by parent.
pub fn assess_carve_out_impact(
    reference: &ReferenceData,
    params: &DeficitParams,
    minimum_rate: Rate,
) -> TaxDeficitResult<ComputationOutput<Vec<CarveOutImpactRow>>> {
    let start = Instant::now();
    if !params.carve_outs.is_complete() {
        return Err(TaxDeficitError::Configuration(
            "assessing carve-outs needs rate_assets, rate_payroll, depreciation_only, \
             exclude_inventories and ex_post_etrs"
                .into(),
        ));
    }
    let tax = MinimumTax::new(minimum_rate, Decimal::ZERO)?;

    let mut with_params = params.clone();
    with_params.carve_outs.enabled = true;
    let mut without_params = params.clone();
    without_params.carve_outs.enabled = false;

    let with_prepared = prepare_panel(reference, &with_params)?;
    let without_prepared = prepare_panel(reference, &without_params)?;
    let with = split_by_parent(&tabulate_deficits(&with_prepared, &tax));
    let without = split_by_parent(&tabulate_deficits(&without_prepared, &tax));

    let rows: Vec<CarveOutImpactRow> = without
        .into_iter()
        .map(|((code, name), before)| {
            let after = with.get(&(code.clone(), name.clone())).copied().unwrap_or_default();
            let change_pct = (before.total > Decimal::ZERO)
                .then(|| (after.total - before.total) / before.total * dec!(100));
            CarveOutImpactRow {
                parent_code: code,
                parent_name: name,
                without_carve_outs: before,
                with_carve_outs: after,
                change_pct,
            }
        })
        .collect();

    let mut warnings = with_prepared.warnings.clone();
    warnings.extend(without_prepared.warnings.iter().cloned());
    warnings.dedup();

    Ok(with_metadata(
        "Substance-based carve-out impact on tax deficits",
        &serde_json::json!({
            "minimum_rate": minimum_rate.to_string(),
            "carve_outs": with_prepared.carve_out_params,
            "average_impacts": with_prepared.carve_out_impacts,
        }),
        warnings,
        start.elapsed().as_micros() as u64,
        rows,
    ))
}
