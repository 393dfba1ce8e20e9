use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet};

use super::legacy::compute_all_tax_deficits;
use super::shares::apportionment_shares;
use crate::allocation::AllocationScenarioConfig;
use crate::deficit::{MinimumTax, PreparedPanel};
use crate::types::Money;
use crate::TaxDeficitResult;

/// Revenue of a club of countries applying both the IIR and the UTPR.
///
/// Club members collect their own multinationals' full deficit. The deficit
/// of every other parent is shared among members by key. With a single
/// member this is the unilateral scenario.
pub fn compute_selected_intermediary_scenario_gain(
    prepared: &PreparedPanel,
    config: &AllocationScenarioConfig,
    club: &BTreeSet<String>,
) -> TaxDeficitResult<BTreeMap<String, Money>> {
    let tax = MinimumTax::new(config.minimum_rate, config.etr_increment)?;
    let deficits = compute_all_tax_deficits(prepared, &tax, &BTreeSet::new());
    let universe = config.among_countries_implementing.then_some(club);
    let shares = apportionment_shares(prepared, config, deficits.keys(), universe);

    let mut gains: BTreeMap<String, Money> =
        club.iter().map(|c| (c.clone(), Decimal::ZERO)).collect();
    for (parent, deficit) in &deficits {
        let total = deficit.total();
        if club.contains(parent) {
            *gains.entry(parent.clone()).or_default() += total;
            continue;
        }
        let Some(key) = shares.get(parent) else {
            continue;
        };
        for member in club {
            if let Some(share) = key.get(member) {
                *gains.entry(member.clone()).or_default() += total * *share;
            }
        }
    }
    tracing::debug!(members = club.len(), "selected intermediary scenario computed");
    Ok(gains)
}
