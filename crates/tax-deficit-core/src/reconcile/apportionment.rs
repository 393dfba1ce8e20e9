use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet};

use super::legacy::compute_all_tax_deficits;
use super::shares::apportionment_shares;
use crate::allocation::{AllocationScenarioConfig, Instrument};
use crate::deficit::{MinimumTax, PreparedPanel};
use crate::types::Money;
use crate::TaxDeficitResult;

/// Revenue of each UTPR adopter when every parent's deficit is apportioned by
/// shares read off the prepared rows: Σ deficit × share.
pub fn compute_full_apportionment(
    prepared: &PreparedPanel,
    config: &AllocationScenarioConfig,
) -> TaxDeficitResult<BTreeMap<String, Money>> {
    let tax = MinimumTax::new(config.minimum_rate, config.etr_increment)?;
    let deficits = compute_all_tax_deficits(prepared, &tax, &BTreeSet::new());
    let utpr = config.coverage(Instrument::Utpr);
    let adopters = config.implementing_countries();
    let universe = config.among_countries_implementing.then_some(&adopters);
    let shares = apportionment_shares(prepared, config, deficits.keys(), universe);

    let mut gains: BTreeMap<String, Money> =
        adopters.iter().map(|c| (c.clone(), Decimal::ZERO)).collect();
    for (parent, deficit) in &deficits {
        let Some(key) = shares.get(parent) else {
            continue;
        };
        for (country, share) in key {
            let mut base = Decimal::ZERO;
            if utpr.adopts(country) {
                base += deficit.foreign();
            }
            if utpr.reaches(country, country == parent) {
                base += deficit.domestic;
            }
            if base > Decimal::ZERO {
                *gains.entry(country.clone()).or_default() += base * *share;
            }
        }
    }
    Ok(gains)
}
