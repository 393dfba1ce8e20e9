//! Parent-level deficit sums computed straight from the prepared panel,
//! without going through the deficit table or the waterfall.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::allocation::{AllocationScenarioConfig, Instrument};
use crate::deficit::twz::{twz_domestic_deficit, twz_haven_deficit, twz_non_haven_deficit};
use crate::deficit::{MinimumTax, PreparedPanel};
use crate::types::{Money, Origin};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StratifiedDeficit {
    pub domestic: Money,
    pub non_haven: Money,
    pub tax_haven: Money,
    pub unclassified: Money,
}

impl StratifiedDeficit {
    pub fn total(&self) -> Money {
        self.domestic + self.non_haven + self.tax_haven + self.unclassified
    }

    pub fn foreign(&self) -> Money {
        self.non_haven + self.tax_haven + self.unclassified
    }

    fn add(&mut self, origin: Origin, amount: Money) {
        match origin {
            Origin::Domestic => self.domestic += amount,
            Origin::NonHavenForeign => self.non_haven += amount,
            Origin::TaxHavenForeign => self.tax_haven += amount,
            Origin::UnclassifiedForeign => self.unclassified += amount,
        }
    }
}

/// Tax deficit of every parent, split by origin. Parents listed in
/// `exclude_domestic_of` have their domestic deficit left out.
pub fn compute_all_tax_deficits(
    prepared: &PreparedPanel,
    tax: &MinimumTax,
    exclude_domestic_of: &BTreeSet<String>,
) -> BTreeMap<String, StratifiedDeficit> {
    let mut parents: BTreeMap<String, StratifiedDeficit> = BTreeMap::new();
    for row in &prepared.rows {
        let entry = parents.entry(row.parent_code().to_string()).or_default();
        if row.de_minimis {
            continue;
        }
        entry.add(row.origin, tax.deficit(row.etr, row.profit_base));
    }

    for twz in &prepared.twz {
        let haven = twz_haven_deficit(twz, tax);
        if twz.has_cbcr {
            if !prepared.has_coarse_reporting(&twz.code) {
                let entry = parents.entry(twz.code.clone()).or_default();
                entry.tax_haven = entry.tax_haven.max(haven);
            }
            continue;
        }
        let entry = parents.entry(twz.code.clone()).or_default();
        entry.domestic += twz_domestic_deficit(twz, tax).unwrap_or_default();
        entry.tax_haven += haven;
        entry.non_haven += twz_non_haven_deficit(twz, prepared, tax);
    }

    for (code, entry) in parents.iter_mut() {
        if exclude_domestic_of.contains(code) {
            entry.domestic = Decimal::ZERO;
        }
    }
    parents
}

/// Revenue each QDMTT adopter raises on the deficit booked in its territory.
pub fn compute_qdmtt_revenue_gains(
    prepared: &PreparedPanel,
    config: &AllocationScenarioConfig,
) -> crate::TaxDeficitResult<BTreeMap<String, Money>> {
    let tax = MinimumTax::new(config.minimum_rate, config.etr_increment)?;
    let qdmtt = config.coverage(Instrument::Qdmtt);
    let mut gains: BTreeMap<String, Money> = BTreeMap::new();

    let sources = prepared
        .rows
        .iter()
        .filter(|r| !r.aggregate_partner && !r.de_minimis)
        .map(|r| {
            (
                r.partner_code(),
                r.origin.is_domestic(),
                tax.deficit(r.etr, r.profit_base),
            )
        })
        .chain(
            prepared
                .twz
                .iter()
                .filter(|t| !t.has_cbcr)
                .filter_map(|t| Some((t.code.as_str(), true, twz_domestic_deficit(t, &tax)?))),
        );

    for (partner, domestic, deficit) in sources {
        if deficit > Decimal::ZERO && qdmtt.reaches(partner, domestic) {
            *gains.entry(partner.to_string()).or_default() += deficit;
        }
    }
    Ok(gains)
}
