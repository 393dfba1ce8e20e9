//! Formulary apportionment keys for the UTPR.
//!
//! A parent's group presence maps each partner jurisdiction to its
//! unrelated-party revenue, tangible assets and employees. Parents reporting
//! fewer partner jurisdictions than the minimum breakdown get a synthetic
//! presence: their own domestic presence plus their foreign total spread
//! along the foreign footprint of granular parents.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use super::config::AllocationScenarioConfig;
use crate::deficit::prepare::PreparedObservation;
use crate::deficit::PreparedPanel;

// ---------------------------------------------------------------------------
// Presence
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Presence {
    pub upr: Decimal,
    pub assets: Decimal,
    pub employees: Decimal,
}

impl Presence {
    pub fn of(row: &PreparedObservation) -> Self {
        let o = &row.observation;
        Presence {
            upr: o.unrelated_party_revenues.max(Decimal::ZERO),
            assets: o.tangible_assets.unwrap_or_default().max(Decimal::ZERO),
            employees: o.employees.unwrap_or_default().max(Decimal::ZERO),
        }
    }

    pub fn is_positive(&self) -> bool {
        self.upr > Decimal::ZERO || self.assets > Decimal::ZERO || self.employees > Decimal::ZERO
    }

    fn add(&mut self, other: &Presence) {
        self.upr += other.upr;
        self.assets += other.assets;
        self.employees += other.employees;
    }

    fn dims(&self) -> [Decimal; 3] {
        [self.upr, self.assets, self.employees]
    }

    fn from_dims(d: [Decimal; 3]) -> Self {
        Presence {
            upr: d[0],
            assets: d[1],
            employees: d[2],
        }
    }
}

/// How a parent's group presence was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceBasis {
    Reported,
    /// Own domestic presence plus foreign total along the granular footprint
    Proxy,
    /// No presence data at all: granular footprint only
    ProxyOnly,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupPresence {
    pub basis: PresenceBasis,
    pub partners: BTreeMap<String, Presence>,
}

/// Group presence of every parent with a tax deficit.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PresenceTable {
    groups: BTreeMap<String, GroupPresence>,
}

impl PresenceTable {
    /// `parents` maps each parent to its partner-jurisdiction breakdown count.
    /// Parents without CbCR rows are never granular.
    pub fn build(
        prepared: &PreparedPanel,
        parents: &BTreeMap<String, usize>,
        minimum_breakdown: usize,
    ) -> Self {
        let cbcr = prepared.cbcr_parents();
        let granular: BTreeSet<&str> = parents
            .iter()
            .filter(|(p, n)| **n >= minimum_breakdown && cbcr.contains(p.as_str()))
            .map(|(p, _)| p.as_str())
            .collect();

        // Foreign footprint of granular parents, by partner jurisdiction
        let mut footprint: BTreeMap<String, Presence> = BTreeMap::new();
        for row in prepared.rows.iter().filter(|r| {
            granular.contains(r.parent_code())
                && !r.aggregate_partner
                && !r.observation.is_domestic()
        }) {
            footprint
                .entry(row.partner_code().to_string())
                .or_default()
                .add(&Presence::of(row));
        }

        let mut groups = BTreeMap::new();
        for parent in parents.keys() {
            let group = if granular.contains(parent.as_str()) {
                let partners = prepared
                    .rows_of(parent)
                    .filter(|r| !r.aggregate_partner)
                    .map(|r| (r.partner_code().to_string(), Presence::of(r)))
                    .collect();
                GroupPresence {
                    basis: PresenceBasis::Reported,
                    partners,
                }
            } else {
                synthetic_group(prepared, parent, &footprint)
            };
            groups.insert(parent.clone(), group);
        }
        PresenceTable { groups }
    }

    pub fn group(&self, parent: &str) -> Option<&GroupPresence> {
        self.groups.get(parent)
    }

    pub fn groups(&self) -> impl Iterator<Item = (&String, &GroupPresence)> {
        self.groups.iter()
    }
}

fn synthetic_group(
    prepared: &PreparedPanel,
    parent: &str,
    footprint: &BTreeMap<String, Presence>,
) -> GroupPresence {
    let mut domestic = Presence::default();
    let mut foreign = Presence::default();
    let mut has_rows = false;
    for r in prepared.rows_of(parent) {
        has_rows = true;
        if r.observation.is_domestic() {
            domestic.add(&Presence::of(r));
        } else {
            foreign.add(&Presence::of(r));
        }
    }

    let (basis, foreign_totals) = if has_rows {
        (PresenceBasis::Proxy, foreign.dims())
    } else {
        (PresenceBasis::ProxyOnly, [Decimal::ONE; 3])
    };

    let mut footprint_totals = [Decimal::ZERO; 3];
    for (_, p) in footprint.iter().filter(|(c, _)| c.as_str() != parent) {
        for (t, v) in footprint_totals.iter_mut().zip(p.dims()) {
            *t += v;
        }
    }

    let mut partners: BTreeMap<String, Presence> = BTreeMap::new();
    for (code, p) in footprint.iter().filter(|(c, _)| c.as_str() != parent) {
        let mut d = [Decimal::ZERO; 3];
        for (k, v) in p.dims().iter().enumerate() {
            if footprint_totals[k] > Decimal::ZERO {
                d[k] = foreign_totals[k] * *v / footprint_totals[k];
            }
        }
        let synthetic = Presence::from_dims(d);
        if synthetic.is_positive() {
            partners.insert(code.clone(), synthetic);
        }
    }
    if domestic.is_positive() {
        partners.insert(parent.to_string(), domestic);
    }
    GroupPresence { basis, partners }
}

// ---------------------------------------------------------------------------
// Keys
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AllocationWeights {
    pub upr: Decimal,
    pub assets: Decimal,
    pub employees: Decimal,
}

impl AllocationWeights {
    pub fn from_config(config: &AllocationScenarioConfig) -> Self {
        AllocationWeights {
            upr: config.weight_upr,
            assets: config.weight_assets,
            employees: config.weight_employees,
        }
    }

    fn dims(&self) -> [Decimal; 3] {
        [self.upr, self.assets, self.employees]
    }
}

/// Share of each jurisdiction in a parent's UTPR apportionment.
///
/// Only jurisdictions with positive presence that pass `in_universe` count.
/// Shares sum to one over that universe, or the key is empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AllocationKey {
    pub shares: BTreeMap<String, Decimal>,
}

impl AllocationKey {
    pub fn compute(
        group: &GroupPresence,
        in_universe: impl Fn(&str) -> bool,
        weights: &AllocationWeights,
    ) -> Self {
        let universe: Vec<(&String, &Presence)> = group
            .partners
            .iter()
            .filter(|(code, p)| p.is_positive() && in_universe(code))
            .collect();

        let mut totals = [Decimal::ZERO; 3];
        for (_, p) in &universe {
            for (t, v) in totals.iter_mut().zip(p.dims()) {
                *t += v;
            }
        }
        let w = weights.dims();
        let active: Vec<usize> = (0..3)
            .filter(|k| w[*k] > Decimal::ZERO && totals[*k] > Decimal::ZERO)
            .collect();
        let weight_sum: Decimal = active.iter().map(|k| w[*k]).sum();
        if weight_sum.is_zero() {
            return AllocationKey::default();
        }

        let shares = universe
            .into_iter()
            .map(|(code, p)| {
                let x = p.dims();
                let share: Decimal = active.iter().map(|k| w[*k] * x[*k] / totals[*k]).sum();
                (code.clone(), share / weight_sum)
            })
            .filter(|(_, s)| *s > Decimal::ZERO)
            .collect();
        AllocationKey { shares }
    }

    pub fn share(&self, country: &str) -> Decimal {
        self.shares.get(country).copied().unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.shares.is_empty()
    }
}
