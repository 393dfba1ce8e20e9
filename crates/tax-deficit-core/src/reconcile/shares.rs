//! UTPR apportionment shares read straight off the prepared rows.
//!
//! The alternate paths use these instead of the allocation engine's keys.
//! For one parent the share of jurisdiction j is
//! Σ_k w_k · x_jk / X_k over the factors k whose weight and total are both
//! positive, divided by the sum of those weights.

use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet};

use crate::allocation::AllocationScenarioConfig;
use crate::deficit::prepare::PreparedObservation;
use crate::deficit::PreparedPanel;

/// UPR, tangible assets, employees.
type Factors = [Decimal; 3];

/// Share of each jurisdiction, per parent.
pub type ApportionmentShares = BTreeMap<String, BTreeMap<String, Decimal>>;

fn factors(row: &PreparedObservation) -> Factors {
    let o = &row.observation;
    [
        o.unrelated_party_revenues,
        o.tangible_assets.unwrap_or_default(),
        o.employees.unwrap_or_default(),
    ]
    .map(|v| v.max(Decimal::ZERO))
}

fn plus(a: Factors, b: Factors) -> Factors {
    [a[0] + b[0], a[1] + b[1], a[2] + b[2]]
}

fn any_positive(f: &Factors) -> bool {
    f.iter().any(|v| *v > Decimal::ZERO)
}

/// Shares of every parent in `parents`.
///
/// With `universe` set, only those jurisdictions may hold a share. A parent
/// reporting fewer partners than `minimum_breakdown` is given its own domestic
/// factors plus its foreign totals spread like the foreign operations of the
/// granular parents. A parent with no CbCR rows spreads a unit total that way.
pub fn apportionment_shares<'a>(
    prepared: &PreparedPanel,
    config: &AllocationScenarioConfig,
    parents: impl IntoIterator<Item = &'a String>,
    universe: Option<&BTreeSet<String>>,
) -> ApportionmentShares {
    let mut reported: BTreeMap<&str, BTreeMap<&str, Factors>> = BTreeMap::new();
    let mut domestic: BTreeMap<&str, Factors> = BTreeMap::new();
    let mut foreign: BTreeMap<&str, Factors> = BTreeMap::new();
    for row in &prepared.rows {
        let (parent, partner) = (row.parent_code(), row.partner_code());
        let f = factors(row);
        if parent == partner {
            let d = domestic.entry(parent).or_default();
            *d = plus(*d, f);
        } else {
            let d = foreign.entry(parent).or_default();
            *d = plus(*d, f);
        }
        let partners = reported.entry(parent).or_default();
        if !row.aggregate_partner {
            let d = partners.entry(partner).or_default();
            *d = plus(*d, f);
        }
    }

    let granular: BTreeSet<&str> = reported
        .iter()
        .filter(|(_, partners)| partners.len() >= config.minimum_breakdown)
        .map(|(parent, _)| *parent)
        .collect();

    let mut spread: BTreeMap<&str, Factors> = BTreeMap::new();
    for parent in &granular {
        for (partner, f) in &reported[parent] {
            if partner != parent {
                let d = spread.entry(*partner).or_default();
                *d = plus(*d, *f);
            }
        }
    }

    let weights = [
        config.weight_upr,
        config.weight_assets,
        config.weight_employees,
    ];
    let eligible = |code: &str| universe.map_or(true, |u| u.contains(code));

    let mut out = ApportionmentShares::new();
    for parent in parents {
        let p = parent.as_str();
        let presence: BTreeMap<&str, Factors> = if granular.contains(p) {
            reported[p].clone()
        } else {
            let to_spread = if reported.contains_key(p) {
                foreign.get(p).copied().unwrap_or_default()
            } else {
                [Decimal::ONE; 3]
            };
            let spread_total = spread
                .iter()
                .filter(|(c, _)| **c != p)
                .fold(Factors::default(), |acc, (_, f)| plus(acc, *f));
            let mut synthetic: BTreeMap<&str, Factors> = BTreeMap::new();
            for (code, f) in spread.iter().filter(|(c, _)| **c != p) {
                let mut s = Factors::default();
                for k in 0..3 {
                    if spread_total[k] > Decimal::ZERO {
                        s[k] = to_spread[k] * f[k] / spread_total[k];
                    }
                }
                synthetic.insert(*code, s);
            }
            if let Some(own) = domestic.get(p).filter(|f| any_positive(f)) {
                synthetic.insert(p, *own);
            }
            synthetic
        };

        let members: Vec<(&str, Factors)> = presence
            .into_iter()
            .filter(|(code, f)| any_positive(f) && eligible(*code))
            .collect();
        let totals = members
            .iter()
            .fold(Factors::default(), |acc, (_, f)| plus(acc, *f));
        let active: Vec<usize> = (0..3)
            .filter(|k| weights[*k] > Decimal::ZERO && totals[*k] > Decimal::ZERO)
            .collect();
        let weight_sum: Decimal = active.iter().map(|k| weights[*k]).sum();

        let mut shares = BTreeMap::new();
        if !weight_sum.is_zero() {
            for (code, f) in members {
                let share = active
                    .iter()
                    .map(|k| weights[*k] * f[*k] / totals[*k])
                    .sum::<Decimal>()
                    / weight_sum;
                if share > Decimal::ZERO {
                    shares.insert(code.to_string(), share);
                }
            }
        }
        out.insert(parent.clone(), shares);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deficit::{prepare_panel, DeficitParams};
    use crate::reference::classification::CountryInfo;
    use crate::reference::panel::PanelRecord;
    use crate::reference::ReferenceData;
    use rust_decimal_macros::dec;

    fn rec(parent: &str, partner: &str, upr: Decimal, assets: Decimal) -> PanelRecord {
        PanelRecord {
            year: 2017,
            parent_code: parent.into(),
            parent_name: parent.into(),
            partner_code: partner.into(),
            partner_name: partner.into(),
            profit_before_tax: dec!(100),
            adjusted_profit_before_tax: None,
            tax_paid: Some(dec!(5)),
            tax_accrued: None,
            total_revenues: Some(upr),
            unrelated_party_revenues: Some(upr),
            tangible_assets: Some(assets),
            employees: Some(dec!(0)),
        }
    }

    fn panel() -> PreparedPanel {
        let reference = ReferenceData::builder()
            .country(CountryInfo::new("FRA", "France"))
            .country(CountryInfo::new("DEU", "Germany"))
            .country(CountryInfo::new("USA", "United States"))
            .country(CountryInfo::new("JPN", "Japan"))
            .record(rec("FRA", "FRA", dec!(600), dec!(100)))
            .record(rec("FRA", "DEU", dec!(300), dec!(300)))
            .record(rec("FRA", "USA", dec!(100), dec!(600)))
            .record(rec("JPN", "JPN", dec!(50), dec!(50)))
            .record(rec("JPN", "AMER", dec!(40), dec!(20)))
            .build()
            .unwrap();
        prepare_panel(&reference, &DeficitParams::for_year(2017)).unwrap()
    }

    fn parents(codes: &[&str]) -> Vec<String> {
        codes.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn test_weighted_shares_of_reported_parent() {
        let prepared = panel();
        let config = AllocationScenarioConfig::new(dec!(0.15))
            .with_weights(dec!(0.5), dec!(0.5), dec!(0))
            .with_minimum_breakdown(3);
        let shares = apportionment_shares(&prepared, &config, &parents(&["FRA"]), None);
        let fra = &shares["FRA"];
        // upr 600/1000, assets 100/1000
        assert_eq!(fra["FRA"], dec!(0.35));
        assert_eq!(fra["DEU"], dec!(0.3));
        assert_eq!(fra["USA"], dec!(0.35));
    }

    #[test]
    fn test_universe_renormalises_shares() {
        let prepared = panel();
        let config = AllocationScenarioConfig::new(dec!(0.15)).with_minimum_breakdown(3);
        let club = BTreeSet::from(["FRA".to_string(), "DEU".to_string()]);
        let shares = apportionment_shares(&prepared, &config, &parents(&["FRA"]), Some(&club));
        assert_eq!(shares["FRA"]["FRA"], dec!(600) / dec!(900));
        assert!(!shares["FRA"].contains_key("USA"));
    }

    #[test]
    fn test_sparse_parent_spreads_foreign_totals() {
        let prepared = panel();
        let config = AllocationScenarioConfig::new(dec!(0.15)).with_minimum_breakdown(3);
        let shares = apportionment_shares(&prepared, &config, &parents(&["JPN"]), None);
        // own 50 at home, foreign 40 spread 3:1 over DEU and USA
        let jpn = &shares["JPN"];
        assert_eq!(jpn["JPN"], dec!(50) / dec!(90));
        assert_eq!(jpn["DEU"], dec!(30) / dec!(90));
        assert_eq!(jpn["USA"], dec!(10) / dec!(90));
    }

    #[test]
    fn test_parent_without_rows_gets_footprint_only() {
        let prepared = panel();
        let config = AllocationScenarioConfig::new(dec!(0.15)).with_minimum_breakdown(3);
        let shares = apportionment_shares(&prepared, &config, &parents(&["NOR"]), None);
        assert_eq!(shares["NOR"]["DEU"], dec!(0.75));
        assert_eq!(shares["NOR"]["USA"], dec!(0.25));
    }
}
