use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::params::CarveOutParams;
use crate::reference::panel::JurisdictionObservation;
use crate::reference::series::CountrySeries;
use crate::types::{Money, Origin, Rate};

/// Average carve-out as a share of profit, by origin of the profit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CarveOutImpacts {
    pub domestic: Rate,
    pub tax_haven: Rate,
    pub non_haven: Rate,
    pub aggregate: Rate,
}

impl CarveOutImpacts {
    pub fn for_origin(&self, origin: Origin) -> Rate {
        match origin {
            Origin::Domestic => self.domestic,
            Origin::TaxHavenForeign => self.tax_haven,
            Origin::NonHavenForeign => self.non_haven,
            Origin::UnclassifiedForeign => self.aggregate,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RowCarveOut {
    pub amount: Money,
    /// Derived from the category average because payroll or assets were missing
    pub imputed: bool,
}

/// Carve-out from payroll and tangible assets, capped at the (positive) profit.
/// `None` when employees, wage or assets are unknown.
pub fn direct_carve_out(
    obs: &JurisdictionObservation,
    params: &CarveOutParams,
    mean_wage: Option<Money>,
) -> Option<Money> {
    let employees = obs.employees?;
    let wage = mean_wage?;
    let assets = obs.tangible_assets?;
    let payroll = employees * wage * params.payroll_factor();
    let raw =
        params.rate_payroll * payroll + params.rate_assets * assets * params.assets_multiplier();
    let cap = obs.profit_before_tax.max(Decimal::ZERO);
    Some(raw.max(Decimal::ZERO).min(cap))
}

#[derive(Default)]
struct Accumulator {
    carve_out: Decimal,
    profit: Decimal,
}

impl Accumulator {
    fn ratio(&self) -> Option<Rate> {
        (self.profit > Decimal::ZERO).then(|| self.carve_out / self.profit)
    }
}

/// Carve-out of every row, imputing missing ones from the category averages.
pub fn apply_carve_outs(
    rows: &[(JurisdictionObservation, Origin)],
    params: &CarveOutParams,
    mean_wages: &CountrySeries,
    year: i32,
) -> (Vec<RowCarveOut>, CarveOutImpacts) {
    let direct: Vec<Option<Money>> = rows
        .iter()
        .map(|(obs, _)| direct_carve_out(obs, params, mean_wages.get(year, &obs.partner_code)))
        .collect();

    let mut by_origin: [Accumulator; 4] = Default::default();
    let mut overall = Accumulator::default();
    for ((obs, origin), co) in rows.iter().zip(&direct) {
        if let Some(co) = co {
            if obs.profit_before_tax > Decimal::ZERO {
                let acc = &mut by_origin[slot(*origin)];
                acc.carve_out += *co;
                acc.profit += obs.profit_before_tax;
                overall.carve_out += *co;
                overall.profit += obs.profit_before_tax;
            }
        }
    }
    let fallback = overall.ratio().unwrap_or(Decimal::ZERO);
    let pick = |o: Origin| by_origin[slot(o)].ratio().unwrap_or(fallback);
    let impacts = CarveOutImpacts {
        domestic: pick(Origin::Domestic),
        tax_haven: pick(Origin::TaxHavenForeign),
        non_haven: pick(Origin::NonHavenForeign),
        aggregate: pick(Origin::UnclassifiedForeign),
    };

    let carve_outs = rows
        .iter()
        .zip(direct)
        .map(|((obs, origin), co)| match co {
            Some(amount) => RowCarveOut {
                amount,
                imputed: false,
            },
            None => RowCarveOut {
                amount: obs.profit_before_tax.max(Decimal::ZERO) * impacts.for_origin(*origin),
                imputed: true,
            },
        })
        .collect();

    (carve_outs, impacts)
}

fn slot(origin: Origin) -> usize {
    match origin {
        Origin::Domestic => 0,
        Origin::TaxHavenForeign => 1,
        Origin::NonHavenForeign => 2,
        Origin::UnclassifiedForeign => 3,
    }
}
