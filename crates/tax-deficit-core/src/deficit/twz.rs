use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use super::params::MinimumTax;
use super::prepare::{PreparedObservation, PreparedPanel, TwzParent};
use crate::types::{Money, Origin, Rate};

/// ETR assumed on profits booked in tax havens.
pub const TWZ_HAVEN_ETR: Rate = dec!(0.10);

/// ETR assumed on profits booked in non-havens.
pub const TWZ_NON_HAVEN_ETR: Rate = dec!(0.20);

/// Rate at which non-haven deficits are imputed before rescaling at low rates.
pub const IMPUTATION_REFERENCE_RATE: Rate = dec!(0.25);

pub fn twz_haven_deficit(parent: &TwzParent, tax: &MinimumTax) -> Money {
    tax.gap(TWZ_HAVEN_ETR) * parent.haven_profits
}

pub fn twz_domestic_deficit(parent: &TwzParent, tax: &MinimumTax) -> Option<Money> {
    let profits = parent.domestic_profits?;
    let etr = parent.domestic_etr?;
    Some(tax.deficit(Some(etr), profits))
}

/// CbCR parents whose foreign profit split feeds the non-haven imputation.
fn imputation_sample(prepared: &PreparedPanel) -> impl Iterator<Item = &PreparedObservation> {
    prepared.rows.iter().filter(move |r| {
        let parent = r.parent_code();
        prepared.classification.is_eu27(parent)
            && !prepared.classification.is_tax_haven(parent)
            && !prepared.has_coarse_reporting(parent)
    })
}

/// Non-haven deficit per unit of TWZ tax-haven deficit, assuming a 20% ETR
/// in non-havens and 10% in havens.
pub fn non_haven_imputation_ratio(prepared: &PreparedPanel, tax: &MinimumTax) -> Rate {
    let haven_gap = tax.gap(TWZ_HAVEN_ETR);
    let non_haven_gap = tax.gap(TWZ_NON_HAVEN_ETR);
    if haven_gap.is_zero() {
        return Decimal::ZERO;
    }
    let (mut non_haven_profits, mut haven_profits) = (Decimal::ZERO, Decimal::ZERO);
    for r in imputation_sample(prepared) {
        match r.origin {
            Origin::NonHavenForeign => non_haven_profits += r.profit_base,
            Origin::TaxHavenForeign => haven_profits += r.profit_base,
            _ => {}
        }
    }
    if haven_profits.is_zero() {
        return Decimal::ZERO;
    }
    non_haven_gap * non_haven_profits / (haven_gap * haven_profits)
}

fn sample_non_haven_deficit(prepared: &PreparedPanel, tax: &MinimumTax) -> Money {
    imputation_sample(prepared)
        .filter(|r| r.origin == Origin::NonHavenForeign && !r.de_minimis)
        .map(|r| tax.deficit(r.etr, r.profit_base))
        .sum()
}

/// Imputed non-haven deficit of a TWZ-only parent.
///
/// Up to the reference rate the alternative method rescales the value at the
/// reference rate by the sample's own deficit growth. Both methods agree at the
/// reference rate, so the result stays non-decreasing in the minimum rate.
pub fn twz_non_haven_deficit(
    parent: &TwzParent,
    prepared: &PreparedPanel,
    tax: &MinimumTax,
) -> Money {
    let effective_rate = tax.rate - tax.etr_increment;
    if prepared.params.alternative_imputation && effective_rate <= IMPUTATION_REFERENCE_RATE {
        let reference = tax.at_rate(IMPUTATION_REFERENCE_RATE + tax.etr_increment);
        let at_reference = sample_non_haven_deficit(prepared, &reference);
        if at_reference.is_zero() {
            return Decimal::ZERO;
        }
        let scale = sample_non_haven_deficit(prepared, tax) / at_reference;
        twz_haven_deficit(parent, &reference)
            * non_haven_imputation_ratio(prepared, &reference)
            * scale
    } else {
        twz_haven_deficit(parent, tax) * non_haven_imputation_ratio(prepared, tax)
    }
}
