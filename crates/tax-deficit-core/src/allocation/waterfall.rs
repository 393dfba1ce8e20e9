use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::config::{AllocationScenarioConfig, Instrument, Location};
use super::keys::AllocationKey;
use crate::types::Money;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Deficit of one (parent, partner) pair entering the waterfall.
#[derive(Debug, Clone, Copy)]
pub struct DeficitUnit<'a> {
    pub parent: &'a str,
    pub partner: &'a str,
    pub domestic: bool,
    pub aggregate_partner: bool,
    pub amount: Money,
}

impl DeficitUnit<'_> {
    pub fn location(&self) -> Location {
        Location::of(self.domestic)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claim {
    pub collector: String,
    pub instrument: Instrument,
    pub location: Location,
    pub amount: Money,
}

/// Result of one pass: what it claimed and what it leaves to the next pass.
#[derive(Debug, Clone, PartialEq)]
pub struct PassOutcome {
    pub claims: Vec<Claim>,
    pub remainder: Money,
}

impl PassOutcome {
    fn untouched(remaining: Money) -> Self {
        PassOutcome {
            claims: Vec::new(),
            remainder: remaining,
        }
    }

    fn claimed(&self) -> Money {
        self.claims.iter().map(|c| c.amount).sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnallocatedReason {
    /// No jurisdiction applies an instrument that reaches the deficit
    NoAdopter,
    /// The parent passes the statutory-rate UTPR safe harbor
    SafeHarbor,
    /// Key shares of group jurisdictions that do not apply the UTPR
    NonAdopterShare,
    /// The group has no presence in any eligible jurisdiction
    NoPresence,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WaterfallOutcome {
    pub claims: Vec<Claim>,
    pub unallocated: Option<(Money, UnallocatedReason)>,
}

impl WaterfallOutcome {
    pub fn allocated(&self) -> Money {
        self.claims.iter().map(|c| c.amount).sum()
    }
}

/// Parent-level inputs shared by every unit of one parent.
#[derive(Debug, Clone, Copy)]
pub struct WaterfallContext<'a> {
    pub config: &'a AllocationScenarioConfig,
    pub key: &'a AllocationKey,
    /// The parent's statutory rate meets the UTPR safe-harbor threshold
    pub safe_harbor: bool,
}

impl WaterfallContext<'_> {
    pub fn exempt_from_utpr(&self, domestic: bool) -> bool {
        self.safe_harbor && (domestic || self.config.utpr_safe_harbor_incl_foreign_profits)
    }
}

// ---------------------------------------------------------------------------
// Passes
// ---------------------------------------------------------------------------

/// The source jurisdiction collects its own top-up first.
pub fn qdmtt_pass(unit: &DeficitUnit, remaining: Money, ctx: &WaterfallContext) -> PassOutcome {
    let qdmtt = ctx.config.coverage(Instrument::Qdmtt);
    if remaining <= Decimal::ZERO
        || unit.aggregate_partner
        || !qdmtt.reaches(unit.partner, unit.domestic)
    {
        return PassOutcome::untouched(remaining);
    }
    PassOutcome {
        claims: vec![Claim {
            collector: unit.partner.to_string(),
            instrument: Instrument::Qdmtt,
            location: unit.location(),
            amount: remaining,
        }],
        remainder: Decimal::ZERO,
    }
}

/// The parent collects whatever the QDMTT left.
pub fn iir_pass(unit: &DeficitUnit, remaining: Money, ctx: &WaterfallContext) -> PassOutcome {
    let iir = ctx.config.coverage(Instrument::Iir);
    if remaining <= Decimal::ZERO || !iir.reaches(unit.parent, unit.domestic) {
        return PassOutcome::untouched(remaining);
    }
    PassOutcome {
        claims: vec![Claim {
            collector: unit.parent.to_string(),
            instrument: Instrument::Iir,
            location: unit.location(),
            amount: remaining,
        }],
        remainder: Decimal::ZERO,
    }
}

/// UTPR adopters with presence in the group share the rest by key.
///
/// A deficit domestic to the parent counts as domestic only for the parent
/// collecting on it, so foreign adopters excluding domestic deficits still reach it.
pub fn utpr_pass(
    unit: &DeficitUnit,
    remaining: Money,
    ctx: &WaterfallContext,
) -> (PassOutcome, Option<UnallocatedReason>) {
    if remaining <= Decimal::ZERO {
        return (PassOutcome::untouched(remaining), None);
    }
    let utpr = ctx.config.coverage(Instrument::Utpr);
    if utpr.is_empty() {
        return (PassOutcome::untouched(remaining), Some(UnallocatedReason::NoAdopter));
    }
    if ctx.exempt_from_utpr(unit.domestic) {
        return (PassOutcome::untouched(remaining), Some(UnallocatedReason::SafeHarbor));
    }
    if ctx.key.is_empty() {
        return (PassOutcome::untouched(remaining), Some(UnallocatedReason::NoPresence));
    }

    let claims: Vec<Claim> = ctx
        .key
        .shares
        .iter()
        .filter(|(country, _)| utpr.reaches(country, unit.domestic && *country == unit.parent))
        .map(|(country, share)| Claim {
            collector: country.clone(),
            instrument: Instrument::Utpr,
            location: unit.location(),
            amount: remaining * *share,
        })
        .collect();
    if claims.is_empty() {
        return (PassOutcome::untouched(remaining), Some(UnallocatedReason::NoAdopter));
    }

    let mut outcome = PassOutcome {
        claims,
        remainder: Decimal::ZERO,
    };
    outcome.remainder = remaining - outcome.claimed();
    (outcome, Some(UnallocatedReason::NonAdopterShare))
}

type Pass = fn(&DeficitUnit, Money, &WaterfallContext) -> PassOutcome;

/// QDMTT, then IIR, then UTPR on a running remainder.
pub fn run_waterfall(unit: &DeficitUnit, ctx: &WaterfallContext) -> WaterfallOutcome {
    let mut claims = Vec::new();
    let mut remaining = unit.amount.max(Decimal::ZERO);

    let passes: [Pass; 2] = [qdmtt_pass, iir_pass];
    for pass in passes {
        let outcome = pass(unit, remaining, ctx);
        claims.extend(outcome.claims);
        remaining = outcome.remainder;
    }

    let (outcome, reason) = utpr_pass(unit, remaining, ctx);
    tracing::trace!(
        parent = unit.parent,
        partner = unit.partner,
        claims = claims.len() + outcome.claims.len(),
        remainder = %outcome.remainder,
        "waterfall"
    );
    claims.extend(outcome.claims);
    remaining = outcome.remainder;

    let unallocated = match reason {
        Some(reason) if remaining > Decimal::ZERO => Some((remaining, reason)),
        _ => None,
    };
    WaterfallOutcome {
        claims,
        unallocated,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn unit<'a>(parent: &'a str, partner: &'a str, amount: Money) -> DeficitUnit<'a> {
        DeficitUnit {
            parent,
            partner,
            domestic: parent == partner,
            aggregate_partner: false,
            amount,
        }
    }

    fn key(shares: &[(&str, Decimal)]) -> AllocationKey {
        AllocationKey {
            shares: shares.iter().map(|(c, s)| (c.to_string(), *s)).collect(),
        }
    }

    fn run(config: &AllocationScenarioConfig, key: &AllocationKey, u: &DeficitUnit) -> WaterfallOutcome {
        let ctx = WaterfallContext {
            config,
            key,
            safe_harbor: false,
        };
        run_waterfall(u, &ctx)
    }

    #[test]
    fn test_qdmtt_takes_priority_over_iir() {
        let config = AllocationScenarioConfig::new(dec!(0.15))
            .with_qdmtt(Vec::<String>::new(), ["IRL"])
            .with_iir(["USA"], Vec::<String>::new());
        let out = run(&config, &AllocationKey::default(), &unit("USA", "IRL", dec!(40)));
        assert_eq!(out.claims.len(), 1);
        assert_eq!(out.claims[0].collector, "IRL");
        assert_eq!(out.claims[0].instrument, Instrument::Qdmtt);
        assert_eq!(out.unallocated, None);
    }

    #[test]
    fn test_excl_domestic_qdmtt_skips_domestic_deficit() {
        let config = AllocationScenarioConfig::new(dec!(0.15))
            .with_qdmtt(Vec::<String>::new(), ["FRA"])
            .with_iir(["FRA"], Vec::<String>::new());
        let out = run(&config, &AllocationKey::default(), &unit("FRA", "FRA", dec!(50)));
        assert_eq!(out.claims[0].instrument, Instrument::Iir);
        assert_eq!(out.claims[0].location, Location::Domestic);
    }

    #[test]
    fn test_aggregate_partner_never_collects_qdmtt() {
        let config = AllocationScenarioConfig::new(dec!(0.15))
            .with_qdmtt(["FRA"], Vec::<String>::new());
        let mut u = unit("DEU", "EUROP", dec!(10));
        u.aggregate_partner = true;
        let out = run(&config, &AllocationKey::default(), &u);
        assert!(out.claims.is_empty());
        assert_eq!(out.unallocated, Some((dec!(10), UnallocatedReason::NoAdopter)));
    }

    #[test]
    fn test_utpr_splits_by_key_and_leaves_non_adopter_share() {
        let config = AllocationScenarioConfig::new(dec!(0.15))
            .with_utpr(["FRA", "DEU"], Vec::<String>::new());
        let k = key(&[("FRA", dec!(0.5)), ("DEU", dec!(0.25)), ("USA", dec!(0.25))]);
        let out = run(&config, &k, &unit("USA", "BMU", dec!(100)));
        assert_eq!(out.allocated(), dec!(75));
        assert_eq!(out.unallocated, Some((dec!(25), UnallocatedReason::NonAdopterShare)));
    }

    #[test]
    fn test_utpr_excl_domestic_parent_skips_own_domestic_deficit() {
        let config = AllocationScenarioConfig::new(dec!(0.15))
            .with_utpr(["DEU"], ["USA"]);
        let k = key(&[("DEU", dec!(0.5)), ("USA", dec!(0.5))]);
        let out = run(&config, &k, &unit("USA", "USA", dec!(10)));
        assert_eq!(out.claims.len(), 1);
        assert_eq!(out.claims[0].collector, "DEU");
        assert_eq!(out.claims[0].amount, dec!(5));
        assert_eq!(out.unallocated, Some((dec!(5), UnallocatedReason::NonAdopterShare)));
    }

    #[test]
    fn test_safe_harbor_blocks_utpr() {
        let config = AllocationScenarioConfig::new(dec!(0.15))
            .with_utpr(["FRA"], Vec::<String>::new())
            .with_safe_harbor(dec!(0.2), false);
        let k = key(&[("FRA", dec!(1))]);
        let ctx = WaterfallContext {
            config: &config,
            key: &k,
            safe_harbor: true,
        };
        let domestic = run_waterfall(&unit("USA", "USA", dec!(10)), &ctx);
        assert_eq!(domestic.unallocated, Some((dec!(10), UnallocatedReason::SafeHarbor)));
        let foreign = run_waterfall(&unit("USA", "BMU", dec!(10)), &ctx);
        assert_eq!(foreign.allocated(), dec!(10));
    }

    #[test]
    fn test_empty_key_is_no_presence() {
        let config = AllocationScenarioConfig::new(dec!(0.15))
            .with_utpr(["FRA"], Vec::<String>::new());
        let out = run(&config, &AllocationKey::default(), &unit("USA", "BMU", dec!(3)));
        assert_eq!(out.unallocated, Some((dec!(3), UnallocatedReason::NoPresence)));
    }

    #[test]
    fn test_zero_deficit_yields_nothing() {
        let config = AllocationScenarioConfig::new(dec!(0.15)).with_iir(["FRA"], Vec::<String>::new());
        let out = run(&config, &AllocationKey::default(), &unit("FRA", "FRA", dec!(0)));
        assert!(out.claims.is_empty());
        assert_eq!(out.unallocated, None);
    }
}
