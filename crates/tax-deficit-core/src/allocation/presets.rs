//! Ready-made cooperation scenarios.

use std::collections::BTreeSet;

use super::config::AllocationScenarioConfig;
use crate::reference::classification::{is_aggregate_code, CountryClassification};
use crate::types::Rate;

fn jurisdictions(codes: BTreeSet<String>) -> BTreeSet<String> {
    codes.into_iter().filter(|c| !is_aggregate_code(c)).collect()
}

/// EU-27 headquarters apply the IIR including domestic deficits, every other
/// country applies it to foreign deficits only.
pub fn headquarter(
    classification: &CountryClassification,
    minimum_rate: Rate,
) -> AllocationScenarioConfig {
    AllocationScenarioConfig::new(minimum_rate).with_iir(
        jurisdictions(classification.eu27_codes()),
        jurisdictions(classification.non_eu27_codes()),
    )
}

/// Every country applies a QDMTT; EU-27 members include domestic deficits.
pub fn qdmtt_scenario(
    classification: &CountryClassification,
    minimum_rate: Rate,
) -> AllocationScenarioConfig {
    AllocationScenarioConfig::new(minimum_rate).with_qdmtt(
        jurisdictions(classification.eu27_codes()),
        jurisdictions(classification.non_eu27_codes()),
    )
}

/// One country applies both the IIR and the UTPR, alone.
pub fn unilateral(country: &str, minimum_rate: Rate) -> AllocationScenarioConfig {
    AllocationScenarioConfig::new(minimum_rate)
        .with_iir([country], Vec::<String>::new())
        .with_utpr([country], Vec::<String>::new())
}

pub fn partial_cooperation<I, S>(
    countries: I,
    among: bool,
    minimum_rate: Rate,
) -> AllocationScenarioConfig
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let club: BTreeSet<String> = countries.into_iter().map(Into::into).collect();
    AllocationScenarioConfig::new(minimum_rate)
        .with_iir(club.clone(), Vec::<String>::new())
        .with_utpr(club, Vec::<String>::new())
        .among_implementing(among)
}

/// The UTPR alone, applied by every known country.
pub fn full_apportionment(
    classification: &CountryClassification,
    minimum_rate: Rate,
) -> AllocationScenarioConfig {
    AllocationScenarioConfig::new(minimum_rate)
        .with_utpr(jurisdictions(classification.all_codes()), Vec::<String>::new())
}
