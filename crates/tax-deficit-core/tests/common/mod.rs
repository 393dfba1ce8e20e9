//! Synthetic multi-country panel shared by the integration tests.
#![allow(dead_code)]

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use tax_deficit_core::deficit::{prepare_panel, DeficitParams, PreparedPanel};
use tax_deficit_core::reference::classification::CountryInfo;
use tax_deficit_core::reference::panel::PanelRecord;
use tax_deficit_core::reference::series::GrowthEntry;
use tax_deficit_core::reference::twz::TwzEntry;
use tax_deficit_core::reference::{ReferenceData, ReferenceDataBuilder};

pub const YEAR: i32 = 2017;

/// Parents reporting at least this many partners count as granular in the fixture.
pub const FIXTURE_BREAKDOWN: usize = 3;

pub fn record(
    parent: &str,
    partner: &str,
    profit: Decimal,
    tax: Decimal,
    upr: Decimal,
    assets: Decimal,
    employees: Decimal,
) -> PanelRecord {
    PanelRecord {
        year: YEAR,
        parent_code: parent.to_string(),
        parent_name: parent.to_string(),
        partner_code: partner.to_string(),
        partner_name: partner.to_string(),
        profit_before_tax: profit,
        adjusted_profit_before_tax: None,
        tax_paid: Some(tax),
        tax_accrued: None,
        total_revenues: Some(upr * dec!(1.25)),
        unrelated_party_revenues: Some(upr),
        tangible_assets: Some(assets),
        employees: Some(employees),
    }
}

pub fn countries(builder: ReferenceDataBuilder) -> ReferenceDataBuilder {
    builder
        .country(CountryInfo::new("FRA", "France").in_region("Europe").with_income_group("High"))
        .country(CountryInfo::new("DEU", "Germany").in_region("Europe").with_income_group("High"))
        .country(CountryInfo::new("NLD", "Netherlands").in_region("Europe").with_income_group("High"))
        .country(CountryInfo::new("IRL", "Ireland").in_region("Europe").with_income_group("High"))
        .country(CountryInfo::new("NOR", "Norway").in_region("Europe").with_income_group("High"))
        .country(CountryInfo::new("USA", "United States").in_region("Americas").with_income_group("High"))
        .country(CountryInfo::new("JPN", "Japan").in_region("Asia").with_income_group("High"))
        .country(
            CountryInfo::new("BMU", "Bermuda")
                .in_region("Americas")
                .with_income_group("High")
                .haven(),
        )
}

pub fn growth() -> GrowthEntry {
    GrowthEntry {
        year: YEAR,
        usd_to_eur: dec!(0.885),
        multiplier_2021: dec!(1.2),
        world_usd_growth: Some(dec!(1.05)),
    }
}

pub fn statutory_rates(builder: ReferenceDataBuilder) -> ReferenceDataBuilder {
    [
        ("FRA", dec!(0.33)),
        ("DEU", dec!(0.30)),
        ("NLD", dec!(0.25)),
        ("IRL", dec!(0.125)),
        ("NOR", dec!(0.24)),
        ("USA", dec!(0.35)),
        ("JPN", dec!(0.30)),
        ("BMU", dec!(0)),
    ]
    .into_iter()
    .fold(builder, |b, (code, rate)| b.statutory_rate(YEAR, code, rate))
}

pub fn mean_wages(builder: ReferenceDataBuilder) -> ReferenceDataBuilder {
    [
        ("FRA", dec!(0.04)),
        ("DEU", dec!(0.045)),
        ("NLD", dec!(0.05)),
        ("IRL", dec!(0.05)),
        ("USA", dec!(0.06)),
        ("JPN", dec!(0.04)),
        ("BMU", dec!(0.07)),
    ]
    .into_iter()
    .fold(builder, |b, (code, wage)| b.mean_wage(YEAR, code, wage))
}

/// Three granular parents (FRA, DEU, USA), a sparse one (JPN) and a TWZ-only one (NOR).
pub fn builder() -> ReferenceDataBuilder {
    let b = mean_wages(statutory_rates(countries(ReferenceData::builder())))
        .growth(growth())
        .twz_entry(TwzEntry {
            year: YEAR,
            country_code: "NOR".into(),
            country_name: "Norway".into(),
            profits_in_tax_havens: dec!(300),
            domestic_profits: Some(dec!(2000)),
            domestic_etr: Some(dec!(0.12)),
        });
    [
        record("FRA", "FRA", dec!(1000), dec!(100), dec!(800), dec!(500), dec!(100)),
        record("FRA", "DEU", dec!(200), dec!(20), dec!(300), dec!(200), dec!(40)),
        record("FRA", "BMU", dec!(500), dec!(0), dec!(50), dec!(10), dec!(2)),
        record("FRA", "USA", dec!(300), dec!(60), dec!(400), dec!(150), dec!(30)),
        record("FRA", "IRL", dec!(400), dec!(20), dec!(100), dec!(40), dec!(10)),
        record("DEU", "DEU", dec!(2000), dec!(200), dec!(1500), dec!(900), dec!(200)),
        record("DEU", "FRA", dec!(100), dec!(5), dec!(200), dec!(80), dec!(20)),
        record("DEU", "IRL", dec!(300), dec!(15), dec!(120), dec!(30), dec!(8)),
        record("DEU", "BMU", dec!(200), dec!(0), dec!(20), dec!(5), dec!(1)),
        record("DEU", "USA", dec!(100), dec!(10), dec!(250), dec!(100), dec!(25)),
        record("USA", "USA", dec!(5000), dec!(500), dec!(6000), dec!(3000), dec!(500)),
        record("USA", "IRL", dec!(1000), dec!(30), dec!(400), dec!(100), dec!(30)),
        record("USA", "BMU", dec!(800), dec!(8), dec!(60), dec!(10), dec!(3)),
        record("USA", "FRA", dec!(200), dec!(10), dec!(300), dec!(90), dec!(20)),
        record("USA", "DEU", dec!(150), dec!(30), dec!(280), dec!(70), dec!(15)),
        record("USA", "NLD", dec!(100), dec!(1), dec!(90), dec!(20), dec!(5)),
        record("JPN", "JPN", dec!(1000), dec!(100), dec!(900), dec!(400), dec!(80)),
        record("JPN", "AMER", dec!(400), dec!(20), dec!(200), dec!(60), dec!(10)),
    ]
    .into_iter()
    .fold(b, |b, r| b.record(r))
}

pub fn reference() -> ReferenceData {
    builder().build().expect("fixture reference data")
}

pub fn prepared() -> PreparedPanel {
    prepare_panel(&reference(), &DeficitParams::for_year(YEAR)).expect("fixture panel")
}

/// FRA earning 1000 at home at 10% and 500 in Bermuda untaxed.
pub fn fra_bmu_reference() -> ReferenceData {
    ReferenceData::builder()
        .country(CountryInfo::new("FRA", "France"))
        .country(CountryInfo::new("BMU", "Bermuda").haven())
        .statutory_rate(YEAR, "FRA", dec!(0.33))
        .statutory_rate(YEAR, "BMU", dec!(0))
        .growth(growth())
        .record(record("FRA", "FRA", dec!(1000), dec!(100), dec!(800), dec!(500), dec!(100)))
        .record(record("FRA", "BMU", dec!(500), dec!(0), dec!(50), dec!(10), dec!(2)))
        .build()
        .expect("FRA/BMU reference data")
}

pub fn assert_close(actual: Decimal, expected: Decimal) {
    let diff = (actual - expected).abs();
    assert!(
        diff <= dec!(0.0001),
        "expected {expected}, got {actual} (difference {diff})"
    );
}
