mod common;

use pretty_assertions::assert_eq;
use rust_decimal_macros::dec;

use common::*;
use tax_deficit_core::deficit::computer::TaxDeficitRow;
use tax_deficit_core::deficit::impact::assess_carve_out_impact;
use tax_deficit_core::deficit::params::SwedenTreatment;
use tax_deficit_core::deficit::{
    compute_tax_deficits, prepare_panel, tabulate_deficits, CarveOutSettings, DeficitParams,
    MinimumTax,
};
use tax_deficit_core::reference::classification::{CountryInfo, TWZ_HAVENS_CODE, TWZ_NON_HAVENS_CODE};
use tax_deficit_core::reference::twz::TwzEntry;
use tax_deficit_core::{DataSource, Origin, TaxDeficitError};

fn find<'a>(rows: &'a [TaxDeficitRow], parent: &str, partner: &str) -> &'a TaxDeficitRow {
    rows.iter()
        .find(|r| r.parent_code == parent && r.partner_code == partner)
        .unwrap_or_else(|| panic!("no row {parent} -> {partner}"))
}

#[test]
fn test_fra_bmu_concrete_deficits() {
    let out =
        compute_tax_deficits(&fra_bmu_reference(), &DeficitParams::for_year(YEAR), dec!(0.15))
            .unwrap();
    let table = out.result;
    assert_eq!(find(&table.rows, "FRA", "FRA").tax_deficit, dec!(50));
    assert_eq!(find(&table.rows, "FRA", "BMU").tax_deficit, dec!(75));
    assert_eq!(find(&table.rows, "FRA", "BMU").origin, Origin::TaxHavenForeign);
    assert_eq!(table.parent_total("FRA"), dec!(125));
}

#[test]
fn test_fixture_parent_totals() {
    let out = compute_tax_deficits(&reference(), &DeficitParams::for_year(YEAR), dec!(0.15)).unwrap();
    let table = out.result;
    assert_eq!(table.parent_total("FRA"), dec!(175));
    assert_eq!(table.parent_total("DEU"), dec!(175));
    assert_eq!(table.parent_total("USA"), dec!(516));
    assert_eq!(table.parent_total("JPN"), dec!(90));

    let jpn_amer = find(&table.rows, "JPN", "AMER");
    assert!(jpn_amer.aggregate_partner);
    assert_eq!(jpn_amer.origin, Origin::UnclassifiedForeign);
}

#[test]
fn test_parent_selection_keeps_cbcr_and_twz_parents() {
    let out = compute_tax_deficits(&reference(), &DeficitParams::for_year(YEAR), dec!(0.15)).unwrap();
    let fra = out.result.clone().only_parent("FRA").unwrap();
    assert_eq!(fra.rows.len(), 5);
    assert_eq!(fra.total(), dec!(175));
    let nor = out.result.clone().only_parent("NOR").unwrap();
    assert!(nor.rows.iter().all(|r| r.source == DataSource::Twz));

    match out.result.only_parent("ZZZ") {
        Err(TaxDeficitError::MissingData { dataset, key }) => {
            assert_eq!(dataset, "CbCR panel");
            assert_eq!(key, "ZZZ in 2017");
        }
        other => panic!("expected missing data, got {other:?}"),
    }
}

#[test]
fn test_twz_only_parent_gets_three_rows() {
    let prepared = prepared();
    let table = tabulate_deficits(&prepared, &MinimumTax::new(dec!(0.15), dec!(0)).unwrap());
    let nor: Vec<_> = table.rows_of("NOR").collect();
    assert_eq!(nor.len(), 3);
    assert!(nor.iter().all(|r| r.source == DataSource::Twz));

    assert_eq!(find(&table.rows, "NOR", "NOR").tax_deficit, dec!(60));
    assert_eq!(find(&table.rows, "NOR", TWZ_HAVENS_CODE).tax_deficit, dec!(15));

    // 45 at the 25% reference rate, x 2/3 imputation ratio, x 95/220 rescaling
    let non_haven = find(&table.rows, "NOR", TWZ_NON_HAVENS_CODE).tax_deficit;
    assert_close(non_haven, dec!(30) * dec!(95) / dec!(220));
}

#[test]
fn test_twz_upgrades_cbcr_haven_deficit() {
    let twz = |profits| TwzEntry {
        year: YEAR,
        country_code: "FRA".into(),
        country_name: "France".into(),
        profits_in_tax_havens: profits,
        domestic_profits: None,
        domestic_etr: None,
    };
    let tax = MinimumTax::new(dec!(0.15), dec!(0)).unwrap();

    let below = builder().twz_entry(twz(dec!(1000))).build().unwrap();
    let prepared = prepare_panel(&below, &DeficitParams::for_year(YEAR)).unwrap();
    let table = tabulate_deficits(&prepared, &tax);
    assert!(table.rows_of("FRA").all(|r| r.partner_code != TWZ_HAVENS_CODE));
    assert_eq!(table.parent_total("FRA"), dec!(175));

    let above = builder().twz_entry(twz(dec!(2000))).build().unwrap();
    let prepared = prepare_panel(&above, &DeficitParams::for_year(YEAR)).unwrap();
    let table = tabulate_deficits(&prepared, &tax);
    let upgrade = find(&table.rows, "FRA", TWZ_HAVENS_CODE);
    assert_eq!(upgrade.tax_deficit, dec!(25));
    assert!(upgrade.aggregate_partner);
    assert_eq!(table.parent_total("FRA"), dec!(200));
}

#[test]
fn test_twz_can_be_switched_off() {
    let mut params = DeficitParams::for_year(YEAR);
    params.include_twz = false;
    let out = compute_tax_deficits(&reference(), &params, dec!(0.15)).unwrap();
    assert_eq!(out.result.rows_of("NOR").count(), 0);
}

#[test]
fn test_deficit_rises_with_rate() {
    let prepared = prepared();
    let low = tabulate_deficits(&prepared, &MinimumTax::new(dec!(0.15), dec!(0)).unwrap());
    let high = tabulate_deficits(&prepared, &MinimumTax::new(dec!(0.25), dec!(0)).unwrap());
    assert!(high.total() > low.total());
    for (l, h) in low.rows.iter().zip(high.rows.iter()) {
        assert_eq!(l.partner_code, h.partner_code);
        assert!(h.tax_deficit >= l.tax_deficit, "{} -> {}", l.parent_code, l.partner_code);
    }
}

#[test]
fn test_etr_increment_shifts_every_etr() {
    let prepared = prepared();
    let table = tabulate_deficits(&prepared, &MinimumTax::new(dec!(0.15), dec!(0.02)).unwrap());
    assert_eq!(find(&table.rows, "FRA", "FRA").tax_deficit, dec!(30));
    assert_eq!(find(&table.rows, "FRA", "BMU").tax_deficit, dec!(65));
    assert_eq!(find(&table.rows, "FRA", "USA").tax_deficit, dec!(0));
    assert_eq!(table.parent_total("FRA"), dec!(133));
}

#[test]
fn test_first_year_carve_outs_reduce_the_base() {
    let mut params = DeficitParams::for_year(YEAR);
    params.carve_outs = CarveOutSettings::first_year();
    let out = compute_tax_deficits(&reference(), &params, dec!(0.15)).unwrap();
    let row = find(&out.result.rows, "FRA", "FRA");
    // 100 x 0.04 x 1.2 x 10% payroll + 500 x 8% assets
    assert_eq!(row.carve_out, dec!(40.48));
    assert_eq!(row.profit_base, dec!(959.52));
    assert_eq!(row.tax_deficit, dec!(47.976));
}

#[test]
fn test_carve_out_impact_assessment() {
    let mut params = DeficitParams::for_year(YEAR);
    params.carve_outs = CarveOutSettings::long_term();
    let out = assess_carve_out_impact(&reference(), &params, dec!(0.15)).unwrap();
    let fra = out.result.iter().find(|r| r.parent_code == "FRA").unwrap();
    assert_eq!(fra.without_carve_outs.total, dec!(175));
    assert!(fra.with_carve_outs.total < fra.without_carve_outs.total);
    assert!(fra.change_pct.unwrap() < dec!(0));

    let incomplete = DeficitParams::for_year(YEAR);
    assert!(matches!(
        assess_carve_out_impact(&reference(), &incomplete, dec!(0.15)),
        Err(TaxDeficitError::Configuration(_))
    ));
}

#[test]
fn test_carve_outs_without_rates_fail_before_computing() {
    let mut params = DeficitParams::for_year(YEAR);
    params.carve_outs.enabled = true;
    assert!(matches!(
        compute_tax_deficits(&reference(), &params, dec!(0.15)),
        Err(TaxDeficitError::Configuration(_))
    ));
}

#[test]
fn test_de_minimis_rows_are_kept_but_zeroed() {
    let reference = builder()
        .record(record("NLD", "NLD", dec!(3000000000), dec!(0), dec!(9000000000), dec!(0), dec!(0)))
        .build()
        .unwrap();
    let mut params = DeficitParams::for_year(YEAR);
    params.de_minimis_exclusion = true;
    let out = compute_tax_deficits(&reference, &params, dec!(0.15)).unwrap();

    let small = find(&out.result.rows, "FRA", "FRA");
    assert!(small.de_minimis);
    assert_eq!(small.tax_deficit, dec!(0));

    let large = find(&out.result.rows, "NLD", "NLD");
    assert!(!large.de_minimis);
    assert_eq!(large.tax_deficit, dec!(450000000));
}

#[test]
fn test_sweden_exclusion_leaves_twz_statistics() {
    let reference = builder()
        .country(CountryInfo::new("SWE", "Sweden").in_region("Europe"))
        .statutory_rate(YEAR, "SWE", dec!(0.22))
        .record(record("SWE", "SWE", dec!(1000), dec!(100), dec!(800), dec!(100), dec!(10)))
        .twz_entry(TwzEntry {
            year: YEAR,
            country_code: "SWE".into(),
            country_name: "Sweden".into(),
            profits_in_tax_havens: dec!(100),
            domestic_profits: Some(dec!(500)),
            domestic_etr: Some(dec!(0.10)),
        })
        .build()
        .unwrap();

    let adjusted = compute_tax_deficits(&reference, &DeficitParams::for_year(YEAR), dec!(0.15)).unwrap();
    let swe = find(&adjusted.result.rows, "SWE", "SWE");
    assert_eq!(swe.source, DataSource::Cbcr);
    assert_eq!(swe.profit_before_tax, dec!(1000) * dec!(246) / dec!(512));

    let mut params = DeficitParams::for_year(YEAR);
    params.treatments.sweden = SwedenTreatment::Exclude;
    let excluded = compute_tax_deficits(&reference, &params, dec!(0.15)).unwrap();
    let swe = find(&excluded.result.rows, "SWE", "SWE");
    assert_eq!(swe.source, DataSource::Twz);
    assert_eq!(swe.tax_deficit, dec!(25));
}

#[test]
fn test_missing_year_is_a_data_error() {
    let err = compute_tax_deficits(&reference(), &DeficitParams::for_year(2019), dec!(0.15))
        .unwrap_err();
    assert!(matches!(err, TaxDeficitError::MissingData { .. }));
}

#[test]
fn test_rate_outside_unit_interval_rejected() {
    for rate in [dec!(0), dec!(1.5), dec!(-0.1)] {
        assert!(matches!(
            compute_tax_deficits(&reference(), &DeficitParams::for_year(YEAR), rate),
            Err(TaxDeficitError::InvalidInput { .. })
        ));
    }
}
