mod common;

use pretty_assertions::assert_eq;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use common::*;
use tax_deficit_core::allocation::presets::{full_apportionment, headquarter, qdmtt_scenario};
use tax_deficit_core::allocation::{
    allocate_bilateral_tax_deficits, AllocationRun, AllocationScenarioConfig, AllocationTable,
    Instrument, Location, UnallocatedReason,
};
use tax_deficit_core::deficit::{prepare_panel, DeficitParams};
use tax_deficit_core::TaxDeficitError;

fn ledger_of(table: AllocationTable) -> tax_deficit_core::allocation::BilateralLedger {
    match table {
        AllocationTable::Bilateral(ledger) => ledger,
        AllocationTable::Aggregate(_) => panic!("expected bilateral details"),
    }
}

#[test]
fn test_fra_collects_its_whole_deficit_through_iir() {
    let prepared = prepare_panel(&fra_bmu_reference(), &DeficitParams::for_year(YEAR)).unwrap();
    let config = AllocationScenarioConfig::new(dec!(0.15))
        .with_iir(["FRA"], Vec::<String>::new())
        .with_details(true);
    let ledger = ledger_of(allocate_bilateral_tax_deficits(&prepared, &config).unwrap().result);

    assert_eq!(ledger.records.len(), 2);
    assert_eq!(ledger.collected_by("FRA", Instrument::Iir, Location::Domestic), dec!(50));
    assert_eq!(ledger.collected_by("FRA", Instrument::Iir, Location::Foreign), dec!(75));
    let totals = ledger.country_totals();
    assert_eq!(totals.len(), 1);
    assert_eq!(totals["FRA"], dec!(125));
    assert!(ledger.unallocated.is_empty());
}

#[test]
fn test_detail_flag_selects_table_shape() {
    let prepared = prepare_panel(&fra_bmu_reference(), &DeficitParams::for_year(YEAR)).unwrap();
    let config = AllocationScenarioConfig::new(dec!(0.15)).with_iir(["FRA"], Vec::<String>::new());
    let out = allocate_bilateral_tax_deficits(&prepared, &config).unwrap();
    match out.result {
        AllocationTable::Aggregate(agg) => {
            assert_eq!(agg.countries.len(), 1);
            assert_eq!(agg.get("FRA"), dec!(125));
        }
        AllocationTable::Bilateral(_) => panic!("details were not requested"),
    }
}

#[test]
fn test_headquarter_scenario_excludes_non_eu_domestic_deficits() {
    let prepared = prepared();
    let config = headquarter(&prepared.classification, dec!(0.15))
        .with_minimum_breakdown(FIXTURE_BREAKDOWN)
        .with_details(true);
    let ledger = ledger_of(allocate_bilateral_tax_deficits(&prepared, &config).unwrap().result);
    let totals = ledger.country_totals();

    assert_eq!(totals["FRA"], dec!(175));
    assert_eq!(totals["DEU"], dec!(175));
    assert_eq!(totals["USA"], dec!(266));
    assert_eq!(totals["JPN"], dec!(40));
    assert_eq!(ledger.collected_by("USA", Instrument::Iir, Location::Domestic), dec!(0));

    let usa_domestic = ledger
        .unallocated
        .iter()
        .find(|u| u.parent_code == "USA" && u.partner_code == "USA")
        .unwrap();
    assert_eq!(usa_domestic.amount, dec!(250));
    assert_eq!(usa_domestic.reason, UnallocatedReason::NoAdopter);
}

#[test]
fn test_qdmtt_scenario_collects_at_source() {
    let prepared = prepared();
    let config = qdmtt_scenario(&prepared.classification, dec!(0.15)).with_details(true);
    let ledger = ledger_of(allocate_bilateral_tax_deficits(&prepared, &config).unwrap().result);
    let totals = ledger.country_totals();

    assert_eq!(totals["FRA"], dec!(80));
    assert_eq!(totals["DEU"], dec!(110));
    assert_eq!(totals["IRL"], dec!(190));
    assert_eq!(totals["NLD"], dec!(14));
    assert_eq!(totals["BMU"], dec!(217));
    assert_eq!(totals["USA"], dec!(5));
    assert!(!totals.contains_key("JPN"));
    assert!(ledger
        .records
        .iter()
        .all(|r| r.instrument == Instrument::Qdmtt));
}

#[test]
fn test_qdmtt_has_priority_over_iir() {
    let prepared = prepared();
    let config = AllocationScenarioConfig::new(dec!(0.15))
        .with_qdmtt(["IRL"], Vec::<String>::new())
        .with_iir(["USA"], Vec::<String>::new())
        .with_details(true);
    let ledger = ledger_of(allocate_bilateral_tax_deficits(&prepared, &config).unwrap().result);
    assert_eq!(ledger.collected_by("IRL", Instrument::Qdmtt, Location::Foreign), dec!(190));
    // USA keeps everything except the Irish deficit of its own groups
    assert_eq!(ledger.country_totals()["USA"], dec!(516) - dec!(120));
}

#[test]
fn test_every_parent_conserves_its_deficit() {
    let prepared = prepared();
    let config = AllocationScenarioConfig::new(dec!(0.15))
        .with_qdmtt(["IRL"], ["BMU"])
        .with_iir(["FRA"], ["USA"])
        .with_utpr(["DEU", "NLD"], Vec::<String>::new())
        .with_weights(dec!(0.5), dec!(0.25), dec!(0.25))
        .with_minimum_breakdown(FIXTURE_BREAKDOWN);
    let run = AllocationRun::new(&prepared, &config).unwrap();
    let ledger = run.bilateral();
    for parent in &ledger.parents {
        assert_close(parent.allocated + parent.unallocated, parent.tax_deficit);
        let records: Decimal = ledger.records_of(&parent.parent_code).map(|r| r.allocated).sum();
        assert_close(records, parent.allocated);
    }
    assert_close(
        ledger.total_allocated() + ledger.total_unallocated(),
        run.deficits().total(),
    );
}

#[test]
fn test_detailed_and_aggregate_totals_agree() {
    let prepared = prepared();
    for among in [false, true] {
        let config = AllocationScenarioConfig::new(dec!(0.15))
            .with_iir(["FRA", "DEU"], Vec::<String>::new())
            .with_utpr(["FRA", "DEU", "IRL"], Vec::<String>::new())
            .among_implementing(among)
            .with_minimum_breakdown(FIXTURE_BREAKDOWN);
        let run = AllocationRun::new(&prepared, &config).unwrap();
        let detailed = run.bilateral().country_totals();
        let aggregate = run.aggregate();
        for country in ["FRA", "DEU", "IRL"] {
            assert_close(
                detailed.get(country).copied().unwrap_or_default(),
                aggregate.get(country),
            );
        }
        assert_close(run.bilateral().total_unallocated(), aggregate.unallocated);
    }
}

#[test]
fn test_full_apportionment_allocates_everything() {
    let prepared = prepared();
    let config = full_apportionment(&prepared.classification, dec!(0.15))
        .with_minimum_breakdown(FIXTURE_BREAKDOWN);
    let run = AllocationRun::new(&prepared, &config).unwrap();
    let ledger = run.bilateral();
    assert_close(ledger.total_allocated(), run.deficits().total());
    assert!(ledger.unallocated.iter().all(|u| u.amount < dec!(0.0000001)));
    assert!(ledger.records.iter().all(|r| r.instrument == Instrument::Utpr));
}

#[test]
fn test_sparse_and_twz_parents_use_proxy_presence() {
    use tax_deficit_core::allocation::keys::PresenceBasis;

    let prepared = prepared();
    let config = full_apportionment(&prepared.classification, dec!(0.15))
        .with_minimum_breakdown(FIXTURE_BREAKDOWN);
    let run = AllocationRun::new(&prepared, &config).unwrap();

    let jpn = run.presence().group("JPN").unwrap();
    assert_eq!(jpn.basis, PresenceBasis::Proxy);
    assert_eq!(jpn.partners["JPN"].upr, dec!(900));
    assert!(!jpn.partners.contains_key("AMER"));
    let foreign_upr: Decimal = jpn
        .partners
        .iter()
        .filter(|(c, _)| c.as_str() != "JPN")
        .map(|(_, p)| p.upr)
        .sum();
    assert_close(foreign_upr, dec!(200));

    let nor = run.presence().group("NOR").unwrap();
    assert_eq!(nor.basis, PresenceBasis::ProxyOnly);
    assert!(!nor.partners.contains_key("NOR"));
    let key: Decimal = run.key("NOR").unwrap().shares.values().copied().sum();
    assert_close(key, dec!(1));
}

#[test]
fn test_utpr_share_follows_unrelated_party_revenue() {
    let prepared = prepare_panel(&fra_bmu_reference(), &DeficitParams::for_year(YEAR)).unwrap();
    let config = AllocationScenarioConfig::new(dec!(0.15))
        .with_utpr(["BMU"], Vec::<String>::new())
        .with_minimum_breakdown(1)
        .with_details(true);
    let ledger = ledger_of(allocate_bilateral_tax_deficits(&prepared, &config).unwrap().result);
    // BMU holds 50 of the group's 850 unrelated-party revenue
    assert_close(ledger.country_totals()["BMU"], dec!(125) * dec!(50) / dec!(850));
    let left: Decimal = ledger
        .unallocated
        .iter()
        .filter(|u| u.reason == UnallocatedReason::NonAdopterShare)
        .map(|u| u.amount)
        .sum();
    assert_close(left, dec!(125) * dec!(800) / dec!(850));
}

#[test]
fn test_among_implementing_closes_the_universe() {
    let prepared = prepare_panel(&fra_bmu_reference(), &DeficitParams::for_year(YEAR)).unwrap();
    let config = AllocationScenarioConfig::new(dec!(0.15))
        .with_utpr(["BMU"], Vec::<String>::new())
        .with_minimum_breakdown(1)
        .among_implementing(true);
    let out = allocate_bilateral_tax_deficits(&prepared, &config).unwrap();
    assert_eq!(out.result.country_totals()["BMU"], dec!(125));
}

#[test]
fn test_safe_harbor_leaves_domestic_deficit_unallocated() {
    let prepared = prepare_panel(&fra_bmu_reference(), &DeficitParams::for_year(YEAR)).unwrap();
    let config = AllocationScenarioConfig::new(dec!(0.15))
        .with_utpr(["BMU"], Vec::<String>::new())
        .with_minimum_breakdown(1)
        .among_implementing(true)
        .with_safe_harbor(dec!(0.25), false)
        .with_details(true);
    let ledger = ledger_of(allocate_bilateral_tax_deficits(&prepared, &config).unwrap().result);
    assert_eq!(ledger.country_totals()["BMU"], dec!(75));
    assert_eq!(ledger.unallocated.len(), 1);
    assert_eq!(ledger.unallocated[0].reason, UnallocatedReason::SafeHarbor);
    assert_eq!(ledger.unallocated[0].amount, dec!(50));

    let foreign_too = config.clone().with_safe_harbor(dec!(0.25), true);
    let ledger = ledger_of(allocate_bilateral_tax_deficits(&prepared, &foreign_too).unwrap().result);
    assert!(ledger.records.is_empty());
    assert_eq!(ledger.total_unallocated(), dec!(125));
}

#[test]
fn test_etr_increment_flows_into_allocation() {
    let prepared = prepared();
    let config = AllocationScenarioConfig::new(dec!(0.15))
        .with_iir(["FRA"], Vec::<String>::new())
        .with_etr_increment(dec!(0.02));
    let out = allocate_bilateral_tax_deficits(&prepared, &config).unwrap();
    assert_eq!(out.result.country_totals()["FRA"], dec!(133));
}

#[test]
fn test_configuration_errors_fail_before_allocation() {
    let prepared = prepared();
    let overlap = AllocationScenarioConfig::new(dec!(0.15)).with_utpr(["FRA"], ["FRA"]);
    assert!(matches!(
        allocate_bilateral_tax_deficits(&prepared, &overlap),
        Err(TaxDeficitError::Configuration(_))
    ));

    let mut no_threshold = AllocationScenarioConfig::new(dec!(0.15)).with_utpr(["FRA"], Vec::<String>::new());
    no_threshold.stat_rate_condition_for_utpr = true;
    assert!(matches!(
        allocate_bilateral_tax_deficits(&prepared, &no_threshold),
        Err(TaxDeficitError::Configuration(_))
    ));

    let bad_rate = AllocationScenarioConfig::new(dec!(1.2));
    assert!(matches!(
        allocate_bilateral_tax_deficits(&prepared, &bad_rate),
        Err(TaxDeficitError::InvalidInput { .. })
    ));
}

#[test]
fn test_scenario_config_parses_from_json() {
    let config: AllocationScenarioConfig = serde_json::from_str(
        r#"{
            "minimum_rate": 0.15,
            "iir_incl_domestic": ["FRA"],
            "utpr_incl_domestic": ["FRA", "DEU"],
            "weight_assets": "0.5",
            "among_countries_implementing": true
        }"#,
    )
    .unwrap();
    assert_eq!(config.minimum_rate, dec!(0.15));
    assert_eq!(config.weight_assets, dec!(0.5));

    let unknown = serde_json::from_str::<AllocationScenarioConfig>(
        r#"{"minimum_rate": 0.15, "weight_UPR": 1}"#,
    );
    assert!(unknown.is_err());
}
