use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::allocation::{BilateralLedger, Instrument, Location};
use crate::types::{Money, Rate};

/// Revenue collected by one country, by instrument and origin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountryTotalsRow {
    #[serde(rename = "COLLECTING_COUNTRY_CODE")]
    pub code: String,
    #[serde(rename = "COLLECTING_COUNTRY_NAME")]
    pub name: String,
    /// IIR on the deficit of the country's own multinationals at home
    #[serde(rename = "collected_through_domestic_IIR")]
    pub domestic_iir: Money,
    #[serde(rename = "collected_through_foreign_IIR")]
    pub foreign_iir: Money,
    /// UTPR on deficits booked in the headquarter jurisdiction of the group
    #[serde(rename = "collected_through_domestic_UTPR")]
    pub domestic_utpr: Money,
    #[serde(rename = "collected_through_foreign_UTPR")]
    pub foreign_utpr: Money,
    #[serde(rename = "collected_through_domestic_QDMTT")]
    pub domestic_qdmtt: Money,
    #[serde(rename = "collected_through_foreign_QDMTT")]
    pub foreign_qdmtt: Money,
    /// Sum of the six columns
    #[serde(rename = "TAX_DEFICIT_total")]
    pub total: Money,
}

impl CountryTotalsRow {
    fn empty(code: &str, name: &str) -> Self {
        CountryTotalsRow {
            code: code.to_string(),
            name: name.to_string(),
            domestic_iir: Decimal::ZERO,
            foreign_iir: Decimal::ZERO,
            domestic_utpr: Decimal::ZERO,
            foreign_utpr: Decimal::ZERO,
            domestic_qdmtt: Decimal::ZERO,
            foreign_qdmtt: Decimal::ZERO,
            total: Decimal::ZERO,
        }
    }

    fn column_mut(&mut self, instrument: Instrument, location: Location) -> &mut Money {
        match (instrument, location) {
            (Instrument::Iir, Location::Domestic) => &mut self.domestic_iir,
            (Instrument::Iir, Location::Foreign) => &mut self.foreign_iir,
            (Instrument::Utpr, Location::Domestic) => &mut self.domestic_utpr,
            (Instrument::Utpr, Location::Foreign) => &mut self.foreign_utpr,
            (Instrument::Qdmtt, Location::Domestic) => &mut self.domestic_qdmtt,
            (Instrument::Qdmtt, Location::Foreign) => &mut self.foreign_qdmtt,
        }
    }

    pub fn column(&self, instrument: Instrument, location: Location) -> Money {
        match (instrument, location) {
            (Instrument::Iir, Location::Domestic) => self.domestic_iir,
            (Instrument::Iir, Location::Foreign) => self.foreign_iir,
            (Instrument::Utpr, Location::Domestic) => self.domestic_utpr,
            (Instrument::Utpr, Location::Foreign) => self.foreign_utpr,
            (Instrument::Qdmtt, Location::Domestic) => self.domestic_qdmtt,
            (Instrument::Qdmtt, Location::Foreign) => self.foreign_qdmtt,
        }
    }

    fn scaled(&self, factor: Decimal) -> Self {
        CountryTotalsRow {
            code: self.code.clone(),
            name: self.name.clone(),
            domestic_iir: self.domestic_iir * factor,
            foreign_iir: self.foreign_iir * factor,
            domestic_utpr: self.domestic_utpr * factor,
            foreign_utpr: self.foreign_utpr * factor,
            domestic_qdmtt: self.domestic_qdmtt * factor,
            foreign_qdmtt: self.foreign_qdmtt * factor,
            total: self.total * factor,
        }
    }
}

/// Bilateral ledger rolled up by collecting country.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CountryTotals {
    pub year: i32,
    pub minimum_rate: Rate,
    pub rows: Vec<CountryTotalsRow>,
    pub unallocated: Money,
    /// "USD" for raw results, "EUR 2021" once uprated
    pub unit: String,
}

impl CountryTotals {
    pub fn from_ledger(ledger: &BilateralLedger) -> Self {
        let mut rows: BTreeMap<&str, CountryTotalsRow> = BTreeMap::new();
        for r in &ledger.records {
            let row = rows
                .entry(r.collecting_code.as_str())
                .or_insert_with(|| CountryTotalsRow::empty(&r.collecting_code, &r.collecting_name));
            *row.column_mut(r.instrument, r.location) += r.allocated;
            row.total += r.allocated;
        }
        CountryTotals {
            year: ledger.year,
            minimum_rate: ledger.minimum_rate,
            rows: rows.into_values().collect(),
            unallocated: ledger.total_unallocated(),
            unit: "USD".to_string(),
        }
    }

    /// Convert every amount with an uprating factor (USD of the income year to 2021 EUR).
    pub fn uprated(&self, factor: Decimal) -> Self {
        CountryTotals {
            year: self.year,
            minimum_rate: self.minimum_rate,
            rows: self.rows.iter().map(|r| r.scaled(factor)).collect(),
            unallocated: self.unallocated * factor,
            unit: "EUR 2021".to_string(),
        }
    }

    pub fn get(&self, code: &str) -> Option<&CountryTotalsRow> {
        self.rows.iter().find(|r| r.code == code)
    }

    pub fn total(&self) -> Money {
        self.rows.iter().map(|r| r.total).sum()
    }

    pub fn by_country(&self) -> BTreeMap<String, Money> {
        self.rows.iter().map(|r| (r.code.clone(), r.total)).collect()
    }
}
