use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::TaxDeficitError;
use crate::types::Rate;
use crate::TaxDeficitResult;

/// One (year, country) value, as read from a long-format table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub year: i32,
    pub country_code: String,
    #[serde(alias = "rate", alias = "annual_wage")]
    pub value: Decimal,
}

/// Year × country lookup used for statutory CIT rates and mean annual wages.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CountrySeries {
    name: String,
    values: BTreeMap<i32, BTreeMap<String, Decimal>>,
}

impl CountrySeries {
    pub fn new(name: &str, points: Vec<SeriesPoint>) -> TaxDeficitResult<Self> {
        let mut values: BTreeMap<i32, BTreeMap<String, Decimal>> = BTreeMap::new();
        for p in points {
            let previous = values
                .entry(p.year)
                .or_default()
                .insert(p.country_code.clone(), p.value);
            if previous.is_some() {
                return Err(TaxDeficitError::DataFormat(format!(
                    "{name}: duplicate entry for {} in {}",
                    p.country_code, p.year
                )));
            }
        }
        Ok(CountrySeries {
            name: name.to_string(),
            values,
        })
    }

    pub fn get(&self, year: i32, code: &str) -> Option<Decimal> {
        self.values.get(&year).and_then(|m| m.get(code)).copied()
    }

    pub fn require(&self, year: i32, code: &str) -> TaxDeficitResult<Decimal> {
        self.get(year, code)
            .ok_or_else(|| TaxDeficitError::missing(&self.name, format!("{code} in {year}")))
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Currency and growth figures for one income year.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrowthEntry {
    pub year: i32,
    /// EUR per USD
    pub usd_to_eur: Decimal,
    /// Nominal growth from the income year to 2021
    pub multiplier_2021: Decimal,
    /// World USD GDP growth from the previous year
    #[serde(default)]
    pub world_usd_growth: Option<Decimal>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GrowthSeries {
    by_year: BTreeMap<i32, GrowthEntry>,
}

impl GrowthSeries {
    pub fn new(entries: Vec<GrowthEntry>) -> TaxDeficitResult<Self> {
        let mut by_year = BTreeMap::new();
        for e in entries {
            if e.usd_to_eur <= Decimal::ZERO {
                return Err(TaxDeficitError::DataFormat(format!(
                    "growth: non-positive exchange rate for {}",
                    e.year
                )));
            }
            let year = e.year;
            if by_year.insert(year, e).is_some() {
                return Err(TaxDeficitError::DataFormat(format!(
                    "growth: duplicate entry for {year}"
                )));
            }
        }
        Ok(GrowthSeries { by_year })
    }

    pub fn get(&self, year: i32) -> TaxDeficitResult<&GrowthEntry> {
        self.by_year
            .get(&year)
            .ok_or_else(|| TaxDeficitError::missing("growth series", year.to_string()))
    }

    pub fn uprating(&self, year: i32) -> TaxDeficitResult<Uprating> {
        let e = self.get(year)?;
        Ok(Uprating {
            year,
            usd_to_eur: e.usd_to_eur,
            multiplier_2021: e.multiplier_2021,
        })
    }

    /// Growth factor applied when figures of `year - 1` stand in for `year`.
    pub fn world_growth(&self, year: i32) -> TaxDeficitResult<Decimal> {
        self.get(year)?.world_usd_growth.ok_or_else(|| {
            TaxDeficitError::missing("growth series", format!("world USD growth for {year}"))
        })
    }
}

/// Conversion from income-year USD to 2021 EUR.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Uprating {
    pub year: i32,
    pub usd_to_eur: Rate,
    pub multiplier_2021: Decimal,
}

impl Uprating {
    pub fn factor(&self) -> Decimal {
        self.usd_to_eur * self.multiplier_2021
    }
}
