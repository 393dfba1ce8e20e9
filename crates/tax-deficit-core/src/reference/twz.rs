use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::TaxDeficitError;
use crate::types::{Money, Rate};
use crate::TaxDeficitResult;

/// Substitute statistics for one parent jurisdiction and year.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TwzEntry {
    pub year: i32,
    pub country_code: String,
    pub country_name: String,
    /// Profits booked by the country's multinationals in tax havens
    pub profits_in_tax_havens: Money,
    #[serde(default)]
    pub domestic_profits: Option<Money>,
    #[serde(default)]
    pub domestic_etr: Option<Rate>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TwzTable {
    entries: BTreeMap<i32, BTreeMap<String, TwzEntry>>,
}

impl TwzTable {
    pub fn new(entries: Vec<TwzEntry>) -> TaxDeficitResult<Self> {
        let mut map: BTreeMap<i32, BTreeMap<String, TwzEntry>> = BTreeMap::new();
        for e in entries {
            let (year, code) = (e.year, e.country_code.clone());
            if map.entry(year).or_default().insert(code.clone(), e).is_some() {
                return Err(TaxDeficitError::DataFormat(format!(
                    "TWZ table: duplicate entry for {code} in {year}"
                )));
            }
        }
        Ok(TwzTable { entries: map })
    }

    pub fn get(&self, year: i32, code: &str) -> Option<&TwzEntry> {
        self.entries.get(&year).and_then(|m| m.get(code))
    }

    pub fn for_year(&self, year: i32) -> impl Iterator<Item = &TwzEntry> {
        self.entries.get(&year).into_iter().flat_map(|m| m.values())
    }
}
