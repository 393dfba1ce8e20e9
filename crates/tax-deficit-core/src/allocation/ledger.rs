use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::config::{Instrument, Location};
use super::waterfall::UnallocatedReason;
use crate::types::{Money, Rate};

// ---------------------------------------------------------------------------
// Bilateral records
// ---------------------------------------------------------------------------

/// Which (instrument, location) column collected an amount.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionIndicators {
    #[serde(rename = "collected_through_domestic_IIR")]
    pub domestic_iir: bool,
    #[serde(rename = "collected_through_foreign_IIR")]
    pub foreign_iir: bool,
    #[serde(rename = "collected_through_domestic_UTPR")]
    pub domestic_utpr: bool,
    #[serde(rename = "collected_through_foreign_UTPR")]
    pub foreign_utpr: bool,
    #[serde(rename = "collected_through_domestic_QDMTT")]
    pub domestic_qdmtt: bool,
    #[serde(rename = "collected_through_foreign_QDMTT")]
    pub foreign_qdmtt: bool,
}

impl CollectionIndicators {
    pub fn new(instrument: Instrument, location: Location) -> Self {
        let mut flags = CollectionIndicators::default();
        let slot = match (instrument, location) {
            (Instrument::Iir, Location::Domestic) => &mut flags.domestic_iir,
            (Instrument::Iir, Location::Foreign) => &mut flags.foreign_iir,
            (Instrument::Utpr, Location::Domestic) => &mut flags.domestic_utpr,
            (Instrument::Utpr, Location::Foreign) => &mut flags.foreign_utpr,
            (Instrument::Qdmtt, Location::Domestic) => &mut flags.domestic_qdmtt,
            (Instrument::Qdmtt, Location::Foreign) => &mut flags.foreign_qdmtt,
        };
        *slot = true;
        flags
    }
}

/// Deficit of one parent collected by one country through one instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BilateralAllocationRecord {
    /// Headquarter jurisdiction whose multinationals carry the deficit
    #[serde(rename = "PARENT_COUNTRY_CODE")]
    pub parent_code: String,
    #[serde(rename = "PARENT_COUNTRY_NAME")]
    pub parent_name: String,
    /// Jurisdiction that collects the amount
    #[serde(rename = "COLLECTING_COUNTRY_CODE")]
    pub collecting_code: String,
    #[serde(rename = "COLLECTING_COUNTRY_NAME")]
    pub collecting_name: String,
    #[serde(rename = "INSTRUMENT")]
    pub instrument: Instrument,
    /// Domestic when the deficit arose in the parent's own jurisdiction
    #[serde(rename = "LOCATION")]
    pub location: Location,
    /// Amount collected, in the panel's currency
    #[serde(rename = "ALLOCATED_TAX_DEFICIT")]
    pub allocated: Money,
    /// One-hot flags mirroring (`instrument`, `location`)
    #[serde(flatten)]
    pub indicators: CollectionIndicators,
}

/// Part of one (parent, partner) deficit no instrument reached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnallocatedDeficit {
    pub parent_code: String,
    /// Jurisdiction (or aggregate code) where the deficit arose
    pub partner_code: String,
    pub amount: Money,
    /// First rule of the waterfall that left the amount uncollected
    pub reason: UnallocatedReason,
}

/// Conservation line of one parent: deficit = allocated + unallocated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParentDeficit {
    pub parent_code: String,
    pub parent_name: String,
    /// Sum of the parent's row deficits
    pub tax_deficit: Money,
    /// Sum of the parent's allocation records
    pub allocated: Money,
    /// Sum of the parent's unallocated entries
    pub unallocated: Money,
}

/// Row-level allocation of one scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BilateralLedger {
    pub year: i32,
    pub minimum_rate: Rate,
    pub etr_increment: Rate,
    /// One record per (parent, collector, instrument, location)
    pub records: Vec<BilateralAllocationRecord>,
    /// One entry per (parent, partner) remainder
    pub unallocated: Vec<UnallocatedDeficit>,
    /// Conservation line of every parent with a deficit row
    pub parents: Vec<ParentDeficit>,
}

impl BilateralLedger {
    pub fn country_totals(&self) -> BTreeMap<String, Money> {
        let mut totals: BTreeMap<String, Money> = BTreeMap::new();
        for r in &self.records {
            *totals.entry(r.collecting_code.clone()).or_default() += r.allocated;
        }
        totals
    }

    pub fn total_allocated(&self) -> Money {
        self.records.iter().map(|r| r.allocated).sum()
    }

    pub fn total_unallocated(&self) -> Money {
        self.unallocated.iter().map(|u| u.amount).sum()
    }

    pub fn records_of<'a>(
        &'a self,
        parent: &'a str,
    ) -> impl Iterator<Item = &'a BilateralAllocationRecord> {
        self.records.iter().filter(move |r| r.parent_code == parent)
    }

    /// Total collected per (instrument, location) column for one country.
    pub fn collected_by(&self, country: &str, instrument: Instrument, location: Location) -> Money {
        self.records
            .iter()
            .filter(|r| {
                r.collecting_code == country && r.instrument == instrument && r.location == location
            })
            .map(|r| r.allocated)
            .sum()
    }
}

// ---------------------------------------------------------------------------
// Country-level output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountryAllocation {
    #[serde(rename = "COLLECTING_COUNTRY_CODE")]
    pub code: String,
    #[serde(rename = "COLLECTING_COUNTRY_NAME")]
    pub name: String,
    #[serde(rename = "ALLOCATED_TAX_DEFICIT")]
    pub allocated: Money,
}

/// Country-level allocation computed per parent rather than per row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateAllocation {
    pub year: i32,
    pub minimum_rate: Rate,
    pub etr_increment: Rate,
    /// Every implementing country, zero-filled, plus any other collector
    pub countries: Vec<CountryAllocation>,
    /// Deficit no collector reached
    pub unallocated: Money,
}

impl AggregateAllocation {
    pub fn get(&self, code: &str) -> Money {
        self.countries
            .iter()
            .find(|c| c.code == code)
            .map(|c| c.allocated)
            .unwrap_or(Decimal::ZERO)
    }
}

/// Result of the allocation engine at the requested level of detail.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "detail", rename_all = "snake_case")]
pub enum AllocationTable {
    Bilateral(BilateralLedger),
    Aggregate(AggregateAllocation),
}

impl AllocationTable {
    pub fn country_totals(&self) -> BTreeMap<String, Money> {
        match self {
            AllocationTable::Bilateral(ledger) => ledger.country_totals(),
            AllocationTable::Aggregate(agg) => agg
                .countries
                .iter()
                .map(|c| (c.code.clone(), c.allocated))
                .collect(),
        }
    }

    pub fn year(&self) -> i32 {
        match self {
            AllocationTable::Bilateral(ledger) => ledger.year,
            AllocationTable::Aggregate(agg) => agg.year,
        }
    }

    pub fn as_bilateral(&self) -> Option<&BilateralLedger> {
        match self {
            AllocationTable::Bilateral(ledger) => Some(ledger),
            AllocationTable::Aggregate(_) => None,
        }
    }
}
