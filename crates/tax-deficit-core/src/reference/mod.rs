//! Immutable reference data shared read-only by every computation.

pub mod classification;
#[cfg(feature = "loader")]
pub mod loader;
pub mod panel;
pub mod series;
pub mod twz;

use serde::{Deserialize, Serialize};

use crate::TaxDeficitResult;
use classification::{CountryClassification, CountryInfo, ReportingGranularity};
use panel::{Panel, PanelRecord};
use series::{CountrySeries, GrowthEntry, GrowthSeries, SeriesPoint};
use twz::{TwzEntry, TwzTable};

/// Loaded and cleaned inputs. Built once, never mutated afterwards.
#[derive(Debug, Clone, Serialize)]
pub struct ReferenceData {
    pub classification: CountryClassification,
    pub panel: Panel,
    pub twz: TwzTable,
    pub statutory_rates: CountrySeries,
    pub mean_wages: CountrySeries,
    pub growth: GrowthSeries,
}

/// Year-specific reporting granularity entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportingEntry {
    pub year: i32,
    pub country_code: String,
    pub granularity: ReportingGranularity,
}

/// Raw, uncleaned reference tables. Also the wire format accepted by the bindings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReferenceDataBuilder {
    pub countries: Vec<CountryInfo>,
    pub reporting: Vec<ReportingEntry>,
    pub panel: Vec<PanelRecord>,
    pub twz: Vec<TwzEntry>,
    pub statutory_rates: Vec<SeriesPoint>,
    pub mean_wages: Vec<SeriesPoint>,
    pub growth: Vec<GrowthEntry>,
}

impl ReferenceDataBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn country(mut self, info: CountryInfo) -> Self {
        self.countries.push(info);
        self
    }

    pub fn record(mut self, record: PanelRecord) -> Self {
        self.panel.push(record);
        self
    }

    pub fn twz_entry(mut self, entry: TwzEntry) -> Self {
        self.twz.push(entry);
        self
    }

    pub fn statutory_rate(mut self, year: i32, code: &str, rate: rust_decimal::Decimal) -> Self {
        self.statutory_rates.push(SeriesPoint {
            year,
            country_code: code.to_string(),
            value: rate,
        });
        self
    }

    pub fn mean_wage(mut self, year: i32, code: &str, wage: rust_decimal::Decimal) -> Self {
        self.mean_wages.push(SeriesPoint {
            year,
            country_code: code.to_string(),
            value: wage,
        });
        self
    }

    pub fn growth(mut self, entry: GrowthEntry) -> Self {
        self.growth.push(entry);
        self
    }

    pub fn reporting(mut self, year: i32, code: &str, granularity: ReportingGranularity) -> Self {
        self.reporting.push(ReportingEntry {
            year,
            country_code: code.to_string(),
            granularity,
        });
        self
    }

    pub fn build(self) -> TaxDeficitResult<ReferenceData> {
        let mut classification = CountryClassification::new(self.countries)?;
        for r in &self.reporting {
            classification.set_granularity(r.year, &r.country_code, r.granularity);
        }
        let statutory_rates = CountrySeries::new("statutory rates", self.statutory_rates)?;
        let mean_wages = CountrySeries::new("mean wages", self.mean_wages)?;
        let panel = Panel::clean(self.panel, &classification, &statutory_rates)?;
        let twz = TwzTable::new(self.twz)?;
        let growth = GrowthSeries::new(self.growth)?;

        tracing::info!(
            countries = classification.all_codes().len(),
            observations = panel.observations().len(),
            "reference data loaded"
        );

        Ok(ReferenceData {
            classification,
            panel,
            twz,
            statutory_rates,
            mean_wages,
            growth,
        })
    }
}

impl ReferenceData {
    pub fn builder() -> ReferenceDataBuilder {
        ReferenceDataBuilder::new()
    }
}
