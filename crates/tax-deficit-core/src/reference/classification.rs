use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::TaxDeficitError;
use crate::TaxDeficitResult;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// EU member states (post-Brexit)
pub const EU27_COUNTRY_CODES: [&str; 27] = [
    "AUT", "BEL", "BGR", "HRV", "CYP", "CZE", "DNK", "EST", "FIN", "FRA", "DEU", "GRC", "HUN",
    "IRL", "ITA", "LVA", "LTU", "LUX", "MLT", "NLD", "POL", "PRT", "ROU", "SVK", "SVN", "ESP",
    "SWE",
];

/// Partner code for the "foreign jurisdictions total" row of minimum reporters.
pub const FOREIGN_TOTAL_CODE: &str = "FJT";

/// Partner code for stateless entities, dropped while cleaning.
pub const STATELESS_CODE: &str = "STA";

/// Partner codes that stand for groups of jurisdictions rather than a jurisdiction.
pub const AGGREGATE_PARTNER_CODES: [&str; 10] = [
    "FJT", "GRPS", "AFRIC", "AMER", "ASIAT", "EUROP", "OAM", "OTE", "OAS", "OAF",
];

/// Synthetic partner holding the TWZ tax-haven deficit (or its upgrade over CbCR).
pub const TWZ_HAVENS_CODE: &str = "TWZ_HAVENS";

/// Synthetic partner holding the imputed TWZ non-haven deficit.
pub const TWZ_NON_HAVENS_CODE: &str = "TWZ_NON_HAVENS";

const DEFAULT_MINIMUM_REPORTING: [&str; 4] = ["KOR", "NLD", "IRL", "FIN"];
const CONTINENTAL_REPORTING_2016: [&str; 4] = ["AUT", "NOR", "SVN", "SWE"];
const CONTINENTAL_REPORTING_2017: [&str; 7] = ["AUT", "GBR", "GRC", "IMN", "NOR", "SVN", "SWE"];

/// True for aggregate and synthetic partner codes, i.e. anything that cannot collect tax.
pub fn is_aggregate_code(code: &str) -> bool {
    AGGREGATE_PARTNER_CODES.contains(&code)
        || code == TWZ_HAVENS_CODE
        || code == TWZ_NON_HAVENS_CODE
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountryInfo {
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub income_group: Option<String>,
    #[serde(default)]
    pub eu27: bool,
    #[serde(default)]
    pub tax_haven: bool,
}

impl CountryInfo {
    pub fn new(code: &str, name: &str) -> Self {
        CountryInfo {
            code: code.to_string(),
            name: name.to_string(),
            region: None,
            income_group: None,
            eu27: EU27_COUNTRY_CODES.contains(&code),
            tax_haven: false,
        }
    }

    pub fn haven(mut self) -> Self {
        self.tax_haven = true;
        self
    }

    pub fn in_region(mut self, region: &str) -> Self {
        self.region = Some(region.to_string());
        self
    }

    pub fn with_income_group(mut self, group: &str) -> Self {
        self.income_group = Some(group.to_string());
        self
    }
}

/// How finely a parent jurisdiction breaks down its foreign activity in CbCR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportingGranularity {
    Full,
    /// Domestic vs foreign total only
    Minimum,
    /// Continental aggregates only
    Continental,
}

/// Static country reference: names, EU membership, tax-haven list, region and
/// income group, plus CbCR reporting granularity by year.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CountryClassification {
    countries: BTreeMap<String, CountryInfo>,
    /// Year-specific granularity lists. A year absent here uses the built-in lists.
    #[serde(default)]
    reporting: BTreeMap<i32, BTreeMap<String, ReportingGranularity>>,
}

impl CountryClassification {
    pub fn new(countries: Vec<CountryInfo>) -> TaxDeficitResult<Self> {
        let mut map = BTreeMap::new();
        for info in countries {
            if info.code.trim().is_empty() {
                return Err(TaxDeficitError::DataFormat(format!(
                    "country '{}' has an empty code",
                    info.name
                )));
            }
            if map.insert(info.code.clone(), info).is_some() {
                return Err(TaxDeficitError::DataFormat(
                    "duplicate country code in classification".into(),
                ));
            }
        }
        Ok(CountryClassification {
            countries: map,
            reporting: BTreeMap::new(),
        })
    }

    pub fn set_granularity(&mut self, year: i32, code: &str, granularity: ReportingGranularity) {
        self.reporting
            .entry(year)
            .or_default()
            .insert(code.to_string(), granularity);
    }

    pub fn get(&self, code: &str) -> Option<&CountryInfo> {
        self.countries.get(code)
    }

    pub fn contains(&self, code: &str) -> bool {
        self.countries.contains_key(code)
    }

    /// Display name, falling back to the code itself.
    pub fn name_of(&self, code: &str) -> String {
        self.countries
            .get(code)
            .map(|c| c.name.clone())
            .unwrap_or_else(|| code.to_string())
    }

    pub fn is_eu27(&self, code: &str) -> bool {
        self.countries
            .get(code)
            .map(|c| c.eu27)
            .unwrap_or_else(|| EU27_COUNTRY_CODES.contains(&code))
    }

    pub fn is_tax_haven(&self, code: &str) -> bool {
        self.countries.get(code).map(|c| c.tax_haven).unwrap_or(false)
    }

    pub fn region(&self, code: &str) -> Option<&str> {
        self.countries.get(code).and_then(|c| c.region.as_deref())
    }

    pub fn income_group(&self, code: &str) -> Option<&str> {
        self.countries.get(code).and_then(|c| c.income_group.as_deref())
    }

    pub fn all_codes(&self) -> BTreeSet<String> {
        self.countries.keys().cloned().collect()
    }

    pub fn eu27_codes(&self) -> BTreeSet<String> {
        self.countries
            .values()
            .filter(|c| c.eu27)
            .map(|c| c.code.clone())
            .collect()
    }

    pub fn non_eu27_codes(&self) -> BTreeSet<String> {
        self.countries
            .values()
            .filter(|c| !c.eu27)
            .map(|c| c.code.clone())
            .collect()
    }

    pub fn granularity(&self, code: &str, year: i32) -> ReportingGranularity {
        if let Some(overrides) = self.reporting.get(&year) {
            return overrides
                .get(code)
                .copied()
                .unwrap_or(ReportingGranularity::Full);
        }
        if DEFAULT_MINIMUM_REPORTING.contains(&code) {
            ReportingGranularity::Minimum
        } else if (year <= 2016 && CONTINENTAL_REPORTING_2016.contains(&code))
            || (year > 2016 && CONTINENTAL_REPORTING_2017.contains(&code))
        {
            ReportingGranularity::Continental
        } else {
            ReportingGranularity::Full
        }
    }

    /// Minimum and continental reporters get no TWZ tax-haven upgrade and are
    /// left out of the non-haven imputation ratio.
    pub fn has_coarse_reporting(&self, code: &str, year: i32) -> bool {
        self.granularity(code, year) != ReportingGranularity::Full
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
