use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};

use super::classification::CountryInfo;
use super::{ReferenceData, ReferenceDataBuilder};
use crate::error::TaxDeficitError;
use crate::TaxDeficitResult;

/// Locations of the reference CSV files.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DataPaths {
    pub panel: PathBuf,
    pub countries: PathBuf,
    #[serde(default)]
    pub twz: Option<PathBuf>,
    #[serde(default)]
    pub statutory_rates: Option<PathBuf>,
    #[serde(default)]
    pub mean_wages: Option<PathBuf>,
    #[serde(default)]
    pub growth: Option<PathBuf>,
    #[serde(default)]
    pub reporting: Option<PathBuf>,
}

impl DataPaths {
    /// Resolve relative paths against the directory of the run file.
    pub fn relative_to(&self, base: &Path) -> DataPaths {
        let join = |p: &PathBuf| {
            if p.is_absolute() {
                p.clone()
            } else {
                base.join(p)
            }
        };
        DataPaths {
            panel: join(&self.panel),
            countries: join(&self.countries),
            twz: self.twz.as_ref().map(join),
            statutory_rates: self.statutory_rates.as_ref().map(join),
            mean_wages: self.mean_wages.as_ref().map(join),
            growth: self.growth.as_ref().map(join),
            reporting: self.reporting.as_ref().map(join),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CountryRow {
    code: String,
    name: String,
    #[serde(default)]
    region: Option<String>,
    #[serde(default)]
    income_group: Option<String>,
    #[serde(default, deserialize_with = "flag")]
    eu27: bool,
    #[serde(default, deserialize_with = "flag")]
    tax_haven: bool,
}

fn flag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    let raw = String::deserialize(deserializer)?;
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "y" => Ok(true),
        "0" | "false" | "no" | "n" | "" => Ok(false),
        other => Err(serde::de::Error::custom(format!("not a boolean flag: '{other}'"))),
    }
}

fn read_csv<T: DeserializeOwned>(path: &Path) -> TaxDeficitResult<Vec<T>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| TaxDeficitError::Io(format!("{}: {e}", path.display())))?;
    let mut rows = Vec::new();
    for row in reader.deserialize() {
        let row: T =
            row.map_err(|e| TaxDeficitError::DataFormat(format!("{}: {e}", path.display())))?;
        rows.push(row);
    }
    Ok(rows)
}

fn read_optional<T: DeserializeOwned>(path: &Option<PathBuf>) -> TaxDeficitResult<Vec<T>> {
    match path {
        Some(p) => read_csv(p),
        None => Ok(Vec::new()),
    }
}

/// Read every reference table and build the cleaned, immutable reference data.
pub fn load_reference_data(paths: &DataPaths) -> TaxDeficitResult<ReferenceData> {
    let countries: Vec<CountryRow> = read_csv(&paths.countries)?;
    let builder = ReferenceDataBuilder {
        countries: countries
            .into_iter()
            .map(|c| CountryInfo {
                code: c.code,
                name: c.name,
                region: c.region,
                income_group: c.income_group,
                eu27: c.eu27,
                tax_haven: c.tax_haven,
            })
            .collect(),
        reporting: read_optional(&paths.reporting)?,
        panel: read_csv(&paths.panel)?,
        twz: read_optional(&paths.twz)?,
        statutory_rates: read_optional(&paths.statutory_rates)?,
        mean_wages: read_optional(&paths.mean_wages)?,
        growth: read_optional(&paths.growth)?,
    };
    builder.build()
}
