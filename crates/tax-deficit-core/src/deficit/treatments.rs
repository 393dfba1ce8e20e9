//! Country-specific adjustments to the CbCR panel.
//!
//! Each adjustment is a named [`CountryTreatment`] that can be applied and
//! tested on its own. [`treatment_registry`] returns the ones requested by the
//! settings in their fixed order: Sweden, Belgium, Singapore/Cayman, China.
//! They all run before carve-outs and ETRs are computed.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use super::params::{
    BelgiumTreatment, ChinaTreatment2018, CountryTreatmentSettings, SingaporeCaymanTreatment,
    SwedenTreatment,
};
use crate::error::TaxDeficitError;
use crate::reference::panel::JurisdictionObservation;
use crate::reference::ReferenceData;
use crate::types::Rate;
use crate::TaxDeficitResult;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "treatment", rename_all = "snake_case")]
pub enum CountryTreatment {
    SwedenExclude,
    SwedenAdjust { ratio: Rate },
    BelgiumExclude,
    BelgiumAdjust { partner: String, reference_year: i32 },
    BelgiumReplace,
    SingaporeCaymanReplace,
    ChinaCbcr2017 { growth: Decimal },
}

/// What a treatment did to the panel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreatmentEffect {
    pub treatment: String,
    pub rows_affected: usize,
    /// Parent whose CbCR rows were dropped, leaving it to TWZ statistics
    pub excluded_parent: Option<String>,
}

/// Share of Swedish domestic profit left once intra-group dividends are
/// removed. Known for 2016 and 2017 only.
pub fn default_sweden_ratio(year: i32) -> Option<Rate> {
    match year {
        2016 => Some((dec!(342) - dec!(200)) / dec!(342)),
        2017 => Some((dec!(512) - dec!(266)) / dec!(512)),
        _ => None,
    }
}

/// Requested treatments in application order.
pub fn treatment_registry(
    settings: &CountryTreatmentSettings,
    year: i32,
    reference: &ReferenceData,
) -> TaxDeficitResult<Vec<CountryTreatment>> {
    let mut registry = Vec::new();

    match settings.sweden {
        SwedenTreatment::Exclude => registry.push(CountryTreatment::SwedenExclude),
        SwedenTreatment::Adjust => {
            let ratio = settings
                .sweden_adjustment_ratio
                .or_else(|| default_sweden_ratio(year));
            let sweden_reports = reference
                .panel
                .for_year(year)
                .any(|o| o.parent_code == "SWE");
            match ratio {
                Some(ratio) => registry.push(CountryTreatment::SwedenAdjust { ratio }),
                None if sweden_reports => {
                    return Err(TaxDeficitError::Configuration(format!(
                        "sweden_adjustment_ratio is required to adjust Swedish CbCR for {year}"
                    )));
                }
                None => {}
            }
        }
    }

    match settings.belgium {
        BelgiumTreatment::None => {}
        BelgiumTreatment::Exclude => registry.push(CountryTreatment::BelgiumExclude),
        BelgiumTreatment::Adjust => {
            let (partner, reference_year) = if year == 2016 {
                ("NLD", 2017)
            } else {
                ("GBR", 2016)
            };
            registry.push(CountryTreatment::BelgiumAdjust {
                partner: partner.to_string(),
                reference_year,
            });
        }
        BelgiumTreatment::Replace => registry.push(CountryTreatment::BelgiumReplace),
    }

    if settings.singapore_cayman == SingaporeCaymanTreatment::Replace {
        registry.push(CountryTreatment::SingaporeCaymanReplace);
    }

    if settings.china_2018 == ChinaTreatment2018::Cbcr2017 && year == 2018 {
        registry.push(CountryTreatment::ChinaCbcr2017 {
            growth: reference.growth.world_growth(2018)?,
        });
    }

    Ok(registry)
}

impl CountryTreatment {
    pub fn name(&self) -> &'static str {
        match self {
            CountryTreatment::SwedenExclude => "sweden_exclude",
            CountryTreatment::SwedenAdjust { .. } => "sweden_adjust",
            CountryTreatment::BelgiumExclude => "belgium_exclude",
            CountryTreatment::BelgiumAdjust { .. } => "belgium_adjust",
            CountryTreatment::BelgiumReplace => "belgium_replace",
            CountryTreatment::SingaporeCaymanReplace => "singapore_cayman_replace",
            CountryTreatment::ChinaCbcr2017 { .. } => "china_2017_cbcr",
        }
    }

    /// Apply to the rows of one income year. A treatment for a country absent
    /// from the panel is a no-op.
    pub fn apply(
        &self,
        rows: &mut Vec<JurisdictionObservation>,
        year: i32,
        reference: &ReferenceData,
    ) -> TaxDeficitResult<TreatmentEffect> {
        let mut excluded_parent = None;
        let rows_affected = match self {
            CountryTreatment::SwedenExclude => {
                excluded_parent = Some("SWE".to_string());
                drop_parent(rows, "SWE")
            }
            CountryTreatment::BelgiumExclude => {
                excluded_parent = Some("BEL".to_string());
                drop_parent(rows, "BEL")
            }
            CountryTreatment::SwedenAdjust { ratio } => {
                let mut n = 0;
                for row in rows
                    .iter_mut()
                    .filter(|r| r.parent_code == "SWE" && r.partner_code == "SWE")
                {
                    row.profit_before_tax *= *ratio;
                    n += 1;
                }
                n
            }
            CountryTreatment::BelgiumAdjust {
                partner,
                reference_year,
            } => adjust_belgium(rows, partner, *reference_year, reference)?,
            CountryTreatment::BelgiumReplace => {
                replace_domestic_with_twz(rows, "BEL", year, reference)?
            }
            CountryTreatment::SingaporeCaymanReplace => {
                replace_domestic_with_twz(rows, "SGP", year, reference)?
                    + replace_domestic_with_twz(rows, "CYM", year, reference)?
            }
            CountryTreatment::ChinaCbcr2017 { growth } => {
                substitute_china(rows, year, *growth, reference)?
            }
        };

        tracing::debug!(treatment = self.name(), rows_affected, "country treatment applied");

        Ok(TreatmentEffect {
            treatment: self.name().to_string(),
            rows_affected,
            excluded_parent,
        })
    }
}

fn drop_parent(rows: &mut Vec<JurisdictionObservation>, parent: &str) -> usize {
    let before = rows.len();
    rows.retain(|r| r.parent_code != parent);
    before - rows.len()
}

fn adjust_belgium(
    rows: &mut [JurisdictionObservation],
    partner: &str,
    reference_year: i32,
    reference: &ReferenceData,
) -> TaxDeficitResult<usize> {
    if !rows.iter().any(|r| r.parent_code == "BEL") {
        return Ok(0);
    }
    let target = rows
        .iter_mut()
        .find(|r| r.parent_code == "BEL" && r.partner_code == partner)
        .ok_or_else(|| TaxDeficitError::missing("CbCR panel", format!("BEL -> {partner}")))?;
    let benchmark = reference
        .panel
        .find(reference_year, "BEL", partner)
        .ok_or_else(|| {
            TaxDeficitError::missing("CbCR panel", format!("BEL -> {partner} in {reference_year}"))
        })?;
    if benchmark.total_revenues.is_zero() {
        return Err(TaxDeficitError::DivisionByZero {
            context: format!("Belgian profit margin for {reference_year}"),
        });
    }
    let margin = benchmark.profit_before_tax / benchmark.total_revenues;
    target.profit_before_tax = target.total_revenues * margin;
    Ok(1)
}

fn replace_domestic_with_twz(
    rows: &mut [JurisdictionObservation],
    country: &str,
    year: i32,
    reference: &ReferenceData,
) -> TaxDeficitResult<usize> {
    let Some(row) = rows
        .iter_mut()
        .find(|r| r.parent_code == country && r.partner_code == country)
    else {
        return Ok(0);
    };
    let entry = reference
        .twz
        .get(year, country)
        .ok_or_else(|| TaxDeficitError::missing("TWZ table", format!("{country} in {year}")))?;
    let (profits, etr) = entry
        .domestic_profits
        .zip(entry.domestic_etr)
        .ok_or_else(|| {
            TaxDeficitError::missing("TWZ table", format!("domestic statistics of {country} in {year}"))
        })?;
    row.profit_before_tax = profits;
    row.adjusted_profit_before_tax = None;
    row.tax_paid = profits * etr;
    Ok(1)
}

fn substitute_china(
    rows: &mut Vec<JurisdictionObservation>,
    year: i32,
    growth: Decimal,
    reference: &ReferenceData,
) -> TaxDeficitResult<usize> {
    let previous: Vec<JurisdictionObservation> = reference
        .panel
        .for_year(year - 1)
        .filter(|o| o.parent_code == "CHN")
        .cloned()
        .collect();
    if previous.is_empty() {
        return Err(TaxDeficitError::missing(
            "CbCR panel",
            format!("CHN parent rows in {}", year - 1),
        ));
    }
    drop_parent(rows, "CHN");
    let n = previous.len();
    rows.extend(previous.into_iter().map(|mut o| {
        o.year = year;
        o.profit_before_tax *= growth;
        o.adjusted_profit_before_tax = o.adjusted_profit_before_tax.map(|p| p * growth);
        o.tax_paid *= growth;
        o.total_revenues *= growth;
        o.unrelated_party_revenues *= growth;
        o.tangible_assets = o.tangible_assets.map(|a| a * growth);
        o
    }));
    Ok(n)
}
