use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use super::classification::{
    is_aggregate_code, CountryClassification, ReportingGranularity, FOREIGN_TOTAL_CODE,
    STATELESS_CODE,
};
use super::series::CountrySeries;
use crate::error::TaxDeficitError;
use crate::types::{DataSource, Money, Rate};
use crate::TaxDeficitResult;

// ---------------------------------------------------------------------------
// Input Types
// ---------------------------------------------------------------------------

/// One row of the CbCR aggregate table as published.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PanelRecord {
    /// Income year of the report
    pub year: i32,
    /// ISO alpha-3 code of the ultimate parent's jurisdiction
    pub parent_code: String,
    pub parent_name: String,
    /// ISO alpha-3 code of the jurisdiction of operation, or an aggregate code
    pub partner_code: String,
    pub partner_name: String,
    /// Profit (loss) before income tax, USD
    pub profit_before_tax: Money,
    /// Profit net of intra-group dividends, where the source publishes it
    #[serde(default)]
    pub adjusted_profit_before_tax: Option<Money>,
    /// Income tax paid on a cash basis
    #[serde(default)]
    pub tax_paid: Option<Money>,
    /// Income tax accrued for the current year, used when `tax_paid` is missing
    #[serde(default)]
    pub tax_accrued: Option<Money>,
    #[serde(default)]
    pub total_revenues: Option<Money>,
    /// Revenues from unrelated parties, the UPR apportionment factor
    #[serde(default)]
    pub unrelated_party_revenues: Option<Money>,
    /// Tangible assets other than cash, USD
    #[serde(default)]
    pub tangible_assets: Option<Money>,
    /// Headcount
    #[serde(default)]
    pub employees: Option<Decimal>,
}

// ---------------------------------------------------------------------------
// Output Types
// ---------------------------------------------------------------------------

/// Which figure ended up in `tax_paid`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaxBasis {
    Paid,
    Accrued,
    StatutoryRate,
}

/// A cleaned (parent, partner, year) observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JurisdictionObservation {
    pub year: i32,
    pub parent_code: String,
    pub parent_name: String,
    pub partner_code: String,
    pub partner_name: String,
    pub source: DataSource,
    pub profit_before_tax: Money,
    pub adjusted_profit_before_tax: Option<Money>,
    /// Tax paid, or the fallback recorded in `tax_basis`
    pub tax_paid: Money,
    pub tax_basis: TaxBasis,
    pub total_revenues: Money,
    pub unrelated_party_revenues: Money,
    pub tangible_assets: Option<Money>,
    pub employees: Option<Decimal>,
    /// Statutory CIT rate of the partner jurisdiction
    pub statutory_rate: Option<Rate>,
}

impl JurisdictionObservation {
    pub fn is_domestic(&self) -> bool {
        self.parent_code == self.partner_code
    }

    pub fn has_aggregate_partner(&self) -> bool {
        is_aggregate_code(&self.partner_code)
    }

    /// Tax paid over profit; undefined for non-positive profit, floored at zero.
    pub fn etr(&self) -> Option<Rate> {
        if self.profit_before_tax <= Decimal::ZERO {
            return None;
        }
        Some((self.tax_paid / self.profit_before_tax).max(Decimal::ZERO))
    }
}

/// The cleaned multi-year CbCR panel.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Panel {
    observations: Vec<JurisdictionObservation>,
}

// ---------------------------------------------------------------------------
// Cleaning
// ---------------------------------------------------------------------------

impl Panel {
    /// Clean raw records: drop stateless rows and foreign totals of non-minimum
    /// reporters, reject duplicates, and fill missing tax paid.
    pub fn clean(
        records: Vec<PanelRecord>,
        classification: &CountryClassification,
        statutory_rates: &CountrySeries,
    ) -> TaxDeficitResult<Self> {
        let mut seen: BTreeSet<(i32, String, String)> = BTreeSet::new();
        let mut observations = Vec::with_capacity(records.len());

        for r in records {
            if r.partner_code == STATELESS_CODE {
                continue;
            }
            if r.partner_code == FOREIGN_TOTAL_CODE
                && classification.granularity(&r.parent_code, r.year)
                    != ReportingGranularity::Minimum
            {
                continue;
            }
            if r.parent_code.is_empty() || r.partner_code.is_empty() {
                return Err(TaxDeficitError::DataFormat(format!(
                    "panel row in {} has an empty country code",
                    r.year
                )));
            }
            let key = (r.year, r.parent_code.clone(), r.partner_code.clone());
            if !seen.insert(key) {
                return Err(TaxDeficitError::DataFormat(format!(
                    "duplicate panel row {} -> {} in {}",
                    r.parent_code, r.partner_code, r.year
                )));
            }

            let statutory_rate = statutory_rates.get(r.year, &r.partner_code);
            let (tax_paid, tax_basis) = match (r.tax_paid, r.tax_accrued) {
                (Some(t), _) => (t, TaxBasis::Paid),
                (None, Some(t)) => (t, TaxBasis::Accrued),
                (None, None) if r.profit_before_tax <= Decimal::ZERO => {
                    (Decimal::ZERO, TaxBasis::StatutoryRate)
                }
                (None, None) => {
                    let rate = statutory_rate.ok_or_else(|| {
                        TaxDeficitError::missing(
                            "statutory rates",
                            format!("{} in {} (needed to impute tax paid)", r.partner_code, r.year),
                        )
                    })?;
                    (r.profit_before_tax * rate, TaxBasis::StatutoryRate)
                }
            };

            observations.push(JurisdictionObservation {
                year: r.year,
                parent_code: r.parent_code,
                parent_name: r.parent_name,
                partner_code: r.partner_code,
                partner_name: r.partner_name,
                source: DataSource::Cbcr,
                profit_before_tax: r.profit_before_tax,
                adjusted_profit_before_tax: r.adjusted_profit_before_tax,
                tax_paid,
                tax_basis,
                total_revenues: r.total_revenues.unwrap_or_default(),
                unrelated_party_revenues: r.unrelated_party_revenues.unwrap_or_default(),
                tangible_assets: r.tangible_assets,
                employees: r.employees,
                statutory_rate,
            });
        }

        Ok(Panel { observations })
    }

    pub fn observations(&self) -> &[JurisdictionObservation] {
        &self.observations
    }

    pub fn for_year(&self, year: i32) -> impl Iterator<Item = &JurisdictionObservation> {
        self.observations.iter().filter(move |o| o.year == year)
    }

    pub fn has_year(&self, year: i32) -> bool {
        self.observations.iter().any(|o| o.year == year)
    }

    pub fn years(&self) -> BTreeSet<i32> {
        self.observations.iter().map(|o| o.year).collect()
    }

    pub fn parents(&self, year: i32) -> BTreeSet<String> {
        self.for_year(year).map(|o| o.parent_code.clone()).collect()
    }

    pub fn find(&self, year: i32, parent: &str, partner: &str) -> Option<&JurisdictionObservation> {
        self.for_year(year)
            .find(|o| o.parent_code == parent && o.partner_code == partner)
    }

    /// Rows of one parent in one year, keyed by partner code.
    pub fn group(&self, year: i32, parent: &str) -> BTreeMap<String, &JurisdictionObservation> {
        self.for_year(year)
            .filter(|o| o.parent_code == parent)
            .map(|o| (o.partner_code.clone(), o))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::classification::CountryInfo;
    use crate::reference::series::SeriesPoint;
    use rust_decimal_macros::dec;

    fn record(parent: &str, partner: &str, profit: Decimal, tax: Option<Decimal>) -> PanelRecord {
        PanelRecord {
            year: 2017,
            parent_code: parent.into(),
            parent_name: parent.into(),
            partner_code: partner.into(),
            partner_name: partner.into(),
            profit_before_tax: profit,
            adjusted_profit_before_tax: None,
            tax_paid: tax,
            tax_accrued: None,
            total_revenues: Some(dec!(1000)),
            unrelated_party_revenues: Some(dec!(800)),
            tangible_assets: None,
            employees: None,
        }
    }

    fn classification() -> CountryClassification {
        CountryClassification::new(vec![
            CountryInfo::new("FRA", "France"),
            CountryInfo::new("NLD", "Netherlands"),
        ])
        .unwrap()
    }

    fn rates() -> CountrySeries {
        CountrySeries::new(
            "statutory rates",
            vec![SeriesPoint {
                year: 2017,
                country_code: "DEU".into(),
                value: dec!(0.30),
            }],
        )
        .unwrap()
    }

    #[test]
    fn test_stateless_and_foreign_total_rows_dropped() {
        let panel = Panel::clean(
            vec![
                record("FRA", "FRA", dec!(100), Some(dec!(20))),
                record("FRA", "STA", dec!(5), Some(dec!(0))),
                record("FRA", "FJT", dec!(50), Some(dec!(5))),
                record("NLD", "FJT", dec!(50), Some(dec!(5))),
            ],
            &classification(),
            &rates(),
        )
        .unwrap();
        assert_eq!(panel.observations().len(), 2);
        assert!(panel.find(2017, "NLD", "FJT").is_some());
        assert!(panel.find(2017, "FRA", "FJT").is_none());
    }

    #[test]
    fn test_duplicate_rows_rejected() {
        let err = Panel::clean(
            vec![
                record("FRA", "DEU", dec!(100), Some(dec!(20))),
                record("FRA", "DEU", dec!(100), Some(dec!(20))),
            ],
            &classification(),
            &rates(),
        );
        assert!(matches!(err, Err(TaxDeficitError::DataFormat(_))));
    }

    #[test]
    fn test_tax_paid_falls_back_to_statutory_rate() {
        let panel = Panel::clean(
            vec![record("FRA", "DEU", dec!(100), None)],
            &classification(),
            &rates(),
        )
        .unwrap();
        let obs = panel.find(2017, "FRA", "DEU").unwrap();
        assert_eq!(obs.tax_paid, dec!(30));
        assert_eq!(obs.tax_basis, TaxBasis::StatutoryRate);
    }

    #[test]
    fn test_missing_statutory_rate_is_a_data_error() {
        let err = Panel::clean(
            vec![record("FRA", "ITA", dec!(100), None)],
            &classification(),
            &rates(),
        );
        assert!(matches!(err, Err(TaxDeficitError::MissingData { .. })));
    }

    #[test]
    fn test_etr_undefined_for_losses_and_floored_at_zero() {
        let panel = Panel::clean(
            vec![
                record("FRA", "FRA", dec!(-10), Some(dec!(1))),
                record("FRA", "DEU", dec!(100), Some(dec!(-5))),
            ],
            &classification(),
            &rates(),
        )
        .unwrap();
        assert_eq!(panel.find(2017, "FRA", "FRA").unwrap().etr(), None);
        assert_eq!(panel.find(2017, "FRA", "DEU").unwrap().etr(), Some(dec!(0)));
    }
}
