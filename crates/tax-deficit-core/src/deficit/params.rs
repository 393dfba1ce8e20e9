use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::TaxDeficitError;
use crate::types::Rate;
use crate::TaxDeficitResult;

// ---------------------------------------------------------------------------
// Carve-outs
// ---------------------------------------------------------------------------

/// Substance-based carve-out options as supplied by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CarveOutSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub rate_assets: Option<Rate>,
    #[serde(default)]
    pub rate_payroll: Option<Rate>,
    /// Mark-up on mean wages, in percent
    #[serde(default = "default_payroll_premium")]
    pub payroll_premium: Decimal,
    #[serde(default)]
    pub depreciation_only: Option<bool>,
    #[serde(default)]
    pub exclude_inventories: Option<bool>,
    #[serde(default)]
    pub ex_post_etrs: Option<bool>,
}

fn default_payroll_premium() -> Decimal {
    dec!(20)
}

impl Default for CarveOutSettings {
    fn default() -> Self {
        CarveOutSettings {
            enabled: false,
            rate_assets: None,
            rate_payroll: None,
            payroll_premium: default_payroll_premium(),
            depreciation_only: None,
            exclude_inventories: None,
            ex_post_etrs: None,
        }
    }
}

impl CarveOutSettings {
    fn with_rates(rate_assets: Rate, rate_payroll: Rate) -> Self {
        CarveOutSettings {
            enabled: true,
            rate_assets: Some(rate_assets),
            rate_payroll: Some(rate_payroll),
            depreciation_only: Some(false),
            exclude_inventories: Some(false),
            ex_post_etrs: Some(false),
            ..Default::default()
        }
    }

    /// Transition rates applying in the first year of the rules.
    pub fn first_year() -> Self {
        Self::with_rates(dec!(0.08), dec!(0.10))
    }

    /// Rates applying once the transition period is over.
    pub fn long_term() -> Self {
        Self::with_rates(dec!(0.05), dec!(0.05))
    }

    /// `None` when carve-outs are off.
    pub fn resolve(&self) -> TaxDeficitResult<Option<CarveOutParams>> {
        if !self.enabled {
            return Ok(None);
        }
        let (rate_assets, rate_payroll) = match (self.rate_assets, self.rate_payroll) {
            (Some(a), Some(p)) => (a, p),
            _ => {
                return Err(TaxDeficitError::Configuration(
                    "carve-outs are enabled but rate_assets and rate_payroll are not both set"
                        .into(),
                ))
            }
        };
        for (field, value) in [("rate_assets", rate_assets), ("rate_payroll", rate_payroll)] {
            if value < Decimal::ZERO || value > Decimal::ONE {
                return Err(TaxDeficitError::invalid(field, "must lie within [0, 1]"));
            }
        }
        if self.payroll_premium < Decimal::ZERO {
            return Err(TaxDeficitError::invalid("payroll_premium", "must be non-negative"));
        }
        Ok(Some(CarveOutParams {
            rate_assets,
            rate_payroll,
            payroll_premium: self.payroll_premium,
            depreciation_only: self.depreciation_only.unwrap_or(false),
            exclude_inventories: self.exclude_inventories.unwrap_or(false),
            ex_post_etrs: self.ex_post_etrs.unwrap_or(false),
        }))
    }

    /// True when every option has been spelled out explicitly.
    pub fn is_complete(&self) -> bool {
        self.rate_assets.is_some()
            && self.rate_payroll.is_some()
            && self.depreciation_only.is_some()
            && self.exclude_inventories.is_some()
            && self.ex_post_etrs.is_some()
    }
}

/// Validated carve-out parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CarveOutParams {
    pub rate_assets: Rate,
    pub rate_payroll: Rate,
    pub payroll_premium: Decimal,
    pub depreciation_only: bool,
    pub exclude_inventories: bool,
    pub ex_post_etrs: bool,
}

impl CarveOutParams {
    /// Share of reported tangible assets that enters the carve-out.
    pub fn assets_multiplier(&self) -> Decimal {
        match (self.depreciation_only, self.exclude_inventories) {
            (true, true) => dec!(0.1) * dec!(0.76),
            (true, false) => dec!(0.1),
            (false, true) => dec!(0.76),
            (false, false) => Decimal::ONE,
        }
    }

    pub fn payroll_factor(&self) -> Decimal {
        Decimal::ONE + self.payroll_premium / dec!(100)
    }
}

// ---------------------------------------------------------------------------
// Country treatments
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwedenTreatment {
    /// Drop Swedish CbCR and fall back on TWZ statistics
    Exclude,
    /// Remove intra-group dividends from the domestic row
    #[default]
    Adjust,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BelgiumTreatment {
    #[default]
    None,
    Exclude,
    Adjust,
    Replace,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SingaporeCaymanTreatment {
    #[default]
    None,
    Replace,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChinaTreatment2018 {
    #[default]
    AsReported,
    #[serde(rename = "2017_cbcr")]
    Cbcr2017,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CountryTreatmentSettings {
    #[serde(default)]
    pub sweden: SwedenTreatment,
    /// Overrides the built-in domestic profit ratio for `adjust`
    #[serde(default)]
    pub sweden_adjustment_ratio: Option<Rate>,
    #[serde(default)]
    pub belgium: BelgiumTreatment,
    #[serde(default)]
    pub singapore_cayman: SingaporeCaymanTreatment,
    #[serde(default)]
    pub china_2018: ChinaTreatment2018,
}

// ---------------------------------------------------------------------------
// Deficit parameters
// ---------------------------------------------------------------------------

/// Everything that shapes the tax-deficit table apart from the minimum rate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeficitParams {
    pub year: i32,
    #[serde(default)]
    pub carve_outs: CarveOutSettings,
    #[serde(default)]
    pub treatments: CountryTreatmentSettings,
    /// Zero the deficit of rows under €10m revenue and €1m profit
    #[serde(default)]
    pub de_minimis_exclusion: bool,
    #[serde(default)]
    pub use_adjusted_profits: bool,
    /// Average each ETR over these income years
    #[serde(default)]
    pub average_etrs_over: Option<Vec<i32>>,
    #[serde(default = "enabled")]
    pub include_twz: bool,
    /// Scale non-haven TWZ deficits from the 25% reference rate at low rates
    #[serde(default = "enabled")]
    pub alternative_imputation: bool,
}

fn enabled() -> bool {
    true
}

impl DeficitParams {
    pub fn for_year(year: i32) -> Self {
        DeficitParams {
            year,
            carve_outs: CarveOutSettings::default(),
            treatments: CountryTreatmentSettings::default(),
            de_minimis_exclusion: false,
            use_adjusted_profits: false,
            average_etrs_over: None,
            include_twz: true,
            alternative_imputation: true,
        }
    }

    pub fn validate(&self) -> TaxDeficitResult<()> {
        self.carve_outs.resolve()?;
        if let Some(years) = &self.average_etrs_over {
            if years.is_empty() {
                return Err(TaxDeficitError::Configuration(
                    "average_etrs_over must list at least one year".into(),
                ));
            }
        }
        if let Some(ratio) = self.treatments.sweden_adjustment_ratio {
            if ratio < Decimal::ZERO || ratio > Decimal::ONE {
                return Err(TaxDeficitError::invalid(
                    "sweden_adjustment_ratio",
                    "must lie within [0, 1]",
                ));
            }
        }
        Ok(())
    }
}

/// Minimum rate with the uniform ETR shift applied before comparison.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MinimumTax {
    pub rate: Rate,
    pub etr_increment: Rate,
}

impl MinimumTax {
    pub fn new(rate: Rate, etr_increment: Rate) -> TaxDeficitResult<Self> {
        validate_minimum_rate(rate)?;
        if etr_increment < Decimal::ZERO {
            return Err(TaxDeficitError::invalid("etr_increment", "must be non-negative"));
        }
        Ok(MinimumTax {
            rate,
            etr_increment,
        })
    }

    /// Top-up rate owed on profit taxed at `etr`.
    pub fn gap(&self, etr: Rate) -> Rate {
        (self.rate - (etr + self.etr_increment)).max(Decimal::ZERO)
    }

    /// Deficit on a profit base; zero when the ETR is undefined or the base is not positive.
    pub fn deficit(&self, etr: Option<Rate>, base: Decimal) -> Decimal {
        match etr {
            Some(etr) if base > Decimal::ZERO => self.gap(etr) * base,
            _ => Decimal::ZERO,
        }
    }

    pub fn at_rate(&self, rate: Rate) -> MinimumTax {
        MinimumTax {
            rate,
            etr_increment: self.etr_increment,
        }
    }
}

pub fn validate_minimum_rate(rate: Rate) -> TaxDeficitResult<()> {
    if rate <= Decimal::ZERO || rate > Decimal::ONE {
        return Err(TaxDeficitError::invalid("minimum_rate", "must lie within (0, 1]"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_carve_outs_without_rates_is_a_configuration_error() {
        let settings = CarveOutSettings {
            enabled: true,
            rate_assets: Some(dec!(0.05)),
            ..Default::default()
        };
        assert!(matches!(
            settings.resolve(),
            Err(TaxDeficitError::Configuration(_))
        ));
    }

    #[test]
    fn test_disabled_carve_outs_ignore_missing_rates() {
        assert_eq!(CarveOutSettings::default().resolve().unwrap(), None);
    }

    #[test]
    fn test_assets_multiplier_combinations() {
        let mut p = CarveOutSettings::long_term().resolve().unwrap().unwrap();
        assert_eq!(p.assets_multiplier(), dec!(1));
        p.depreciation_only = true;
        assert_eq!(p.assets_multiplier(), dec!(0.1));
        p.exclude_inventories = true;
        assert_eq!(p.assets_multiplier(), dec!(0.076));
        p.depreciation_only = false;
        assert_eq!(p.assets_multiplier(), dec!(0.76));
    }

    #[test]
    fn test_first_year_rates() {
        let p = CarveOutSettings::first_year().resolve().unwrap().unwrap();
        assert_eq!(p.rate_assets, dec!(0.08));
        assert_eq!(p.rate_payroll, dec!(0.10));
        assert_eq!(p.payroll_factor(), dec!(1.2));
    }

    #[test]
    fn test_minimum_tax_gap_and_deficit() {
        let m = MinimumTax::new(dec!(0.15), dec!(0)).unwrap();
        assert_eq!(m.deficit(Some(dec!(0.10)), dec!(1000)), dec!(50));
        assert_eq!(m.deficit(Some(dec!(0.20)), dec!(1000)), dec!(0));
        assert_eq!(m.deficit(None, dec!(1000)), dec!(0));
        assert_eq!(m.deficit(Some(dec!(0)), dec!(-5)), dec!(0));
        let shifted = MinimumTax::new(dec!(0.15), dec!(0.02)).unwrap();
        assert_eq!(shifted.deficit(Some(dec!(0.10)), dec!(1000)), dec!(30));
    }

    #[test]
    fn test_minimum_rate_bounds() {
        assert!(validate_minimum_rate(dec!(0)).is_err());
        assert!(validate_minimum_rate(dec!(1)).is_ok());
        assert!(validate_minimum_rate(dec!(1.01)).is_err());
    }

    #[test]
    fn test_params_reject_unknown_fields() {
        let err = serde_json::from_str::<DeficitParams>(r#"{"year": 2017, "carveouts": {}}"#);
        assert!(err.is_err());
        let ok: DeficitParams = serde_json::from_str(r#"{"year": 2017}"#).unwrap();
        assert!(ok.include_twz);
        assert_eq!(ok.treatments.sweden, SwedenTreatment::Adjust);
    }
}
