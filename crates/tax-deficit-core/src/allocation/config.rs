use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::deficit::params::validate_minimum_rate;
use crate::error::TaxDeficitError;
use crate::imputation::DEFAULT_MINIMUM_BREAKDOWN;
use crate::reference::classification::is_aggregate_code;
use crate::types::Rate;
use crate::TaxDeficitResult;

// ---------------------------------------------------------------------------
// Instruments
// ---------------------------------------------------------------------------

/// Collection instruments, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Instrument {
    Qdmtt,
    Iir,
    Utpr,
}

impl Instrument {
    pub const PRIORITY: [Instrument; 3] = [Instrument::Qdmtt, Instrument::Iir, Instrument::Utpr];

    pub fn label(self) -> &'static str {
        match self {
            Instrument::Qdmtt => "QDMTT",
            Instrument::Iir => "IIR",
            Instrument::Utpr => "UTPR",
        }
    }
}

/// Whether the collected deficit is domestic to the parent or foreign-sourced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Location {
    Domestic,
    Foreign,
}

impl Location {
    pub fn of(domestic: bool) -> Self {
        if domestic {
            Location::Domestic
        } else {
            Location::Foreign
        }
    }
}

/// Adopters of one instrument.
#[derive(Debug, Clone, Copy)]
pub struct InstrumentCoverage<'a> {
    pub incl_domestic: &'a BTreeSet<String>,
    pub excl_domestic: &'a BTreeSet<String>,
}

impl InstrumentCoverage<'_> {
    pub fn adopts(&self, country: &str) -> bool {
        self.incl_domestic.contains(country) || self.excl_domestic.contains(country)
    }

    /// Whether `country` applies the instrument to a deficit that is (or is not)
    /// domestic to the parent.
    pub fn reaches(&self, country: &str, domestic: bool) -> bool {
        if domestic {
            self.incl_domestic.contains(country)
        } else {
            self.adopts(country)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.incl_domestic.is_empty() && self.excl_domestic.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Scenario configuration
// ---------------------------------------------------------------------------

/// Every option recognised by the bilateral allocation engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AllocationScenarioConfig {
    pub minimum_rate: Rate,
    #[serde(default)]
    pub qdmtt_incl_domestic: BTreeSet<String>,
    #[serde(default)]
    pub qdmtt_excl_domestic: BTreeSet<String>,
    #[serde(default)]
    pub iir_incl_domestic: BTreeSet<String>,
    #[serde(default)]
    pub iir_excl_domestic: BTreeSet<String>,
    #[serde(default)]
    pub utpr_incl_domestic: BTreeSet<String>,
    #[serde(default)]
    pub utpr_excl_domestic: BTreeSet<String>,
    /// Exempt parents with a high statutory rate from the UTPR
    #[serde(default)]
    pub stat_rate_condition_for_utpr: bool,
    #[serde(default)]
    pub min_stat_rate_for_utpr_safe_harbor: Option<Rate>,
    /// Extend the safe harbor from the parent's domestic deficit to its foreign deficit
    #[serde(default)]
    pub utpr_safe_harbor_incl_foreign_profits: bool,
    #[serde(default = "unit_weight")]
    pub weight_upr: Decimal,
    #[serde(default)]
    pub weight_assets: Decimal,
    #[serde(default)]
    pub weight_employees: Decimal,
    #[serde(default = "default_minimum_breakdown")]
    pub minimum_breakdown: usize,
    /// Normalise UTPR keys over implementing countries only
    #[serde(default)]
    pub among_countries_implementing: bool,
    #[serde(default)]
    pub return_bilateral_details: bool,
    #[serde(default)]
    pub etr_increment: Rate,
}

fn unit_weight() -> Decimal {
    Decimal::ONE
}

fn default_minimum_breakdown() -> usize {
    DEFAULT_MINIMUM_BREAKDOWN
}

fn to_set<I, S>(countries: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    countries.into_iter().map(Into::into).collect()
}

impl AllocationScenarioConfig {
    pub fn new(minimum_rate: Rate) -> Self {
        AllocationScenarioConfig {
            minimum_rate,
            qdmtt_incl_domestic: BTreeSet::new(),
            qdmtt_excl_domestic: BTreeSet::new(),
            iir_incl_domestic: BTreeSet::new(),
            iir_excl_domestic: BTreeSet::new(),
            utpr_incl_domestic: BTreeSet::new(),
            utpr_excl_domestic: BTreeSet::new(),
            stat_rate_condition_for_utpr: false,
            min_stat_rate_for_utpr_safe_harbor: None,
            utpr_safe_harbor_incl_foreign_profits: false,
            weight_upr: Decimal::ONE,
            weight_assets: Decimal::ZERO,
            weight_employees: Decimal::ZERO,
            minimum_breakdown: DEFAULT_MINIMUM_BREAKDOWN,
            among_countries_implementing: false,
            return_bilateral_details: false,
            etr_increment: Decimal::ZERO,
        }
    }

    pub fn with_qdmtt<I, J, S, T>(mut self, incl: I, excl: J) -> Self
    where
        I: IntoIterator<Item = S>,
        J: IntoIterator<Item = T>,
        S: Into<String>,
        T: Into<String>,
    {
        self.qdmtt_incl_domestic = to_set(incl);
        self.qdmtt_excl_domestic = to_set(excl);
        self
    }

    pub fn with_iir<I, J, S, T>(mut self, incl: I, excl: J) -> Self
    where
        I: IntoIterator<Item = S>,
        J: IntoIterator<Item = T>,
        S: Into<String>,
        T: Into<String>,
    {
        self.iir_incl_domestic = to_set(incl);
        self.iir_excl_domestic = to_set(excl);
        self
    }

    pub fn with_utpr<I, J, S, T>(mut self, incl: I, excl: J) -> Self
    where
        I: IntoIterator<Item = S>,
        J: IntoIterator<Item = T>,
        S: Into<String>,
        T: Into<String>,
    {
        self.utpr_incl_domestic = to_set(incl);
        self.utpr_excl_domestic = to_set(excl);
        self
    }

    pub fn with_weights(mut self, upr: Decimal, assets: Decimal, employees: Decimal) -> Self {
        self.weight_upr = upr;
        self.weight_assets = assets;
        self.weight_employees = employees;
        self
    }

    pub fn with_safe_harbor(mut self, min_stat_rate: Rate, incl_foreign_profits: bool) -> Self {
        self.stat_rate_condition_for_utpr = true;
        self.min_stat_rate_for_utpr_safe_harbor = Some(min_stat_rate);
        self.utpr_safe_harbor_incl_foreign_profits = incl_foreign_profits;
        self
    }

    pub fn among_implementing(mut self, among: bool) -> Self {
        self.among_countries_implementing = among;
        self
    }

    pub fn with_details(mut self, details: bool) -> Self {
        self.return_bilateral_details = details;
        self
    }

    pub fn with_etr_increment(mut self, increment: Rate) -> Self {
        self.etr_increment = increment;
        self
    }

    pub fn with_minimum_breakdown(mut self, minimum_breakdown: usize) -> Self {
        self.minimum_breakdown = minimum_breakdown;
        self
    }

    pub fn coverage(&self, instrument: Instrument) -> InstrumentCoverage<'_> {
        let (incl_domestic, excl_domestic) = match instrument {
            Instrument::Qdmtt => (&self.qdmtt_incl_domestic, &self.qdmtt_excl_domestic),
            Instrument::Iir => (&self.iir_incl_domestic, &self.iir_excl_domestic),
            Instrument::Utpr => (&self.utpr_incl_domestic, &self.utpr_excl_domestic),
        };
        InstrumentCoverage {
            incl_domestic,
            excl_domestic,
        }
    }

    /// Union of every instrument list.
    pub fn implementing_countries(&self) -> BTreeSet<String> {
        Instrument::PRIORITY
            .iter()
            .flat_map(|i| {
                let c = self.coverage(*i);
                c.incl_domestic.iter().chain(c.excl_domestic.iter())
            })
            .cloned()
            .collect()
    }

    /// Safe-harbor threshold when the statutory-rate condition is on.
    pub fn safe_harbor_threshold(&self) -> Option<Rate> {
        if self.stat_rate_condition_for_utpr {
            self.min_stat_rate_for_utpr_safe_harbor
        } else {
            None
        }
    }

    pub fn validate(&self) -> TaxDeficitResult<()> {
        validate_minimum_rate(self.minimum_rate)?;
        if self.etr_increment < Decimal::ZERO {
            return Err(TaxDeficitError::invalid("etr_increment", "must be non-negative"));
        }

        for instrument in Instrument::PRIORITY {
            let c = self.coverage(instrument);
            if let Some(country) = c.incl_domestic.intersection(c.excl_domestic).next() {
                return Err(TaxDeficitError::Configuration(format!(
                    "{country} is listed both including and excluding domestic deficits for the {}",
                    instrument.label()
                )));
            }
            if let Some(code) = c
                .incl_domestic
                .iter()
                .chain(c.excl_domestic.iter())
                .find(|code| is_aggregate_code(code))
            {
                return Err(TaxDeficitError::Configuration(format!(
                    "aggregate partner code {code} cannot adopt the {}",
                    instrument.label()
                )));
            }
        }

        if self.stat_rate_condition_for_utpr {
            match self.min_stat_rate_for_utpr_safe_harbor {
                None => {
                    return Err(TaxDeficitError::Configuration(
                        "stat_rate_condition_for_utpr is set but min_stat_rate_for_utpr_safe_harbor is missing"
                            .into(),
                    ))
                }
                Some(r) if r < Decimal::ZERO || r > Decimal::ONE => {
                    return Err(TaxDeficitError::invalid(
                        "min_stat_rate_for_utpr_safe_harbor",
                        "must lie within [0, 1]",
                    ))
                }
                Some(_) => {}
            }
        }

        for (field, w) in [
            ("weight_upr", self.weight_upr),
            ("weight_assets", self.weight_assets),
            ("weight_employees", self.weight_employees),
        ] {
            if w < Decimal::ZERO {
                return Err(TaxDeficitError::invalid(field, "weights must be non-negative"));
            }
        }
        if (self.weight_upr + self.weight_assets + self.weight_employees).is_zero() {
            return Err(TaxDeficitError::invalid(
                "weight_upr",
                "at least one allocation key weight must be positive",
            ));
        }
        Ok(())
    }
}
