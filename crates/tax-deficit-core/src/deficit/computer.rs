use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

use super::params::{DeficitParams, MinimumTax};
use super::prepare::{prepare_panel, PreparedPanel, TwzParent};
use super::twz::{
    twz_domestic_deficit, twz_haven_deficit, twz_non_haven_deficit, TWZ_HAVEN_ETR,
};
use crate::reference::classification::{TWZ_HAVENS_CODE, TWZ_NON_HAVENS_CODE};
use crate::reference::ReferenceData;
use crate::types::{with_metadata, ComputationOutput, DataSource, Money, Origin, Rate};
use crate::{TaxDeficitError, TaxDeficitResult};

// ---------------------------------------------------------------------------
// Output Types
// ---------------------------------------------------------------------------

/// Tax deficit of one (parent, partner) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxDeficitRow {
    /// Income year
    pub year: i32,
    /// Headquarter jurisdiction of the group
    pub parent_code: String,
    pub parent_name: String,
    /// Jurisdiction where the profit is booked, or an aggregate code
    pub partner_code: String,
    pub partner_name: String,
    /// CbCR row or TWZ estimate
    pub source: DataSource,
    pub origin: Origin,
    /// True for continental and rest-of-world partner codes
    pub aggregate_partner: bool,
    /// Profit after country treatments, before carve-outs
    pub profit_before_tax: Money,
    /// Substance-based income exclusion deducted from the profit
    pub carve_out: Money,
    /// Profit the minimum rate applies to
    pub profit_base: Money,
    /// ETR before any increment
    pub etr: Option<Rate>,
    /// Row excluded under the de minimis test
    pub de_minimis: bool,
    /// (minimum rate - ETR - increment) × profit base, floored at zero
    pub tax_deficit: Money,
}

impl TaxDeficitRow {
    pub fn is_domestic(&self) -> bool {
        self.origin.is_domestic()
    }
}

/// Every (parent, partner) tax deficit of one income year at one minimum rate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeficitTable {
    pub year: i32,
    pub minimum_rate: Rate,
    /// Points added to every ETR before the gap is taken
    pub etr_increment: Rate,
    pub rows: Vec<TaxDeficitRow>,
}

impl DeficitTable {
    pub fn parents(&self) -> BTreeSet<String> {
        self.rows.iter().map(|r| r.parent_code.clone()).collect()
    }

    pub fn rows_of<'a>(&'a self, parent: &'a str) -> impl Iterator<Item = &'a TaxDeficitRow> {
        self.rows.iter().filter(move |r| r.parent_code == parent)
    }

    pub fn parent_total(&self, parent: &str) -> Money {
        self.rows_of(parent).map(|r| r.tax_deficit).sum()
    }

    pub fn total(&self) -> Money {
        self.rows.iter().map(|r| r.tax_deficit).sum()
    }

    /// Keep the rows of one parent. A parent with no CbCR or TWZ row is a
    /// data error.
    pub fn only_parent(mut self, parent: &str) -> TaxDeficitResult<Self> {
        self.rows.retain(|r| r.parent_code == parent);
        if self.rows.is_empty() {
            return Err(TaxDeficitError::missing(
                "CbCR panel",
                format!("{parent} in {}", self.year),
            ));
        }
        Ok(self)
    }

    pub fn parent_totals(&self) -> BTreeMap<String, Money> {
        let mut totals: BTreeMap<String, Money> = BTreeMap::new();
        for r in &self.rows {
            *totals.entry(r.parent_code.clone()).or_default() += r.tax_deficit;
        }
        totals
    }
}

// ---------------------------------------------------------------------------
// Core Computation
// ---------------------------------------------------------------------------

/// Tax deficits of every (parent, partner) pair of a prepared panel, plus the
/// TWZ rows of parents with no usable CbCR and the TWZ tax-haven upgrade of
/// finely reporting CbCR parents.
pub fn tabulate_deficits(prepared: &PreparedPanel, tax: &MinimumTax) -> DeficitTable {
    let year = prepared.year;
    let mut rows: Vec<TaxDeficitRow> = prepared
        .rows
        .iter()
        .map(|r| {
            let deficit = if r.de_minimis {
                Decimal::ZERO
            } else {
                tax.deficit(r.etr, r.profit_base)
            };
            TaxDeficitRow {
                year,
                parent_code: r.observation.parent_code.clone(),
                parent_name: r.observation.parent_name.clone(),
                partner_code: r.observation.partner_code.clone(),
                partner_name: r.observation.partner_name.clone(),
                source: DataSource::Cbcr,
                origin: r.origin,
                aggregate_partner: r.aggregate_partner,
                profit_before_tax: r.observation.profit_before_tax,
                carve_out: r.carve_out,
                profit_base: r.profit_base,
                etr: r.etr,
                de_minimis: r.de_minimis,
                tax_deficit: deficit,
            }
        })
        .collect();

    let haven_gap = tax.gap(TWZ_HAVEN_ETR);
    let havens = (TWZ_HAVENS_CODE, "Tax havens (TWZ)");

    for parent in &prepared.twz {
        let haven_deficit = twz_haven_deficit(parent, tax);
        if parent.has_cbcr {
            if prepared.has_coarse_reporting(&parent.code) {
                continue;
            }
            let cbcr_haven: Money = rows
                .iter()
                .filter(|r| r.parent_code == parent.code && r.origin == Origin::TaxHavenForeign)
                .map(|r| r.tax_deficit)
                .sum();
            if haven_deficit > cbcr_haven {
                let upgrade = haven_deficit - cbcr_haven;
                tracing::debug!(parent = %parent.code, %upgrade, "TWZ tax-haven upgrade");
                rows.push(twz_row(
                    year,
                    parent,
                    havens,
                    Origin::TaxHavenForeign,
                    upgrade / haven_gap,
                    Some(TWZ_HAVEN_ETR),
                    upgrade,
                ));
            }
            continue;
        }

        if let Some(domestic) = twz_domestic_deficit(parent, tax) {
            rows.push(twz_row(
                year,
                parent,
                (parent.code.as_str(), parent.name.as_str()),
                Origin::Domestic,
                parent.domestic_profits.unwrap_or_default(),
                parent.domestic_etr,
                domestic,
            ));
        }
        rows.push(twz_row(
            year,
            parent,
            havens,
            Origin::TaxHavenForeign,
            parent.haven_profits,
            Some(TWZ_HAVEN_ETR),
            haven_deficit,
        ));
        rows.push(twz_row(
            year,
            parent,
            (TWZ_NON_HAVENS_CODE, "Non-havens (TWZ imputation)"),
            Origin::NonHavenForeign,
            Decimal::ZERO,
            None,
            twz_non_haven_deficit(parent, prepared, tax),
        ));
    }

    DeficitTable {
        year,
        minimum_rate: tax.rate,
        etr_increment: tax.etr_increment,
        rows,
    }
}

fn twz_row(
    year: i32,
    parent: &TwzParent,
    partner: (&str, &str),
    origin: Origin,
    base: Money,
    etr: Option<Rate>,
    deficit: Money,
) -> TaxDeficitRow {
    TaxDeficitRow {
        year,
        parent_code: parent.code.clone(),
        parent_name: parent.name.clone(),
        partner_code: partner.0.to_string(),
        partner_name: partner.1.to_string(),
        source: DataSource::Twz,
        origin,
        aggregate_partner: partner.0 == TWZ_HAVENS_CODE || partner.0 == TWZ_NON_HAVENS_CODE,
        profit_before_tax: base,
        carve_out: Decimal::ZERO,
        profit_base: base,
        etr,
        de_minimis: false,
        tax_deficit: deficit,
    }
}

/// Prepare the panel for `params.year` and compute its tax deficits at `minimum_rate`.
pub fn compute_tax_deficits(
    reference: &ReferenceData,
    params: &DeficitParams,
    minimum_rate: Rate,
) -> TaxDeficitResult<ComputationOutput<DeficitTable>> {
    let start = Instant::now();
    let tax = MinimumTax::new(minimum_rate, Decimal::ZERO)?;
    let prepared = prepare_panel(reference, params)?;
    let table = tabulate_deficits(&prepared, &tax);

    tracing::info!(
        year = params.year,
        %minimum_rate,
        total = %table.total(),
        "tax deficits computed"
    );

    let assumptions = serde_json::json!({
        "minimum_rate": minimum_rate.to_string(),
        "year": params.year,
        "carve_outs": prepared.carve_out_params,
        "treatments": prepared.treatments,
        "de_minimis_exclusion": params.de_minimis_exclusion,
    });
    Ok(with_metadata(
        "Tax deficit = max(0, minimum rate - ETR) x profit net of carve-outs",
        &assumptions,
        prepared.warnings.clone(),
        start.elapsed().as_micros() as u64,
        table,
    ))
}
