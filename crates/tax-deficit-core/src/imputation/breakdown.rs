use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Instant;

use super::granularity::breakdown_counts;
use crate::deficit::DeficitTable;
use crate::reference::classification::CountryClassification;
use crate::types::{with_metadata, ComputationOutput, Money, Origin, Rate};
use crate::TaxDeficitResult;

// ---------------------------------------------------------------------------
// Output Types
// ---------------------------------------------------------------------------

/// Where the split of a parent's unclassified foreign deficit comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ImputationBasis {
    /// Granular parent: reported split, aggregate rows counted as non-haven
    Reported,
    RegionProxy { region: String },
    IncomeGroupProxy { income_group: String },
    /// No comparable parent: unclassified deficit attributed to domestic
    AllDomesticFallback,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecomposedDeficit {
    pub parent_code: String,
    pub parent_name: String,
    pub breakdown_count: usize,
    pub total: Money,
    pub domestic: Money,
    pub non_haven_foreign: Money,
    pub tax_haven_foreign: Money,
    /// Part of the total that was booked under aggregate partners
    pub unclassified: Money,
    pub basis: ImputationBasis,
    pub flagged: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecomposedDeficitTable {
    pub year: i32,
    pub minimum_rate: Rate,
    pub minimum_breakdown: usize,
    pub entries: Vec<DecomposedDeficit>,
}

impl DecomposedDeficitTable {
    pub fn get(&self, parent: &str) -> Option<&DecomposedDeficit> {
        self.entries.iter().find(|e| e.parent_code == parent)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
struct Buckets {
    name: String,
    domestic: Money,
    non_haven: Money,
    tax_haven: Money,
    unclassified: Money,
}

impl Buckets {
    fn total(&self) -> Money {
        self.domestic + self.non_haven + self.tax_haven + self.unclassified
    }
}

fn bucket_table(table: &DeficitTable) -> BTreeMap<String, Buckets> {
    let mut buckets: BTreeMap<String, Buckets> = BTreeMap::new();
    for r in &table.rows {
        let b = buckets.entry(r.parent_code.clone()).or_default();
        b.name.clone_from(&r.parent_name);
        match r.origin {
            Origin::Domestic => b.domestic += r.tax_deficit,
            Origin::NonHavenForeign => b.non_haven += r.tax_deficit,
            Origin::TaxHavenForeign => b.tax_haven += r.tax_deficit,
            Origin::UnclassifiedForeign => b.unclassified += r.tax_deficit,
        }
    }
    buckets
}

/// Haven share of foreign deficit among `members`; `None` when they have no foreign deficit.
fn haven_share<'a>(members: impl Iterator<Item = &'a Buckets>) -> Option<Rate> {
    let (mut haven, mut foreign) = (Decimal::ZERO, Decimal::ZERO);
    for b in members {
        haven += b.tax_haven;
        foreign += b.tax_haven + b.non_haven + b.unclassified;
    }
    (foreign > Decimal::ZERO).then(|| haven / foreign)
}

// ---------------------------------------------------------------------------
// Core Computation
// ---------------------------------------------------------------------------

/// Decompose every parent's deficit into domestic, non-haven and tax-haven shares.
///
/// Parents reporting fewer than `minimum_breakdown` partner jurisdictions have
/// their unclassified foreign deficit split along the haven share of granular
/// parents in the same region, then the same income group. With neither, it is
/// attributed to domestic and the entry is flagged.
pub fn impute_missing_breakdowns(
    table: &DeficitTable,
    classification: &CountryClassification,
    minimum_breakdown: usize,
) -> TaxDeficitResult<ComputationOutput<DecomposedDeficitTable>> {
    let start = Instant::now();
    let counts = breakdown_counts(table);
    let buckets = bucket_table(table);
    let granular: Vec<&String> = counts
        .iter()
        .filter(|(_, n)| **n >= minimum_breakdown)
        .map(|(code, _)| code)
        .collect();

    let mut warnings = Vec::new();
    let mut entries = Vec::with_capacity(buckets.len());

    for (code, b) in &buckets {
        let breakdown_count = counts.get(code).copied().unwrap_or(0);
        let total = b.total();

        let (basis, share) = if breakdown_count >= minimum_breakdown {
            (ImputationBasis::Reported, None)
        } else {
            let peers = |same: &dyn Fn(&str) -> bool| {
                haven_share(
                    granular
                        .iter()
                        .filter(|g| g.as_str() != code.as_str() && same(g.as_str()))
                        .filter_map(|g| buckets.get(g.as_str())),
                )
            };
            let region = classification.region(code);
            let income = classification.income_group(code);
            let by_region = region
                .and_then(|r| peers(&|g| classification.region(g) == Some(r)).map(|s| (r, s)));
            let by_income = income.and_then(|i| {
                peers(&|g| classification.income_group(g) == Some(i)).map(|s| (i, s))
            });
            match (by_region, by_income) {
                (Some((r, s)), _) => (
                    ImputationBasis::RegionProxy {
                        region: r.to_string(),
                    },
                    Some(s),
                ),
                (None, Some((i, s))) => (
                    ImputationBasis::IncomeGroupProxy {
                        income_group: i.to_string(),
                    },
                    Some(s),
                ),
                (None, None) => (ImputationBasis::AllDomesticFallback, None),
            }
        };

        let (domestic, tax_haven) = match (&basis, share) {
            (ImputationBasis::AllDomesticFallback, _) => (b.domestic + b.unclassified, b.tax_haven),
            (_, Some(s)) => (b.domestic, b.tax_haven + b.unclassified * s),
            _ => (b.domestic, b.tax_haven),
        };
        let flagged =
            basis == ImputationBasis::AllDomesticFallback && b.unclassified > Decimal::ZERO;
        if flagged {
            let msg = format!(
                "{code}: no comparable granular parent, {} of unclassified foreign deficit attributed to domestic",
                b.unclassified
            );
            tracing::warn!(parent = %code, unclassified = %b.unclassified, "all-domestic imputation fallback");
            warnings.push(msg);
        }

        entries.push(DecomposedDeficit {
            parent_code: code.clone(),
            parent_name: b.name.clone(),
            breakdown_count,
            total,
            domestic,
            non_haven_foreign: total - domestic - tax_haven,
            tax_haven_foreign: tax_haven,
            unclassified: b.unclassified,
            basis,
            flagged,
        });
    }

    let result = DecomposedDeficitTable {
        year: table.year,
        minimum_rate: table.minimum_rate,
        minimum_breakdown,
        entries,
    };
    Ok(with_metadata(
        "Origin decomposition with proxy imputation for coarsely reporting parents",
        &serde_json::json!({ "minimum_breakdown": minimum_breakdown }),
        warnings,
        start.elapsed().as_micros() as u64,
        result,
    ))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
