use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::time::Instant;

use super::config::{AllocationScenarioConfig, Instrument, Location};
use super::keys::{AllocationKey, AllocationWeights, PresenceTable};
use super::ledger::{
    AggregateAllocation, AllocationTable, BilateralAllocationRecord, BilateralLedger,
    CollectionIndicators, CountryAllocation, ParentDeficit, UnallocatedDeficit,
};
use super::waterfall::{run_waterfall, DeficitUnit, UnallocatedReason, WaterfallContext};
use crate::deficit::{tabulate_deficits, DeficitTable, MinimumTax, PreparedPanel};
use crate::imputation::breakdown_counts;
use crate::types::{with_metadata, ComputationOutput, Money};
use crate::TaxDeficitResult;

// ---------------------------------------------------------------------------
// Allocation run
// ---------------------------------------------------------------------------

/// Deficits, group presence and keys of one scenario, ready to allocate.
#[derive(Debug)]
pub struct AllocationRun<'a> {
    prepared: &'a PreparedPanel,
    config: &'a AllocationScenarioConfig,
    deficits: DeficitTable,
    presence: PresenceTable,
    keys: BTreeMap<String, AllocationKey>,
    warnings: Vec<String>,
}

impl<'a> AllocationRun<'a> {
    pub fn new(
        prepared: &'a PreparedPanel,
        config: &'a AllocationScenarioConfig,
    ) -> TaxDeficitResult<Self> {
        config.validate()?;
        let tax = MinimumTax::new(config.minimum_rate, config.etr_increment)?;
        let deficits = tabulate_deficits(prepared, &tax);

        let counts = breakdown_counts(&deficits);
        let presence = PresenceTable::build(prepared, &counts, config.minimum_breakdown);
        let implementing = config.implementing_countries();
        let weights = AllocationWeights::from_config(config);
        let keys: BTreeMap<String, AllocationKey> = presence
            .groups()
            .map(|(parent, group)| {
                let key = AllocationKey::compute(
                    group,
                    |c| !config.among_countries_implementing || implementing.contains(c),
                    &weights,
                );
                tracing::debug!(
                    parent = %parent,
                    basis = ?group.basis,
                    jurisdictions = key.shares.len(),
                    "allocation key"
                );
                (parent.clone(), key)
            })
            .collect();

        let mut warnings = Vec::new();
        if config.safe_harbor_threshold().is_some() {
            for parent in deficits.parents() {
                if prepared.statutory_rate(&parent).is_none() {
                    warnings.push(format!(
                        "no statutory rate for {parent} in {}; UTPR safe harbor not applied",
                        prepared.year
                    ));
                }
            }
        }

        tracing::info!(
            year = prepared.year,
            minimum_rate = %config.minimum_rate,
            etr_increment = %config.etr_increment,
            parents = keys.len(),
            "allocation scenario started"
        );

        Ok(AllocationRun {
            prepared,
            config,
            deficits,
            presence,
            keys,
            warnings,
        })
    }

    pub fn deficits(&self) -> &DeficitTable {
        &self.deficits
    }

    pub fn presence(&self) -> &PresenceTable {
        &self.presence
    }

    pub fn key(&self, parent: &str) -> Option<&AllocationKey> {
        self.keys.get(parent)
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn safe_harbor_applies(&self, parent: &str) -> bool {
        match (
            self.config.safe_harbor_threshold(),
            self.prepared.statutory_rate(parent),
        ) {
            (Some(threshold), Some(rate)) => rate >= threshold,
            _ => false,
        }
    }

    fn name_of(&self, code: &str) -> String {
        self.prepared.classification.name_of(code)
    }

    /// Row-level waterfall producing the (parent, collector, instrument, location) ledger.
    pub fn bilateral(&self) -> BilateralLedger {
        let empty = AllocationKey::default();
        let mut amounts: BTreeMap<(String, String, Instrument, Location), Money> = BTreeMap::new();
        let mut unallocated = Vec::new();
        let mut parents = Vec::new();

        for parent in self.deficits.parents() {
            let ctx = WaterfallContext {
                config: self.config,
                key: self.keys.get(&parent).unwrap_or(&empty),
                safe_harbor: self.safe_harbor_applies(&parent),
            };
            let mut allocated = Decimal::ZERO;
            let mut left = Decimal::ZERO;

            for row in self
                .deficits
                .rows_of(&parent)
                .filter(|r| r.tax_deficit > Decimal::ZERO)
            {
                let unit = DeficitUnit {
                    parent: &row.parent_code,
                    partner: &row.partner_code,
                    domestic: row.is_domestic(),
                    aggregate_partner: row.aggregate_partner,
                    amount: row.tax_deficit,
                };
                let outcome = run_waterfall(&unit, &ctx);
                for claim in outcome.claims {
                    allocated += claim.amount;
                    *amounts
                        .entry((parent.clone(), claim.collector, claim.instrument, claim.location))
                        .or_default() += claim.amount;
                }
                if let Some((amount, reason)) = outcome.unallocated {
                    left += amount;
                    unallocated.push(UnallocatedDeficit {
                        parent_code: parent.clone(),
                        partner_code: row.partner_code.clone(),
                        amount,
                        reason,
                    });
                }
            }

            parents.push(ParentDeficit {
                parent_name: self.prepared.parent_name(&parent),
                tax_deficit: self.deficits.parent_total(&parent),
                allocated,
                unallocated: left,
                parent_code: parent,
            });
        }

        let records = amounts
            .into_iter()
            .map(|((parent, collector, instrument, location), allocated)| {
                BilateralAllocationRecord {
                    parent_name: self.prepared.parent_name(&parent),
                    parent_code: parent,
                    collecting_name: self.name_of(&collector),
                    collecting_code: collector,
                    instrument,
                    location,
                    allocated,
                    indicators: CollectionIndicators::new(instrument, location),
                }
            })
            .collect();

        BilateralLedger {
            year: self.deficits.year,
            minimum_rate: self.deficits.minimum_rate,
            etr_increment: self.deficits.etr_increment,
            records,
            unallocated,
            parents,
        }
    }

    /// Parent-level path: bucket each parent's deficit by instrument, then apportion.
    pub fn aggregate(&self) -> AggregateAllocation {
        let qdmtt = self.config.coverage(Instrument::Qdmtt);
        let iir = self.config.coverage(Instrument::Iir);
        let utpr = self.config.coverage(Instrument::Utpr);

        let mut collected: BTreeMap<String, Money> = self
            .config
            .implementing_countries()
            .into_iter()
            .map(|c| (c, Decimal::ZERO))
            .collect();
        let mut unallocated = Decimal::ZERO;

        for parent in self.deficits.parents() {
            let mut qdmtt_base: BTreeMap<&str, Money> = BTreeMap::new();
            let mut iir_base = Decimal::ZERO;
            let mut utpr_domestic = Decimal::ZERO;
            let mut utpr_foreign = Decimal::ZERO;

            for row in self
                .deficits
                .rows_of(&parent)
                .filter(|r| r.tax_deficit > Decimal::ZERO)
            {
                let domestic = row.is_domestic();
                if !row.aggregate_partner && qdmtt.reaches(&row.partner_code, domestic) {
                    *qdmtt_base.entry(row.partner_code.as_str()).or_default() += row.tax_deficit;
                } else if iir.reaches(&parent, domestic) {
                    iir_base += row.tax_deficit;
                } else if domestic {
                    utpr_domestic += row.tax_deficit;
                } else {
                    utpr_foreign += row.tax_deficit;
                }
            }

            for (partner, amount) in qdmtt_base {
                *collected.entry(partner.to_string()).or_default() += amount;
            }
            if iir_base > Decimal::ZERO {
                *collected.entry(parent.clone()).or_default() += iir_base;
            }

            let key = self.keys.get(&parent);
            let safe_harbor = self.safe_harbor_applies(&parent);
            for (domestic, base) in [(true, utpr_domestic), (false, utpr_foreign)] {
                if base <= Decimal::ZERO {
                    continue;
                }
                let exempt = safe_harbor
                    && (domestic || self.config.utpr_safe_harbor_incl_foreign_profits);
                let mut apportioned = Decimal::ZERO;
                if !exempt {
                    if let Some(key) = key {
                        for (country, share) in &key.shares {
                            if utpr.reaches(country, domestic && *country == parent) {
                                let amount = base * *share;
                                apportioned += amount;
                                *collected.entry(country.clone()).or_default() += amount;
                            }
                        }
                    }
                }
                unallocated += base - apportioned;
            }
        }

        if unallocated > Decimal::ZERO {
            tracing::warn!(%unallocated, "tax deficit with no eligible collector");
        }

        AggregateAllocation {
            year: self.deficits.year,
            minimum_rate: self.deficits.minimum_rate,
            etr_increment: self.deficits.etr_increment,
            countries: collected
                .into_iter()
                .map(|(code, allocated)| CountryAllocation {
                    name: self.name_of(&code),
                    code,
                    allocated,
                })
                .collect(),
            unallocated,
        }
    }
}

// ---------------------------------------------------------------------------
// Public entry point
// ---------------------------------------------------------------------------

/// Allocate every parent's tax deficit through the QDMTT, IIR and UTPR waterfall.
pub fn allocate_bilateral_tax_deficits(
    prepared: &PreparedPanel,
    config: &AllocationScenarioConfig,
) -> TaxDeficitResult<ComputationOutput<AllocationTable>> {
    let start = Instant::now();
    let run = AllocationRun::new(prepared, config)?;
    let mut warnings: Vec<String> = prepared.warnings.clone();
    warnings.extend(run.warnings().iter().cloned());

    let table = if config.return_bilateral_details {
        let ledger = run.bilateral();
        let mut by_reason: BTreeMap<UnallocatedReason, Money> = BTreeMap::new();
        for u in &ledger.unallocated {
            *by_reason.entry(u.reason).or_default() += u.amount;
        }
        for (reason, amount) in by_reason {
            tracing::warn!(?reason, %amount, "tax deficit with no eligible collector");
            warnings.push(format!("{amount} of tax deficit unallocated ({reason:?})"));
        }
        AllocationTable::Bilateral(ledger)
    } else {
        let agg = run.aggregate();
        if agg.unallocated > Decimal::ZERO {
            warnings.push(format!("{} of tax deficit unallocated", agg.unallocated));
        }
        AllocationTable::Aggregate(agg)
    };

    tracing::info!(
        year = prepared.year,
        collectors = table.country_totals().len(),
        "allocation scenario finished"
    );

    Ok(with_metadata(
        "QDMTT then IIR then UTPR waterfall; UTPR apportioned by weighted UPR, assets and employees",
        config,
        warnings,
        start.elapsed().as_micros() as u64,
        table,
    ))
}
