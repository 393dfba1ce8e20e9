use std::collections::{BTreeMap, BTreeSet};

use crate::deficit::DeficitTable;

/// Partner jurisdictions a parent must report to count as granular.
pub const DEFAULT_MINIMUM_BREAKDOWN: usize = 60;

/// Number of distinct non-aggregate partner jurisdictions reported by each parent.
pub fn breakdown_counts(table: &DeficitTable) -> BTreeMap<String, usize> {
    let mut partners: BTreeMap<String, BTreeSet<&str>> = BTreeMap::new();
    for r in &table.rows {
        let entry = partners.entry(r.parent_code.clone()).or_default();
        if !r.aggregate_partner {
            entry.insert(r.partner_code.as_str());
        }
    }
    partners.into_iter().map(|(k, v)| (k, v.len())).collect()
}
