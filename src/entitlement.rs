//! Entitlement and consumption ledgers
//!
//! Both ledgers are open-ended category maps. Lookups are alias-aware and
//! never raise: absent data reads as zero entitlement and zero consumption,
//! which errs toward charging the employee rather than under-charging.

use std::collections::BTreeMap;

use crate::category;

/// Per-employee allowance budget, written by the external entitlement-rules
/// provider and read-only to this engine. The four legacy categories are
/// always present; further keys are dynamic.
#[derive(Debug, Clone, Default, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct EmployeeEntitlement {
    #[n(0)]
    pub employee_id: String,
    #[n(1)]
    pub allowances: BTreeMap<String, u32>,
}

impl EmployeeEntitlement {
    pub fn new(employee_id: impl Into<String>) -> Self {
        let mut allowances = BTreeMap::new();
        for legacy in category::LEGACY_CATEGORIES {
            allowances.insert(legacy.to_string(), 0);
        }
        Self {
            employee_id: employee_id.into(),
            allowances,
        }
    }

    pub fn with_allowance(mut self, category_name: &str, quantity: u32) -> Self {
        self.allowances
            .insert(category::normalize(category_name), quantity);
        self
    }

    pub fn total_for(&self, category_name: &str) -> u32 {
        lookup(&self.allowances, category_name)
    }
}

/// Quantities already ordered against the budget. Incremented exactly once
/// per successfully placed order item.
#[derive(Debug, Clone, Default, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct ConsumedEntitlement {
    #[n(0)]
    pub employee_id: String,
    #[n(1)]
    pub consumed: BTreeMap<String, u32>,
}

impl ConsumedEntitlement {
    pub fn new(employee_id: impl Into<String>) -> Self {
        Self {
            employee_id: employee_id.into(),
            consumed: BTreeMap::new(),
        }
    }

    pub fn consumed_for(&self, category_name: &str) -> u32 {
        lookup(&self.consumed, category_name)
    }

    /// Fold a quantity into the ledger. An already-tracked equivalent key
    /// wins over creating a new one, so a `pant` order and a `trouser`
    /// order accumulate in a single counter.
    pub fn record(&mut self, category_name: &str, quantity: u32) {
        let base = category::normalize(category_name);
        if let Some(entry) = self.consumed.get_mut(&base) {
            *entry += quantity;
            return;
        }
        let aliases = category::resolve_against(&base, self.consumed.keys());
        for alias in aliases {
            if let Some(entry) = self.consumed.get_mut(&alias) {
                *entry += quantity;
                return;
            }
        }
        self.consumed.insert(base, quantity);
    }
}

/// Remaining allowance for a category, saturating at zero. Consumption
/// beyond the budget is the personal-payment trigger, not an error.
pub fn remaining(
    entitlement: &EmployeeEntitlement,
    consumed: &ConsumedEntitlement,
    category_name: &str,
) -> u32 {
    entitlement
        .total_for(category_name)
        .saturating_sub(consumed.consumed_for(category_name))
}

// Probe priority: the category's own key, then legacy keys among its
// aliases, then the remaining aliases. First non-zero hit wins.
fn lookup(map: &BTreeMap<String, u32>, category_name: &str) -> u32 {
    let wanted = category::normalize(category_name);
    if let Some(&qty) = map.get(&wanted) {
        if qty > 0 {
            return qty;
        }
    }
    let aliases = category::resolve_against(&wanted, map.keys());
    for legacy in category::LEGACY_CATEGORIES {
        if legacy != wanted && aliases.contains(legacy) {
            if let Some(&qty) = map.get(legacy) {
                if qty > 0 {
                    return qty;
                }
            }
        }
    }
    for alias in &aliases {
        if *alias == wanted || category::LEGACY_CATEGORIES.contains(&alias.as_str()) {
            continue;
        }
        if let Some(&qty) = map.get(alias) {
            if qty > 0 {
                return qty;
            }
        }
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remaining_prefers_exact_key() {
        let entitlement = EmployeeEntitlement::new("emp")
            .with_allowance("pant", 3)
            .with_allowance("trouser", 9);
        let consumed = ConsumedEntitlement::new("emp");

        assert_eq!(remaining(&entitlement, &consumed, "pant"), 3);
    }

    #[test]
    fn remaining_falls_back_to_alias() {
        let entitlement = EmployeeEntitlement::new("emp").with_allowance("trouser", 4);
        let mut consumed = ConsumedEntitlement::new("emp");
        consumed.record("trouser", 1);

        // "pant" has no allowance of its own; the trouser budget applies
        assert_eq!(remaining(&entitlement, &consumed, "pant"), 3);
    }

    #[test]
    fn record_folds_aliased_categories_together() {
        let mut consumed = ConsumedEntitlement::new("emp");
        consumed.record("trouser", 1);
        consumed.record("pant", 2);

        assert_eq!(consumed.consumed.len(), 1);
        assert_eq!(consumed.consumed_for("trouser"), 3);
    }

    #[test]
    fn absent_data_reads_as_zero() {
        let entitlement = EmployeeEntitlement::new("emp");
        let consumed = ConsumedEntitlement::new("emp");

        assert_eq!(remaining(&entitlement, &consumed, "shoe"), 0);
        assert_eq!(remaining(&entitlement, &consumed, "parka"), 0);
    }
}
