//! Category name canonicalisation and alias resolution
//!
//! Entitlement and consumption records may have been written under a
//! different (but equivalent) label than a product's own category. Every
//! lookup goes through the alias set produced here so a remaining-balance
//! probe never returns zero purely from naming drift.

use std::collections::BTreeSet;

/// Categories every entitlement record carries, whatever else the company
/// configures dynamically.
pub const LEGACY_CATEGORIES: [&str; 4] = ["shirt", "pant", "shoe", "jacket"];

pub fn normalize(category: &str) -> String {
    category.trim().to_lowercase()
}

fn synonyms(base: &str) -> &'static [&'static str] {
    match base {
        "belt" => &["accessory", "accessories"],
        "accessory" | "accessories" => &["belt"],
        "pant" => &["trouser"],
        "trouser" => &["pant"],
        "jacket" => &["blazer"],
        "blazer" => &["jacket"],
        _ => &[],
    }
}

/// Expand a free-form category name into the set of equivalent lookup keys:
/// the normalized input plus its known counterparts. Unknown categories
/// resolve to the singleton set of themselves.
pub fn resolve_aliases(category: &str) -> BTreeSet<String> {
    let base = normalize(category);
    let mut set = BTreeSet::new();
    for syn in synonyms(&base) {
        set.insert((*syn).to_string());
    }
    set.insert(base);
    set
}

/// Alias set additionally absorbing ledger keys that overlap the input by
/// case-insensitive substring containment, in either direction, to tolerate
/// pluralization drift ("shirts" matches a "shirt" key and vice versa).
pub fn resolve_against<'a, I>(category: &str, keys: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = &'a String>,
{
    let base = normalize(category);
    let mut set = resolve_aliases(&base);
    if base.is_empty() {
        return set;
    }
    for key in keys {
        let key = normalize(key);
        if key.is_empty() {
            continue;
        }
        if key.contains(&base) || base.contains(&key) {
            set.insert(key);
        }
    }
    set
}

/// Whether two category names count toward the same entitlement budget.
pub fn same_category(a: &str, b: &str) -> bool {
    let a = normalize(a);
    let b = normalize(b);
    if a.is_empty() || b.is_empty() {
        return a == b;
    }
    if a.contains(&b) || b.contains(&a) {
        return true;
    }
    !resolve_aliases(&a).is_disjoint(&resolve_aliases(&b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_category_resolves_to_itself() {
        let set = resolve_aliases("Hi-Vis Vest");
        assert_eq!(set.len(), 1);
        assert!(set.contains("hi-vis vest"));
    }

    #[test]
    fn belt_and_accessory_sets_intersect() {
        let belt = resolve_aliases("belt");
        let accessory = resolve_aliases("accessory");
        assert!(belt.contains("accessory"));
        assert!(accessory.contains("belt"));
    }

    #[test]
    fn ledger_keys_absorbed_by_substring() {
        let keys = vec!["shirts".to_string(), "shoe".to_string()];
        let set = resolve_against("Shirt", &keys);
        assert!(set.contains("shirts"));
        assert!(!set.contains("shoe"));
    }
}
