//! Cart composition: vendor splits, overage detection, personal payment
//!
//! Pure logic; storage reads/writes happen in the service layer. The
//! composer sees a snapshot of the entitlement and consumption ledgers and
//! produces a fully-formed order, split per vendor when the cart spans
//! more than one.

use crate::category;
use crate::entitlement::{self, ConsumedEntitlement, EmployeeEntitlement};
use crate::error::OrderError;
use crate::order::{CartItem, DispatchPreference, Order, OrderSplit, TimeStamp};
use crate::policy::CompanyPolicy;
use crate::utils;

/// A composed order plus the cart lines that could not be placed. Dropped
/// lines are reported, not silently ignored.
#[derive(Debug)]
pub struct Composition {
    pub order: Order,
    pub dropped: Vec<DroppedItem>,
}

#[derive(Debug)]
pub struct DroppedItem {
    pub product_id: String,
    pub reason: OrderError,
}

// Cart lines of equivalent category, merged via alias resolution so pant
// and trouser items count toward one total.
struct CategoryGroup {
    label: String,
    total: u32,
    members: Vec<usize>,
}

pub fn compose(
    employee_id: &str,
    cart: Vec<CartItem>,
    delivery_address: &str,
    dispatch: DispatchPreference,
    entitlement: &EmployeeEntitlement,
    consumed: &ConsumedEntitlement,
    policy: &CompanyPolicy,
) -> Result<Composition, OrderError> {
    let mut kept: Vec<CartItem> = Vec::new();
    let mut dropped: Vec<DroppedItem> = Vec::new();

    for item in cart {
        // zero-quantity lines are ignored
        if item.quantity == 0 {
            continue;
        }
        item.validate()?;
        if item.vendor_id.is_none() {
            dropped.push(DroppedItem {
                product_id: item.product_id.clone(),
                reason: OrderError::VendorUnresolved(item.product_id),
            });
            continue;
        }
        kept.push(item);
    }

    if kept.is_empty() {
        return Err(OrderError::EmptyCart);
    }

    let groups = group_by_category(&kept);

    // Overage per category group; the exceeding quantity is charged across
    // the matching lines in cart order until exhausted.
    let mut personal_payment_amount: u64 = 0;
    if policy.allow_personal_payments {
        for group in &groups {
            let remaining = entitlement::remaining(entitlement, consumed, &group.label);
            let mut exceeded = group.total.saturating_sub(remaining);
            if exceeded == 0 {
                continue;
            }
            for &idx in &group.members {
                if exceeded == 0 {
                    break;
                }
                let item = &kept[idx];
                let take = item.quantity.min(exceeded);
                personal_payment_amount += item.unit_price * u64::from(take);
                exceeded -= take;
            }
        }
    }

    // One bucket per vendor, first-appearance order.
    let mut vendor_groups: Vec<(String, Vec<CartItem>)> = Vec::new();
    for item in &kept {
        let Some(vendor_id) = item.vendor_id.clone() else {
            continue;
        };
        match vendor_groups.iter_mut().find(|(v, _)| *v == vendor_id) {
            Some((_, items)) => items.push(item.clone()),
            None => vendor_groups.push((vendor_id, vec![item.clone()])),
        }
    }

    let item_count: u32 = kept.iter().map(|i| i.quantity).sum();
    let total: u64 = kept.iter().map(CartItem::line_total).sum();
    let initial = policy.initial_status();

    let mut splits = Vec::new();
    if vendor_groups.len() >= 2 {
        for (vendor_id, items) in vendor_groups {
            splits.push(OrderSplit {
                split_id: mint_id("split_")?,
                vendor_id,
                item_count: items.iter().map(|i| i.quantity).sum(),
                total: items.iter().map(CartItem::line_total).sum(),
                items,
                status: initial,
                pr_number: None,
                pr_date: None,
                po_number: None,
            });
        }
    }

    let order = Order {
        order_id: mint_id("order_")?,
        employee_id: employee_id.to_string(),
        items: kept,
        delivery_address: delivery_address.to_string(),
        dispatch,
        is_personal_payment: personal_payment_amount > 0,
        personal_payment_amount,
        status: initial,
        pr_number: None,
        pr_date: None,
        po_number: None,
        approved_by: None,
        approved_at: None,
        splits,
        item_count,
        total,
        created_at: TimeStamp::new(),
    };

    Ok(Composition { order, dropped })
}

fn group_by_category(kept: &[CartItem]) -> Vec<CategoryGroup> {
    let mut groups: Vec<CategoryGroup> = Vec::new();
    for (idx, item) in kept.iter().enumerate() {
        let found = groups.iter_mut().find(|g| {
            g.members
                .iter()
                .any(|&m| category::same_category(&kept[m].category, &item.category))
        });
        match found {
            Some(group) => {
                group.total += item.quantity;
                group.members.push(idx);
            }
            None => groups.push(CategoryGroup {
                label: category::normalize(&item.category),
                total: item.quantity,
                members: vec![idx],
            }),
        }
    }
    groups
}

fn mint_id(prefix: &str) -> Result<String, OrderError> {
    utils::new_uuid_to_bech32(prefix).map_err(|err| OrderError::IdEncoding(err.to_string()))
}
