//! Service layer API for order placement and approval workflow

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use sled::{Batch, Db, IVec};

use crate::composer::{self, Composition};
use crate::entitlement::{ConsumedEntitlement, EmployeeEntitlement};
use crate::error::OrderError;
use crate::order::{CartItem, DispatchPreference, Order, OrderStatus, PrData, TimeStamp};
use crate::policy::CompanyPolicy;

const CAS_RETRY_LIMIT: usize = 16;

/// Stored order records. A split child is stored as a pointer to its
/// parent so callers may address either id; the family itself lives in the
/// parent record, so a parent+children update is one atomic key write.
#[derive(Debug, minicbor::Encode, minicbor::Decode)]
enum OrderRecord {
    #[n(0)]
    Order(#[n(0)] Order),
    #[n(1)]
    SplitRef(#[n(0)] String),
}

pub struct OrderService {
    instance: Arc<Db>,
    policy: CompanyPolicy,
}

#[derive(Debug, Default)]
pub struct BulkOutcome {
    pub success: Vec<String>,
    pub failed: Vec<BulkFailure>,
}

#[derive(Debug)]
pub struct BulkFailure {
    pub order_id: String,
    pub error: String,
}

fn entitlement_key(employee_id: &str) -> String {
    format!("entitlement_{employee_id}")
}

fn consumed_key(employee_id: &str) -> String {
    format!("consumed_{employee_id}")
}

impl OrderService {
    pub fn new(instance: Arc<Db>, policy: CompanyPolicy) -> Self {
        Self { instance, policy }
    }

    /// Ingestion point for the external entitlement-rules provider.
    pub fn store_entitlement(&self, entitlement: &EmployeeEntitlement) -> anyhow::Result<()> {
        let key = entitlement_key(&entitlement.employee_id);
        self.instance
            .insert(key.as_bytes(), minicbor::to_vec(entitlement)?)?;
        Ok(())
    }

    /// Absent records read as zero entitlement.
    pub fn load_entitlement(&self, employee_id: &str) -> anyhow::Result<EmployeeEntitlement> {
        match self.instance.get(entitlement_key(employee_id))? {
            Some(raw) => Ok(minicbor::decode(raw.as_ref())?),
            None => Ok(EmployeeEntitlement::new(employee_id)),
        }
    }

    /// Absent records read as zero consumption.
    pub fn load_consumed(&self, employee_id: &str) -> anyhow::Result<ConsumedEntitlement> {
        match self.instance.get(consumed_key(employee_id))? {
            Some(raw) => Ok(minicbor::decode(raw.as_ref())?),
            None => Ok(ConsumedEntitlement::new(employee_id)),
        }
    }

    /// Compose a cart into an order and persist it.
    ///
    /// The consumption increment commits through compare_and_swap against
    /// the snapshot the composition was priced from. Losing the race
    /// re-reads and re-composes, so two concurrent carts from one employee
    /// can never both spend the same remaining allowance. The order record
    /// and its split pointers land in one batch after the ledger commit.
    pub fn place_order(
        &self,
        employee_id: &str,
        cart: Vec<CartItem>,
        delivery_address: &str,
        dispatch: DispatchPreference,
    ) -> anyhow::Result<Composition> {
        let entitlement = self.load_entitlement(employee_id)?;
        let key = consumed_key(employee_id);

        for _ in 0..CAS_RETRY_LIMIT {
            let prior = self.instance.get(&key)?;
            let consumed: ConsumedEntitlement = match &prior {
                Some(raw) => minicbor::decode(raw.as_ref())?,
                None => ConsumedEntitlement::new(employee_id),
            };

            let composition = composer::compose(
                employee_id,
                cart.clone(),
                delivery_address,
                dispatch,
                &entitlement,
                &consumed,
                &self.policy,
            )?;

            let mut next = consumed.clone();
            for item in &composition.order.items {
                next.record(&item.category, item.quantity);
            }
            let encoded = minicbor::to_vec(&next)?;

            let swapped = match &prior {
                Some(old) => self
                    .instance
                    .compare_and_swap(&key, Some(old), Some(encoded))?,
                None => self
                    .instance
                    .compare_and_swap(&key, None::<&[u8]>, Some(encoded))?,
            };
            if swapped.is_err() {
                // lost the race, re-read and re-compose
                continue;
            }

            let mut batch = Batch::default();
            batch.insert(
                composition.order.order_id.as_bytes(),
                minicbor::to_vec(&OrderRecord::Order(composition.order.clone()))?,
            );
            for split in &composition.order.splits {
                batch.insert(
                    split.split_id.as_bytes(),
                    minicbor::to_vec(&OrderRecord::SplitRef(composition.order.order_id.clone()))?,
                );
            }
            self.instance.apply_batch(batch)?;

            return Ok(composition);
        }

        Err(OrderError::LostRace(key).into())
    }

    pub fn load_order(&self, order_id: &str) -> anyhow::Result<Order> {
        let (_, _, order, _) = self.resolve_record(order_id)?;
        Ok(order)
    }

    /// Site-admin PR approval. Resolves a split-child id to its parent and
    /// applies the same PR metadata to the parent and every child; the
    /// family lives in one record, so the write is all-or-nothing.
    pub fn approve(
        &self,
        order_id: &str,
        approver_email: &str,
        pr_number: &str,
        pr_date: Option<TimeStamp<Utc>>,
    ) -> anyhow::Result<Order> {
        let pr = PrData::new(pr_number, pr_date);
        pr.validate()?;

        let (parent_id, prior, mut order, _) = self.resolve_record(order_id)?;
        if order.status != OrderStatus::AwaitingApproval {
            return Err(OrderError::InvalidTransition {
                id: parent_id,
                from: order.status,
            }
            .into());
        }

        order.status = OrderStatus::AwaitingFulfilment;
        order.pr_number = Some(pr.pr_number.clone());
        order.pr_date = pr.pr_date.clone();
        order.approved_by = Some(approver_email.to_string());
        order.approved_at = Some(TimeStamp::new());
        for split in &mut order.splits {
            split.status = OrderStatus::AwaitingFulfilment;
            split.pr_number = Some(pr.pr_number.clone());
            split.pr_date = pr.pr_date.clone();
        }

        self.commit(&parent_id, &prior, &order)?;
        Ok(order)
    }

    /// Bulk PR approval with per-id isolation: no id's failure blocks
    /// another id's success. Callers submit both parent and child ids for
    /// split orders, so ids resolving to a parent already advanced within
    /// this call are deduped and reported as successes without a second
    /// transition or PR write.
    pub fn bulk_approve(
        &self,
        order_ids: &[String],
        approver_email: &str,
        pr_data: &HashMap<String, PrData>,
    ) -> anyhow::Result<BulkOutcome> {
        let mut outcome = BulkOutcome::default();
        let mut transitioned: HashSet<String> = HashSet::new();

        for order_id in order_ids {
            let parent_id = match self.resolve_record(order_id) {
                Ok((parent_id, ..)) => parent_id,
                Err(err) => {
                    outcome.failed.push(BulkFailure {
                        order_id: order_id.clone(),
                        error: err.to_string(),
                    });
                    continue;
                }
            };
            if transitioned.contains(&parent_id) {
                outcome.success.push(order_id.clone());
                continue;
            }
            let Some(pr) = pr_data.get(order_id) else {
                outcome.failed.push(BulkFailure {
                    order_id: order_id.clone(),
                    error: format!("no PR data supplied for {order_id}"),
                });
                continue;
            };
            match self.approve(order_id, approver_email, &pr.pr_number, pr.pr_date.clone()) {
                Ok(_) => {
                    transitioned.insert(parent_id);
                    outcome.success.push(order_id.clone());
                }
                Err(err) => outcome.failed.push(BulkFailure {
                    order_id: order_id.clone(),
                    error: err.to_string(),
                }),
            }
        }

        Ok(outcome)
    }

    /// Company-admin stage grouping one or more approved PRs into a PO.
    /// Every target is validated before anything is written; the updates
    /// then land in a single batch.
    pub fn link_to_po(
        &self,
        order_ids: &[String],
        _approver_email: &str,
        po_number: &str,
    ) -> anyhow::Result<Vec<Order>> {
        if !self.policy.require_company_admin_po_approval {
            return Err(OrderError::PoStageDisabled.into());
        }
        if po_number.trim().is_empty() {
            return Err(OrderError::MissingPoNumber.into());
        }

        // dedupe to parent records, preserving submission order
        let mut targets: Vec<(String, Order)> = Vec::new();
        for order_id in order_ids {
            let (parent_id, _, order, _) = self.resolve_record(order_id)?;
            if targets.iter().any(|(id, _)| *id == parent_id) {
                continue;
            }
            targets.push((parent_id, order));
        }
        if targets.len() > 1 && !self.policy.allow_multi_pr_po {
            return Err(OrderError::MultiPrPoDisabled.into());
        }

        for (parent_id, order) in &targets {
            if order.status != OrderStatus::AwaitingFulfilment || order.pr_number.is_none() {
                return Err(OrderError::InvalidTransition {
                    id: parent_id.clone(),
                    from: order.status,
                }
                .into());
            }
        }

        let mut updated = Vec::new();
        let mut batch = Batch::default();
        for (parent_id, mut order) in targets {
            order.status = OrderStatus::LinkedToPo;
            order.po_number = Some(po_number.to_string());
            for split in &mut order.splits {
                split.status = OrderStatus::LinkedToPo;
                split.po_number = Some(po_number.to_string());
            }
            batch.insert(
                parent_id.as_bytes(),
                minicbor::to_vec(&OrderRecord::Order(order.clone()))?,
            );
            updated.push(order);
        }
        self.instance.apply_batch(batch)?;

        Ok(updated)
    }

    /// Vendor has the goods ready to ship.
    pub fn mark_fulfilled(&self, order_id: &str) -> anyhow::Result<Order> {
        self.advance(order_id, OrderStatus::AwaitingDispatch)
    }

    pub fn mark_dispatched(&self, order_id: &str) -> anyhow::Result<Order> {
        self.advance(order_id, OrderStatus::Dispatched)
    }

    pub fn mark_delivered(&self, order_id: &str) -> anyhow::Result<Order> {
        self.advance(order_id, OrderStatus::Delivered)
    }

    fn check_step(&self, id: &str, from: OrderStatus, to: OrderStatus) -> Result<(), OrderError> {
        if !from.permits(to) {
            return Err(OrderError::InvalidTransition {
                id: id.to_string(),
                from,
            });
        }
        if from == OrderStatus::AwaitingFulfilment
            && to == OrderStatus::AwaitingDispatch
            && self.policy.require_company_admin_po_approval
        {
            return Err(OrderError::AwaitingPoLink(id.to_string()));
        }
        Ok(())
    }

    /// Advance one unit of the state machine. A split id advances only
    /// that split; a parent id advances the whole family, and every unit
    /// must permit the step or nothing is written.
    fn advance(&self, order_id: &str, to: OrderStatus) -> anyhow::Result<Order> {
        let (parent_id, prior, mut order, split_target) = self.resolve_record(order_id)?;

        match &split_target {
            Some(split_id) => {
                let split = order
                    .splits
                    .iter_mut()
                    .find(|s| s.split_id == *split_id)
                    .ok_or_else(|| OrderError::OrderNotFound(split_id.clone()))?;
                self.check_step(split_id, split.status, to)?;
                split.status = to;
            }
            None => {
                self.check_step(&parent_id, order.status, to)?;
                for split in &order.splits {
                    self.check_step(&split.split_id, split.status, to)?;
                }
                order.status = to;
                for split in &mut order.splits {
                    split.status = to;
                }
            }
        }

        self.commit(&parent_id, &prior, &order)?;
        Ok(order)
    }

    // Resolve an id to (parent id, raw parent record, decoded order, split
    // id when the submitted id addressed a child).
    fn resolve_record(
        &self,
        order_id: &str,
    ) -> anyhow::Result<(String, IVec, Order, Option<String>)> {
        let raw = self
            .instance
            .get(order_id)?
            .ok_or_else(|| OrderError::OrderNotFound(order_id.to_string()))?;
        let record: OrderRecord = minicbor::decode(raw.as_ref())
            .map_err(|_| OrderError::MalformedRecord(order_id.to_string()))?;
        match record {
            OrderRecord::Order(order) => Ok((order_id.to_string(), raw, order, None)),
            OrderRecord::SplitRef(parent_id) => {
                let parent_raw = self
                    .instance
                    .get(&parent_id)?
                    .ok_or_else(|| OrderError::OrderNotFound(parent_id.clone()))?;
                let parent: OrderRecord = minicbor::decode(parent_raw.as_ref())
                    .map_err(|_| OrderError::MalformedRecord(parent_id.clone()))?;
                match parent {
                    OrderRecord::Order(order) => {
                        Ok((parent_id, parent_raw, order, Some(order_id.to_string())))
                    }
                    OrderRecord::SplitRef(_) => Err(OrderError::MalformedRecord(parent_id).into()),
                }
            }
        }
    }

    // Conditional write: the transition lands only if the record is still
    // in the state it was read in, so a concurrent attempt on the same id
    // is rejected rather than applied twice.
    fn commit(&self, parent_id: &str, prior: &IVec, order: &Order) -> anyhow::Result<()> {
        let encoded = minicbor::to_vec(&OrderRecord::Order(order.clone()))?;
        let swapped = self
            .instance
            .compare_and_swap(parent_id, Some(prior), Some(encoded))?;
        if swapped.is_err() {
            return Err(OrderError::LostRace(parent_id.to_string()).into());
        }
        Ok(())
    }
}
