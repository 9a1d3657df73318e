//! Core order data model and lifecycle states

use chrono::{DateTime, TimeZone, Utc};

use crate::error::OrderError;

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone)]
pub struct TimeStamp<T: TimeZone>(DateTime<T>);

impl TimeStamp<Utc> {
    pub fn new() -> Self {
        Self(Utc::now())
    }
    pub fn new_with(year: i32, month: u32, day: u32, hour: u32, min: u32, sec: u32) -> Self {
        Utc.with_ymd_and_hms(year, month, day, hour, min, sec)
            .unwrap()
            .into()
    }
    pub fn to_datetime_utc(&self) -> DateTime<Utc> {
        self.0
    }
}

impl Default for TimeStamp<Utc> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: TimeZone> From<DateTime<T>> for TimeStamp<T> {
    fn from(value: DateTime<T>) -> Self {
        TimeStamp(value)
    }
}

impl<C> minicbor::Encode<C> for TimeStamp<Utc> {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        if let Some(nsec) = self.0.timestamp_nanos_opt() {
            return e.i64(nsec)?.ok();
        }

        Err(minicbor::encode::Error::message(
            "failed to encode timestamp. timestamp_nanos_opt returned None",
        ))
    }
}

impl<'b, C> minicbor::Decode<'b, C> for TimeStamp<Utc> {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let nsecs = d.i64()?;

        Ok(TimeStamp(DateTime::from_timestamp_nanos(nsecs)))
    }
}

/// Lifecycle of an order or split. Variant order is progression order;
/// `Delivered` is terminal and no backward edge exists.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, minicbor::Encode, minicbor::Decode,
)]
pub enum OrderStatus {
    #[n(0)]
    AwaitingApproval,
    #[n(1)]
    AwaitingFulfilment,
    #[n(2)]
    LinkedToPo,
    #[n(3)]
    AwaitingDispatch,
    #[n(4)]
    Dispatched,
    #[n(5)]
    Delivered,
}

impl OrderStatus {
    /// Allowed forward edges of the state machine.
    pub fn permits(self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (AwaitingApproval, AwaitingFulfilment)
                | (AwaitingFulfilment, LinkedToPo)
                | (AwaitingFulfilment, AwaitingDispatch)
                | (LinkedToPo, AwaitingDispatch)
                | (AwaitingDispatch, Dispatched)
                | (Dispatched, Delivered)
        )
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::AwaitingApproval => "Awaiting approval",
            Self::AwaitingFulfilment => "Awaiting fulfilment",
            Self::LinkedToPo => "Linked to PO",
            Self::AwaitingDispatch => "Awaiting Dispatch",
            Self::Dispatched => "Dispatched",
            Self::Delivered => "Delivered",
        };
        write!(f, "{label}")
    }
}

/// Display aggregate over a split order's children. Computed on read,
/// never stored on the parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusView {
    Exact(OrderStatus),
    PartiallyDispatched,
    PartiallyDelivered,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub enum DispatchPreference {
    #[n(0)]
    SiteDelivery,
    #[n(1)]
    DirectToEmployee,
}

impl Default for DispatchPreference {
    fn default() -> Self {
        Self::SiteDelivery
    }
}

/// One cart line: a product in one size with its resolved category, unit
/// price in paise and vendor. `vendor_id` is `None` when the catalog could
/// not resolve the product to a vendor.
#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct CartItem {
    #[n(0)]
    pub product_id: String,
    #[n(1)]
    pub category: String,
    #[n(2)]
    pub size: String,
    #[n(3)]
    pub quantity: u32,
    #[n(4)]
    pub unit_price: u64, // paise
    #[n(5)]
    pub vendor_id: Option<String>,
}

impl CartItem {
    pub fn new(product_id: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            product_id: product_id.into(),
            category: category.into(),
            size: String::new(),
            quantity: 0,
            unit_price: 0,
            vendor_id: None,
        }
    }
    pub fn set_size(mut self, size: &str) -> Self {
        self.size = size.to_string();
        self
    }
    pub fn set_quantity(mut self, quantity: u32) -> Self {
        self.quantity = quantity;
        self
    }
    pub fn set_unit_price(mut self, paise: u64) -> Self {
        self.unit_price = paise;
        self
    }
    pub fn set_vendor(mut self, vendor_id: &str) -> Self {
        self.vendor_id = Some(vendor_id.to_string());
        self
    }
    pub fn line_total(&self) -> u64 {
        self.unit_price * u64::from(self.quantity)
    }
    pub fn validate(&self) -> Result<(), OrderError> {
        if self.size.trim().is_empty() {
            return Err(OrderError::InvalidSize(self.product_id.clone()));
        }
        Ok(())
    }
}

/// Vendor-scoped subset of a parent order's items. Runs the same status
/// machine as a standalone order and carries its own PR/PO metadata.
#[derive(Debug, Clone, PartialEq, minicbor::Encode, minicbor::Decode)]
pub struct OrderSplit {
    #[n(0)]
    pub split_id: String,
    #[n(1)]
    pub vendor_id: String,
    #[n(2)]
    pub items: Vec<CartItem>,
    #[n(3)]
    pub item_count: u32,
    #[n(4)]
    pub total: u64,
    #[n(5)]
    pub status: OrderStatus,
    #[n(6)]
    pub pr_number: Option<String>,
    #[n(7)]
    pub pr_date: Option<TimeStamp<Utc>>,
    #[n(8)]
    pub po_number: Option<String>,
}

#[derive(Debug, Clone, PartialEq, minicbor::Encode, minicbor::Decode)]
pub struct Order {
    #[n(0)]
    pub order_id: String,
    #[n(1)]
    pub employee_id: String,
    #[n(2)]
    pub items: Vec<CartItem>,
    #[n(3)]
    pub delivery_address: String,
    #[n(4)]
    pub dispatch: DispatchPreference,
    #[n(5)]
    pub is_personal_payment: bool,
    #[n(6)]
    pub personal_payment_amount: u64, // paise
    #[n(7)]
    pub status: OrderStatus,
    #[n(8)]
    pub pr_number: Option<String>,
    #[n(9)]
    pub pr_date: Option<TimeStamp<Utc>>,
    #[n(10)]
    pub po_number: Option<String>,
    #[n(11)]
    pub approved_by: Option<String>,
    #[n(12)]
    pub approved_at: Option<TimeStamp<Utc>>,
    #[n(13)]
    pub splits: Vec<OrderSplit>,
    #[n(14)]
    pub item_count: u32,
    #[n(15)]
    pub total: u64,
    #[n(16)]
    pub created_at: TimeStamp<Utc>,
}

impl Order {
    pub fn is_split_order(&self) -> bool {
        !self.splits.is_empty()
    }

    /// Aggregate status for display. A non-split order reports its own
    /// status; a split parent reports over its children: all equal wins,
    /// any delivery makes it partially delivered, any dispatch partially
    /// dispatched, otherwise the least-advanced child.
    pub fn status_view(&self) -> StatusView {
        if self.splits.is_empty() {
            return StatusView::Exact(self.status);
        }
        let first = self.splits[0].status;
        if self.splits.iter().all(|s| s.status == first) {
            return StatusView::Exact(first);
        }
        if self.splits.iter().any(|s| s.status == OrderStatus::Delivered) {
            return StatusView::PartiallyDelivered;
        }
        if self.splits.iter().any(|s| s.status == OrderStatus::Dispatched) {
            return StatusView::PartiallyDispatched;
        }
        let least = self.splits.iter().map(|s| s.status).min().unwrap_or(first);
        StatusView::Exact(least)
    }
}

/// PR metadata an approver supplies when releasing an order out of
/// `Awaiting approval`. Both fields are required and non-empty; rejecting
/// blank values is a precondition failure, not a transition.
#[derive(Debug, Clone, PartialEq)]
pub struct PrData {
    pub pr_number: String,
    pub pr_date: Option<TimeStamp<Utc>>,
}

impl PrData {
    pub fn new(pr_number: impl Into<String>, pr_date: Option<TimeStamp<Utc>>) -> Self {
        Self {
            pr_number: pr_number.into(),
            pr_date,
        }
    }
    pub fn validate(&self) -> Result<(), OrderError> {
        if self.pr_number.trim().is_empty() {
            return Err(OrderError::MissingPrNumber);
        }
        if self.pr_date.is_none() {
            return Err(OrderError::MissingPrDate);
        }
        Ok(())
    }
}
