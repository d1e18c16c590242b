//! Order aggregate implementation.

use chrono::{DateTime, Utc};
use common::{OrderId, Version};
use serde::{Deserialize, Serialize};

use super::{
    CancelReason, Milestone, Money, OrderChannel, OrderError, OrderHistory, OrderItem,
    OrderStatus, PaymentMethod, ReceiptMethod, StageStatus, StockLine, StoreId, Transition,
};

/// Input for placing a new order.
///
/// Orders are placed without items; lines materialize once validation
/// supplies them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOrder {
    pub order_id: OrderId,
    pub store_id: StoreId,
    pub user_id: Option<i64>,
    pub total_price: Money,
    pub delivery_address: String,
    pub payment_method: PaymentMethod,
    pub order_channel: OrderChannel,
    pub receipt_method: ReceiptMethod,
    pub request_message: Option<String>,
}

impl NewOrder {
    /// An online delivery order paid by card.
    pub fn online(store_id: StoreId, user_id: i64, total_price: Money) -> Self {
        Self {
            order_id: OrderId::new(),
            store_id,
            user_id: Some(user_id),
            total_price,
            delivery_address: String::new(),
            payment_method: PaymentMethod::CreditCard,
            order_channel: OrderChannel::Online,
            receipt_method: ReceiptMethod::Delivery,
            request_message: None,
        }
    }

    pub fn with_delivery_address(mut self, address: impl Into<String>) -> Self {
        self.delivery_address = address.into();
        self
    }

    pub fn with_request_message(mut self, message: impl Into<String>) -> Self {
        self.request_message = Some(message.into());
        self
    }
}

/// Every persisted attribute of an order, used by stores to rehydrate it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub id: OrderId,
    pub version: Version,
    pub store_id: StoreId,
    pub user_id: Option<i64>,
    pub total_price: Money,
    pub delivery_address: String,
    pub payment_method: PaymentMethod,
    pub order_channel: OrderChannel,
    pub receipt_method: ReceiptMethod,
    pub request_message: Option<String>,
    pub status: OrderStatus,
    pub validation_status: StageStatus,
    pub payment_status: StageStatus,
    pub is_refundable: bool,
    pub history: OrderHistory,
    pub items: Vec<OrderItem>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Order aggregate root.
///
/// Mutated only by the saga in response to upstream results. Every mutating
/// method returns a [`Transition`]; an unchanged transition means the input
/// was a duplicate or arrived too late and nothing must be persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    record: OrderRecord,
}

// Construction
impl Order {
    /// Places a new order in `PENDING`.
    pub fn place(new: NewOrder, at: DateTime<Utc>) -> Self {
        let mut history = OrderHistory::new();
        history.push(OrderStatus::Pending.as_str(), at);

        Self {
            record: OrderRecord {
                id: new.order_id,
                version: Version::initial(),
                store_id: new.store_id,
                user_id: new.user_id,
                total_price: new.total_price,
                delivery_address: new.delivery_address,
                payment_method: new.payment_method,
                order_channel: new.order_channel,
                receipt_method: new.receipt_method,
                request_message: new.request_message,
                status: OrderStatus::Pending,
                validation_status: StageStatus::Pending,
                payment_status: StageStatus::Pending,
                is_refundable: true,
                history,
                items: Vec::new(),
                created_at: at,
                updated_at: at,
            },
        }
    }

    pub fn from_record(record: OrderRecord) -> Self {
        Self { record }
    }

    pub fn record(&self) -> &OrderRecord {
        &self.record
    }

    pub fn into_record(self) -> OrderRecord {
        self.record
    }

    /// Called by stores after a successful commit.
    pub fn set_version(&mut self, version: Version) {
        self.record.version = version;
    }
}

// Query methods
impl Order {
    pub fn id(&self) -> OrderId {
        self.record.id
    }

    pub fn version(&self) -> Version {
        self.record.version
    }

    pub fn store_id(&self) -> StoreId {
        self.record.store_id
    }

    pub fn user_id(&self) -> Option<i64> {
        self.record.user_id
    }

    pub fn total_price(&self) -> Money {
        self.record.total_price
    }

    pub fn status(&self) -> OrderStatus {
        self.record.status
    }

    pub fn validation_status(&self) -> StageStatus {
        self.record.validation_status
    }

    pub fn payment_status(&self) -> StageStatus {
        self.record.payment_status
    }

    pub fn is_refundable(&self) -> bool {
        self.record.is_refundable
    }

    pub fn history(&self) -> &OrderHistory {
        &self.record.history
    }

    /// Returns the history rendered as text lines.
    pub fn history_text(&self) -> String {
        self.record.history.render()
    }

    pub fn items(&self) -> &[OrderItem] {
        &self.record.items
    }

    pub fn has_items(&self) -> bool {
        !self.record.items.is_empty()
    }

    /// Sum of the materialized line totals.
    pub fn items_total(&self) -> Money {
        self.record.items.iter().map(OrderItem::line_total).sum()
    }

    pub fn is_terminal(&self) -> bool {
        self.record.status.is_terminal()
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.record.updated_at
    }
}

// Saga transitions
impl Order {
    /// Validation succeeded: materialize the authoritative line items.
    pub fn record_validation_success(
        &mut self,
        items: Vec<OrderItem>,
        at: DateTime<Utc>,
    ) -> Result<Transition, OrderError> {
        if self.is_terminal() || self.record.validation_status.is_succeeded() {
            return Ok(Transition::unchanged());
        }
        if items.is_empty() {
            return Err(OrderError::NoItems);
        }
        for item in &items {
            if item.quantity == 0 {
                return Err(OrderError::InvalidQuantity {
                    quantity: item.quantity,
                });
            }
            if item.unit_price.is_negative() {
                return Err(OrderError::InvalidPrice {
                    price: item.unit_price.amount(),
                });
            }
        }

        self.record.items = items;
        self.record.validation_status = StageStatus::Succeeded;
        self.record.history.push("VALIDATED", at);
        self.record.updated_at = at;

        let mut transition = Transition::changed();
        self.request_stock_if_ready(&mut transition, at)?;
        Ok(transition)
    }

    pub fn record_validation_failure(
        &mut self,
        at: DateTime<Utc>,
    ) -> Result<Transition, OrderError> {
        if self.is_terminal() {
            return Ok(Transition::unchanged());
        }
        self.record.validation_status = StageStatus::Failed;
        self.fail_with(OrderStatus::Canceled, CancelReason::ValidationFailed, None, at)
    }

    pub fn record_payment_success(&mut self, at: DateTime<Utc>) -> Result<Transition, OrderError> {
        if self.is_terminal() || self.record.payment_status.is_succeeded() {
            return Ok(Transition::unchanged());
        }

        self.record.payment_status = StageStatus::Succeeded;
        self.record.history.push("PAID", at);
        self.record.updated_at = at;

        let mut transition = Transition::changed();
        self.request_stock_if_ready(&mut transition, at)?;
        Ok(transition)
    }

    pub fn record_payment_failure(&mut self, at: DateTime<Utc>) -> Result<Transition, OrderError> {
        if self.is_terminal() {
            return Ok(Transition::unchanged());
        }
        self.record.payment_status = StageStatus::Failed;
        self.fail_with(OrderStatus::Canceled, CancelReason::PaymentFailed, None, at)
    }

    /// Stock was decreased: the order waits for the merchant.
    pub fn record_stock_success(&mut self, at: DateTime<Utc>) -> Result<Transition, OrderError> {
        match self.record.status {
            OrderStatus::StockRequested => {
                self.transition_to(OrderStatus::AcceptedReady, at)?;
                Ok(Transition::changed())
            }
            OrderStatus::AcceptedReady | OrderStatus::Accepted => Ok(Transition::unchanged()),
            status if status.is_terminal() => Ok(Transition::unchanged()),
            current => Err(OrderError::InvalidStateTransition {
                current,
                action: "confirm stock",
            }),
        }
    }

    pub fn record_stock_failure(
        &mut self,
        error: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<Transition, OrderError> {
        self.fail_with(OrderStatus::Canceled, CancelReason::StockFailed, error, at)
    }

    /// The merchant accepted the order.
    pub fn record_approval(&mut self, at: DateTime<Utc>) -> Result<Transition, OrderError> {
        match self.record.status {
            OrderStatus::AcceptedReady => {
                self.transition_to(OrderStatus::Accepted, at)?;
                Ok(Transition::changed().with(Milestone::Completed {
                    store_id: self.record.store_id,
                    total_price: self.record.total_price,
                    ordered_at: at,
                }))
            }
            OrderStatus::Accepted => Ok(Transition::unchanged()),
            status if status.is_terminal() => Ok(Transition::unchanged()),
            current => Err(OrderError::InvalidStateTransition {
                current,
                action: "accept",
            }),
        }
    }

    pub fn record_rejection(&mut self, at: DateTime<Utc>) -> Result<Transition, OrderError> {
        self.fail_with(OrderStatus::Rejected, CancelReason::AcceptFailed, None, at)
    }
}

// Owner-driven lifecycle
impl Order {
    /// Marks an accepted order as fulfilled.
    pub fn complete(&mut self, at: DateTime<Utc>) -> Result<Transition, OrderError> {
        self.transition_to(OrderStatus::Completed, at)?;
        Ok(Transition::changed())
    }

    /// Refunds a pending or accepted order.
    pub fn refund(&mut self, at: DateTime<Utc>) -> Result<Transition, OrderError> {
        if !self.record.is_refundable {
            return Err(OrderError::NotRefundable);
        }
        self.transition_to(OrderStatus::Refunded, at)?;
        Ok(Transition::changed())
    }

    /// Closes the refund window.
    pub fn disable_refund(&mut self, at: DateTime<Utc>) -> Transition {
        if !self.record.is_refundable {
            return Transition::unchanged();
        }
        self.record.is_refundable = false;
        self.record.updated_at = at;
        Transition::changed()
    }
}

impl Order {
    fn transition_to(&mut self, next: OrderStatus, at: DateTime<Utc>) -> Result<(), OrderError> {
        let current = self.record.status;
        if !current.can_transition_to(next) {
            return Err(OrderError::InvalidStateTransition {
                current,
                action: next.as_str(),
            });
        }
        self.record.status = next;
        self.record.history.push(next.as_str(), at);
        self.record.updated_at = at;
        Ok(())
    }

    /// Emits the stock request exactly once: only the first call that sees
    /// both stages succeeded while still `PENDING` gets through.
    fn request_stock_if_ready(
        &mut self,
        transition: &mut Transition,
        at: DateTime<Utc>,
    ) -> Result<(), OrderError> {
        let ready = self.record.status == OrderStatus::Pending
            && self.record.validation_status.is_succeeded()
            && self.record.payment_status.is_succeeded();
        if !ready {
            return Ok(());
        }

        self.transition_to(OrderStatus::ReadyForStock, at)?;
        self.transition_to(OrderStatus::StockRequested, at)?;

        let lines = self
            .record
            .items
            .iter()
            .map(|item| StockLine {
                menu_id: item.menu_id,
                quantity: item.quantity,
            })
            .collect();
        transition.push(Milestone::StockRequested { lines });
        Ok(())
    }

    fn fail_with(
        &mut self,
        status: OrderStatus,
        reason: CancelReason,
        error: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<Transition, OrderError> {
        if self.is_terminal() {
            return Ok(Transition::unchanged());
        }
        self.transition_to(status, at)?;
        Ok(Transition::changed().with(Milestone::Canceled {
            reason,
            status,
            occurred_at: at,
            error,
        }))
    }
}
