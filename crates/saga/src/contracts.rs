//! Wire contracts exchanged with the validation, payment, stock and store
//! services.

use chrono::{DateTime, Utc};
use common::OrderId;
use domain::{CancelReason, MenuId, Milestone, Money, OrderItem, StoreId};
use messaging::{Record, header};
use outbox::OutboxMessage;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Result, SagaError, TopicConfig};

/// Event type of the cancellation announcement.
pub const ORDER_CANCELED_EVENT: &str = "OrderCanceledEvent";
/// Event type of the stock-decrease request.
pub const ORDER_STOCK_EVENT: &str = "OrderStockEvent";
/// Event type of the completion announcement.
pub const ORDER_COMPLETED_EVENT: &str = "OrderCompletedEvent";

/// Which upstream result a topic carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InboundKind {
    ValidationResult,
    PaymentResult,
    StockResult,
    ApprovalResult,
}

impl InboundKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InboundKind::ValidationResult => "validation_result",
            InboundKind::PaymentResult => "payment_result",
            InboundKind::StockResult => "stock_result",
            InboundKind::ApprovalResult => "approval_result",
        }
    }
}

/// Success or failure of an upstream step, with the data each side carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<S = (), F = ()> {
    Success(S),
    Failure(F),
}

/// A decoded upstream result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    /// Success carries the authoritative line items.
    ValidationResult(Outcome<Vec<OrderItem>>),
    PaymentResult(Outcome),
    /// Failure may carry a diagnostic from the stock service.
    StockResult(Outcome<(), Option<String>>),
    ApprovalResult(Outcome),
}

impl InboundEvent {
    pub fn kind(&self) -> InboundKind {
        match self {
            InboundEvent::ValidationResult(_) => InboundKind::ValidationResult,
            InboundEvent::PaymentResult(_) => InboundKind::PaymentResult,
            InboundEvent::StockResult(_) => InboundKind::StockResult,
            InboundEvent::ApprovalResult(_) => InboundKind::ApprovalResult,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(
            self,
            InboundEvent::ValidationResult(Outcome::Success(_))
                | InboundEvent::PaymentResult(Outcome::Success(_))
                | InboundEvent::StockResult(Outcome::Success(_))
                | InboundEvent::ApprovalResult(Outcome::Success(_))
        )
    }
}

/// An upstream result addressed to one order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub order_id: OrderId,
    pub event: InboundEvent,
}

/// Decodes a consumed record of the given kind.
///
/// The order id comes from the `orderId` header, else from the payload's
/// `orderId` or `aggregateId`. The discriminator comes from the `eventType`
/// header, else from the payload's `status` or `eventType`.
///
/// Validation success items require a UUID `menuId` plus integer `price` and
/// `quantity` (at most `i32::MAX`). `menuName` is optional and capped at
/// [`MENU_NAME_MAX_CHARS`] characters. Items carrying only
/// `menuName`/`price`/`quantity` are rejected as malformed.
pub fn decode(kind: InboundKind, record: &Record) -> Result<InboundMessage> {
    let raw = record.payload_str();
    let body: Option<Value> = serde_json::from_str(&raw).ok();

    let order_id = header_or_field(record, header::ORDER_ID, body.as_ref(), &["orderId", "aggregateId"])
        .ok_or_else(|| SagaError::Malformed("missing order id".into()))?;
    let order_id = OrderId::parse(&order_id)
        .map_err(|e| SagaError::Malformed(format!("invalid order id {order_id:?}: {e}")))?;

    let discriminator =
        header_or_field(record, header::EVENT_TYPE, body.as_ref(), &["status", "eventType"])
            .ok_or_else(|| SagaError::Malformed("missing event type".into()))?;
    let success = match discriminator.trim().to_ascii_lowercase().as_str() {
        "success" => true,
        "fail" | "failed" | "failure" => false,
        other => {
            return Err(SagaError::Malformed(format!("unknown event type {other:?}")));
        }
    };

    let event = match (kind, success) {
        (InboundKind::ValidationResult, true) => {
            let body = body.ok_or_else(|| SagaError::Malformed("validation payload is not JSON".into()))?;
            InboundEvent::ValidationResult(Outcome::Success(parse_items(&body)?))
        }
        (InboundKind::ValidationResult, false) => InboundEvent::ValidationResult(Outcome::Failure(())),
        (InboundKind::PaymentResult, true) => InboundEvent::PaymentResult(Outcome::Success(())),
        (InboundKind::PaymentResult, false) => InboundEvent::PaymentResult(Outcome::Failure(())),
        (InboundKind::StockResult, true) => InboundEvent::StockResult(Outcome::Success(())),
        (InboundKind::StockResult, false) => {
            InboundEvent::StockResult(Outcome::Failure(failure_detail(&raw, body.as_ref())))
        }
        (InboundKind::ApprovalResult, true) => InboundEvent::ApprovalResult(Outcome::Success(())),
        (InboundKind::ApprovalResult, false) => InboundEvent::ApprovalResult(Outcome::Failure(())),
    };

    Ok(InboundMessage { order_id, event })
}

fn header_or_field(
    record: &Record,
    header_name: &str,
    body: Option<&Value>,
    fields: &[&str],
) -> Option<String> {
    record
        .header_str(header_name)
        .filter(|v| !v.trim().is_empty())
        .or_else(|| {
            let object = body?.as_object()?;
            fields
                .iter()
                .find_map(|f| object.get(*f).and_then(Value::as_str))
                .map(str::to_string)
        })
}

fn parse_items(body: &Value) -> Result<Vec<OrderItem>> {
    let lines = match body {
        Value::Array(lines) => lines,
        Value::Object(envelope) => envelope
            .get("payload")
            .and_then(Value::as_array)
            .ok_or_else(|| SagaError::Malformed("validation payload has no item list".into()))?,
        _ => return Err(SagaError::Malformed("validation payload has no item list".into())),
    };
    lines.iter().map(parse_item).collect()
}

/// Longest menu name the order item table stores.
pub const MENU_NAME_MAX_CHARS: usize = 255;

fn parse_item(line: &Value) -> Result<OrderItem> {
    let menu_id = line
        .get("menuId")
        .and_then(Value::as_str)
        .and_then(|s| uuid::Uuid::parse_str(s.trim()).ok())
        .map(MenuId::from_uuid)
        .ok_or_else(|| SagaError::Malformed("item without a valid menuId".into()))?;
    let menu_name = line
        .get("menuName")
        .and_then(Value::as_str)
        .unwrap_or_default();
    if menu_name.chars().count() > MENU_NAME_MAX_CHARS {
        return Err(SagaError::Malformed(format!(
            "menuName longer than {MENU_NAME_MAX_CHARS} characters"
        )));
    }
    let price = number(line, "price")?;
    let quantity = number(line, "quantity")?;
    let quantity = i32::try_from(quantity)
        .ok()
        .and_then(|q| u32::try_from(q).ok())
        .ok_or_else(|| SagaError::Malformed(format!("quantity out of range: {quantity}")))?;

    Ok(OrderItem::new(menu_id, menu_name, Money::new(price), quantity))
}

/// Reads an integer given as a JSON number or a numeric string.
fn number(line: &Value, field: &str) -> Result<i64> {
    let value = line
        .get(field)
        .ok_or_else(|| SagaError::Malformed(format!("item without {field}")))?;
    let parsed = match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| SagaError::Malformed(format!("item {field} is not an integer: {value}")))
}

fn failure_detail(raw: &str, body: Option<&Value>) -> Option<String> {
    if raw.trim().is_empty() {
        return None;
    }
    let message = body
        .and_then(|b| b.get("errorMessage"))
        .and_then(Value::as_str)
        .map(str::to_string);
    Some(message.unwrap_or_else(|| raw.trim().to_string()))
}

/// Cancellation announcement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCanceledEvent {
    pub aggregate_id: OrderId,
    pub status: String,
    pub payload: Vec<CanceledDetail>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanceledDetail {
    pub order_id: OrderId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

/// One line of the stock-decrease request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockDecreaseLine {
    pub menu_id: MenuId,
    pub quantity: u32,
}

/// Completion announcement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCompletedEvent {
    pub store_id: StoreId,
    pub order_time: DateTime<Utc>,
    pub total_price: Money,
}

/// Turns milestones into outbox rows addressed to the configured topics.
pub fn outbox_rows(
    order_id: OrderId,
    milestones: Vec<Milestone>,
    topics: &TopicConfig,
    at: DateTime<Utc>,
) -> Result<Vec<OutboxMessage>> {
    milestones
        .into_iter()
        .map(|milestone| encode_milestone(order_id, milestone, topics, at))
        .collect()
}

fn encode_milestone(
    order_id: OrderId,
    milestone: Milestone,
    topics: &TopicConfig,
    at: DateTime<Utc>,
) -> Result<OutboxMessage> {
    let message = match milestone {
        Milestone::Canceled {
            reason,
            occurred_at,
            error,
            ..
        } => {
            let event = canceled_event(order_id, reason, occurred_at);
            OutboxMessage::pending(
                order_id,
                &topics.order_canceled,
                ORDER_CANCELED_EVENT,
                serde_json::to_string(&event)?,
                at,
            )
            .with_last_error(error)
        }
        Milestone::StockRequested { lines } => {
            let lines: Vec<StockDecreaseLine> = lines
                .into_iter()
                .map(|l| StockDecreaseLine {
                    menu_id: l.menu_id,
                    quantity: l.quantity,
                })
                .collect();
            OutboxMessage::pending(
                order_id,
                &topics.stock_request,
                ORDER_STOCK_EVENT,
                serde_json::to_string(&lines)?,
                at,
            )
        }
        Milestone::Completed {
            store_id,
            total_price,
            ordered_at,
        } => {
            let event = OrderCompletedEvent {
                store_id,
                order_time: ordered_at,
                total_price,
            };
            OutboxMessage::pending(
                order_id,
                &topics.order_completed,
                ORDER_COMPLETED_EVENT,
                serde_json::to_string(&event)?,
                at,
            )
        }
    };
    Ok(message)
}

fn canceled_event(
    order_id: OrderId,
    reason: CancelReason,
    occurred_at: DateTime<Utc>,
) -> OrderCanceledEvent {
    OrderCanceledEvent {
        aggregate_id: order_id,
        status: "FAILED".to_string(),
        payload: vec![CanceledDetail {
            order_id,
            reason: reason.as_str().to_string(),
            occurred_at,
        }],
    }
}
