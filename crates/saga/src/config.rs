//! Topic names used by the saga.

/// Inbound and outbound topic names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicConfig {
    pub validation_result: String,
    pub payment_result: String,
    pub stock_result: String,
    pub approval_result: String,
    pub order_canceled: String,
    pub stock_request: String,
    pub order_completed: String,
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            validation_result: "order.validated".to_string(),
            payment_result: "payment.result".to_string(),
            stock_result: "stock.result".to_string(),
            approval_result: "order.accept".to_string(),
            order_canceled: "order.canceled".to_string(),
            stock_request: "stock.request".to_string(),
            order_completed: "order.completed".to_string(),
        }
    }
}

impl TopicConfig {
    /// Topics the saga listener consumes.
    pub fn inbound(&self) -> Vec<String> {
        vec![
            self.validation_result.clone(),
            self.payment_result.clone(),
            self.stock_result.clone(),
            self.approval_result.clone(),
        ]
    }

    /// Topics the outbox relay publishes to.
    pub fn outbound(&self) -> Vec<String> {
        vec![
            self.order_canceled.clone(),
            self.stock_request.clone(),
            self.order_completed.clone(),
        ]
    }
}
