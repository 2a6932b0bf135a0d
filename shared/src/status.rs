use crate::error::CoreError;

db_enum! {
    /// Lifecycle of an order.
    pub enum OrderStatus as "order status" {
        Pending => "pending",
        PaymentProcessing => "payment_processing",
        Confirmed => "confirmed",
        Processing => "processing",
        Shipped => "shipped",
        OutForDelivery => "out_for_delivery",
        Delivered => "delivered",
        Completed => "completed",
        Cancelled => "cancelled",
        Refunded => "refunded",
    }
}

impl OrderStatus {
    /// Statuses reachable in one step from `self`.
    pub fn allowed_transitions(self) -> &'static [OrderStatus] {
        use OrderStatus::*;
        match self {
            Pending => &[PaymentProcessing, Confirmed, Cancelled],
            PaymentProcessing => &[Confirmed, Cancelled],
            Confirmed => &[Processing, Cancelled],
            Processing => &[Shipped, Cancelled],
            Shipped => &[OutForDelivery, Delivered],
            OutForDelivery => &[Delivered],
            Delivered => &[Completed, Refunded],
            Completed | Cancelled | Refunded => &[],
        }
    }

    pub fn can_transition_to(self, target: OrderStatus) -> bool {
        self.allowed_transitions().contains(&target)
    }

    /// Validates a move to `target`, returning the new status.
    pub fn transition_to(self, target: OrderStatus) -> Result<OrderStatus, CoreError> {
        if self.can_transition_to(target) {
            Ok(target)
        } else {
            Err(CoreError::InvalidTransition {
                from: self,
                to: target,
            })
        }
    }

    pub fn is_terminal(self) -> bool {
        self.allowed_transitions().is_empty()
    }

    pub fn is_cancellable(self) -> bool {
        self.can_transition_to(OrderStatus::Cancelled)
    }
}

db_enum! {
    pub enum PaymentStatus as "payment status" {
        Pending => "pending",
        Paid => "paid",
        Failed => "failed",
        Refunded => "refunded",
    }
}
