use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Assigned,
    Picked,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Assigned => "assigned",
            OrderStatus::Picked => "picked",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    /// Statuses in which the order is linked to a partner.
    pub fn holds_partner(&self) -> bool {
        matches!(
            self,
            OrderStatus::Assigned | OrderStatus::Picked | OrderStatus::Delivered
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
    }

    /// Transitions an operator may apply directly. `pending -> assigned` goes
    /// through assignment commit and `-> pending` through failure reporting.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        matches!(
            (self, next),
            (OrderStatus::Assigned, OrderStatus::Picked)
                | (OrderStatus::Assigned, OrderStatus::Delivered)
                | (OrderStatus::Picked, OrderStatus::Delivered)
                | (OrderStatus::Pending, OrderStatus::Cancelled)
                | (OrderStatus::Assigned, OrderStatus::Cancelled)
                | (OrderStatus::Picked, OrderStatus::Cancelled)
        )
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "pending" => Ok(OrderStatus::Pending),
            "assigned" => Ok(OrderStatus::Assigned),
            "picked" => Ok(OrderStatus::Picked),
            "delivered" => Ok(OrderStatus::Delivered),
            "cancelled" => Ok(OrderStatus::Cancelled),
            other => Err(format!("unknown order status {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderItem {
    pub name: String,
    pub quantity: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: Uuid,
    pub customer_name: String,
    pub customer_phone: String,
    pub items: Vec<OrderItem>,
    pub area: String,
    pub address: String,
    pub value: f64,
    pub status: OrderStatus,
    pub assigned_partner_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl Order {
    /// Links the order to a partner. Only valid from `pending`.
    pub fn assign_to(&mut self, partner_id: Uuid) {
        self.status = OrderStatus::Assigned;
        self.assigned_partner_id = Some(partner_id);
    }

    /// Applies an operator transition, clearing the partner link whenever
    /// the new status does not hold one.
    pub fn apply_status(&mut self, next: OrderStatus) {
        self.status = next;
        if !next.holds_partner() {
            self.assigned_partner_id = None;
        }
    }

    pub fn partner_link_consistent(&self) -> bool {
        self.status.holds_partner() == self.assigned_partner_id.is_some()
    }

    pub fn item_count(&self) -> u32 {
        self.items.iter().map(|item| item.quantity).sum()
    }
}
