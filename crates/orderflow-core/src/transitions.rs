use chrono::{DateTime, Utc};

use crate::errors::OrderError;
use crate::events::EventType;
use crate::models::{Order, OrderStatus};

/// A status change requested against a local order copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Accept,
    Prepare,
    PickUp { driver_id: String },
    Deliver { driver_id: String },
    Cancel,
}

impl Transition {
    pub fn event_type(&self) -> EventType {
        match self {
            Transition::Accept => EventType::OrderAccepted,
            Transition::Prepare => EventType::OrderPrepared,
            Transition::PickUp { .. } => EventType::OrderPickedUp,
            Transition::Deliver { .. } => EventType::OrderDelivered,
            Transition::Cancel => EventType::OrderCancelled,
        }
    }

    pub fn target(&self) -> OrderStatus {
        self.event_type().implied_status()
    }

    fn required(&self) -> OrderStatus {
        match self {
            Transition::Accept | Transition::Cancel => OrderStatus::Pending,
            Transition::Prepare => OrderStatus::Accepted,
            Transition::PickUp { .. } => OrderStatus::Prepared,
            Transition::Deliver { .. } => OrderStatus::PickedUp,
        }
    }

    fn verb(&self) -> &'static str {
        match self {
            Transition::Accept => "accept",
            Transition::Prepare => "prepare",
            Transition::PickUp { .. } => "pickup",
            Transition::Deliver { .. } => "deliver",
            Transition::Cancel => "cancel",
        }
    }
}

impl Order {
    /// Validates `transition` against the current status and applies it.
    /// On error the order is left untouched.
    pub fn apply(&mut self, transition: &Transition, at: DateTime<Utc>) -> Result<(), OrderError> {
        let required = transition.required();
        if self.status != required {
            let message = match transition {
                Transition::Cancel => format!(
                    "Only pending orders can be cancelled (current status {})",
                    self.status
                ),
                other => format!(
                    "cannot {} order with status {}. Only {} orders can be {}.",
                    other.verb(),
                    self.status,
                    required,
                    past_tense(other)
                ),
            };
            return Err(OrderError::conflict(message, self.status));
        }

        match transition {
            Transition::Accept => self.accepted_at = Some(at),
            Transition::Prepare => self.prepared_at = Some(at),
            Transition::PickUp { driver_id } => {
                let driver_id = driver_id.trim();
                if driver_id.is_empty() {
                    return Err(OrderError::Validation("driverId is required".to_string()));
                }
                self.driver_id = Some(driver_id.to_string());
                self.picked_up_at = Some(at);
            }
            Transition::Deliver { driver_id } => {
                if self.driver_id.as_deref() != Some(driver_id.trim()) {
                    return Err(OrderError::Unauthorized(
                        "You can only deliver orders assigned to you".to_string(),
                    ));
                }
                self.delivered_at = Some(at);
            }
            Transition::Cancel => self.cancelled_at = Some(at),
        }

        self.status = transition.target();
        self.updated_at = at;
        Ok(())
    }

    /// Monotonic status projection. Returns whether anything changed.
    ///
    /// Events from different exchanges can arrive in any order, so a status
    /// that is not ahead of the recorded one is ignored rather than written.
    pub fn project(&mut self, status: OrderStatus, at: DateTime<Utc>) -> bool {
        if self.status.is_terminal() {
            return false;
        }

        let ahead = match (self.status.progress(), status.progress()) {
            (Some(current), Some(incoming)) => incoming > current,
            (Some(0), None) => true,
            _ => false,
        };
        if !ahead {
            return false;
        }

        let stamp = |slot: &mut Option<DateTime<Utc>>| {
            if slot.is_none() {
                *slot = Some(at);
            }
        };
        match status {
            OrderStatus::Pending => {}
            OrderStatus::Accepted => stamp(&mut self.accepted_at),
            OrderStatus::Prepared => stamp(&mut self.prepared_at),
            OrderStatus::PickedUp => stamp(&mut self.picked_up_at),
            OrderStatus::Delivered => stamp(&mut self.delivered_at),
            OrderStatus::Cancelled => stamp(&mut self.cancelled_at),
        }

        self.status = status;
        self.updated_at = at;
        true
    }
}

fn past_tense(transition: &Transition) -> &'static str {
    match transition {
        Transition::Accept => "accepted",
        Transition::Prepare => "prepared",
        Transition::PickUp { .. } => "picked up",
        Transition::Deliver { .. } => "delivered",
        Transition::Cancel => "cancelled",
    }
}
