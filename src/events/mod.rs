use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::entities::{DeviceStatus, ShippingStatus};

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Creates a sender together with the receiving end of its channel.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }

    /// Publishes an event without waiting for room in the channel.
    ///
    /// Events are emitted after the owning transaction has committed, so a
    /// full or closed channel is reported and the event is dropped.
    pub fn publish(&self, event: Event) {
        let name = event.name();
        match self.sender.try_send(event) {
            Ok(()) => {
                counter!("devicedesk_events.published", 1, "event" => name);
            }
            Err(TrySendError::Full(event)) => {
                counter!("devicedesk_events.dropped", 1, "event" => name);
                warn!(event = name, ?event, "Event channel full; dropping event");
            }
            Err(TrySendError::Closed(event)) => {
                counter!("devicedesk_events.dropped", 1, "event" => name);
                warn!(event = name, ?event, "Event channel closed; dropping event");
            }
        }
    }

    /// True once the consumer has gone away.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Domain events emitted once a lifecycle change has been committed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    AssignmentCreated {
        assignment_id: Uuid,
        device_id: Uuid,
        assignee_name: String,
    },
    ShippingStarted {
        assignment_id: Uuid,
        shipped_at: Option<DateTime<Utc>>,
    },
    ShippingUpdated {
        assignment_id: Uuid,
        shipping_status: ShippingStatus,
    },
    ShipmentDelivered {
        assignment_id: Uuid,
        delivered_at: Option<DateTime<Utc>>,
    },
    ReturnRegistered {
        assignment_id: Uuid,
        received: bool,
        returned_device_id: Option<Uuid>,
    },
    AssignmentClosed {
        assignment_id: Uuid,
        device_id: Uuid,
        resulting_device_status: DeviceStatus,
        closed_at: DateTime<Utc>,
    },
    DeviceStatusChanged {
        device_id: Uuid,
        old_status: DeviceStatus,
        new_status: DeviceStatus,
    },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::AssignmentCreated { .. } => "assignment_created",
            Event::ShippingStarted { .. } => "shipping_started",
            Event::ShippingUpdated { .. } => "shipping_updated",
            Event::ShipmentDelivered { .. } => "shipment_delivered",
            Event::ReturnRegistered { .. } => "return_registered",
            Event::AssignmentClosed { .. } => "assignment_closed",
            Event::DeviceStatusChanged { .. } => "device_status_changed",
        }
    }
}

/// Drains the event channel until every sender is dropped.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        counter!("devicedesk_events.processed", 1, "event" => event.name());
        match &event {
            Event::DeviceStatusChanged {
                device_id,
                old_status,
                new_status,
            } => {
                info!(%device_id, %old_status, %new_status, "Device status changed");
            }
            Event::AssignmentClosed {
                assignment_id,
                resulting_device_status,
                ..
            } => {
                info!(%assignment_id, %resulting_device_status, "Assignment closed");
            }
            other => {
                debug!(event = other.name(), payload = ?other, "Event processed");
            }
        }
    }

    info!("Event processing loop stopped");
}
