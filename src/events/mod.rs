use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::entities::MovementType;

/// Sending half of the application event channel.
#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event, logging instead of failing when the channel is closed.
    /// Writes have already committed by the time events go out.
    pub async fn send_or_log(&self, event: Event) {
        let name = event.name();
        if let Err(err) = self.send(event).await {
            warn!(event = name, error = %err, "dropping event");
        }
    }
}

/// Domain events published after a write commits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    EntityChanged {
        entity_type: String,
        entity_id: Option<Uuid>,
        updated_by: String,
    },
    EntityDeleted {
        entity_type: String,
        entity_id: Uuid,
        deleted_by: String,
    },
    ProductionCompleted {
        order_id: Uuid,
        order_number: String,
        product_id: Uuid,
        qty_finished: f64,
        completed_by: String,
    },
    StockUpdated {
        product_id: Uuid,
        warehouse_id: Option<Uuid>,
        change_type: MovementType,
        updated_by: String,
    },
    ProductCostUpdated {
        product_id: Uuid,
        bom_id: Uuid,
        material_cost: f64,
        labor_cost: f64,
        overhead_cost: f64,
        total_cost: f64,
        updated_at: DateTime<Utc>,
    },
}

impl Event {
    pub fn entity_changed(entity_type: &str, entity_id: Option<Uuid>, updated_by: &str) -> Self {
        Event::EntityChanged {
            entity_type: entity_type.to_string(),
            entity_id,
            updated_by: updated_by.to_string(),
        }
    }

    pub fn entity_deleted(entity_type: &str, entity_id: Uuid, deleted_by: &str) -> Self {
        Event::EntityDeleted {
            entity_type: entity_type.to_string(),
            entity_id,
            deleted_by: deleted_by.to_string(),
        }
    }

    /// Event name as seen by realtime subscribers.
    pub fn name(&self) -> &'static str {
        match self {
            Event::EntityChanged { .. } => "entity:changed",
            Event::EntityDeleted { .. } => "entity:deleted",
            Event::ProductionCompleted { .. } => "production:completed",
            Event::StockUpdated { .. } => "stock:updated",
            Event::ProductCostUpdated { .. } => "product:cost_updated",
        }
    }

    /// JSON payload delivered to subscribers, keyed in camelCase.
    pub fn payload(&self) -> serde_json::Value {
        match self {
            Event::EntityChanged {
                entity_type,
                entity_id,
                updated_by,
            } => {
                let mut data = json!({ "entityType": entity_type, "updatedBy": updated_by });
                if let Some(id) = entity_id {
                    data["entityId"] = json!(id);
                }
                data
            }
            Event::EntityDeleted {
                entity_type,
                entity_id,
                deleted_by,
            } => json!({
                "entityType": entity_type,
                "entityId": entity_id,
                "deletedBy": deleted_by,
            }),
            Event::ProductionCompleted {
                order_id,
                order_number,
                product_id,
                qty_finished,
                completed_by,
            } => json!({
                "orderId": order_id,
                "orderNumber": order_number,
                "productId": product_id,
                "qtyFinished": qty_finished,
                "completedBy": completed_by,
            }),
            Event::StockUpdated {
                product_id,
                warehouse_id,
                change_type,
                updated_by,
            } => json!({
                "productId": product_id,
                "warehouseId": warehouse_id,
                "changeType": change_type,
                "updatedBy": updated_by,
            }),
            Event::ProductCostUpdated {
                product_id,
                bom_id,
                material_cost,
                labor_cost,
                overhead_cost,
                total_cost,
                updated_at,
            } => json!({
                "productId": product_id,
                "bomId": bom_id,
                "materialCost": material_cost,
                "laborCost": labor_cost,
                "overheadCost": overhead_cost,
                "totalCost": total_cost,
                "updatedAt": updated_at.to_rfc3339(),
            }),
        }
    }

    pub fn to_frame(&self) -> RealtimeFrame {
        RealtimeFrame {
            event: self.name().to_string(),
            data: self.payload(),
        }
    }
}

/// One message on the realtime channel: `{"event": ..., "data": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealtimeFrame {
    pub event: String,
    pub data: serde_json::Value,
}

/// Fan-out point for realtime subscribers.
#[derive(Debug, Clone)]
pub struct RealtimeHub {
    sender: broadcast::Sender<RealtimeFrame>,
}

impl RealtimeHub {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RealtimeFrame> {
        self.sender.subscribe()
    }

    /// Delivers a frame to current subscribers. Returns how many received it.
    pub fn publish(&self, frame: RealtimeFrame) -> usize {
        // An error only means nobody is listening.
        self.sender.send(frame).unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Drains the event channel, logging each event and forwarding it to the hub.
pub async fn process_events(mut rx: mpsc::Receiver<Event>, hub: RealtimeHub) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::ProductionCompleted {
                order_number,
                qty_finished,
                ..
            } => info!(%order_number, qty_finished, "production order completed"),
            Event::ProductCostUpdated {
                product_id,
                total_cost,
                ..
            } => info!(%product_id, total_cost, "product cost recalculated from BOM"),
            other => debug!(event = other.name(), "event received"),
        }

        metrics::counter!("events.published", 1, "event" => event.name());
        let delivered = hub.publish(event.to_frame());
        debug!(event = event.name(), delivered, "event broadcast");
    }

    warn!("Event processing loop has ended");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_changed_omits_missing_id() {
        let event = Event::entity_changed("products", None, "BOM Auto-Cost");
        let frame = event.to_frame();
        assert_eq!(frame.event, "entity:changed");
        assert_eq!(
            frame.data,
            json!({ "entityType": "products", "updatedBy": "BOM Auto-Cost" })
        );
    }

    #[test]
    fn stock_updated_uses_movement_type_names() {
        let product_id = Uuid::new_v4();
        let frame = Event::StockUpdated {
            product_id,
            warehouse_id: None,
            change_type: MovementType::ProductionOutput,
            updated_by: "System".into(),
        }
        .to_frame();
        assert_eq!(frame.event, "stock:updated");
        assert_eq!(frame.data["changeType"], "PRODUCTION_OUTPUT");
        assert_eq!(frame.data["productId"], json!(product_id));
    }

    #[tokio::test]
    async fn processed_events_reach_subscribers() {
        let hub = RealtimeHub::new(8);
        let mut subscriber = hub.subscribe();
        let (tx, rx) = mpsc::channel(8);
        let sender = EventSender::new(tx);
        let handle = tokio::spawn(process_events(rx, hub.clone()));

        let id = Uuid::new_v4();
        sender
            .send(Event::entity_deleted("production_orders", id, "Planner"))
            .await
            .unwrap();

        let frame = subscriber.recv().await.unwrap();
        assert_eq!(frame.event, "entity:deleted");
        assert_eq!(frame.data["entityId"], json!(id));
        assert_eq!(frame.data["deletedBy"], "Planner");

        drop(sender);
        handle.await.unwrap();
    }
}
