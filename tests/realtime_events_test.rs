mod common;

use std::time::Duration;

use common::{id_of, TestApp};
use erp_api::events::RealtimeFrame;
use serde_json::json;
use tokio::sync::broadcast;
use tokio::time::timeout;

/// Collects frames until one named `event` arrives.
async fn wait_for(rx: &mut broadcast::Receiver<RealtimeFrame>, event: &str) -> RealtimeFrame {
    timeout(Duration::from_secs(5), async {
        loop {
            match rx.recv().await {
                Ok(frame) if frame.event == event => return frame,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("realtime hub closed"),
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("no {event} frame within timeout"))
}

#[tokio::test]
async fn writes_are_broadcast_to_subscribers() {
    let app = TestApp::new().await;
    let mut rx = app.state.realtime.subscribe();

    let warehouse = app.seed_warehouse("Events").await;
    let frame = wait_for(&mut rx, "entity:changed").await;
    assert_eq!(frame.data["entityType"], "warehouses");
    assert_eq!(frame.data["entityId"], json!(warehouse));
    assert_eq!(frame.data["updatedBy"], "admin user");

    app.delete(&format!("/api/v1/warehouses/{warehouse}")).await;
    let frame = wait_for(&mut rx, "entity:deleted").await;
    assert_eq!(frame.data["entityId"], json!(warehouse));
    assert_eq!(frame.data["deletedBy"], "admin user");
}

#[tokio::test]
async fn bom_changes_announce_the_new_product_cost() {
    let app = TestApp::new().await;
    let raw = app.seed_product("R-EV", "RAW", 3.0, 0.0, None).await;
    let finished = app.seed_product("F-EV", "FINISHED", 0.0, 0.0, None).await;
    let mut rx = app.state.realtime.subscribe();

    let bom = app.seed_bom(finished, &[(raw, 2.0, 0.0)]).await;
    let frame = wait_for(&mut rx, "product:cost_updated").await;
    assert_eq!(frame.data["productId"], json!(finished));
    assert_eq!(frame.data["bomId"], json!(bom));
    assert_eq!(frame.data["totalCost"], 6.0);
}

#[tokio::test]
async fn finishing_an_order_announces_completion_and_stock() {
    let app = TestApp::new().await;
    let warehouse = app.seed_warehouse("Plant").await;
    let raw = app
        .seed_product("R-PC", "RAW", 1.0, 50.0, Some(warehouse))
        .await;
    let finished = app.seed_product("F-PC", "FINISHED", 0.0, 0.0, None).await;
    let bom = app.seed_bom(finished, &[(raw, 1.0, 0.0)]).await;

    let (_, order) = app
        .post(
            "/api/v1/production",
            json!({ "bomId": bom, "qtyPlanned": 5, "warehouseId": warehouse }),
        )
        .await;
    let order_id = id_of(&order);
    app.post(&format!("/api/v1/production/{order_id}/start"), json!({}))
        .await;

    let mut rx = app.state.realtime.subscribe();
    app.post(
        &format!("/api/v1/production/{order_id}/finish"),
        json!({ "qtyFinished": 5 }),
    )
    .await;

    let completed = wait_for(&mut rx, "production:completed").await;
    assert_eq!(completed.data["orderId"], json!(order_id));
    assert_eq!(completed.data["orderNumber"], order["orderNumber"]);
    assert_eq!(completed.data["qtyFinished"], 5.0);

    let stock = wait_for(&mut rx, "stock:updated").await;
    assert_eq!(stock.data["productId"], json!(finished));
    assert_eq!(stock.data["changeType"], "PRODUCTION_OUTPUT");

    let products = wait_for(&mut rx, "entity:changed").await;
    assert_eq!(products.data["entityType"], "products");
}
