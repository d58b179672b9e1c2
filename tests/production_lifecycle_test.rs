mod common;

use axum::http::StatusCode;
use common::{approx_eq, id_of, TestApp};
use rstest::rstest;
use serde_json::json;
use uuid::Uuid;

/// Warehouse with two raw materials and a finished product built from
/// 2 × A (10% waste) and 1 × B.
struct Plant {
    warehouse: Uuid,
    raw_a: Uuid,
    raw_b: Uuid,
    finished: Uuid,
    bom: Uuid,
}

async fn plant(app: &TestApp) -> Plant {
    let warehouse = app.seed_warehouse("Main plant").await;
    let raw_a = app
        .seed_product("RAW-A", "RAW", 2.0, 100.0, Some(warehouse))
        .await;
    let raw_b = app
        .seed_product("RAW-B", "RAW", 5.0, 10.0, Some(warehouse))
        .await;
    let finished = app.seed_product("FIN-1", "FINISHED", 0.0, 0.0, None).await;
    let bom = app
        .seed_bom(finished, &[(raw_a, 2.0, 10.0), (raw_b, 1.0, 0.0)])
        .await;
    Plant {
        warehouse,
        raw_a,
        raw_b,
        finished,
        bom,
    }
}

async fn create_order(app: &TestApp, plant: &Plant, qty: f64) -> serde_json::Value {
    let (status, body) = app
        .post(
            "/api/v1/production",
            json!({
                "bomId": plant.bom,
                "qtyPlanned": qty,
                "warehouseId": plant.warehouse,
                "notes": "integration run",
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "create order: {body}");
    body
}

#[tokio::test]
async fn create_reserves_materials_and_confirms_order() {
    let app = TestApp::new().await;
    let plant = plant(&app).await;

    let order = create_order(&app, &plant, 4.0).await;
    assert_eq!(order["status"], "CONFIRMED");
    assert!(order["orderNumber"].as_str().unwrap().starts_with("PO-"));
    assert_eq!(order["finishedProductId"], json!(plant.finished));
    assert_eq!(order["bomName"], "Standard recipe");

    let order_id = id_of(&order);
    let (status, reservations) = app
        .get(&format!("/api/v1/production/{order_id}/reservations"))
        .await;
    assert_eq!(status, StatusCode::OK);
    let rows = reservations.as_array().unwrap();
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|r| r["status"] == "RESERVED"));

    let (_, availability) = app
        .get(&format!("/api/v1/products/{}/availability", plant.raw_a))
        .await;
    assert!(approx_eq(availability["physical"].as_f64().unwrap(), 100.0));
    assert!(approx_eq(availability["reserved"].as_f64().unwrap(), 8.8));
    assert!(approx_eq(availability["available"].as_f64().unwrap(), 91.2));
}

#[tokio::test]
async fn shortage_leaves_no_reservations_and_waits_for_materials() {
    let app = TestApp::new().await;
    let plant = plant(&app).await;

    // B only has 10 on hand; 20 units need 20.
    let order = create_order(&app, &plant, 20.0).await;
    assert_eq!(order["status"], "WAITING_MATERIALS");
    let notes = order["notes"].as_str().unwrap();
    assert!(notes.starts_with("integration run"));
    assert!(notes.contains("[System]: Missing materials:"));
    assert!(notes.contains(&plant.raw_b.to_string()));

    let order_id = id_of(&order);
    let (_, reservations) = app
        .get(&format!("/api/v1/production/{order_id}/reservations"))
        .await;
    assert_eq!(reservations.as_array().unwrap().len(), 0);

    let (_, availability) = app
        .get(&format!("/api/v1/products/{}/availability", plant.raw_a))
        .await;
    assert!(approx_eq(availability["reserved"].as_f64().unwrap(), 0.0));

    let (status, body) = app
        .post(&format!("/api/v1/production/{order_id}/start"), json!({}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
}

#[tokio::test]
async fn second_order_cannot_reserve_stock_held_by_the_first() {
    let app = TestApp::new().await;
    let plant = plant(&app).await;

    let first = create_order(&app, &plant, 8.0).await;
    assert_eq!(first["status"], "CONFIRMED");

    // 8 units hold 8 of B's 10; another 4 units would need 4 more.
    let second = create_order(&app, &plant, 4.0).await;
    assert_eq!(second["status"], "WAITING_MATERIALS");
}

#[tokio::test]
async fn start_then_finish_books_output_scrap_and_variances() {
    let app = TestApp::new().await;
    let plant = plant(&app).await;
    let order_id = id_of(&create_order(&app, &plant, 4.0).await);

    let (status, started) = app
        .post(&format!("/api/v1/production/{order_id}/start"), json!({}))
        .await;
    assert_eq!(status, StatusCode::OK, "{started}");
    assert_eq!(started["status"], "IN_PROGRESS");
    assert!(!started["actualStartDate"].is_null());

    assert!(approx_eq(app.product_stock(plant.raw_a).await, 91.2));
    assert!(approx_eq(app.product_stock(plant.raw_b).await, 6.0));
    assert!(approx_eq(
        app.warehouse_stock(plant.raw_a, plant.warehouse).await,
        91.2
    ));
    assert!(approx_eq(
        app.warehouse_stock(plant.raw_b, plant.warehouse).await,
        6.0
    ));

    let (_, reservations) = app
        .get(&format!("/api/v1/production/{order_id}/reservations"))
        .await;
    assert!(reservations
        .as_array()
        .unwrap()
        .iter()
        .all(|r| r["status"] == "FULLY_CONSUMED"));

    let (status, _) = app
        .post(&format!("/api/v1/production/{order_id}/start"), json!({}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, finished) = app
        .post(
            &format!("/api/v1/production/{order_id}/finish"),
            json!({
                "qtyFinished": 4,
                "qtyScrapped": 1,
                "scrapEntries": [
                    { "productId": plant.raw_a, "quantity": 0.5, "unitCost": 2.0, "reason": "trim" }
                ]
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{finished}");
    assert_eq!(finished["status"], "COMPLETED");

    // standard = 8.8 × 2 + 4 × 5; materials were drawn exactly as planned
    assert!(approx_eq(finished["standardCost"].as_f64().unwrap(), 37.6));
    assert!(approx_eq(
        finished["actualMaterialCost"].as_f64().unwrap(),
        37.6
    ));
    assert!(approx_eq(
        finished["materialVariance"].as_f64().unwrap(),
        0.0
    ));
    // one scrapped unit at the rolled-up 9.4 plus 0.5 × 2.0 of trim
    assert!(approx_eq(
        finished["actualScrapCost"].as_f64().unwrap(),
        10.4
    ));
    assert!(approx_eq(finished["yieldVariance"].as_f64().unwrap(), 10.4));
    assert!(approx_eq(finished["totalVariance"].as_f64().unwrap(), 10.4));
    assert!(approx_eq(finished["costPerUnit"].as_f64().unwrap(), 9.4));

    assert!(approx_eq(app.product_stock(plant.finished).await, 3.0));
    assert!(approx_eq(
        app.warehouse_stock(plant.finished, plant.warehouse).await,
        3.0
    ));

    let (_, scrap) = app
        .get(&format!("/api/v1/production/{order_id}/scrap"))
        .await;
    let scrap = scrap.as_array().unwrap();
    assert_eq!(scrap.len(), 2);
    assert!(scrap.iter().any(|s| s["scrapType"] == "DEFECTIVE_MATERIAL"));
    assert!(scrap.iter().any(|s| s["scrapType"] == "CUTTING_WASTE"));

    let (status, _) = app
        .post(&format!("/api/v1/production/{order_id}/cancel"), json!({}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn finish_requires_a_started_order() {
    let app = TestApp::new().await;
    let plant = plant(&app).await;
    let order_id = id_of(&create_order(&app, &plant, 1.0).await);

    let (status, body) = app
        .post(
            &format!("/api/v1/production/{order_id}/finish"),
            json!({ "qtyFinished": 1 }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn cancelling_a_started_order_returns_materials() {
    let app = TestApp::new().await;
    let plant = plant(&app).await;
    let order_id = id_of(&create_order(&app, &plant, 4.0).await);

    app.post(&format!("/api/v1/production/{order_id}/start"), json!({}))
        .await;
    let (status, cancelled) = app
        .post(&format!("/api/v1/production/{order_id}/cancel"), json!({}))
        .await;
    assert_eq!(status, StatusCode::OK, "{cancelled}");
    assert_eq!(cancelled["status"], "CANCELLED");

    assert!(approx_eq(app.product_stock(plant.raw_a).await, 100.0));
    assert!(approx_eq(app.product_stock(plant.raw_b).await, 10.0));
    assert!(approx_eq(
        app.warehouse_stock(plant.raw_a, plant.warehouse).await,
        100.0
    ));

    let (_, history) = app
        .get(&format!("/api/v1/stock-movements/product/{}", plant.raw_a))
        .await;
    // newest first
    let latest = history.as_array().unwrap().first().cloned().unwrap();
    assert_eq!(latest["movementType"], "ADJUSTMENT");
    assert!(approx_eq(latest["balance"].as_f64().unwrap(), 100.0));
}

#[tokio::test]
async fn cancelling_a_confirmed_order_releases_its_reservations() {
    let app = TestApp::new().await;
    let plant = plant(&app).await;
    let order_id = id_of(&create_order(&app, &plant, 4.0).await);

    let (status, _) = app
        .post(&format!("/api/v1/production/{order_id}/cancel"), json!({}))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (_, reservations) = app
        .get(&format!("/api/v1/production/{order_id}/reservations"))
        .await;
    assert!(reservations
        .as_array()
        .unwrap()
        .iter()
        .all(|r| r["status"] == "RELEASED" && !r["releasedAt"].is_null()));
    assert!(approx_eq(app.product_stock(plant.raw_a).await, 100.0));
}

#[tokio::test]
async fn deleting_a_planned_order_only_removes_it() {
    let app = TestApp::new().await;
    let plant = plant(&app).await;
    let order_id = id_of(&create_order(&app, &plant, 2.0).await);

    let (status, body) = app.delete(&format!("/api/v1/production/{order_id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Production order deleted");

    let (status, _) = app.get(&format!("/api/v1/production/{order_id}")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(approx_eq(app.product_stock(plant.raw_a).await, 100.0));
}

#[tokio::test]
async fn deleting_a_started_order_returns_materials() {
    let app = TestApp::new().await;
    let plant = plant(&app).await;
    let order_id = id_of(&create_order(&app, &plant, 4.0).await);
    app.post(&format!("/api/v1/production/{order_id}/start"), json!({}))
        .await;

    let (status, body) = app.delete(&format!("/api/v1/production/{order_id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["message"]
        .as_str()
        .unwrap()
        .contains("consumed materials returned"));

    assert!(approx_eq(app.product_stock(plant.raw_a).await, 100.0));
    assert!(approx_eq(app.product_stock(plant.raw_b).await, 10.0));
    assert!(approx_eq(
        app.warehouse_stock(plant.raw_b, plant.warehouse).await,
        10.0
    ));

    // Movements referencing the order are gone with it.
    let (_, page) = app
        .get(&format!(
            "/api/v1/stock-movements?productId={}",
            plant.raw_a
        ))
        .await;
    assert!(page["movements"]
        .as_array()
        .unwrap()
        .iter()
        .all(|m| m["referenceId"] != json!(order_id)));
}

#[tokio::test]
async fn deleting_a_completed_order_reverses_output_and_materials() {
    let app = TestApp::new().await;
    let plant = plant(&app).await;
    let order_id = id_of(&create_order(&app, &plant, 4.0).await);
    app.post(&format!("/api/v1/production/{order_id}/start"), json!({}))
        .await;
    app.post(
        &format!("/api/v1/production/{order_id}/finish"),
        json!({ "qtyFinished": 4 }),
    )
    .await;
    assert!(approx_eq(app.product_stock(plant.finished).await, 4.0));

    let (status, body) = app.delete(&format!("/api/v1/production/{order_id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["message"]
        .as_str()
        .unwrap()
        .starts_with("Completed production order deleted"));

    assert!(approx_eq(app.product_stock(plant.finished).await, 0.0));
    assert!(approx_eq(
        app.warehouse_stock(plant.finished, plant.warehouse).await,
        0.0
    ));
    assert!(approx_eq(app.product_stock(plant.raw_a).await, 100.0));
    assert!(approx_eq(app.product_stock(plant.raw_b).await, 10.0));
}

#[tokio::test]
async fn update_keeps_fields_that_are_not_sent() {
    let app = TestApp::new().await;
    let plant = plant(&app).await;
    let order_id = id_of(&create_order(&app, &plant, 2.0).await);

    let (status, updated) = app
        .put(
            &format!("/api/v1/production/{order_id}"),
            json!({ "endDate": "2030-01-31" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{updated}");
    assert_eq!(updated["endDate"], "2030-01-31");
    assert!(approx_eq(updated["qtyPlanned"].as_f64().unwrap(), 2.0));
    assert_eq!(updated["notes"], "integration run");

    let (status, _) = app
        .put(&format!("/api/v1/production/{}", Uuid::new_v4()), json!({}))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn list_filters_by_status_and_reports_stats() {
    let app = TestApp::new().await;
    let plant = plant(&app).await;
    let confirmed = id_of(&create_order(&app, &plant, 1.0).await);
    let started = id_of(&create_order(&app, &plant, 1.0).await);
    app.post(&format!("/api/v1/production/{started}/start"), json!({}))
        .await;

    let (status, page) = app.get("/api/v1/production?status=IN_PROGRESS").await;
    assert_eq!(status, StatusCode::OK);
    let orders = page["orders"].as_array().unwrap();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0]["id"], json!(started));
    assert_eq!(page["stats"]["total"], 2);
    assert_eq!(page["stats"]["inProgress"], 1);
    assert_eq!(page["pagination"]["total"], 1);

    let (_, page) = app.get("/api/v1/production?status=PENDING").await;
    let orders = page["orders"].as_array().unwrap();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0]["id"], json!(confirmed));

    let (status, _) = app.get("/api/v1/production?status=BOGUS").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

/// Finished product built from one unit of `raw`, no waste.
async fn single_material_bom(app: &TestApp, raw: Uuid, sku: &str) -> Uuid {
    let finished = app.seed_product(sku, "FINISHED", 0.0, 0.0, None).await;
    app.seed_bom(finished, &[(raw, 1.0, 0.0)]).await
}

#[tokio::test]
async fn without_a_warehouse_materials_come_from_the_richest_rows_first() {
    let app = TestApp::new().await;
    let small = app.seed_warehouse("Small store").await;
    let large = app.seed_warehouse("Large store").await;
    let raw = app
        .seed_product("SPREAD-1", "RAW", 1.0, 5.0, Some(small))
        .await;
    let (status, _) = app
        .post(
            "/api/v1/product-stocks",
            json!({ "productId": raw, "warehouseId": large, "stock": 6 }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let bom = single_material_bom(&app, raw, "SPREAD-F").await;

    let (status, order) = app
        .post(
            "/api/v1/production",
            json!({ "bomId": bom, "qtyPlanned": 8 }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{order}");
    assert_eq!(order["status"], "CONFIRMED");

    let (_, reservations) = app
        .get(&format!(
            "/api/v1/production/{}/reservations",
            id_of(&order)
        ))
        .await;
    let rows = reservations.as_array().unwrap();
    assert_eq!(rows.len(), 2);
    let reserved_in = |warehouse: Uuid| {
        rows.iter()
            .find(|r| r["warehouseId"] == json!(warehouse))
            .and_then(|r| r["quantityReserved"].as_f64())
            .unwrap_or(0.0)
    };
    assert!(approx_eq(reserved_in(large), 6.0));
    assert!(approx_eq(reserved_in(small), 2.0));
}

#[rstest]
#[case::stock_only_at_product_level(50.0, false)]
#[case::warehouse_without_stock(0.0, true)]
#[tokio::test]
async fn nothing_to_reserve_from_waits_for_materials(
    #[case] global_stock: f64,
    #[case] at_warehouse: bool,
) {
    let app = TestApp::new().await;
    let raw = app
        .seed_product("BARE-1", "RAW", 1.0, global_stock, None)
        .await;
    let warehouse = app.seed_warehouse("Empty store").await;
    let bom = single_material_bom(&app, raw, "BARE-F").await;

    let mut payload = json!({ "bomId": bom, "qtyPlanned": 1 });
    if at_warehouse {
        payload["warehouseId"] = json!(warehouse);
    }
    let (status, order) = app.post("/api/v1/production", payload).await;
    assert_eq!(status, StatusCode::CREATED, "{order}");
    assert_eq!(order["status"], "WAITING_MATERIALS");
    assert!(order["notes"].as_str().unwrap().contains(&raw.to_string()));

    let (_, reservations) = app
        .get(&format!(
            "/api/v1/production/{}/reservations",
            id_of(&order)
        ))
        .await;
    assert!(reservations.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn product_level_stock_backs_a_warehouse_without_a_row() {
    let app = TestApp::new().await;
    let raw = app.seed_product("GLOBAL-1", "RAW", 1.0, 50.0, None).await;
    let warehouse = app.seed_warehouse("Unstocked").await;
    let bom = single_material_bom(&app, raw, "GLOBAL-F").await;
    let order_at = |qty: f64| json!({ "bomId": bom, "qtyPlanned": qty, "warehouseId": warehouse });

    let (_, first) = app.post("/api/v1/production", order_at(45.0)).await;
    assert_eq!(first["status"], "CONFIRMED");
    let (_, reservations) = app
        .get(&format!(
            "/api/v1/production/{}/reservations",
            id_of(&first)
        ))
        .await;
    assert_eq!(reservations[0]["warehouseId"], json!(warehouse));
    assert!(approx_eq(
        reservations[0]["quantityReserved"].as_f64().unwrap(),
        45.0
    ));

    // Only 5 of the 50 remain unreserved.
    let (_, second) = app.post("/api/v1/production", order_at(45.0)).await;
    assert_eq!(second["status"], "WAITING_MATERIALS");

    // Starting deducts the product level only; cancelling returns it and
    // opens the missing warehouse row at the restored stock.
    let first_id = id_of(&first);
    let (status, _) = app
        .post(&format!("/api/v1/production/{first_id}/start"), json!({}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(approx_eq(app.product_stock(raw).await, 5.0));
    assert!(approx_eq(app.warehouse_stock(raw, warehouse).await, 0.0));

    let (status, cancelled) = app
        .post(&format!("/api/v1/production/{first_id}/cancel"), json!({}))
        .await;
    assert_eq!(status, StatusCode::OK, "{cancelled}");
    assert!(approx_eq(app.product_stock(raw).await, 50.0));
    assert!(approx_eq(app.warehouse_stock(raw, warehouse).await, 50.0));
}
