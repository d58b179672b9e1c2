mod common;

use axum::http::StatusCode;
use chrono::{Duration, Utc};
use common::{approx_eq, id_of, TestApp};
use serde_json::{json, Value};
use uuid::Uuid;

/// An order for one unit of a finished good made from `RAW-S` and `RAW-T`.
struct Floor {
    warehouse: Uuid,
    raw_s: Uuid,
    raw_t: Uuid,
    order: Value,
}

async fn floor(app: &TestApp) -> Floor {
    let warehouse = app.seed_warehouse("Shop floor").await;
    let raw_s = app
        .seed_product("RAW-S", "RAW", 2.5, 40.0, Some(warehouse))
        .await;
    let raw_t = app
        .seed_product("RAW-T", "RAW", 5.0, 40.0, Some(warehouse))
        .await;
    let finished = app.seed_product("FIN-S", "FINISHED", 0.0, 0.0, None).await;
    let bom = app
        .seed_bom(finished, &[(raw_s, 1.0, 0.0), (raw_t, 1.0, 0.0)])
        .await;
    let (status, order) = app
        .post(
            "/api/v1/production",
            json!({ "bomId": bom, "qtyPlanned": 1, "warehouseId": warehouse }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{order}");
    Floor {
        warehouse,
        raw_s,
        raw_t,
        order,
    }
}

async fn record_scrap(app: &TestApp, body: Value) -> Value {
    let (status, scrap) = app.post("/api/v1/scrap", body).await;
    assert_eq!(status, StatusCode::CREATED, "record scrap: {scrap}");
    scrap
}

#[tokio::test]
async fn manual_scrap_is_valued_and_named() {
    let app = TestApp::new().await;
    let floor = floor(&app).await;

    let scrap = record_scrap(
        &app,
        json!({
            "productionOrderId": id_of(&floor.order),
            "productId": floor.raw_s,
            "warehouseId": floor.warehouse,
            "quantity": 4,
            "unitCost": 2.5,
            "reason": "offcuts",
        }),
    )
    .await;

    assert_eq!(scrap["scrapType"], "CUTTING_WASTE");
    assert_eq!(scrap["disposalStatus"], "PENDING");
    assert!(scrap["disposalDate"].is_null());
    assert!(approx_eq(scrap["totalValue"].as_f64().unwrap(), 10.0));
    assert_eq!(scrap["orderNumber"], floor.order["orderNumber"]);
    assert_eq!(scrap["finishedProductName"], "Product FIN-S");
    assert_eq!(scrap["scrapProductSku"], "RAW-S");
    assert_eq!(scrap["warehouseName"], "Shop floor");
    assert_eq!(scrap["createdBy"], "admin user");
}

#[tokio::test]
async fn scrap_needs_a_known_order_and_a_positive_quantity() {
    let app = TestApp::new().await;
    let floor = floor(&app).await;

    let (status, _) = app
        .post(
            "/api/v1/scrap",
            json!({ "productionOrderId": Uuid::new_v4(), "productId": floor.raw_s, "quantity": 1 }),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = app
        .post(
            "/api/v1/scrap",
            json!({ "productionOrderId": id_of(&floor.order), "productId": floor.raw_s, "quantity": 0 }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn disposal_stamps_a_date_once_scrap_leaves() {
    let app = TestApp::new().await;
    let floor = floor(&app).await;
    let scrap = record_scrap(
        &app,
        json!({ "productionOrderId": id_of(&floor.order), "productId": floor.raw_t, "quantity": 2 }),
    )
    .await;
    let scrap_id = id_of(&scrap);

    let (status, sold) = app
        .patch(
            &format!("/api/v1/scrap/{scrap_id}/disposal"),
            json!({ "disposalStatus": "SOLD", "disposalNotes": "sold to recycler" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{sold}");
    assert_eq!(sold["disposalStatus"], "SOLD");
    assert_eq!(sold["disposalNotes"], "sold to recycler");
    assert!(sold["disposalDate"].is_string());

    let (_, reopened) = app
        .patch(
            &format!("/api/v1/scrap/{scrap_id}/disposal"),
            json!({ "disposalStatus": "PENDING" }),
        )
        .await;
    assert_eq!(reopened["disposalStatus"], "PENDING");
    assert_eq!(reopened["disposalDate"], sold["disposalDate"]);
    assert!(reopened["disposalNotes"].is_null());

    let (status, _) = app
        .patch(
            &format!("/api/v1/scrap/{}/disposal", Uuid::new_v4()),
            json!({ "disposalStatus": "DISPOSED" }),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn list_filters_by_type_status_product_and_date() {
    let app = TestApp::new().await;
    let floor = floor(&app).await;
    let order_id = id_of(&floor.order);
    let trim = record_scrap(
        &app,
        json!({ "productionOrderId": order_id, "productId": floor.raw_s, "quantity": 1 }),
    )
    .await;
    record_scrap(
        &app,
        json!({
            "productionOrderId": order_id,
            "productId": floor.raw_t,
            "quantity": 1,
            "scrapType": "PROCESS_LOSS",
        }),
    )
    .await;
    app.patch(
        &format!("/api/v1/scrap/{}/disposal", id_of(&trim)),
        json!({ "disposalStatus": "RECYCLED" }),
    )
    .await;

    let count = |body: &Value| body.as_array().map_or(0, Vec::len);

    let (_, all) = app
        .get(&format!("/api/v1/scrap?productionOrderId={order_id}"))
        .await;
    assert_eq!(count(&all), 2);
    // newest first
    assert_eq!(all[0]["scrapType"], "PROCESS_LOSS");

    let (_, losses) = app.get("/api/v1/scrap?scrapType=PROCESS_LOSS").await;
    assert_eq!(count(&losses), 1);
    let (_, recycled) = app.get("/api/v1/scrap?disposalStatus=RECYCLED").await;
    assert_eq!(count(&recycled), 1);
    assert_eq!(recycled[0]["id"], trim["id"]);
    let (_, of_t) = app
        .get(&format!("/api/v1/scrap?productId={}", floor.raw_t))
        .await;
    assert_eq!(count(&of_t), 1);

    let today = Utc::now().date_naive();
    let yesterday = today - Duration::days(1);
    let (_, current) = app
        .get(&format!("/api/v1/scrap?startDate={today}&endDate={today}"))
        .await;
    assert_eq!(count(&current), 2);
    let (_, before) = app.get(&format!("/api/v1/scrap?endDate={yesterday}")).await;
    assert_eq!(count(&before), 0);

    let (status, _) = app.get("/api/v1/scrap?scrapType=SHREDDED").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn stats_summarise_value_by_type_status_and_product() {
    let app = TestApp::new().await;
    let floor = floor(&app).await;
    let order_id = id_of(&floor.order);
    record_scrap(
        &app,
        json!({ "productionOrderId": order_id, "productId": floor.raw_s, "quantity": 4, "unitCost": 2.5 }),
    )
    .await;
    let loss = record_scrap(
        &app,
        json!({
            "productionOrderId": order_id,
            "productId": floor.raw_t,
            "quantity": 1,
            "unitCost": 5.0,
            "scrapType": "PROCESS_LOSS",
        }),
    )
    .await;
    app.patch(
        &format!("/api/v1/scrap/{}/disposal", id_of(&loss)),
        json!({ "disposalStatus": "DISPOSED" }),
    )
    .await;

    let (status, stats) = app.get("/api/v1/scrap/stats").await;
    assert_eq!(status, StatusCode::OK, "{stats}");

    let summary = &stats["summary"];
    assert_eq!(summary["totalRecords"], 2);
    assert!(approx_eq(summary["totalQuantity"].as_f64().unwrap(), 5.0));
    assert!(approx_eq(summary["totalValue"].as_f64().unwrap(), 15.0));
    assert!(approx_eq(summary["avgValue"].as_f64().unwrap(), 7.5));

    // costliest type first
    assert_eq!(stats["byType"][0]["scrapType"], "CUTTING_WASTE");
    assert_eq!(stats["byType"][1]["scrapType"], "PROCESS_LOSS");

    let by_status = stats["byStatus"].as_array().unwrap();
    assert_eq!(by_status.len(), 2);
    let disposed = by_status
        .iter()
        .find(|s| s["disposalStatus"] == "DISPOSED")
        .unwrap();
    assert!(approx_eq(disposed["totalValue"].as_f64().unwrap(), 5.0));

    let top = stats["topProducts"].as_array().unwrap();
    assert_eq!(top[0]["id"], json!(floor.raw_s));
    assert_eq!(top[0]["sku"], "RAW-S");
    assert_eq!(top[0]["scrapCount"], 1);

    let yesterday = Utc::now().date_naive() - Duration::days(1);
    let (_, empty) = app
        .get(&format!(
            "/api/v1/scrap/stats?startDate={yesterday}&endDate={yesterday}"
        ))
        .await;
    assert_eq!(empty["summary"]["totalRecords"], 0);
    assert!(empty["byType"].as_array().unwrap().is_empty());
    assert!(empty["topProducts"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn finished_orders_show_up_in_the_scrap_ledger() {
    let app = TestApp::new().await;
    let floor = floor(&app).await;
    let order_id = id_of(&floor.order);
    app.post(&format!("/api/v1/production/{order_id}/start"), json!({}))
        .await;
    let (status, _) = app
        .post(
            &format!("/api/v1/production/{order_id}/finish"),
            json!({
                "qtyFinished": 1,
                "scrapEntries": [
                    { "productId": floor.raw_s, "quantity": 0.2, "unitCost": 2.5 }
                ]
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (_, ledger) = app
        .get(&format!("/api/v1/scrap?productionOrderId={order_id}"))
        .await;
    let rows = ledger.as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["finishedProductName"], "Product FIN-S");
    assert!(approx_eq(rows[0]["totalValue"].as_f64().unwrap(), 0.5));

    let (_, by_order) = app
        .get(&format!("/api/v1/production/{order_id}/scrap"))
        .await;
    assert_eq!(by_order[0]["id"], rows[0]["id"]);
    let (status, _) = app
        .get(&format!("/api/v1/production/{}/scrap", Uuid::new_v4()))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn deleting_scrap_removes_it() {
    let app = TestApp::new().await;
    let floor = floor(&app).await;
    let scrap = record_scrap(
        &app,
        json!({ "productionOrderId": id_of(&floor.order), "productId": floor.raw_s, "quantity": 1 }),
    )
    .await;
    let scrap_id = id_of(&scrap);

    let (status, body) = app.delete(&format!("/api/v1/scrap/{scrap_id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Scrap record deleted successfully");

    let (_, remaining) = app.get("/api/v1/scrap").await;
    assert!(remaining.as_array().unwrap().is_empty());
    let (status, _) = app.delete(&format!("/api/v1/scrap/{scrap_id}")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
