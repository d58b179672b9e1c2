mod common;

use axum::http::StatusCode;
use common::{approx_eq, id_of, TestApp};
use erp_api::entities::product;
use sea_orm::{ActiveModelTrait, EntityTrait, Set};
use serde_json::json;
use uuid::Uuid;

#[tokio::test]
async fn opening_balance_is_booked_to_product_warehouse_and_ledger() {
    let app = TestApp::new().await;
    let warehouse = app.seed_warehouse("Central").await;
    let id = app
        .seed_product("STEEL-1", "RAW", 3.5, 40.0, Some(warehouse))
        .await;

    let product = app.product(id).await;
    assert_eq!(product["productType"], "RAW");
    assert!(approx_eq(product["stock"].as_f64().unwrap(), 40.0));
    assert!(approx_eq(app.warehouse_stock(id, warehouse).await, 40.0));

    let (status, history) = app
        .get(&format!("/api/v1/stock-movements/product/{id}"))
        .await;
    assert_eq!(status, StatusCode::OK);
    let history = history.as_array().unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0]["movementType"], "OPENING_BALANCE");
    assert!(approx_eq(history[0]["inQty"].as_f64().unwrap(), 40.0));
}

#[tokio::test]
async fn manual_movements_adjust_stock_and_running_balance() {
    let app = TestApp::new().await;
    let warehouse = app.seed_warehouse("Central").await;
    let id = app
        .seed_product("BOLT-1", "RAW", 1.0, 10.0, Some(warehouse))
        .await;

    let (status, movement) = app
        .post(
            "/api/v1/stock-movements",
            json!({
                "productId": id,
                "warehouseId": warehouse,
                "qtyChange": 25,
                "movementType": "PURCHASE",
                "unitCost": 0.9,
                "notes": "supplier delivery",
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{movement}");
    assert_eq!(movement["movementType"], "PURCHASE");

    let (status, _) = app
        .post(
            "/api/v1/stock-movements",
            json!({
                "productId": id,
                "warehouseId": warehouse,
                "qtyChange": -5,
                "movementType": "SALE",
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    assert!(approx_eq(app.product_stock(id).await, 30.0));
    assert!(approx_eq(app.warehouse_stock(id, warehouse).await, 30.0));

    let (_, history) = app
        .get(&format!("/api/v1/stock-movements/product/{id}"))
        .await;
    let balances: Vec<f64> = history
        .as_array()
        .unwrap()
        .iter()
        .map(|h| h["balance"].as_f64().unwrap())
        .collect();
    assert_eq!(balances.len(), 3);
    assert!(approx_eq(balances[0], 30.0));

    let (status, stats) = app.get("/api/v1/stock-movements/stats").await;
    assert_eq!(status, StatusCode::OK);
    let purchase = stats
        .as_array()
        .unwrap()
        .iter()
        .find(|s| s["movementType"] == "PURCHASE")
        .cloned()
        .unwrap();
    assert_eq!(purchase["count"], 1);
    assert!(approx_eq(purchase["totalValue"].as_f64().unwrap(), 22.5));

    let (_, page) = app.get("/api/v1/stock-movements?movementType=SALE").await;
    assert_eq!(page["movements"].as_array().unwrap().len(), 1);
    assert_eq!(page["pagination"]["total"], 1);
    assert_eq!(page["movements"][0]["productSku"], "BOLT-1");
}

#[tokio::test]
async fn stats_and_reconcile_total_every_movement_of_a_group() {
    let app = TestApp::new().await;
    let warehouse = app.seed_warehouse("Central").await;
    let id = app
        .seed_product("NUT-1", "RAW", 0.0, 20.0, Some(warehouse))
        .await;
    let other = app
        .seed_product("NUT-2", "RAW", 0.0, 4.0, Some(warehouse))
        .await;

    for (qty, cost) in [(-5.0, Some(2.0)), (-3.0, None)] {
        let mut body = json!({
            "productId": id,
            "warehouseId": warehouse,
            "qtyChange": qty,
            "movementType": "SALE",
        });
        if let Some(cost) = cost {
            body["unitCost"] = json!(cost);
        }
        let (status, created) = app.post("/api/v1/stock-movements", body).await;
        assert_eq!(status, StatusCode::CREATED, "{created}");
    }

    let (status, stats) = app.get("/api/v1/stock-movements/stats").await;
    assert_eq!(status, StatusCode::OK);
    let sale = stats
        .as_array()
        .unwrap()
        .iter()
        .find(|s| s["movementType"] == "SALE")
        .cloned()
        .unwrap();
    assert_eq!(sale["count"], 2);
    assert!(approx_eq(sale["totalQuantity"].as_f64().unwrap(), 8.0));
    assert!(approx_eq(sale["totalValue"].as_f64().unwrap(), 10.0));

    let opening = stats
        .as_array()
        .unwrap()
        .iter()
        .find(|s| s["movementType"] == "OPENING_BALANCE")
        .cloned()
        .unwrap();
    assert_eq!(opening["count"], 2);
    assert!(approx_eq(opening["totalQuantity"].as_f64().unwrap(), 24.0));

    let (status, report) = app
        .post("/api/v1/stock-movements/reconcile", json!({}))
        .await;
    assert_eq!(status, StatusCode::OK, "{report}");
    assert_eq!(report["totalProducts"], 2);
    assert_eq!(report["discrepanciesFound"], 0);
    assert!(approx_eq(app.product_stock(id).await, 12.0));
    assert!(approx_eq(app.product_stock(other).await, 4.0));
}

#[tokio::test]
async fn movement_for_unknown_product_is_not_found() {
    let app = TestApp::new().await;
    let (status, body) = app
        .post(
            "/api/v1/stock-movements",
            json!({
                "productId": Uuid::new_v4(),
                "qtyChange": 1,
                "movementType": "ADJUSTMENT",
            }),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
}

#[tokio::test]
async fn upsert_creates_then_updates_warehouse_stock() {
    let app = TestApp::new().await;
    let warehouse = app.seed_warehouse("Overflow").await;
    let id = app.seed_product("NUT-1", "RAW", 0.1, 0.0, None).await;

    let payload = json!({ "productId": id, "warehouseId": warehouse, "stock": 12 });
    let (status, created) = app.post("/api/v1/product-stocks", payload).await;
    assert_eq!(status, StatusCode::CREATED, "{created}");

    let (status, updated) = app
        .post(
            "/api/v1/product-stocks",
            json!({ "productId": id, "warehouseId": warehouse, "stock": 7 }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["id"], created["id"]);
    assert!(approx_eq(updated["stock"].as_f64().unwrap(), 7.0));

    let (_, by_warehouse) = app
        .get(&format!("/api/v1/product-stocks/warehouse/{warehouse}"))
        .await;
    let rows = by_warehouse.as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["productSku"], "NUT-1");
    assert_eq!(rows[0]["warehouseName"], "Overflow");

    let row_id = id_of(&created);
    let (status, _) = app
        .delete(&format!("/api/v1/product-stocks/{row_id}"))
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(approx_eq(app.warehouse_stock(id, warehouse).await, 0.0));
}

#[tokio::test]
async fn reconcile_reports_products_that_disagree_with_their_ledger() {
    let app = TestApp::new().await;
    let clean = app.seed_product("CLEAN-1", "RAW", 1.0, 5.0, None).await;
    let drifted = app.seed_product("DRIFT-1", "RAW", 1.0, 5.0, None).await;

    let model = product::Entity::find_by_id(drifted)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    let mut active: product::ActiveModel = model.into();
    active.stock = Set(8.0);
    active.update(&*app.state.db).await.unwrap();

    let (status, report) = app
        .post("/api/v1/stock-movements/reconcile", json!({}))
        .await;
    assert_eq!(status, StatusCode::OK, "{report}");
    assert_eq!(report["totalProducts"], 2);
    assert_eq!(report["discrepanciesFound"], 1);
    let discrepancy = &report["discrepancies"][0];
    assert_eq!(discrepancy["productId"], json!(drifted));
    assert!(approx_eq(
        discrepancy["calculatedStock"].as_f64().unwrap(),
        5.0
    ));
    assert!(approx_eq(discrepancy["difference"].as_f64().unwrap(), 3.0));
    assert_ne!(discrepancy["productId"], json!(clean));
}

#[tokio::test]
async fn duplicate_sku_conflicts() {
    let app = TestApp::new().await;
    app.seed_product("DUP-1", "RAW", 1.0, 0.0, None).await;

    let (status, body) = app
        .post(
            "/api/v1/products",
            json!({ "name": "Again", "sku": "DUP-1", "type": "RAW" }),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT, "{body}");
    assert_eq!(body["code"], "DUPLICATE_ENTRY");
}

#[tokio::test]
async fn invalid_product_payload_is_rejected() {
    let app = TestApp::new().await;
    let (status, body) = app
        .post(
            "/api/v1/products",
            json!({ "name": "", "sku": "EMPTY-NAME", "cost": -1 }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn next_sku_and_product_update() {
    let app = TestApp::new().await;
    let id = app
        .seed_product("PRD-0001", "FINISHED", 10.0, 0.0, None)
        .await;

    let (status, body) = app.get("/api/v1/products/next-sku").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["sku"].as_str().is_some_and(|s| !s.is_empty()));

    let (status, updated) = app
        .put(&format!("/api/v1/products/{id}"), json!({ "price": 25.0 }))
        .await;
    assert_eq!(status, StatusCode::OK, "{updated}");
    assert!(approx_eq(updated["price"].as_f64().unwrap(), 25.0));
    assert_eq!(updated["sku"], "PRD-0001");

    let (_, list) = app.get("/api/v1/products?type=FINISHED&search=PRD").await;
    assert_eq!(list.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn deleting_a_product_with_a_bom_is_refused() {
    let app = TestApp::new().await;
    let raw = app.seed_product("R-1", "RAW", 1.0, 0.0, None).await;
    let finished = app.seed_product("F-1", "FINISHED", 0.0, 0.0, None).await;
    app.seed_bom(finished, &[(raw, 1.0, 0.0)]).await;

    let (status, body) = app.delete(&format!("/api/v1/products/{raw}")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
    assert_eq!(body["code"], "REFERENCE_EXISTS");

    let unused = app.seed_product("U-1", "RAW", 1.0, 0.0, None).await;
    let (status, _) = app.delete(&format!("/api/v1/products/{unused}")).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = app.get(&format!("/api/v1/products/{unused}")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn warehouse_crud() {
    let app = TestApp::new().await;
    let id = app.seed_warehouse("Dock").await;

    let (status, updated) = app
        .put(
            &format!("/api/v1/warehouses/{id}"),
            json!({ "isDefault": true }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{updated}");
    assert_eq!(updated["isDefault"], true);
    assert_eq!(updated["name"], "Dock");

    let (_, list) = app.get("/api/v1/warehouses").await;
    assert_eq!(list.as_array().unwrap().len(), 1);

    let (status, _) = app.delete(&format!("/api/v1/warehouses/{id}")).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = app.get(&format!("/api/v1/warehouses/{id}")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
