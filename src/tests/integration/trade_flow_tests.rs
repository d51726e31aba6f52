use serde_json::{json, Value};
use warp::http::StatusCode;

use super::support::{app, TestApp};
use crate::mocks::SERVER_ACCOUNT;
use crate::types::{ExchangeOrder, TradeSide};

fn assert_close(value: &Value, expected: f64) {
    let actual = value.as_f64().unwrap_or(f64::NAN);
    assert!((actual - expected).abs() < 1e-6, "{} != {}", actual, expected);
}

async fn record(app: &TestApp, token: &str, body: Value) -> Value {
    let (status, body) = app.post("/api/trades", token, body).await;
    assert_eq!(status, StatusCode::CREATED, "record failed: {}", body);
    body["data"].clone()
}

#[tokio::test]
async fn test_record_and_close_updates_bot_performance() {
    let app = app().await;
    let token = app.register("closer@example.com").await;
    let bot_id = app.create_bot(&token, "momentum").await;

    let trade = record(
        &app,
        &token,
        json!({
            "botId": bot_id,
            "symbol": "ethusdt",
            "side": "buy",
            "quantity": 2.0,
            "price": 100.0,
            "strategy": "momentum",
            "status": "filled",
        }),
    )
    .await;
    assert_eq!(trade["symbol"], "ETHUSDT");
    assert_eq!(trade["totalValue"], 200.0);
    assert!(trade["orderId"].as_str().unwrap().starts_with("manual-"));
    let id = trade["id"].as_str().unwrap();

    let (status, body) = app
        .post(&format!("/api/trades/{}/close", id), &token, json!({ "exitPrice": 110.0 }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Trade closed successfully");
    assert_eq!(body["data"]["pnl"], 20.0);
    assert_close(&body["data"]["pnlPercentage"], 10.0);
    assert!(body["data"]["exitTime"].is_string());

    let (_, body) = app.get(&format!("/api/bots/{}", bot_id), &token).await;
    let perf = &body["data"]["performance"];
    assert_eq!(perf["totalTrades"], 1);
    assert_eq!(perf["winningTrades"], 1);
    assert_eq!(perf["winRate"], 100.0);
    assert_eq!(perf["netProfit"], 20.0);

    let (status, body) = app
        .post(&format!("/api/trades/{}/close", id), &token, json!({ "exitPrice": 120.0 }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Trade already closed");
}

#[tokio::test]
async fn test_record_rejects_foreign_bot() {
    let app = app().await;
    let owner = app.register("bot-owner@example.com").await;
    let other = app.register("intruder@example.com").await;
    let bot_id = app.create_bot(&owner, "scalping").await;

    let (status, body) = app
        .post(
            "/api/trades",
            &other,
            json!({
                "botId": bot_id,
                "symbol": "BTCUSDT",
                "side": "sell",
                "quantity": 1.0,
                "price": 10.0,
                "strategy": "scalping",
            }),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Bot not found");
}

#[tokio::test]
async fn test_market_order_with_bot_risk_levels() {
    let app = app().await;
    let token = app.register("market@example.com").await;
    let bot_id = app.create_bot(&token, "rsi_ema").await;

    let (status, body) = app
        .post(
            "/api/trades/orders",
            &token,
            json!({
                "symbol": "btcusdt",
                "side": "buy",
                "quantity": 0.12345,
                "botId": bot_id,
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    assert_eq!(body["message"], "Order placed successfully");

    let trade = &body["data"];
    assert_eq!(trade["status"], "filled");
    assert_eq!(trade["price"], 50000.0);
    assert_eq!(trade["quantity"], 0.123);
    assert_eq!(trade["strategy"], "rsi_ema");
    assert_eq!(trade["botId"], bot_id);
    // default bot settings: 2.5% stop, 4% target
    assert_close(&trade["stopLoss"], 48750.0);
    assert_close(&trade["takeProfit"], 52000.0);

    let placed = app.exchange.placed_orders().await;
    assert_eq!(placed.len(), 1);
    assert_eq!(placed[0].symbol, "BTCUSDT");
    assert_eq!(placed[0].side, TradeSide::Buy);
}

#[tokio::test]
async fn test_limit_order_cancel() {
    let app = app().await;
    let token = app.register("limit@example.com").await;

    let (status, body) = app
        .post(
            "/api/trades/orders",
            &token,
            json!({
                "symbol": "ETHUSDT",
                "side": "sell",
                "quantity": 1.5,
                "price": 3100.0,
                "orderType": "limit",
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    assert_eq!(body["data"]["status"], "pending");
    assert_eq!(body["data"]["price"], 3100.0);
    let id = body["data"]["id"].as_str().unwrap().to_string();
    let order_id = body["data"]["orderId"].as_str().unwrap().to_string();

    let (status, body) = app
        .request("DELETE", &format!("/api/trades/{}/order", id), Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Order cancelled successfully");
    assert_eq!(body["data"]["status"], "cancelled");
    assert_eq!(app.exchange.cancelled_orders().await, vec![order_id]);

    let (status, body) = app
        .request("DELETE", &format!("/api/trades/{}/order", id), Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Only pending trades can be cancelled");
}

#[tokio::test]
async fn test_manual_pending_trade_cancels_locally() {
    let app = app().await;
    let token = app.register("manual@example.com").await;
    let trade = record(
        &app,
        &token,
        json!({
            "symbol": "BNBUSDT",
            "side": "buy",
            "quantity": 1.0,
            "price": 600.0,
            "strategy": "scalping",
        }),
    )
    .await;
    assert_eq!(trade["status"], "pending");

    let (status, _) = app
        .request(
            "DELETE",
            &format!("/api/trades/{}/order", trade["id"].as_str().unwrap()),
            Some(&token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(app.exchange.cancelled_orders().await.is_empty());
}

#[tokio::test]
async fn test_exchange_rejection_surfaces_as_bad_gateway() {
    let app = app().await;
    let token = app.register("reject@example.com").await;
    app.exchange
        .set_order_response("BTCUSDT", TradeSide::Sell, Err("Insufficient balance".to_string()))
        .await;

    let (status, body) = app
        .post(
            "/api/trades/orders",
            &token,
            json!({ "symbol": "BTCUSDT", "side": "sell", "quantity": 1.0 }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"], "Exchange request failed");

    let (_, body) = app.get("/api/trades", &token).await;
    assert_eq!(body["data"]["pagination"]["total"], 0);
}

#[tokio::test]
async fn test_configured_fill_is_recorded() {
    let app = app().await;
    let token = app.register("fill@example.com").await;
    app.exchange
        .set_order_response(
            "ETHUSDT",
            TradeSide::Buy,
            Ok(ExchangeOrder {
                symbol: "ETHUSDT".to_string(),
                side: TradeSide::Buy,
                quantity: 2.0,
                price: 2990.0,
                order_id: "abc-1".to_string(),
                status: "FILLED".to_string(),
                timestamp: 1_700_000_000_000,
            }),
        )
        .await;

    let (status, body) = app
        .post(
            "/api/trades/orders",
            &token,
            json!({ "symbol": "ETHUSDT", "side": "buy", "quantity": 2.0, "strategy": "momentum" }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["orderId"], "abc-1");
    assert_eq!(body["data"]["price"], 2990.0);
    assert_eq!(body["data"]["totalValue"], 5980.0);
    assert_eq!(body["data"]["strategy"], "momentum");
    assert!(body["data"]["stopLoss"].is_null());
}

#[tokio::test]
async fn test_trade_filters_and_pagination() {
    let app = app().await;
    let token = app.register("filters@example.com").await;

    for (symbol, status, strategy) in [
        ("BTCUSDT", "filled", "momentum"),
        ("BTCUSDT", "pending", "scalping"),
        ("ETHUSDT", "filled", "momentum"),
    ] {
        record(
            &app,
            &token,
            json!({
                "symbol": symbol,
                "side": "buy",
                "quantity": 1.0,
                "price": 1.0,
                "strategy": strategy,
                "status": status,
            }),
        )
        .await;
    }

    let (status, body) = app.get("/api/trades?symbol=btcusdt", &token).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["trades"].as_array().unwrap().len(), 2);

    let (_, body) = app.get("/api/trades?status=filled&strategy=momentum", &token).await;
    assert_eq!(body["data"]["pagination"]["total"], 2);

    let (_, body) = app.get("/api/trades?limit=1&offset=1", &token).await;
    assert_eq!(body["data"]["trades"].as_array().unwrap().len(), 1);
    assert_eq!(
        body["data"]["pagination"],
        json!({ "total": 3, "limit": 1, "offset": 1 })
    );

    let (status, _) = app.get("/api/trades?status=open", &token).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let other = app.register("stranger@example.com").await;
    let (_, body) = app.get("/api/trades", &other).await;
    assert_eq!(body["data"]["pagination"]["total"], 0);
}

#[tokio::test]
async fn test_trade_update_reaches_owner_room() {
    let app = app().await;
    let token = app.register("socket@example.com").await;
    let (_, me) = app.get("/api/auth/me", &token).await;
    let user_id = me["data"]["id"].as_str().unwrap().to_string();

    let hub = app.services.hub.clone();
    let (conn, mut rx) = hub.register().await;
    hub.join(conn, &user_id).await;

    let trade = record(
        &app,
        &token,
        json!({
            "symbol": "BTCUSDT",
            "side": "buy",
            "quantity": 0.5,
            "price": 50000.0,
            "strategy": "scalping",
        }),
    )
    .await;

    let frame: Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
    assert_eq!(frame["event"], "trade-update");
    assert_eq!(frame["data"]["id"], trade["id"]);
}

#[tokio::test]
async fn test_concurrent_closes_settle_once() {
    let app = app().await;
    let token = app.register("race@example.com").await;
    let bot_id = app.create_bot(&token, "momentum").await;
    let trade = record(
        &app,
        &token,
        json!({
            "botId": bot_id,
            "symbol": "BTCUSDT",
            "side": "buy",
            "quantity": 2.0,
            "price": 100.0,
            "strategy": "momentum",
            "status": "filled",
        }),
    )
    .await;
    let path = format!("/api/trades/{}/close", trade["id"].as_str().unwrap());

    let (high, low) = tokio::join!(
        app.post(&path, &token, json!({ "exitPrice": 110.0 })),
        app.post(&path, &token, json!({ "exitPrice": 90.0 })),
    );
    let (winner, loser) = if high.0 == StatusCode::OK { (high, low) } else { (low, high) };
    assert_eq!(winner.0, StatusCode::OK);
    assert_eq!(loser.0, StatusCode::BAD_REQUEST);
    assert_eq!(loser.1["error"], "Trade already closed");

    let settled = winner.1["data"]["pnl"].as_f64().unwrap();
    let (_, stored) = app
        .get(&format!("/api/trades/{}", trade["id"].as_str().unwrap()), &token)
        .await;
    assert_eq!(stored["data"]["pnl"].as_f64(), Some(settled));

    let (_, body) = app.get(&format!("/api/bots/{}", bot_id), &token).await;
    let perf = &body["data"]["performance"];
    assert_eq!(perf["totalTrades"], 1);
    assert_eq!(perf["netProfit"].as_f64(), Some(settled));
}

#[tokio::test]
async fn test_unfilled_limit_order_cannot_close() {
    let app = app().await;
    let token = app.register("resting@example.com").await;

    let (_, body) = app
        .post(
            "/api/trades/orders",
            &token,
            json!({
                "symbol": "ETHUSDT",
                "side": "buy",
                "quantity": 1.0,
                "price": 2900.0,
                "orderType": "limit",
            }),
        )
        .await;
    assert_eq!(body["data"]["status"], "pending");
    let id = body["data"]["id"].as_str().unwrap().to_string();

    let (status, body) = app
        .post(&format!("/api/trades/{}/close", id), &token, json!({ "exitPrice": 3000.0 }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Cannot close an unfilled order");

    let (_, body) = app.get(&format!("/api/trades/{}", id), &token).await;
    assert_eq!(body["data"]["status"], "pending");
    assert!(body["data"]["pnl"].is_null());
}

#[tokio::test]
async fn test_order_without_quantity_is_sized_from_balance() {
    let app = app().await;
    let token = app.register("sizing@example.com").await;

    // 2% risk of 1000 USDT over a 2.5% stop is 800, capped at a tenth of the balance
    let (status, body) = app
        .post("/api/trades/orders", &token, json!({ "symbol": "BTCUSDT", "side": "buy" }))
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    assert_close(&body["data"]["quantity"], 0.002);
    assert_close(&body["data"]["totalValue"], 100.0);

    let (status, body) = app
        .post(
            "/api/trades/orders",
            &token,
            json!({ "symbol": "ETHUSDT", "side": "buy", "price": 2500.0, "orderType": "limit" }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    assert_close(&body["data"]["quantity"], 0.04);

    let (status, _) = app
        .post("/api/trades/orders", &token, json!({ "symbol": "NOPEUSDT", "side": "buy" }))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(app.exchange.placed_orders().await.len(), 2);
}

#[tokio::test]
async fn test_orders_use_the_callers_exchange_keys() {
    let app = app().await;
    let with_keys = app.register("keyed@example.com").await;
    let without_keys = app.register("keyless@example.com").await;

    let (status, _) = app
        .request(
            "PUT",
            "/api/users/api-keys",
            Some(&with_keys),
            Some(json!({ "exchange": "binance", "apiKey": "USER-KEY", "apiSecret": "user-secret" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = app
        .post(
            "/api/trades/orders",
            &with_keys,
            json!({
                "symbol": "ETHUSDT",
                "side": "sell",
                "quantity": 1.0,
                "price": 3100.0,
                "orderType": "limit",
            }),
        )
        .await;
    let id = body["data"]["id"].as_str().unwrap().to_string();
    let (status, _) = app
        .request("DELETE", &format!("/api/trades/{}/order", id), Some(&with_keys), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(app.exchange.accounts_used().await, vec!["USER-KEY", "USER-KEY"]);

    let (status, _) = app
        .post(
            "/api/trades/orders",
            &without_keys,
            json!({ "symbol": "BTCUSDT", "side": "buy", "quantity": 0.01 }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(
        app.exchange.accounts_used().await.last().map(String::as_str),
        Some(SERVER_ACCOUNT)
    );
}
