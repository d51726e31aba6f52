use serde_json::json;
use warp::http::StatusCode;

use super::support::app;

#[tokio::test]
async fn test_create_bot_validation() {
    let app = app().await;
    let token = app.register("bots@example.com").await;

    let (status, body) = app
        .post("/api/bots", &token, json!({ "name": "no strategy", "symbol": "BTCUSDT" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Missing required fields");

    let (status, body) = app
        .post(
            "/api/bots",
            &token,
            json!({ "name": "x", "strategy": "martingale", "symbol": "BTCUSDT", "interval": "1h" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Invalid strategy");

    let (status, body) = app
        .post(
            "/api/bots",
            &token,
            json!({ "name": "x", "strategy": "momentum", "symbol": "BTCUSDT", "interval": "2h" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Invalid interval");

    let (status, _) = app
        .post(
            "/api/bots",
            &token,
            json!({
                "name": "x",
                "strategy": "momentum",
                "symbol": "BTCUSDT",
                "interval": "1h",
                "settings": { "stopLossPercentage": 50.0 },
            }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_bot_crud() {
    let app = app().await;
    let token = app.register("crud@example.com").await;
    let id = app.create_bot(&token, "momentum").await;

    let (status, body) = app.get(&format!("/api/bots/{}", id), &token).await;
    assert_eq!(status, StatusCode::OK);
    let bot = &body["data"];
    assert_eq!(bot["symbol"], "BTCUSDT");
    assert_eq!(bot["strategy"], "momentum");
    assert_eq!(bot["isActive"], false);
    assert_eq!(bot["settings"]["stopLossPercentage"], 2.5);
    assert_eq!(bot["performance"]["totalTrades"], 0);
    assert!(bot.get("userId").is_none());

    let (status, body) = app
        .request(
            "PUT",
            &format!("/api/bots/{}", id),
            Some(&token),
            Some(json!({ "name": "renamed", "settings": { "riskPercentage": 5.0 } })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Bot updated successfully");
    assert_eq!(body["data"]["name"], "renamed");
    assert_eq!(body["data"]["settings"]["riskPercentage"], 5.0);
    // untouched settings survive the merge
    assert_eq!(body["data"]["settings"]["takeProfitPercentage"], 4.0);

    let (status, body) = app.get("/api/bots", &token).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 1);

    let (status, body) = app
        .request("DELETE", &format!("/api/bots/{}", id), Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Bot deleted successfully");

    let (status, body) = app.get(&format!("/api/bots/{}", id), &token).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Bot not found");
}

#[tokio::test]
async fn test_bots_are_private() {
    let app = app().await;
    let owner = app.register("owner@example.com").await;
    let other = app.register("other@example.com").await;
    let id = app.create_bot(&owner, "scalping").await;

    let (status, _) = app.get(&format!("/api/bots/{}", id), &other).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = app.get("/api/bots", &other).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"].as_array().unwrap().is_empty());

    let (status, _) = app
        .request("DELETE", &format!("/api/bots/{}", id), Some(&other), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_toggle_and_active_delete_guard() {
    let app = app().await;
    let token = app.register("toggle@example.com").await;
    let id = app.create_bot(&token, "rsi_ema").await;

    let (status, body) = app
        .request("POST", &format!("/api/bots/{}/toggle", id), Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Bot activated");
    assert_eq!(body["data"], json!({ "id": id, "isActive": true }));

    let (status, body) = app
        .request("DELETE", &format!("/api/bots/{}", id), Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Cannot delete an active bot");

    let (_, body) = app
        .request("POST", &format!("/api/bots/{}/toggle", id), Some(&token), None)
        .await;
    assert_eq!(body["message"], "Bot deactivated");
    assert_eq!(body["data"]["isActive"], false);
}

#[tokio::test]
async fn test_bot_dry_run() {
    let app = app().await;
    let token = app.register("dryrun@example.com").await;
    let id = app.create_bot(&token, "scalping").await;

    let (status, body) = app
        .request("POST", &format!("/api/bots/{}/test", id), Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::OK);

    let analysis = &body["data"]["analysis"];
    assert_eq!(analysis["symbol"], "BTCUSDT");
    assert_eq!(analysis["currentPrice"], 50000.0);
    assert_eq!(analysis["strategy"], "scalping");
    // A dry run never trades; the strategy itself would fade the 0.2% candles
    assert_eq!(analysis["signal"], "hold");
    assert_eq!(analysis["strategySignal"], "sell");
    assert_eq!(analysis["confidence"], 0.5);
    assert_eq!(analysis["indicators"]["rsi"], 100.0);
    let bands = &analysis["indicators"]["bollinger"];
    assert!(bands["upper"].as_f64() > bands["lower"].as_f64());
    assert!(analysis["indicators"]["macd"]["histogram"].is_number());
    assert_eq!(analysis["marketConditions"]["change24h"], -2.5);
    assert_eq!(analysis["marketConditions"]["volatility"], 2.5);
    assert_eq!(body["data"]["marketData"]["price"], 50000.0);

    let id = app.create_bot(&token, "copy_trading").await;
    let (_, body) = app
        .request("POST", &format!("/api/bots/{}/test", id), Some(&token), None)
        .await;
    assert_eq!(body["data"]["analysis"]["signal"], "hold");
    assert_eq!(body["data"]["analysis"]["strategySignal"], "hold");
}

#[tokio::test]
async fn test_bot_trades_and_stats() {
    let app = app().await;
    let token = app.register("history@example.com").await;
    let id = app.create_bot(&token, "momentum").await;

    for price in [100.0, 110.0, 120.0] {
        let (status, _) = app
            .post(
                "/api/trades",
                &token,
                json!({
                    "botId": id,
                    "symbol": "BTCUSDT",
                    "side": "buy",
                    "quantity": 1.0,
                    "price": price,
                    "strategy": "momentum",
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (status, body) = app
        .get(&format!("/api/bots/{}/trades?page=2&limit=2", id), &token)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["trades"].as_array().unwrap().len(), 1);
    assert_eq!(
        body["data"]["pagination"],
        json!({ "page": 2, "limit": 2, "total": 3, "pages": 2 })
    );

    let (_, body) = app.get(&format!("/api/bots/{}/trades", id), &token).await;
    assert_eq!(body["data"]["pagination"]["page"], 1);
    assert_eq!(body["data"]["pagination"]["limit"], 20);

    let (status, body) = app.get(&format!("/api/bots/{}/stats", id), &token).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["trades"]["total"], 3);
    assert_eq!(body["data"]["trades"]["winning"], 0);
    assert_eq!(body["data"]["recentTrades"].as_array().unwrap().len(), 3);
    assert_eq!(body["data"]["bot"]["id"], id);
}

#[tokio::test]
async fn test_bot_update_is_pushed_to_owner_room() {
    let app = app().await;
    let token = app.register("live@example.com").await;
    let id = app.create_bot(&token, "momentum").await;

    let (_, body) = app.get("/api/auth/me", &token).await;
    let user_id = body["data"]["id"].as_str().unwrap().to_string();

    let hub = app.services.hub.clone();
    let (conn, mut rx) = hub.register().await;
    hub.join(conn, &user_id).await;

    app.request("POST", &format!("/api/bots/{}/toggle", id), Some(&token), None)
        .await;

    let frame: serde_json::Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
    assert_eq!(frame["event"], "bot-update");
    assert_eq!(frame["data"]["id"], id);
    assert_eq!(frame["data"]["isActive"], true);
}

#[tokio::test]
async fn test_bot_trades_page_out_of_range() {
    let app = app().await;
    let token = app.register("paging@example.com").await;
    let id = app.create_bot(&token, "momentum").await;

    let (status, body) = app
        .get(
            &format!("/api/bots/{}/trades?page=9223372036854775807&limit=100", id),
            &token,
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "page is out of range");

    let (status, body) = app
        .get(&format!("/api/bots/{}/trades?page=-5", id), &token)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["pagination"]["page"], 1);
}

#[tokio::test]
async fn test_bot_stats_count_untagged_trades_on_its_market() {
    let app = app().await;
    let token = app.register("untagged@example.com").await;
    let id = app.create_bot(&token, "momentum").await;

    for (symbol, strategy) in [
        ("BTCUSDT", "momentum"),
        ("ETHUSDT", "momentum"),
        ("BTCUSDT", "scalping"),
    ] {
        let (status, body) = app
            .post(
                "/api/trades",
                &token,
                json!({
                    "symbol": symbol,
                    "side": "buy",
                    "quantity": 1.0,
                    "price": 100.0,
                    "strategy": strategy,
                    "status": "filled",
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        let trade_id = body["data"]["id"].as_str().unwrap().to_string();
        app.post(
            &format!("/api/trades/{}/close", trade_id),
            &token,
            json!({ "exitPrice": 110.0 }),
        )
        .await;
    }

    let (status, body) = app.get(&format!("/api/bots/{}/stats", id), &token).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["trades"]["total"], 1);
    assert_eq!(body["data"]["trades"]["winning"], 1);
    assert_eq!(body["data"]["trades"]["totalProfit"], 10.0);
    assert_eq!(body["data"]["recentTrades"][0]["symbol"], "BTCUSDT");
    assert_eq!(body["data"]["recentTrades"][0]["strategy"], "momentum");

    let (_, body) = app.get(&format!("/api/bots/{}/trades", id), &token).await;
    assert_eq!(body["data"]["pagination"]["total"], 1);
    assert!(body["data"]["trades"][0]["botId"].is_null());

    // Another user's trades on the same market stay out
    let other = app.register("neighbour@example.com").await;
    app.post(
        "/api/trades",
        &other,
        json!({
            "symbol": "BTCUSDT",
            "side": "buy",
            "quantity": 1.0,
            "price": 100.0,
            "strategy": "momentum",
        }),
    )
    .await;
    let (_, body) = app.get(&format!("/api/bots/{}/stats", id), &token).await;
    assert_eq!(body["data"]["trades"]["total"], 1);
}
