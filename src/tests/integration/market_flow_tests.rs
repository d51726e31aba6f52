use serde_json::json;
use warp::http::StatusCode;

use super::support::app;
use crate::mocks::SERVER_ACCOUNT;

#[tokio::test]
async fn test_market_data_defaults_and_selection() {
    let app = app().await;

    let (status, body) = app.request("GET", "/api/market/data", None, None).await;
    assert_eq!(status, StatusCode::OK);
    let data = body["data"].as_array().unwrap();
    assert_eq!(data.len(), 3);
    assert_eq!(data[0]["symbol"], "BTCUSDT");
    assert_eq!(data[0]["change24h"], -2.5);
    assert_eq!(data[2]["symbol"], "BNBUSDT");

    let (status, body) = app
        .request("GET", "/api/market/data?symbols=ethusdt", None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"][0]["price"], 3000.0);

    let (status, body) = app
        .request("GET", "/api/market/data?symbols=BTCUSDT,NOPEUSDT", None, None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn test_ticker_and_price() {
    let app = app().await;

    let (status, body) = app
        .request("GET", "/api/market/ticker/ETHUSDT", None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["price"], 3000.0);
    assert_eq!(body["data"]["volume"], 1000.0);

    let (status, body) = app
        .request("GET", "/api/market/price/bnbusdt", None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], json!({ "symbol": "BNBUSDT", "price": 600.0 }));

    let (status, body) = app
        .request("GET", "/api/market/ticker/FAKEUSDT", None, None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Exchange error: Symbol not found: FAKEUSDT");
}

#[tokio::test]
async fn test_order_book_and_chart() {
    let app = app().await;

    let (status, body) = app
        .request("GET", "/api/market/orderbook/BTCUSDT?limit=3", None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["bids"].as_array().unwrap().len(), 3);
    assert_eq!(body["data"]["asks"].as_array().unwrap().len(), 3);

    let (status, body) = app
        .request("GET", "/api/market/chart/BTCUSDT?interval=15m&limit=5", None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    let candles = body["data"].as_array().unwrap();
    assert_eq!(candles.len(), 5);
    assert_eq!(candles[0]["close"], 50000.0);

    let (status, _) = app
        .request("GET", "/api/market/chart/BTCUSDT", None, None)
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app
        .request("GET", "/api/market/chart/BTCUSDT?interval=2h", None, None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Invalid interval: 2h");
}

#[tokio::test]
async fn test_user_balance_and_stats() {
    let app = app().await;
    let token = app.register("stats@example.com").await;
    let bot_id = app.create_bot(&token, "momentum").await;
    app.request("POST", &format!("/api/bots/{}/toggle", bot_id), Some(&token), None)
        .await;
    app.create_bot(&token, "scalping").await;

    let (status, body) = app.get("/api/users/balance", &token).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"][0]["asset"], "USDT");
    assert_eq!(body["data"][0]["free"], 1000.0);

    for (entry, exit) in [(100.0, 130.0), (100.0, 90.0)] {
        let (_, body) = app
            .post(
                "/api/trades",
                &token,
                json!({
                    "symbol": "BTCUSDT",
                    "side": "buy",
                    "quantity": 1.0,
                    "price": entry,
                    "strategy": "momentum",
                    "status": "filled",
                }),
            )
            .await;
        let id = body["data"]["id"].as_str().unwrap().to_string();
        app.post(&format!("/api/trades/{}/close", id), &token, json!({ "exitPrice": exit }))
            .await;
    }

    let (status, body) = app.get("/api/users/stats", &token).await;
    assert_eq!(status, StatusCode::OK);
    let stats = &body["data"];
    assert_eq!(stats["total"], 2);
    assert_eq!(stats["winning"], 1);
    assert_eq!(stats["winRate"], 50.0);
    assert_eq!(stats["totalProfit"], 20.0);
    assert_eq!(stats["avgProfit"], 10.0);
    assert_eq!(stats["dailyProfit"], 20.0);
    assert_eq!(stats["monthlyProfit"], 20.0);
    assert_eq!(stats["activeBots"], 1);
    assert_eq!(stats["totalBots"], 2);
}

#[tokio::test]
async fn test_profile_and_api_keys() {
    let app = app().await;
    let token = app.register("profile@example.com").await;

    let (status, body) = app
        .request(
            "PUT",
            "/api/users/profile",
            Some(&token),
            Some(json!({
                "firstName": "Grace",
                "tradingSettings": { "riskPercentage": 3.5 },
            })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Profile updated successfully");
    assert_eq!(body["data"]["firstName"], "Grace");
    assert_eq!(body["data"]["tradingSettings"]["riskPercentage"], 3.5);
    assert_eq!(body["data"]["tradingSettings"]["maxPositionSize"], 10.0);

    let (status, _) = app
        .request(
            "PUT",
            "/api/users/profile",
            Some(&token),
            Some(json!({ "tradingSettings": { "riskPercentage": 50.0 } })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = app
        .request(
            "PUT",
            "/api/users/api-keys",
            Some(&token),
            Some(json!({ "exchange": "binance", "apiKey": "key", "apiSecret": "secret" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "API keys updated successfully");
    assert!(body["data"].get("apiKeys").is_none());

    // Balances are now read with the stored keys
    let (status, _) = app.get("/api/users/balance", &token).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(app.exchange.accounts_used().await, vec!["key"]);

    let (status, _) = app
        .request(
            "PUT",
            "/api/users/api-keys",
            Some(&token),
            Some(json!({
                "exchange": "binance",
                "apiKey": "key",
                "apiSecret": "secret",
                "isActive": false,
            })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    app.get("/api/users/balance", &token).await;
    assert_eq!(app.exchange.accounts_used().await, vec!["key", SERVER_ACCOUNT]);
}
