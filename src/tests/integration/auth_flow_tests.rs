use serde_json::json;
use warp::http::StatusCode;

use super::support::app;

/// Register, read the session user, log out and confirm the token is dead.
#[tokio::test]
async fn test_register_me_logout_flow() {
    let app = app().await;

    let (status, body) = app
        .request(
            "POST",
            "/api/auth/register",
            None,
            Some(json!({
                "email": "Trader@Example.com",
                "password": "secret123",
                "firstName": "Ada",
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["success"], true);
    assert_eq!(body["message"], "User registered successfully");
    let user = &body["data"]["user"];
    assert_eq!(user["email"], "trader@example.com");
    assert_eq!(user["username"], "trader");
    assert!(user.get("passwordHash").is_none());
    assert!(user.get("apiKeys").is_none());

    let token = body["data"]["token"].as_str().unwrap().to_string();
    let (status, body) = app.get("/api/auth/me", &token).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["firstName"], "Ada");

    let (status, body) = app.request("POST", "/api/auth/logout", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Logged out successfully");

    let (status, body) = app.get("/api/auth/me", &token).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "Token revoked");
}

#[tokio::test]
async fn test_duplicate_registration_conflicts() {
    let app = app().await;
    app.register("dup@example.com").await;

    let (status, body) = app
        .request(
            "POST",
            "/api/auth/register",
            None,
            Some(json!({ "email": "DUP@example.com", "password": "another1" })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "Email already registered");
}

#[tokio::test]
async fn test_registration_validation() {
    let app = app().await;

    let (status, body) = app
        .request("POST", "/api/auth/register", None, Some(json!({ "email": "a@b.co" })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Email and password are required");

    let (status, _) = app
        .request(
            "POST",
            "/api/auth/register",
            None,
            Some(json!({ "email": "a@b.co", "password": "123" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = app
        .request(
            "POST",
            "/api/auth/register",
            None,
            Some(json!({ "email": "not-an-email", "password": "secret123" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Invalid email address");
}

#[tokio::test]
async fn test_login() {
    let app = app().await;
    app.register("login@example.com").await;

    let (status, body) = app
        .request(
            "POST",
            "/api/auth/login",
            None,
            Some(json!({ "email": "login@example.com", "password": "wrong-pass" })),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Invalid credentials");

    let (status, body) = app
        .request(
            "POST",
            "/api/auth/login",
            None,
            Some(json!({ "email": "nobody@example.com", "password": "secret123" })),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Invalid credentials");

    let (status, body) = app
        .request(
            "POST",
            "/api/auth/login",
            None,
            Some(json!({ "email": " LOGIN@example.com ", "password": "secret123" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Login successful");

    let token = body["data"]["token"].as_str().unwrap();
    let (status, _) = app.get("/api/users/profile", token).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_protected_routes_require_token() {
    let app = app().await;

    let (status, body) = app.request("GET", "/api/bots", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Access denied. No token provided.");

    let (status, body) = app.get("/api/trades", "not-a-token").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Invalid token");
}

#[tokio::test]
async fn test_health_and_unknown_routes() {
    let app = app().await;

    let (status, body) = app.request("GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "OK");
    assert!(body["uptime"].as_f64().is_some());

    let (status, body) = app.request("GET", "/api/nothing-here", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, json!({ "success": false, "error": "Route not found" }));
}

#[tokio::test]
async fn test_malformed_body_rejected() {
    let app = app().await;
    let res = warp::test::request()
        .method("POST")
        .path("/api/auth/login")
        .header("content-type", "application/json")
        .body("{not json")
        .reply(&crate::api::routes(app.services.clone()))
        .await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}
