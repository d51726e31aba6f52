use serde::Deserialize;
use serde_json::json;
use tracing::info;
use warp::filters::BoxedFilter;
use warp::reply::Response;
use warp::Filter;

use crate::api::{created, json_body, message, ok, ok_with_message, with_auth, with_services};
use crate::api::{ApiResult, AuthContext};
use crate::auth::{hash_password, verify_password};
use crate::error::AppError;
use crate::models::user::{normalize_email, RegisterRequest};
use crate::models::User;
use crate::services::Services;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: Option<String>,
    pub password: Option<String>,
}

fn required(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

async fn register(req: RegisterRequest, services: Services) -> ApiResult {
    let (Some(email), Some(password)) = (required(req.email), required(req.password)) else {
        return Err(AppError::validation("Email and password are required").into());
    };

    if services
        .users
        .find_by_email(&normalize_email(&email))
        .await?
        .is_some()
    {
        return Err(AppError::Conflict("Email already registered".to_string()).into());
    }

    let password_hash = hash_password(&password, services.config.bcrypt_cost).await?;
    let user = User::new(
        &email,
        password_hash,
        req.username.as_deref(),
        req.first_name.as_deref(),
        req.last_name.as_deref(),
        req.wallet_address.as_deref(),
    )?;
    services.users.create(&user).await?;

    let token = services.tokens.issue(&user.id);
    info!(user_id = %user.id, "User registered");
    Ok(created(
        json!({ "token": token, "user": user }),
        "User registered successfully",
    ))
}

async fn login(req: LoginRequest, services: Services) -> ApiResult {
    let (Some(email), Some(password)) = (required(req.email), required(req.password)) else {
        return Err(AppError::validation("Email and password are required").into());
    };

    let invalid = || AppError::unauthorized("Invalid credentials");
    let user = services
        .users
        .find_by_email(&normalize_email(&email))
        .await?
        .ok_or_else(invalid)?;
    if !verify_password(&password, &user.password_hash).await? {
        return Err(invalid().into());
    }
    if !user.is_active {
        return Err(AppError::unauthorized("Account is deactivated").into());
    }

    let token = services.tokens.issue(&user.id);
    info!(user_id = %user.id, "User logged in");
    Ok(ok_with_message(
        json!({ "token": token, "user": user }),
        "Login successful",
    ))
}

async fn logout(ctx: AuthContext, services: Services) -> ApiResult {
    services.tokens.revoke(&ctx.token).await?;
    info!(user_id = %ctx.user.id, "User logged out");
    Ok(message("Logged out successfully"))
}

async fn me(ctx: AuthContext) -> ApiResult {
    Ok(ok(ctx.user))
}

pub fn routes(services: Services) -> BoxedFilter<(Response,)> {
    let register = warp::path!("api" / "auth" / "register")
        .and(warp::post())
        .and(json_body())
        .and(with_services(services.clone()))
        .and_then(register);

    let login = warp::path!("api" / "auth" / "login")
        .and(warp::post())
        .and(json_body())
        .and(with_services(services.clone()))
        .and_then(login);

    let logout = warp::path!("api" / "auth" / "logout")
        .and(warp::post())
        .and(with_auth(services.clone()))
        .and(with_services(services.clone()))
        .and_then(logout);

    let me = warp::path!("api" / "auth" / "me")
        .and(warp::get())
        .and(with_auth(services))
        .and_then(me);

    register
        .or(login)
        .unify()
        .or(logout)
        .unify()
        .or(me)
        .unify()
        .boxed()
}
