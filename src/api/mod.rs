//! HTTP surface. Every response is an envelope:
//! `{"success": bool, "data"?: .., "error"?: "..", "message"?: ".."}`.

use std::convert::Infallible;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, error, info, warn};
use url::Url;
use warp::http::StatusCode;
use warp::reply::Response;
use warp::{Filter, Rejection, Reply};

use crate::error::{AppError, ExchangeError};
use crate::metrics::{HTTP_LATENCY, HTTP_REQUESTS};
use crate::models::User;
use crate::realtime;
use crate::services::Services;

pub mod auth;
pub mod bots;
pub mod market;
pub mod trades;
pub mod users;

pub type ApiResult = std::result::Result<Response, Rejection>;

const MAX_BODY_BYTES: u64 = 10 * 1024 * 1024;

#[derive(Debug, Serialize)]
pub struct Envelope<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

fn envelope<T: Serialize>(status: StatusCode, data: Option<T>, message: Option<&str>) -> Response {
    let body = Envelope {
        success: true,
        data,
        error: None,
        message: message.map(str::to_string),
    };
    warp::reply::with_status(warp::reply::json(&body), status).into_response()
}

pub fn ok<T: Serialize>(data: T) -> Response {
    envelope(StatusCode::OK, Some(data), None)
}

pub fn ok_with_message<T: Serialize>(data: T, message: &str) -> Response {
    envelope(StatusCode::OK, Some(data), Some(message))
}

pub fn created<T: Serialize>(data: T, message: &str) -> Response {
    envelope(StatusCode::CREATED, Some(data), Some(message))
}

pub fn message(message: &str) -> Response {
    envelope::<()>(StatusCode::OK, None, Some(message))
}

pub fn error_response(status: StatusCode, error: &str) -> Response {
    let body = Envelope::<()> {
        success: false,
        data: None,
        error: Some(error.to_string()),
        message: None,
    };
    warp::reply::with_status(warp::reply::json(&body), status).into_response()
}

// `From<AppError> for Rejection` comes from warp's blanket impl over `Reject`
// (which wraps via `warp::reject::custom`).
impl warp::reject::Reject for AppError {}

impl From<ExchangeError> for Rejection {
    fn from(err: ExchangeError) -> Self {
        warp::reject::custom(AppError::from(err))
    }
}

pub fn with_services(
    services: Services,
) -> impl Filter<Extract = (Services,), Error = Infallible> + Clone {
    warp::any().map(move || services.clone())
}

pub fn json_body<T: DeserializeOwned + Send>(
) -> impl Filter<Extract = (T,), Error = Rejection> + Clone {
    warp::body::content_length_limit(MAX_BODY_BYTES).and(warp::body::json())
}

/// The authenticated caller of a request
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user: User,
    pub token: String,
}

async fn authorize(header: Option<String>, services: Services) -> Result<AuthContext, Rejection> {
    let token = header
        .as_deref()
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::unauthorized("Access denied. No token provided."))?;

    let claims = services.tokens.verify(token).await?;
    let user = services
        .users
        .find_by_id(&claims.user_id)
        .await?
        .ok_or_else(|| AppError::unauthorized("Invalid token"))?;
    if !user.is_active {
        return Err(AppError::unauthorized("Account is deactivated").into());
    }

    Ok(AuthContext {
        user,
        token: token.to_string(),
    })
}

/// Requires a valid `Authorization: Bearer <token>` header
pub fn with_auth(
    services: Services,
) -> impl Filter<Extract = (AuthContext,), Error = Rejection> + Clone {
    warp::header::optional::<String>("authorization")
        .and(with_services(services))
        .and_then(authorize)
}

fn health(services: Services) -> Response {
    warp::reply::json(&json!({
        "status": "OK",
        "timestamp": Utc::now().to_rfc3339(),
        "uptime": services.uptime(),
    }))
    .into_response()
}

pub async fn handle_rejection(err: Rejection) -> Result<Response, Infallible> {
    let (status, msg) = if let Some(e) = err.find::<AppError>() {
        let status = e.status();
        if status.is_server_error() {
            error!(error = %e, "Request failed");
        } else {
            debug!(error = %e, status = status.as_u16(), "Request rejected");
        }
        (status, e.public_message())
    } else if err.is_not_found() {
        (StatusCode::NOT_FOUND, "Route not found".to_string())
    } else if let Some(e) = err.find::<warp::filters::body::BodyDeserializeError>() {
        (StatusCode::BAD_REQUEST, format!("Invalid request body: {}", e))
    } else if err.find::<warp::reject::InvalidQuery>().is_some() {
        (StatusCode::BAD_REQUEST, "Invalid query parameters".to_string())
    } else if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        (StatusCode::PAYLOAD_TOO_LARGE, "Payload too large".to_string())
    } else if err.find::<warp::reject::UnsupportedMediaType>().is_some() {
        (
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            "Unsupported media type".to_string(),
        )
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "Method not allowed".to_string())
    } else {
        error!(rejection = ?err, "Unhandled rejection");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal server error".to_string(),
        )
    };

    Ok(error_response(status, &msg))
}

fn cors(frontend_url: &str) -> warp::cors::Builder {
    let builder = warp::cors()
        .allow_methods(vec!["GET", "POST", "PUT", "DELETE", "OPTIONS"])
        .allow_headers(vec!["content-type", "authorization"])
        .allow_credentials(true);

    match Url::parse(frontend_url) {
        Ok(url) if url.has_host() => {
            builder.allow_origin(url.origin().ascii_serialization().as_str())
        }
        _ => {
            warn!(frontend_url = %frontend_url, "Invalid FRONTEND_URL; allowing any origin");
            builder.allow_any_origin()
        }
    }
}

fn log_request(info: warp::log::Info<'_>) {
    let method = info.method().as_str();
    let status = info.status().as_u16();
    HTTP_REQUESTS
        .with_label_values(&[method, &status.to_string()])
        .inc();
    HTTP_LATENCY
        .with_label_values(&[method])
        .observe(info.elapsed().as_secs_f64());

    info!(
        method = method,
        path = info.path(),
        status = status,
        elapsed_ms = info.elapsed().as_millis() as u64,
        "HTTP request"
    );
}

pub fn routes(
    services: Services,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let health = warp::path("health")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_services(services.clone()))
        .map(health);

    let api = auth::routes(services.clone())
        .or(users::routes(services.clone()))
        .unify()
        .or(bots::routes(services.clone()))
        .unify()
        .or(trades::routes(services.clone()))
        .unify()
        .or(market::routes(services.clone()))
        .unify();

    health
        .or(api)
        .unify()
        .or(realtime::routes(services.hub.clone()))
        .recover(handle_rejection)
        .with(cors(&services.config.frontend_url))
        .with(warp::log::custom(log_request))
}
