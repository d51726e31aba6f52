use std::fmt;
use thiserror::Error;
use warp::http::StatusCode;

/// Core error type for the backend. Every layer below the HTTP boundary
/// returns this, and the API layer turns it into an envelope.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Exchange error: {0}")]
    Exchange(#[from] ExchangeError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Password hashing error: {0}")]
    Hashing(#[from] bcrypt::BcryptError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Exchange(ExchangeError::MissingCredentials) => StatusCode::BAD_REQUEST,
            AppError::Exchange(ExchangeError::SymbolNotFound(_)) => StatusCode::NOT_FOUND,
            AppError::Exchange(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to hand back to a client. Server-side failures collapse
    /// to a generic string; the detail only goes to the log.
    pub fn public_message(&self) -> String {
        match self.status() {
            StatusCode::INTERNAL_SERVER_ERROR => "Internal server error".to_string(),
            StatusCode::BAD_GATEWAY => "Exchange request failed".to_string(),
            _ => self.to_string(),
        }
    }
}

/// Errors related to the exchange connection and its responses
#[derive(Error, Debug)]
pub enum ExchangeError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error {code}: {msg}")]
    Api { code: i64, msg: String },

    #[error("Exchange credentials are not configured")]
    MissingCredentials,

    #[error("Symbol not found: {0}")]
    SymbolNotFound(String),

    #[error("Order rejected: {0}")]
    OrderRejected(String),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

// Context wrapper to add context to errors
pub struct ErrorContext<E> {
    pub error: E,
    pub context: String,
}

impl<E: std::error::Error> fmt::Display for ErrorContext<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.context, self.error)
    }
}

impl<E: std::error::Error> fmt::Debug for ErrorContext<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Error {{ context: {}, error: {:?} }}", self.context, self.error)
    }
}

impl<E: std::error::Error> std::error::Error for ErrorContext<E> {}

impl<E: std::error::Error> From<ErrorContext<E>> for AppError {
    fn from(err: ErrorContext<E>) -> Self {
        AppError::Internal(err.to_string())
    }
}

// Extension trait to add context to errors
pub trait ErrorExt<T, E> {
    fn context(self, context: &str) -> Result<T, ErrorContext<E>>;
}

impl<T, E: std::error::Error> ErrorExt<T, E> for Result<T, E> {
    fn context(self, context: &str) -> Result<T, ErrorContext<E>> {
        self.map_err(|error| ErrorContext {
            error,
            context: context.to_string(),
        })
    }
}

pub type Result<T, E = AppError> = std::result::Result<T, E>;
