//! Password hashing and bearer tokens.
//!
//! Tokens are `<user_id>.<expires_at>.<nonce>.<signature>` where the
//! signature is a hex HMAC-SHA256 over the first three parts.

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::Sha256;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::{AppError, Result};
use crate::models::user::MIN_PASSWORD_LENGTH;

type HmacSha256 = Hmac<Sha256>;

pub async fn hash_password(password: &str, cost: u32) -> Result<String> {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(AppError::Validation(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LENGTH
        )));
    }
    let password = password.to_string();
    tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
        .await
        .map_err(|e| AppError::Internal(format!("hashing task failed: {}", e)))?
        .map_err(AppError::from)
}

pub async fn verify_password(password: &str, hash: &str) -> Result<bool> {
    let password = password.to_string();
    let hash = hash.to_string();
    tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
        .await
        .map_err(|e| AppError::Internal(format!("hashing task failed: {}", e)))?
        .map_err(AppError::from)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claims {
    pub user_id: String,
    pub expires_at: i64,
    pub nonce: String,
}

pub struct TokenService {
    secret: Vec<u8>,
    ttl: Duration,
    // token signature -> expiry, pruned as entries lapse
    revoked: RwLock<HashMap<String, i64>>,
}

impl TokenService {
    pub fn new(secret: &str, ttl: Duration) -> Self {
        Self {
            secret: secret.as_bytes().to_vec(),
            ttl,
            revoked: RwLock::new(HashMap::new()),
        }
    }

    fn sign(&self, payload: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .expect("HMAC can take key of any size");
        mac.update(payload.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    pub fn issue(&self, user_id: &str) -> String {
        let ttl = i64::try_from(self.ttl.as_secs()).unwrap_or(i64::MAX);
        let expires_at = Utc::now().timestamp().saturating_add(ttl);
        let nonce: u64 = rand::rng().random();
        let payload = format!("{}.{}.{:016x}", user_id, expires_at, nonce);
        let signature = self.sign(&payload);
        format!("{}.{}", payload, signature)
    }

    fn decode(&self, token: &str) -> Result<(Claims, String)> {
        let invalid = || AppError::unauthorized("Invalid token");

        let (payload, signature) = token.rsplit_once('.').ok_or_else(invalid)?;
        let expected = hex::decode(signature).map_err(|_| invalid())?;

        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .expect("HMAC can take key of any size");
        mac.update(payload.as_bytes());
        mac.verify_slice(&expected).map_err(|_| invalid())?;

        let mut parts = payload.split('.');
        let (Some(user_id), Some(expires_at), Some(nonce), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid());
        };
        let expires_at: i64 = expires_at.parse().map_err(|_| invalid())?;

        Ok((
            Claims {
                user_id: user_id.to_string(),
                expires_at,
                nonce: nonce.to_string(),
            },
            signature.to_string(),
        ))
    }

    /// Checks signature, expiry and revocation
    pub async fn verify(&self, token: &str) -> Result<Claims> {
        let (claims, signature) = self.decode(token)?;
        if claims.expires_at <= Utc::now().timestamp() {
            debug!(user_id = %claims.user_id, "Rejected expired token");
            return Err(AppError::unauthorized("Token expired"));
        }
        if self.revoked.read().await.contains_key(&signature) {
            return Err(AppError::unauthorized("Token revoked"));
        }
        Ok(claims)
    }

    /// Revokes a token until it would have expired anyway
    pub async fn revoke(&self, token: &str) -> Result<()> {
        let (claims, signature) = self.decode(token)?;
        let now = Utc::now().timestamp();

        let mut revoked = self.revoked.write().await;
        revoked.retain(|_, exp| *exp > now);
        if claims.expires_at > now {
            revoked.insert(signature, claims.expires_at);
        } else {
            warn!(user_id = %claims.user_id, "Logout with an already expired token");
        }
        Ok(())
    }
}
