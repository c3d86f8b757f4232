//! Bearer-token identity.
//!
//! `Authorization: Bearer <token>` is resolved once per request by the
//! extractors below. The configured `auth.admin_token` yields the admin
//! identity; any other token is hashed and looked up in `users`.

use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts, HeaderMap},
};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::state::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Buyer,
    Admin,
}

/// Who is calling. Admins carry no user row, so `user_id` is nil for them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    pub user_id: Uuid,
    pub role: Role,
}

impl Identity {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Any authenticated caller.
#[derive(Debug, Clone, Copy)]
pub struct Authenticated(pub Identity);

/// A registered buyer; admins are refused with 403.
#[derive(Debug, Clone, Copy)]
pub struct BuyerAuth(pub Uuid);

/// The admin; buyers are refused with 403.
#[derive(Debug, Clone, Copy)]
pub struct AdminAuth;

/// SHA-256 hex digest stored in place of the raw token.
pub fn token_digest(token: &str) -> String {
    format!("{:x}", Sha256::digest(token.as_bytes()))
}

/// Fresh random token handed out at registration.
pub fn generate_token() -> String {
    format!("wh_{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ").or_else(|| value.strip_prefix("bearer "))?;
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b) {
        diff |= x ^ y;
    }
    diff == 0
}

pub async fn resolve(state: &AppState, headers: &HeaderMap) -> AppResult<Identity> {
    let token = bearer_token(headers)
        .ok_or_else(|| AppError::Unauthorized("Missing bearer token".into()))?;

    let admin_token = state.config.auth.admin_token.as_str();
    if !admin_token.is_empty() && constant_time_eq(token.as_bytes(), admin_token.as_bytes()) {
        return Ok(Identity { user_id: Uuid::nil(), role: Role::Admin });
    }

    let row: Option<(String,)> = sqlx::query_as("SELECT id FROM users WHERE token_digest = ?")
        .bind(token_digest(token))
        .fetch_optional(&state.db)
        .await?;
    let (id,) = row.ok_or_else(|| AppError::Unauthorized("Invalid bearer token".into()))?;
    let user_id = Uuid::parse_str(&id).map_err(|e| AppError::Internal(anyhow::anyhow!("corrupt user id {}: {}", id, e)))?;
    Ok(Identity { user_id, role: Role::Buyer })
}

impl FromRequestParts<AppState> for Authenticated {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        resolve(state, &parts.headers).await.map(Authenticated)
    }
}

impl FromRequestParts<AppState> for BuyerAuth {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let identity = resolve(state, &parts.headers).await?;
        match identity.role {
            Role::Buyer => Ok(BuyerAuth(identity.user_id)),
            Role::Admin => Err(AppError::Forbidden("This action is only available to buyers".into())),
        }
    }
}

impl FromRequestParts<AppState> for AdminAuth {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let identity = resolve(state, &parts.headers).await?;
        if identity.is_admin() {
            Ok(AdminAuth)
        } else {
            Err(AppError::Forbidden("Admin privileges required".into()))
        }
    }
}
