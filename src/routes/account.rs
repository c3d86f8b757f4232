use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use uuid::Uuid;

use crate::{
    error::{validation::Validator, AppError, AppResult, OptionExt},
    middleware::{
        auth::{generate_token, token_digest},
        ip::MaybeRemoteAddr,
        BuyerAuth,
    },
    state::AppState,
    types::{now_utc, RegisterRequest, RegisterResponse, UpdateProfileRequest, UserProfile},
};

fn looks_like_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
        }
        None => false,
    }
}

fn check_phone(v: &mut Validator, phone: Option<&str>) {
    if let Some(p) = phone {
        let p = p.trim();
        v.check(
            !p.is_empty() && p.len() <= 20 && p.chars().all(|c| c.is_ascii_digit() || "+- ()".contains(c)),
            "phone_number",
            "Phone number may contain digits, spaces and + - ( ) only, up to 20 characters.",
        );
    }
}

fn check_birth_date(v: &mut Validator, birth_date: Option<chrono::NaiveDate>) {
    if let Some(d) = birth_date {
        v.check(d < chrono::Utc::now().date_naive(), "birth_date", "Birth date must be in the past.");
    }
}

pub async fn register(
    State(state): State<AppState>,
    MaybeRemoteAddr(remote): MaybeRemoteAddr,
    headers: HeaderMap,
    Json(req): Json<RegisterRequest>,
) -> AppResult<impl IntoResponse> {
    state.rate_limiter.throttle("/api/auth/register", &headers, remote.map(|a| a.ip())).await?;

    let email = req.email.trim().to_lowercase();
    let mut v = Validator::new();
    v.text(&email, "email", 254)
        .check(looks_like_email(&email), "email", "Email address is not valid.")
        .text(&req.full_name, "full_name", 100);
    check_phone(&mut v, req.phone_number.as_deref());
    check_birth_date(&mut v, req.birth_date);
    v.finish()?;

    let user_id = Uuid::new_v4();
    let token = generate_token();
    let res = sqlx::query(
        "INSERT INTO users(id, email, full_name, phone_number, birth_date, token_digest, created_at) VALUES(?,?,?,?,?,?,?)",
    )
    .bind(user_id.to_string())
    .bind(&email)
    .bind(req.full_name.trim())
    .bind(req.phone_number.as_deref().map(str::trim))
    .bind(req.birth_date.map(|d| d.to_string()))
    .bind(token_digest(&token))
    .bind(now_utc())
    .execute(&state.db)
    .await;

    match res {
        Ok(_) => {}
        Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
            return Err(AppError::Conflict("An account with this email already exists.".into()));
        }
        Err(e) => return Err(e.into()),
    }

    tracing::info!(user_id = %user_id, "buyer registered");
    Ok((StatusCode::CREATED, Json(RegisterResponse { user_id, token })))
}

async fn load_profile(state: &AppState, user_id: Uuid) -> AppResult<UserProfile> {
    sqlx::query_as::<_, UserProfile>(
        "SELECT id, email, full_name, phone_number, birth_date, created_at, updated_at FROM users WHERE id = ?",
    )
    .bind(user_id.to_string())
    .fetch_optional(&state.db)
    .await?
    .ok_or_not_found("User")
}

pub async fn get_profile(State(state): State<AppState>, BuyerAuth(user_id): BuyerAuth) -> AppResult<Json<UserProfile>> {
    Ok(Json(load_profile(&state, user_id).await?))
}

pub async fn update_profile(
    State(state): State<AppState>,
    BuyerAuth(user_id): BuyerAuth,
    Json(req): Json<UpdateProfileRequest>,
) -> AppResult<Json<UserProfile>> {
    let mut v = Validator::new();
    if let Some(name) = req.full_name.as_deref() {
        v.text(name, "full_name", 100);
    }
    check_phone(&mut v, req.phone_number.as_deref());
    check_birth_date(&mut v, req.birth_date);
    v.finish()?;

    sqlx::query(
        "UPDATE users SET full_name = COALESCE(?, full_name), phone_number = COALESCE(?, phone_number), \
         birth_date = COALESCE(?, birth_date), updated_at = ? WHERE id = ?",
    )
    .bind(req.full_name.as_deref().map(str::trim))
    .bind(req.phone_number.as_deref().map(str::trim))
    .bind(req.birth_date.map(|d| d.to_string()))
    .bind(now_utc())
    .bind(user_id.to_string())
    .execute(&state.db)
    .await?;

    Ok(Json(load_profile(&state, user_id).await?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_shape() {
        assert!(looks_like_email("a@b.eg"));
        assert!(!looks_like_email("a@b"));
        assert!(!looks_like_email("@b.eg"));
        assert!(!looks_like_email("ab.eg"));
    }
}
