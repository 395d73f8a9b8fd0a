use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use chrono::Utc;
use http::StatusCode;
use tracing::info;
use uuid::Uuid;

use auth::claims::{Claims, TokenKind};
use auth::{AuthState, Keys, TokenError};

use crate::db::service::clients::ClientsService;
use crate::error::AppError;
use crate::result::Result;
use crate::route::AppState;

pub fn route() -> Router<AppState> {
    Router::new()
        .route(api::path::TOKEN, post(token))
        .route(api::path::TOKEN_REFRESH, post(refresh))
        .route(api::path::TOKEN_REVOKE, post(revoke))
}

async fn token(
    State(state): State<AppState>,
    Json(req): Json<api::request::Token>,
) -> Result<Json<api::response::TokenGrant>> {
    if req.client_id.is_empty() || req.client_secret.is_empty() {
        return Err(AppError::validation("client_id and client_secret are required"));
    }

    let client = ClientsService::verify(state.db.conn(), &req.client_id, &req.client_secret)
        .await?
        .ok_or(AppError::InvalidCredentials)?;
    let scopes = ClientsService::scopes_of(&client);

    let keys = Keys::new(state.config.auth.jwt_secret.as_bytes());
    let access_ttl = state.config.auth.access_token_ttl_secs;
    let refresh_ttl = state.config.auth.refresh_token_ttl_secs;
    let now = Utc::now().timestamp() as u64;

    let access_token = keys.token(&Claims {
        sub: client.client_id.clone(),
        kind: TokenKind::Access,
        scopes: scopes.clone(),
        jti: None,
        exp: now + access_ttl,
    })?;

    let jti = Uuid::new_v4();
    let refresh_expires = Utc::now() + chrono::Duration::seconds(refresh_ttl as i64);
    let refresh_token = keys.token(&Claims {
        sub: client.client_id.clone(),
        kind: TokenKind::Refresh,
        scopes: vec![],
        jti: Some(jti.to_string()),
        exp: now + refresh_ttl,
    })?;
    ClientsService::record_refresh_token(state.db.conn(), jti, &client.client_id, refresh_expires)
        .await?;

    info!("issued token pair for client {}", client.client_id);
    Ok(Json(api::response::TokenGrant {
        access_token,
        refresh_token: Some(refresh_token),
        token_type: "Bearer".to_string(),
        expires_in: access_ttl,
        scopes,
    }))
}

fn decode_refresh(state: &AppState, token: &str) -> Result<(Claims, Uuid)> {
    let decoder = AuthState::new(&state.config.auth.jwt_secret);
    let claims = decoder.decode(token).map_err(|e| match e {
        TokenError::Expired => AppError::InvalidRefreshToken("refresh token has expired".into()),
        _ => AppError::InvalidRefreshToken("refresh token is malformed".into()),
    })?;
    if claims.kind != TokenKind::Refresh {
        return Err(AppError::InvalidRefreshToken(
            "access token presented where a refresh token is required".into(),
        ));
    }
    let jti = claims
        .jti
        .as_deref()
        .and_then(|jti| Uuid::parse_str(jti).ok())
        .ok_or_else(|| AppError::InvalidRefreshToken("refresh token has no id".into()))?;
    Ok((claims, jti))
}

/// New access token off a refresh token. The refresh token itself is not
/// rotated; scopes come from the client record at refresh time.
async fn refresh(
    State(state): State<AppState>,
    Json(req): Json<api::request::TokenRefresh>,
) -> Result<Json<api::response::TokenGrant>> {
    let (claims, jti) = decode_refresh(&state, &req.refresh_token)?;

    if !ClientsService::refresh_token_usable(state.db.conn(), jti).await? {
        return Err(AppError::InvalidRefreshToken(
            "refresh token is revoked or unknown".into(),
        ));
    }
    let client = ClientsService::get(state.db.conn(), &claims.sub)
        .await?
        .ok_or_else(|| AppError::InvalidRefreshToken("client no longer exists".into()))?;
    let scopes = ClientsService::scopes_of(&client);

    let keys = Keys::new(state.config.auth.jwt_secret.as_bytes());
    let access_ttl = state.config.auth.access_token_ttl_secs;
    let access_token = keys.token(&Claims {
        sub: client.client_id.clone(),
        kind: TokenKind::Access,
        scopes: scopes.clone(),
        jti: None,
        exp: Utc::now().timestamp() as u64 + access_ttl,
    })?;

    Ok(Json(api::response::TokenGrant {
        access_token,
        refresh_token: None,
        token_type: "Bearer".to_string(),
        expires_in: access_ttl,
        scopes,
    }))
}

async fn revoke(
    State(state): State<AppState>,
    Json(req): Json<api::request::TokenRevoke>,
) -> Result<StatusCode> {
    let (claims, jti) = decode_refresh(&state, &req.refresh_token)?;
    ClientsService::revoke_refresh_token(state.db.conn(), jti).await?;
    info!("revoked refresh token {} of client {}", jti, claims.sub);
    Ok(StatusCode::NO_CONTENT)
}
