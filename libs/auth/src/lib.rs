use anyhow::{anyhow, Error};
use headers::authorization::{Bearer, Credentials};
use http::{header, StatusCode};
use jsonwebtoken::{decode, encode, errors::ErrorKind, DecodingKey, EncodingKey, Header, Validation};

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use crate::claims::{Claims, TokenKind};

pub mod claims;
pub mod scope;

pub struct Keys {
    encoding: EncodingKey,
}

impl Keys {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
        }
    }

    pub fn token(&self, claims: &Claims) -> Result<String, Error> {
        encode(&Header::default(), claims, &self.encoding).map_err(|e| anyhow!(e))
    }
}

#[derive(Clone)]
pub struct AuthState {
    decoding: DecodingKey,
}

pub enum TokenError {
    Missing,
    Invalid,
    Expired,
}

impl AuthState {
    pub fn new(secret: &str) -> Self {
        Self {
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    pub fn decode(&self, token: &str) -> Result<Claims, TokenError> {
        decode::<Claims>(token, &self.decoding, &Validation::default())
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Invalid,
            })
    }
}

/// Bearer validation for the protected surface.
///
/// Access tokens only: a refresh token presented here is rejected even though
/// it carries a valid signature.
pub async fn validate_middleware(
    State(state): State<AuthState>,
    mut request: Request,
    next: Next,
) -> Response {
    let bearer = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(Bearer::decode);

    let outcome = match bearer {
        Some(bearer) => state.decode(bearer.token()),
        None => Err(TokenError::Missing),
    };

    match outcome {
        Ok(claims) if claims.kind == TokenKind::Access => {
            request.extensions_mut().insert(claims);
            next.run(request).await
        }
        Ok(_) => unauthorized("INVALID_TOKEN", "refresh token is not accepted here"),
        Err(TokenError::Expired) => unauthorized("TOKEN_EXPIRED", "access token has expired"),
        Err(_) => unauthorized("INVALID_TOKEN", "missing or malformed bearer token"),
    }
}

fn unauthorized(code: &str, description: &str) -> Response {
    let body = serde_json::json!({
        "error": code,
        "error_description": description,
        "status_code": 401,
    });
    Response::builder()
        .status(StatusCode::UNAUTHORIZED)
        .header(header::CONTENT_TYPE, "application/json")
        .body(axum::body::Body::from(body.to_string()))
        .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issue(kind: TokenKind, exp: u64) -> String {
        Keys::new(b"test-secret")
            .token(&Claims {
                sub: "client-a".to_string(),
                kind,
                scopes: vec![scope::STREAMS_READ.to_string()],
                jti: None,
                exp,
            })
            .unwrap()
    }

    fn far_future() -> u64 {
        4102444800 // 2100-01-01
    }

    #[test]
    fn decode_round_trip() {
        let token = issue(TokenKind::Access, far_future());
        let state = AuthState::new("test-secret");
        let claims = state.decode(&token).ok().unwrap();
        assert_eq!(claims.sub, "client-a");
        assert_eq!(claims.kind, TokenKind::Access);
        assert!(claims.has_scope(scope::STREAMS_READ));
    }

    #[test]
    fn wrong_secret_is_invalid() {
        let token = issue(TokenKind::Access, far_future());
        let state = AuthState::new("other-secret");
        assert!(matches!(state.decode(&token), Err(TokenError::Invalid)));
    }

    #[test]
    fn expired_is_reported_as_expired() {
        let token = issue(TokenKind::Access, 1000);
        let state = AuthState::new("test-secret");
        assert!(matches!(state.decode(&token), Err(TokenError::Expired)));
    }
}
