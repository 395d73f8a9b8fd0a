use serde::{Deserialize, Serialize};

use crate::scope;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

/// JWT payload for both access and refresh tokens.
///
/// Access tokens carry the client id plus its granted scopes; refresh tokens
/// carry the client id and a `jti` so individual grants can be revoked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Client id the token was issued to.
    pub sub: String,
    pub kind: TokenKind,
    #[serde(default)]
    pub scopes: Vec<String>,
    /// Refresh-token id, present on refresh tokens only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
    pub exp: u64,
}

impl Claims {
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }
}

impl std::fmt::Display for Claims {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "sub: {} kind: {:?} scopes: [{}] exp: {}",
            self.sub,
            self.kind,
            self.scopes.join(","),
            self.exp
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims(scopes: &[&str]) -> Claims {
        Claims {
            sub: "cam-client".to_string(),
            kind: TokenKind::Access,
            scopes: scopes.iter().map(|s| s.to_string()).collect(),
            jti: None,
            exp: 0,
        }
    }

    #[test]
    fn scope_membership() {
        let c = claims(&[scope::STREAMS_READ, scope::SNAPSHOTS_WRITE]);
        assert!(c.has_scope(scope::STREAMS_READ));
        assert!(c.has_scope(scope::SNAPSHOTS_WRITE));
        assert!(!c.has_scope(scope::STREAMS_CONSUME));
        assert!(!c.has_scope(scope::BOOKMARKS_WRITE));
    }

    #[test]
    fn refresh_claims_skip_empty_jti() {
        let c = claims(&[]);
        let json = serde_json::to_string(&c).unwrap();
        assert!(!json.contains("jti"));
    }
}
