use anyhow::Result;
use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::db::entity::clients::{self, Entity as Clients};
use crate::db::entity::refresh_tokens::{self, Entity as RefreshTokens};

pub struct ClientsService;

impl ClientsService {
    pub fn hash_secret(secret: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(secret.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    pub async fn create(
        db: &DatabaseConnection,
        client_id: &str,
        secret: &str,
        scopes: &[String],
    ) -> Result<clients::Model> {
        let model = clients::ActiveModel {
            client_id: Set(client_id.to_string()),
            secret_hash: Set(Self::hash_secret(secret)),
            scopes: Set(serde_json::json!(scopes)),
            created_at: Set(Utc::now().into()),
        };
        Ok(model.insert(db).await?)
    }

    pub async fn verify(
        db: &DatabaseConnection,
        client_id: &str,
        secret: &str,
    ) -> Result<Option<clients::Model>> {
        let Some(client) = Clients::find_by_id(client_id.to_string()).one(db).await? else {
            return Ok(None);
        };
        if client.secret_hash == Self::hash_secret(secret) {
            Ok(Some(client))
        } else {
            Ok(None)
        }
    }

    pub async fn get(db: &DatabaseConnection, client_id: &str) -> Result<Option<clients::Model>> {
        Ok(Clients::find_by_id(client_id.to_string()).one(db).await?)
    }

    pub fn scopes_of(client: &clients::Model) -> Vec<String> {
        serde_json::from_value(client.scopes.clone()).unwrap_or_default()
    }

    pub async fn record_refresh_token(
        db: &DatabaseConnection,
        jti: Uuid,
        client_id: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        let model = refresh_tokens::ActiveModel {
            jti: Set(jti),
            client_id: Set(client_id.to_string()),
            expires_at: Set(expires_at.into()),
            revoked: Set(false),
            created_at: Set(Utc::now().into()),
        };
        model.insert(db).await?;
        Ok(())
    }

    /// A refresh token is usable while its record exists, is unrevoked, and unexpired.
    pub async fn refresh_token_usable(db: &DatabaseConnection, jti: Uuid) -> Result<bool> {
        let Some(record) = RefreshTokens::find_by_id(jti).one(db).await? else {
            return Ok(false);
        };
        Ok(!record.revoked && record.expires_at >= Utc::now())
    }

    pub async fn revoke_refresh_token(db: &DatabaseConnection, jti: Uuid) -> Result<bool> {
        let rows = RefreshTokens::update_many()
            .col_expr(
                refresh_tokens::Column::Revoked,
                sea_orm::sea_query::Expr::value(true),
            )
            .filter(refresh_tokens::Column::Jti.eq(jti))
            .exec(db)
            .await?;
        Ok(rows.rows_affected > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_hash_is_stable_hex() {
        let h = ClientsService::hash_secret("s3cret");
        assert_eq!(h.len(), 64);
        assert_eq!(h, ClientsService::hash_secret("s3cret"));
        assert_ne!(h, ClientsService::hash_secret("other"));
    }
}
