//! Token Verifier Implementation
//!
//! JWT implementation of the `TokenVerifier` collaborator. Decodes the
//! bearer token and confirms the referenced session is still live in the
//! `user_sessions` table; a valid signature alone is not enough.

use async_trait::async_trait;
use jsonwebtoken::{decode, DecodingKey, Validation};
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::collaborators::{AuthError, TokenVerifier, VerifiedIdentity};

/// JWT claims carried by connection credentials.
#[derive(Debug, serde::Deserialize)]
struct Claims {
    /// User id
    sub: String,
    /// Session id
    sid: Uuid,
    #[allow(dead_code)]
    exp: usize,
}

/// JWT token verifier backed by the session table.
#[derive(Clone)]
pub struct JwtTokenVerifier {
    decoding_key: DecodingKey,
    pool: PgPool,
}

impl JwtTokenVerifier {
    pub fn new(secret: &str, pool: PgPool) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            pool,
        }
    }
}

#[async_trait]
impl TokenVerifier for JwtTokenVerifier {
    async fn verify(&self, token: &str) -> Result<VerifiedIdentity, AuthError> {
        if token.is_empty() {
            return Err(AuthError::Missing);
        }

        let token_data = decode::<Claims>(token, &self.decoding_key, &Validation::default())
            .map_err(|e| {
                tracing::debug!(error = %e, "Token decode failed");
                AuthError::Invalid
            })?;

        let user_id: i64 = token_data
            .claims
            .sub
            .parse()
            .map_err(|_| AuthError::Invalid)?;
        let session_id = token_data.claims.sid;

        let live: Option<(i64,)> = sqlx::query_as(
            r#"
            SELECT user_id
            FROM user_sessions
            WHERE id = $1
              AND user_id = $2
              AND revoked_at IS NULL
              AND expires_at > NOW()
            "#,
        )
        .bind(session_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Session lookup failed");
            AuthError::Invalid
        })?;

        if live.is_none() {
            return Err(AuthError::SessionInactive);
        }

        Ok(VerifiedIdentity {
            user_id,
            session_id,
        })
    }
}
