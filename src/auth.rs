use jsonwebtoken::{Algorithm, DecodingKey, Validation, errors::ErrorKind};
use serde::Deserialize;
use sqlx::SqlitePool;
use tracing::warn;
use uuid::Uuid;

use crate::{db::{self, User}, error::AuthError};

#[derive(Debug, Deserialize)]
struct Claims {
    user_id: Uuid,
}

/// Validates the bearer token presented at connect time and resolves the
/// identity it references.
#[derive(Clone)]
pub struct TokenVerifier {
    pool: SqlitePool,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn new(pool: SqlitePool, secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.required_spec_claims.clear();
        Self {
            pool,
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// INSECURE: accepts any decodable token, signature and expiry unchecked.
    /// Retained only for interoperability with the legacy unsigned handshake.
    pub fn new_unverified(pool: SqlitePool) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.insecure_disable_signature_validation();
        validation.validate_exp = false;
        validation.required_spec_claims.clear();
        Self {
            pool,
            decoding_key: DecodingKey::from_secret(&[]),
            validation,
        }
    }

    /// Decode the token, check its validity window, and resolve the claimed
    /// user against the store. One persistence read, no side effects.
    pub async fn verify(&self, token: Option<&str>) -> Result<User, AuthError> {
        let token = token.filter(|t| !t.is_empty()).ok_or(AuthError::MissingToken)?;

        let claims = jsonwebtoken::decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::ExpiredToken,
                _ => AuthError::MalformedToken,
            })?
            .claims;

        match db::find_user(&self.pool, claims.user_id).await {
            Ok(Some(user)) => Ok(user),
            Ok(None) => Err(AuthError::UnknownIdentity),
            Err(e) => {
                // The session is refused as unknown, not crashed, when the
                // store cannot answer.
                warn!(user_id = %claims.user_id, error = %e, "user lookup failed during auth");
                Err(AuthError::UnknownIdentity)
            }
        }
    }
}
