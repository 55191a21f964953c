use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::limits::MAX_TOKEN_LEN;
use crate::model::{Principal, Role};

use super::AuthError;

/// Session token claims. `sub` is the user id.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub role: Role,
    pub iat: i64,
    pub exp: i64,
}

impl fmt::Debug for Claims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Claims")
            .field("sub", &"[REDACTED]")
            .field("role", &self.role)
            .field("iat", &self.iat)
            .field("exp", &self.exp)
            .finish()
    }
}

pub(crate) fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// HS256 signing and verification keys derived from one shared secret.
#[derive(Clone)]
pub struct TokenKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl TokenKeys {
    pub fn new(secret: &[u8]) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
        }
    }

    pub fn issue(&self, principal: &Principal, ttl: Duration) -> Result<String, AuthError> {
        self.issue_at(principal, ttl, unix_now())
    }

    /// Issue a token as if the current time were `now` (unix seconds).
    pub fn issue_at(&self, principal: &Principal, ttl: Duration, now: i64) -> Result<String, AuthError> {
        let ttl = i64::try_from(ttl.as_secs())
            .map_err(|_| AuthError::Internal("session ttl out of range".into()))?;
        let claims = Claims {
            sub: principal.subject_id.to_string(),
            role: principal.role,
            iat: now,
            exp: now.saturating_add(ttl),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AuthError::Internal(format!("token signing failed: {e}")))
    }

    /// Verify signature and expiry, then read the principal out of the claims.
    /// Every failure is the same `InvalidToken`; the cause is only logged.
    pub fn decode(&self, token: &str) -> Result<Principal, AuthError> {
        if token.is_empty() || token.len() > MAX_TOKEN_LEN {
            tracing::debug!(len = token.len(), "session token rejected by size");
            return Err(AuthError::InvalidToken);
        }
        let data = decode::<Claims>(token, &self.decoding, &self.validation).map_err(|e| {
            tracing::debug!(error = %e, "session token verification failed");
            AuthError::InvalidToken
        })?;
        let subject_id = Ulid::from_string(&data.claims.sub).map_err(|_| {
            tracing::debug!("session token subject is not a ulid");
            AuthError::InvalidToken
        })?;
        Ok(Principal::new(subject_id, data.claims.role))
    }
}
