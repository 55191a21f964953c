//! Credential service: registration, password login, and session tokens.
//!
//! The engine and guard only ever see the [`Principal`] that [`CredentialService::verify`]
//! produces. Raw passwords stop here.

mod gate;
mod password;
mod token;

pub use gate::ServerPasswordSource;
pub use password::{hash_password, verify_password, MAX_BCRYPT_COST, MIN_BCRYPT_COST};
pub use token::{Claims, TokenKeys};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ulid::Ulid;

use crate::engine::ErrorKind;
use crate::limits::*;
use crate::model::{Principal, Role, User};

#[derive(Debug)]
pub enum AuthError {
    DuplicateUsername(String),
    /// Unknown user or wrong password. The two are not distinguished.
    InvalidCredentials,
    /// Bad signature, expired, oversized, or unparseable.
    InvalidToken,
    /// The connection has no session bound.
    NoSession,
    Invalid(&'static str),
    Internal(String),
}

impl AuthError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AuthError::DuplicateUsername(_) => ErrorKind::Conflict,
            AuthError::InvalidCredentials | AuthError::InvalidToken | AuthError::NoSession => {
                ErrorKind::Authentication
            }
            AuthError::Invalid(_) => ErrorKind::Validation,
            AuthError::Internal(_) => ErrorKind::Internal,
        }
    }
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthError::DuplicateUsername(name) => write!(f, "username already taken: {name}"),
            AuthError::InvalidCredentials => write!(f, "invalid username or password"),
            AuthError::InvalidToken => write!(f, "session token is invalid or expired"),
            AuthError::NoSession => write!(f, "no session; log in or SET SESSION AUTHORIZATION first"),
            AuthError::Invalid(msg) => write!(f, "invalid request: {msg}"),
            AuthError::Internal(e) => write!(f, "credential service error: {e}"),
        }
    }
}

impl std::error::Error for AuthError {}

/// Where registered users live. The engine implements this so users share its WAL.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Persist a new user. Fails with `DuplicateUsername` if the name is taken.
    async fn insert_user(&self, user: User) -> Result<(), AuthError>;
    fn find_user(&self, username: &str) -> Option<User>;
}

#[derive(Clone)]
pub struct CredentialSettings {
    pub token_secret: Vec<u8>,
    pub session_ttl: Duration,
    pub bcrypt_cost: u32,
}

impl std::fmt::Debug for CredentialSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialSettings")
            .field("token_secret", &"[REDACTED]")
            .field("session_ttl", &self.session_ttl)
            .field("bcrypt_cost", &self.bcrypt_cost)
            .finish()
    }
}

pub struct CredentialService {
    users: Arc<dyn UserStore>,
    keys: TokenKeys,
    session_ttl: Duration,
    bcrypt_cost: u32,
}

fn validate_credentials(username: &str, raw_password: &str) -> Result<(), AuthError> {
    if username.is_empty() {
        return Err(AuthError::Invalid("username is required"));
    }
    if username.len() > MAX_USERNAME_LEN {
        return Err(AuthError::Invalid("username too long"));
    }
    if username.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(AuthError::Invalid("username must not contain whitespace"));
    }
    if raw_password.is_empty() {
        return Err(AuthError::Invalid("password is required"));
    }
    if raw_password.len() > MAX_PASSWORD_LEN {
        return Err(AuthError::Invalid("password too long"));
    }
    Ok(())
}

impl CredentialService {
    pub fn new(users: Arc<dyn UserStore>, settings: CredentialSettings) -> Self {
        Self {
            users,
            keys: TokenKeys::new(&settings.token_secret),
            session_ttl: settings.session_ttl,
            bcrypt_cost: settings.bcrypt_cost,
        }
    }

    pub async fn register(
        &self,
        username: &str,
        raw_password: &str,
        role: Role,
    ) -> Result<Ulid, AuthError> {
        validate_credentials(username, raw_password)?;
        // Cheap early exit; the store re-checks under its registration lock.
        if self.users.find_user(username).is_some() {
            return Err(AuthError::DuplicateUsername(username.to_string()));
        }

        let raw = raw_password.to_string();
        let cost = self.bcrypt_cost;
        let password_hash = tokio::task::spawn_blocking(move || hash_password(&raw, cost))
            .await
            .map_err(|e| AuthError::Internal(format!("hashing task failed: {e}")))??;

        let id = Ulid::new();
        self.users
            .insert_user(User {
                id,
                username: username.to_string(),
                password_hash,
                role,
            })
            .await?;
        tracing::info!(user_id = %id, %role, "user registered");
        Ok(id)
    }

    /// Check a username/password pair and issue a session token.
    pub async fn authenticate(&self, username: &str, raw_password: &str) -> Result<(String, Principal), AuthError> {
        let Some(user) = self.users.find_user(username) else {
            return Err(self.auth_failure("unknown user"));
        };

        let raw = raw_password.to_string();
        let hash = user.password_hash.clone();
        let matches = tokio::task::spawn_blocking(move || verify_password(&raw, &hash))
            .await
            .map_err(|e| AuthError::Internal(format!("verification task failed: {e}")))??;
        if !matches {
            return Err(self.auth_failure("wrong password"));
        }

        let principal = Principal::new(user.id, user.role);
        let token = self.keys.issue(&principal, self.session_ttl)?;
        tracing::debug!(user_id = %user.id, "login succeeded");
        Ok((token, principal))
    }

    pub fn verify(&self, token: &str) -> Result<Principal, AuthError> {
        self.keys.decode(token).inspect_err(|_| {
            metrics::counter!(crate::observability::AUTH_FAILURES_TOTAL).increment(1);
        })
    }

    fn auth_failure(&self, reason: &'static str) -> AuthError {
        metrics::counter!(crate::observability::AUTH_FAILURES_TOTAL).increment(1);
        tracing::debug!(reason, "login failed");
        AuthError::InvalidCredentials
    }
}
