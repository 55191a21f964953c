use async_trait::async_trait;

use crate::auth::{AuthError, UserStore};
use crate::limits::MAX_USERS;
use crate::model::*;

use super::{Engine, EngineError};

impl Engine {
    /// Persist a new user. Usernames are unique; the check and insert run
    /// under the registration lock.
    pub async fn register_user(&self, user: User) -> Result<(), EngineError> {
        let _lock = self.registration.lock().await;
        let _commit = self.commit_gate.read().await;
        if self.store.find_user(&user.username).is_some() {
            return Err(EngineError::UsernameTaken(user.username));
        }
        if self.store.user_count() >= MAX_USERS {
            return Err(EngineError::LimitExceeded("too many users"));
        }

        let event = Event::UserRegistered {
            id: user.id,
            username: user.username.clone(),
            password_hash: user.password_hash.clone(),
            role: user.role,
        };
        self.wal_append(&event).await?;
        self.store.insert_user(user);
        Ok(())
    }
}

#[async_trait]
impl UserStore for Engine {
    async fn insert_user(&self, user: User) -> Result<(), AuthError> {
        self.register_user(user).await.map_err(|e| match e {
            EngineError::UsernameTaken(name) => AuthError::DuplicateUsername(name),
            EngineError::LimitExceeded(msg) => AuthError::Invalid(msg),
            other => AuthError::Internal(other.to_string()),
        })
    }

    fn find_user(&self, username: &str) -> Option<User> {
        self.store.find_user(username)
    }
}
