use super::AuthError;

/// bcrypt's accepted cost range.
pub const MIN_BCRYPT_COST: u32 = 4;
pub const MAX_BCRYPT_COST: u32 = 31;

/// Hash a raw password. The cost is re-checked here even though config
/// validates it, so a direct caller cannot hash with a bogus cost.
pub fn hash_password(raw: &str, cost: u32) -> Result<String, AuthError> {
    if !(MIN_BCRYPT_COST..=MAX_BCRYPT_COST).contains(&cost) {
        return Err(AuthError::Internal(format!(
            "invalid bcrypt cost: {cost} (must be {MIN_BCRYPT_COST}-{MAX_BCRYPT_COST})"
        )));
    }
    bcrypt::hash(raw, cost).map_err(|e| AuthError::Internal(format!("password hashing failed: {e}")))
}

pub fn verify_password(raw: &str, hash: &str) -> Result<bool, AuthError> {
    bcrypt::verify(raw, hash)
        .map_err(|e| AuthError::Internal(format!("password verification failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_then_verify() {
        let hash = hash_password("hunter22", MIN_BCRYPT_COST).unwrap();
        assert_ne!(hash, "hunter22");
        assert!(verify_password("hunter22", &hash).unwrap());
        assert!(!verify_password("hunter23", &hash).unwrap());
    }

    #[test]
    fn cost_out_of_range_rejected() {
        assert!(matches!(hash_password("pw", 3), Err(AuthError::Internal(_))));
        assert!(matches!(hash_password("pw", 32), Err(AuthError::Internal(_))));
    }

    #[test]
    fn malformed_hash_is_an_error() {
        assert!(verify_password("pw", "not-a-bcrypt-hash").is_err());
    }
}
