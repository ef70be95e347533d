use crate::error::{AppError, AppResult};

/// Hash a password with bcrypt. bcrypt is CPU-bound, so it runs on the
/// blocking pool rather than the async executor.
pub async fn hash_password(password: String, cost: u32) -> AppResult<String> {
    tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
        .await
        .map_err(|e| {
            tracing::error!("spawn_blocking panic during hash: {}", e);
            AppError::internal("Failed to process password")
        })?
        .map_err(|e| {
            tracing::error!("Failed to hash password: {}", e);
            AppError::internal("Failed to process password")
        })
}

/// Compare a password against a stored hash. A malformed hash counts as a
/// mismatch.
pub async fn verify_password(password: String, hash: String) -> AppResult<bool> {
    tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash).unwrap_or(false))
        .await
        .map_err(|e| {
            tracing::error!("spawn_blocking panic during verify: {}", e);
            AppError::internal("Failed to verify password")
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_hash_then_verify() {
        let hash = hash_password("Student@123".to_string(), 4).await.unwrap();
        assert_ne!(hash, "Student@123");
        assert!(verify_password("Student@123".to_string(), hash.clone())
            .await
            .unwrap());
        assert!(!verify_password("wrong".to_string(), hash).await.unwrap());
    }

    #[tokio::test]
    async fn test_malformed_hash_is_mismatch() {
        assert!(!verify_password("x".to_string(), "not-a-hash".to_string())
            .await
            .unwrap());
    }
}
