//! Shared-secret gate for `/admin/*` routes.
//!
//! The secret is presented as `Authorization: Bearer <secret>` and checked
//! against an argon2 hash from the config file, or against the plain
//! `SLQUEST_ADMIN_TOKEN` environment value when no hash is configured.
use argon2::Argon2;
use axum::http::HeaderMap;
use log::warn;
use password_hash::{PasswordHash, PasswordVerifier};

use super::error::ApiError;

#[derive(Debug, Clone, Default)]
pub struct AdminAuth {
    hash: Option<String>,
    plain: Option<String>,
}

impl AdminAuth {
    pub fn new(hash: Option<String>, plain: Option<String>) -> Self {
        Self {
            hash: hash.filter(|h| !h.trim().is_empty()),
            plain: plain.filter(|p| !p.is_empty()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.hash.is_some() || self.plain.is_some()
    }

    fn verify(&self, presented: &str) -> bool {
        if let Some(hash) = &self.hash {
            return match PasswordHash::new(hash) {
                Ok(parsed) => Argon2::default()
                    .verify_password(presented.as_bytes(), &parsed)
                    .is_ok(),
                Err(e) => {
                    warn!("Configured admin_token_hash is not a valid PHC string: {}", e);
                    false
                }
            };
        }
        match &self.plain {
            Some(p) => {
                p.len() == presented.len()
                    && p.bytes()
                        .zip(presented.bytes())
                        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
                        == 0
            }
            None => false,
        }
    }

    /// 401 when no bearer token is presented, 403 when it is wrong or admin is disabled.
    pub fn check(&self, headers: &HeaderMap) -> Result<(), ApiError> {
        let presented = headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| {
                v.strip_prefix("Bearer ")
                    .or_else(|| v.strip_prefix("bearer "))
            })
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(ApiError::Unauthorized("admin_token_required"))?;

        if !self.is_enabled() {
            warn!(target: "security", "Admin request refused: no admin secret configured");
            return Err(ApiError::Forbidden("admin_disabled"));
        }
        if !self.verify(presented) {
            warn!(target: "security", "Admin request with invalid bearer token");
            return Err(ApiError::Forbidden("invalid_admin_token"));
        }
        Ok(())
    }
}

/// Argon2 PHC hash for storing the admin secret in config.
pub fn hash_admin_secret(secret: &str) -> Result<String, password_hash::Error> {
    use password_hash::{PasswordHasher, SaltString};
    let salt = SaltString::generate(&mut rand::thread_rng());
    Ok(Argon2::default()
        .hash_password(secret.as_bytes(), &salt)?
        .to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(v: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(
            axum::http::header::AUTHORIZATION,
            HeaderValue::from_str(v).unwrap(),
        );
        h
    }

    #[test]
    fn test_plain_secret() {
        let auth = AdminAuth::new(None, Some("s3cret".into()));
        assert!(auth.check(&headers("Bearer s3cret")).is_ok());
        assert!(matches!(
            auth.check(&headers("Bearer nope")),
            Err(ApiError::Forbidden(_))
        ));
        assert!(matches!(
            auth.check(&HeaderMap::new()),
            Err(ApiError::Unauthorized(_))
        ));
    }

    #[test]
    fn test_hashed_secret() {
        let hash = hash_admin_secret("letmein").unwrap();
        assert!(hash.starts_with("$argon2"));
        let auth = AdminAuth::new(Some(hash), None);
        assert!(auth.check(&headers("Bearer letmein")).is_ok());
        assert!(auth.check(&headers("Bearer letmeout")).is_err());
    }

    #[test]
    fn test_disabled_admin_is_forbidden() {
        let auth = AdminAuth::new(None, None);
        assert!(!auth.is_enabled());
        assert!(matches!(
            auth.check(&headers("Bearer anything")),
            Err(ApiError::Forbidden("admin_disabled"))
        ));
    }
}
