//! Signup, login and bearer-token verification.
//!
//! Passwords are hashed with argon2 on the blocking pool. Tokens are HS256
//! JWTs whose subject is the user id; they expire after two hours and are
//! never refreshed.

use crate::{
    entity::{NewUser, User, UserId},
    error::{Error, Result},
    store::Repository,
};
use anyhow::{anyhow, Context};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task;
use tracing::{info, warn};

pub const TOKEN_LIFETIME_SECS: i64 = 2 * 60 * 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
}

/// Result of a successful login.
#[derive(Debug, Clone)]
pub struct Session {
    pub token: String,
    pub user: User,
}

pub struct AuthService {
    repo: Arc<dyn Repository>,
    hasher: Argon2<'static>,
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl AuthService {
    pub fn new(repo: Arc<dyn Repository>, secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;

        Self {
            repo,
            hasher: Argon2::default(),
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Override the argon2 cost parameters (tests use cheap ones).
    pub fn with_password_params(mut self, params: argon2::Params) -> Self {
        self.hasher = Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params);
        self
    }

    /// Register a new account. No token is issued; the user logs in next.
    pub async fn signup(&self, username: &str, email: &str, password: &str) -> Result<UserId> {
        let username = username.trim();
        let email = email.trim();
        if username.is_empty() || email.is_empty() || password.is_empty() {
            return Err(Error::Validation("All fields are required.".to_string()));
        }

        if self.repo.find_user_by_email(email).await?.is_some() {
            return Err(Error::Conflict("User already exists.".to_string()));
        }

        let password_hash = self.hash_password(password.to_string()).await?;
        let user = self
            .repo
            .create_user(&NewUser {
                username: username.to_string(),
                email: email.to_string(),
                password_hash,
            })
            .await?;

        info!(user_id = %user.id, "registered new user");
        Ok(user.id)
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<Session> {
        let email = email.trim();
        if email.is_empty() || password.is_empty() {
            return Err(Error::Validation(
                "Email and password are required.".to_string(),
            ));
        }

        let user = self
            .repo
            .find_user_by_email(email)
            .await?
            .ok_or_else(|| Error::NotFound("User not found.".to_string()))?;

        if !self
            .verify_password(password.to_string(), user.password_hash.clone())
            .await?
        {
            warn!(user_id = %user.id, "login rejected: password mismatch");
            return Err(Error::InvalidCredential);
        }

        let token = self.issue_token(user.id, Utc::now())?;
        info!(user_id = %user.id, "user logged in");
        Ok(Session { token, user })
    }

    /// Sign a token for `user_id` as if it were issued at `issued_at`.
    pub fn issue_token(&self, user_id: UserId, issued_at: DateTime<Utc>) -> Result<String> {
        let claims = Claims {
            sub: user_id.to_string(),
            iat: issued_at.timestamp(),
            exp: (issued_at + Duration::seconds(TOKEN_LIFETIME_SECS)).timestamp(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .context("Failed to sign token")
            .map_err(Error::from)
    }

    /// Resolve a bearer token to the user id it was issued for.
    pub fn verify(&self, token: Option<&str>) -> Result<UserId> {
        let token = token
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::Unauthorized("Access denied. No token provided.".to_string()))?;

        let invalid = || Error::Unauthorized("Invalid or expired token.".to_string());
        let data = decode::<Claims>(token, &self.decoding, &self.validation).map_err(|_| invalid())?;
        data.claims.sub.parse::<UserId>().map_err(|_| invalid())
    }

    async fn hash_password(&self, password: String) -> Result<String> {
        let hasher = self.hasher.clone();
        let hash = task::spawn_blocking(move || {
            let salt = SaltString::generate(&mut OsRng);
            hasher
                .hash_password(password.as_bytes(), &salt)
                .map(|hash| hash.to_string())
                .map_err(|e| anyhow!("Failed to hash password: {e}"))
        })
        .await
        .context("Password hashing task failed")??;

        Ok(hash)
    }

    async fn verify_password(&self, password: String, stored: String) -> Result<bool> {
        let hasher = self.hasher.clone();
        let matches = task::spawn_blocking(move || {
            let parsed =
                PasswordHash::new(&stored).map_err(|e| anyhow!("Stored hash is corrupt: {e}"))?;
            Ok::<_, anyhow::Error>(hasher.verify_password(password.as_bytes(), &parsed).is_ok())
        })
        .await
        .context("Password verification task failed")??;

        Ok(matches)
    }
}
