// src/services/auth.rs

use bcrypt::{hash, verify};
use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    common::error::AppError,
    db::UserRepository,
    models::auth::{Claims, StaffRole, User},
};

pub const TOKEN_TTL_DAYS: i64 = 7;

/// E-mails are compared case-insensitively everywhere.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

#[derive(Clone)]
pub struct AuthService {
    user_repo: UserRepository,
    jwt_secret: String,
    pool: PgPool,
}

impl AuthService {
    pub fn new(user_repo: UserRepository, jwt_secret: String, pool: PgPool) -> Self {
        Self { user_repo, jwt_secret, pool }
    }

    async fn hash_password(password: &str) -> Result<String, AppError> {
        let password = password.to_owned();
        let hashed = tokio::task::spawn_blocking(move || hash(&password, bcrypt::DEFAULT_COST))
            .await
            .map_err(|e| anyhow::anyhow!("password hashing task failed: {}", e))??;
        Ok(hashed)
    }

    pub async fn register_staff(
        &self,
        name: &str,
        email: &str,
        password: &str,
        role: StaffRole,
    ) -> Result<User, AppError> {
        let hashed_password = Self::hash_password(password).await?;
        let email = normalize_email(email);

        let user = self
            .user_repo
            .create_user(&self.pool, name.trim(), &email, &hashed_password, role)
            .await?;

        tracing::info!(user_id = %user.id, %role, "👤 Staff member registered");
        Ok(user)
    }

    pub async fn login_user(&self, email: &str, password: &str) -> Result<String, AppError> {
        let user = self
            .user_repo
            .find_by_email(&normalize_email(email))
            .await?
            .ok_or(AppError::InvalidCredentials)?;

        let password = password.to_owned();
        let password_hash = user.password_hash.clone();

        // bcrypt is CPU-bound
        let is_password_valid = tokio::task::spawn_blocking(move || verify(&password, &password_hash))
            .await
            .map_err(|e| anyhow::anyhow!("password verification task failed: {}", e))??;

        if !is_password_valid {
            return Err(AppError::InvalidCredentials);
        }

        self.create_token(user.id)
    }

    pub async fn validate_token(&self, token: &str) -> Result<User, AppError> {
        let claims = decode_token(token, &self.jwt_secret)?;

        self.user_repo
            .find_by_id(claims.sub)
            .await?
            .ok_or(AppError::UserNotFound)
    }

    pub async fn list_staff(&self) -> Result<Vec<User>, AppError> {
        self.user_repo.list().await
    }

    /// Seeds the first owner account so that someone can register staff.
    pub async fn ensure_owner(&self, email: &str, password: &str) -> Result<(), AppError> {
        let email = normalize_email(email);
        if self.user_repo.find_by_email(&email).await?.is_some() {
            return Ok(());
        }

        match self.register_staff("Owner", &email, password, StaffRole::Owner).await {
            Ok(_) | Err(AppError::EmailAlreadyExists) => {
                tracing::info!("✅ Bootstrap owner account ready.");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn create_token(&self, user_id: Uuid) -> Result<String, AppError> {
        create_token(user_id, &self.jwt_secret)
    }
}

pub fn create_token(user_id: Uuid, secret: &str) -> Result<String, AppError> {
    let now = Utc::now();
    let expires_at = now + chrono::Duration::days(TOKEN_TTL_DAYS);

    let claims = Claims {
        sub: user_id,
        exp: expires_at.timestamp() as usize,
        iat: now.timestamp() as usize,
    };

    Ok(encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_ref()),
    )?)
}

pub fn decode_token(token: &str, secret: &str) -> Result<Claims, AppError> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_ref()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|_| AppError::InvalidToken)
}
