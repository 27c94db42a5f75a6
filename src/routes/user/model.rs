use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::utils::hash_password;

#[derive(Debug, Serialize, Deserialize, FromRow)]
pub struct User {
    pub user_id: Uuid,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    #[serde(skip_serializing)]
    pub password_hash: String,
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    pub phone: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub user_id: Uuid,
    pub name: String,
    pub email: String,
    pub token: String,
    pub expires_at: i64,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// 登录结果：要么直接发令牌，要么进入OTP二次验证
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub otp_required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct VerifyOtpRequest {
    pub user_id: Uuid,
    pub code: String,
}

#[derive(Debug, Serialize)]
pub struct VerifyOtpResponse {
    pub token: String,
    pub expires_at: i64,
    pub user_id: Uuid,
    pub name: String,
}

/// 登录审计记录
#[derive(Debug, Serialize, FromRow)]
pub struct LoginHistoryEntry {
    pub id: i64,
    pub ip: Option<String>,
    pub browser: String,
    pub os: String,
    pub device: String,
    pub outcome: String,
    pub auth_method: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub async fn create(pool: &PgPool, req: &RegisterRequest) -> Result<Self, sqlx::Error> {
        let password_hash = hash_password(&req.password)
            .map_err(|e| sqlx::Error::Protocol(format!("Failed to hash password: {}", e)))?;

        sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (name, email, phone, password_hash)
            VALUES ($1, $2, $3, $4)
            RETURNING user_id, name, email, phone, password_hash
            "#,
        )
        .bind(&req.name)
        .bind(&req.email)
        .bind(&req.phone)
        .bind(&password_hash)
        .fetch_one(pool)
        .await
    }

    pub async fn find_by_email(pool: &PgPool, email: &str) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, User>(
            "SELECT user_id, name, email, phone, password_hash FROM users WHERE email = $1",
        )
        .bind(email)
        .fetch_optional(pool)
        .await
    }

    pub async fn find_by_id(pool: &PgPool, user_id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, User>(
            "SELECT user_id, name, email, phone, password_hash FROM users WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(pool)
        .await
    }
}

impl LoginHistoryEntry {
    /// 每次登录尝试都落一条审计，包括被拦截的
    pub async fn record(
        pool: &PgPool,
        user_id: Uuid,
        ip: Option<&str>,
        browser: &str,
        os: &str,
        device: &str,
        outcome: &str,
        auth_method: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO login_history (user_id, ip, browser, os, device, outcome, auth_method)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(user_id)
        .bind(ip)
        .bind(browser)
        .bind(os)
        .bind(device)
        .bind(outcome)
        .bind(auth_method)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// OTP验证通过后，把最近一条 PENDING_OTP 翻成 SUCCESS
    pub async fn complete_otp(pool: &PgPool, user_id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE login_history
            SET outcome = 'SUCCESS', auth_method = 'OTP'
            WHERE id = (
                SELECT id FROM login_history
                WHERE user_id = $1 AND outcome = 'PENDING_OTP'
                ORDER BY created_at DESC
                LIMIT 1
            )
            "#,
        )
        .bind(user_id)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn list_recent(pool: &PgPool, user_id: Uuid) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, LoginHistoryEntry>(
            r#"
            SELECT id, ip, browser, os, device, outcome, auth_method, created_at
            FROM login_history
            WHERE user_id = $1
            ORDER BY created_at DESC
            LIMIT 20
            "#,
        )
        .bind(user_id)
        .fetch_all(pool)
        .await
    }
}
