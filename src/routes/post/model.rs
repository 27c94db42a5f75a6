use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

#[derive(Debug, Serialize, FromRow)]
pub struct Post {
    pub post_id: Uuid,
    pub user_id: Uuid,
    pub author_name: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CreatePostRequest {
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct CreatePostResponse {
    pub post_id: Uuid,
    pub used_today: i32,
    pub daily_limit: Option<i32>,
}

/// 发帖资格总览：提问侧与动态侧各自的限额和余量
#[derive(Debug, Serialize)]
pub struct PostingStats {
    pub question_limit: Option<i32>,
    pub questions_used_today: i32,
    pub can_ask: bool,
    pub post_limit: Option<i32>,
    pub posts_used_today: i32,
    pub can_post: bool,
    pub friend_count: i64,
}

impl Post {
    pub async fn create(
        pool: &PgPool,
        user_id: Uuid,
        content: &str,
    ) -> Result<Uuid, sqlx::Error> {
        sqlx::query_scalar(
            r#"
            INSERT INTO posts (user_id, content)
            VALUES ($1, $2)
            RETURNING post_id
            "#,
        )
        .bind(user_id)
        .bind(content)
        .fetch_one(pool)
        .await
    }

    /// 公开动态流，按时间倒序
    pub async fn list_recent(pool: &PgPool, limit: i64) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Post>(
            r#"
            SELECT p.post_id, p.user_id, u.name AS author_name, p.content, p.created_at
            FROM posts p
            JOIN users u ON u.user_id = p.user_id
            ORDER BY p.created_at DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(pool)
        .await
    }
}
