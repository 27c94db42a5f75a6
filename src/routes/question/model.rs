use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

#[derive(Debug, Serialize, FromRow)]
pub struct Question {
    pub question_id: Uuid,
    pub user_id: Uuid,
    pub author_name: String,
    pub title: String,
    pub content: String,
    pub vote_count: i64,
    pub answer_count: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct AskRequest {
    pub title: String,
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct AskResponse {
    pub question_id: Uuid,
    /// 今日已用/限额，便于前端展示余量
    pub used_today: i32,
    pub daily_limit: Option<i32>,
}

#[derive(Debug, Deserialize)]
pub struct QuestionIdRequest {
    pub question_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct VoteRequest {
    pub question_id: Uuid,
    /// "up" 或 "down"
    pub vote: String,
}

#[derive(Debug, Serialize)]
pub struct VoteResponse {
    pub voted: bool,
    pub vote_count: i64,
}

impl Question {
    pub async fn create(
        pool: &PgPool,
        user_id: Uuid,
        title: &str,
        content: &str,
    ) -> Result<Uuid, sqlx::Error> {
        sqlx::query_scalar(
            r#"
            INSERT INTO questions (user_id, title, content)
            VALUES ($1, $2, $3)
            RETURNING question_id
            "#,
        )
        .bind(user_id)
        .bind(title)
        .bind(content)
        .fetch_one(pool)
        .await
    }

    pub async fn list_recent(pool: &PgPool, limit: i64) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Question>(
            r#"
            SELECT q.question_id, q.user_id, u.name AS author_name, q.title, q.content,
                   COALESCE((SELECT sum(v.vote_type) FROM question_votes v
                             WHERE v.question_id = q.question_id), 0)::bigint AS vote_count,
                   (SELECT count(*) FROM answers a
                    WHERE a.question_id = q.question_id) AS answer_count,
                   q.created_at
            FROM questions q
            JOIN users u ON u.user_id = q.user_id
            ORDER BY q.created_at DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(pool)
        .await
    }

    /// 只有作者能删自己的提问
    pub async fn delete_own(
        pool: &PgPool,
        question_id: Uuid,
        user_id: Uuid,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM questions WHERE question_id = $1 AND user_id = $2")
            .bind(question_id)
            .bind(user_id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// 投票：同方向再投一次取消，反方向则改票。返回 (投票是否生效, 最新得分)。
    pub async fn cast_vote(
        pool: &PgPool,
        question_id: Uuid,
        user_id: Uuid,
        vote_type: i16,
    ) -> Result<(bool, i64), sqlx::Error> {
        let mut tx = pool.begin().await?;

        let existing: Option<i16> = sqlx::query_scalar(
            "SELECT vote_type FROM question_votes WHERE question_id = $1 AND user_id = $2",
        )
        .bind(question_id)
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?;

        let voted = match existing {
            Some(v) if v == vote_type => {
                sqlx::query(
                    "DELETE FROM question_votes WHERE question_id = $1 AND user_id = $2",
                )
                .bind(question_id)
                .bind(user_id)
                .execute(&mut *tx)
                .await?;
                false
            }
            Some(_) => {
                sqlx::query(
                    r#"
                    UPDATE question_votes SET vote_type = $3
                    WHERE question_id = $1 AND user_id = $2
                    "#,
                )
                .bind(question_id)
                .bind(user_id)
                .bind(vote_type)
                .execute(&mut *tx)
                .await?;
                true
            }
            None => {
                sqlx::query(
                    r#"
                    INSERT INTO question_votes (question_id, user_id, vote_type)
                    VALUES ($1, $2, $3)
                    ON CONFLICT (question_id, user_id) DO UPDATE SET vote_type = $3
                    "#,
                )
                .bind(question_id)
                .bind(user_id)
                .bind(vote_type)
                .execute(&mut *tx)
                .await?;
                true
            }
        };

        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(sum(vote_type), 0)::bigint
            FROM question_votes WHERE question_id = $1
            "#,
        )
        .bind(question_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok((voted, count))
    }
}
