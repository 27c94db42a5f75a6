use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

#[derive(Debug, Serialize, FromRow)]
pub struct Answer {
    pub answer_id: Uuid,
    pub question_id: Uuid,
    pub user_id: Uuid,
    pub author_name: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct AnswerRequest {
    pub question_id: Uuid,
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct AnswerResponse {
    pub answer_id: Uuid,
    /// 回答后该问题的回答总数
    pub answer_count: i64,
}

#[derive(Debug, Deserialize)]
pub struct AnswerIdRequest {
    pub answer_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct ListAnswersQuery {
    pub question_id: Uuid,
}

/// 去首尾空白后校验长度，不合规返回 None
pub fn normalize_content(raw: &str) -> Option<&str> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.len() > 2000 {
        None
    } else {
        Some(trimmed)
    }
}

impl Answer {
    /// 回答问题，问题不存在时外键约束会拒绝
    pub async fn create(
        pool: &PgPool,
        question_id: Uuid,
        user_id: Uuid,
        content: &str,
    ) -> Result<Uuid, sqlx::Error> {
        sqlx::query_scalar(
            r#"
            INSERT INTO answers (question_id, user_id, content)
            VALUES ($1, $2, $3)
            RETURNING answer_id
            "#,
        )
        .bind(question_id)
        .bind(user_id)
        .bind(content)
        .fetch_one(pool)
        .await
    }

    pub async fn count_for_question(
        pool: &PgPool,
        question_id: Uuid,
    ) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT count(*) FROM answers WHERE question_id = $1")
            .bind(question_id)
            .fetch_one(pool)
            .await
    }

    /// 某个问题下的全部回答，按时间正序
    pub async fn list_for_question(
        pool: &PgPool,
        question_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Answer>(
            r#"
            SELECT a.answer_id, a.question_id, a.user_id, u.name AS author_name,
                   a.content, a.created_at
            FROM answers a
            JOIN users u ON u.user_id = a.user_id
            WHERE a.question_id = $1
            ORDER BY a.created_at
            "#,
        )
        .bind(question_id)
        .fetch_all(pool)
        .await
    }

    /// 只有作者能删自己的回答
    pub async fn delete_own(
        pool: &PgPool,
        answer_id: Uuid,
        user_id: Uuid,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM answers WHERE answer_id = $1 AND user_id = $2")
            .bind(answer_id)
            .bind(user_id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_is_trimmed() {
        assert_eq!(normalize_content("  回答内容  "), Some("回答内容"));
    }

    #[test]
    fn blank_content_rejected() {
        assert_eq!(normalize_content(""), None);
        assert_eq!(normalize_content("   \n\t"), None);
    }

    #[test]
    fn oversized_content_rejected() {
        let long = "a".repeat(2001);
        assert_eq!(normalize_content(&long), None);
        let max = "a".repeat(2000);
        assert_eq!(normalize_content(&max), Some(max.as_str()));
    }
}
