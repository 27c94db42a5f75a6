//! 好友关系：互相确认的对称模型（申请/确认/拒绝/删除）。
//!
//! 配额引擎只通过 SocialGraph::friend_count 读取数量，
//! 关系模型的细节被隔离在这一层。

use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::entitlement::SocialGraph;

/// 好友摘要
#[derive(Debug, Clone, FromRow, serde::Serialize)]
pub struct FriendInfo {
    pub user_id: Uuid,
    pub name: String,
    pub email: String,
}

/// 好友关系存储库
pub struct FriendRepository;

impl FriendRepository {
    /// 发送好友申请
    pub async fn send_request(
        pool: &PgPool,
        sender_id: Uuid,
        receiver_id: Uuid,
    ) -> Result<(), sqlx::Error> {
        if sender_id == receiver_id {
            return Err(sqlx::Error::Protocol("Cannot befriend yourself".into()));
        }

        let already_friends: Option<i32> = sqlx::query_scalar(
            "SELECT 1 FROM friendships WHERE user_id = $1 AND friend_id = $2",
        )
        .bind(sender_id)
        .bind(receiver_id)
        .fetch_optional(pool)
        .await?;
        if already_friends.is_some() {
            return Err(sqlx::Error::Protocol("Already friends".into()));
        }

        // 对方已先发过申请时应走确认流程
        let reverse_pending: Option<i32> = sqlx::query_scalar(
            "SELECT 1 FROM friend_requests WHERE sender_id = $1 AND receiver_id = $2",
        )
        .bind(receiver_id)
        .bind(sender_id)
        .fetch_optional(pool)
        .await?;
        if reverse_pending.is_some() {
            return Err(sqlx::Error::Protocol("Pending request from this user".into()));
        }

        let result = sqlx::query(
            r#"
            INSERT INTO friend_requests (sender_id, receiver_id)
            VALUES ($1, $2)
            ON CONFLICT (sender_id, receiver_id) DO NOTHING
            "#,
        )
        .bind(sender_id)
        .bind(receiver_id)
        .execute(pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(sqlx::Error::Protocol("Request already sent".into()));
        }
        Ok(())
    }

    /// 确认好友申请：删除申请并写入两条对称的好友记录
    pub async fn confirm_request(
        pool: &PgPool,
        receiver_id: Uuid,
        sender_id: Uuid,
    ) -> Result<(), sqlx::Error> {
        let mut tx = pool.begin().await?;

        let deleted = sqlx::query(
            "DELETE FROM friend_requests WHERE sender_id = $1 AND receiver_id = $2",
        )
        .bind(sender_id)
        .bind(receiver_id)
        .execute(&mut *tx)
        .await?;

        if deleted.rows_affected() == 0 {
            return Err(sqlx::Error::RowNotFound);
        }

        sqlx::query(
            r#"
            INSERT INTO friendships (user_id, friend_id)
            VALUES ($1, $2), ($2, $1)
            ON CONFLICT (user_id, friend_id) DO NOTHING
            "#,
        )
        .bind(receiver_id)
        .bind(sender_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// 拒绝好友申请
    pub async fn reject_request(
        pool: &PgPool,
        receiver_id: Uuid,
        sender_id: Uuid,
    ) -> Result<(), sqlx::Error> {
        let deleted = sqlx::query(
            "DELETE FROM friend_requests WHERE sender_id = $1 AND receiver_id = $2",
        )
        .bind(sender_id)
        .bind(receiver_id)
        .execute(pool)
        .await?;

        if deleted.rows_affected() == 0 {
            return Err(sqlx::Error::RowNotFound);
        }
        Ok(())
    }

    /// 删除好友（双向）
    pub async fn remove_friend(
        pool: &PgPool,
        user_id: Uuid,
        friend_id: Uuid,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            DELETE FROM friendships
            WHERE (user_id = $1 AND friend_id = $2) OR (user_id = $2 AND friend_id = $1)
            "#,
        )
        .bind(user_id)
        .bind(friend_id)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// 好友列表
    pub async fn list_friends(pool: &PgPool, user_id: Uuid) -> Result<Vec<FriendInfo>, sqlx::Error> {
        sqlx::query_as::<_, FriendInfo>(
            r#"
            SELECT u.user_id, u.name, u.email
            FROM friendships f
            JOIN users u ON u.user_id = f.friend_id
            WHERE f.user_id = $1
            ORDER BY u.name
            "#,
        )
        .bind(user_id)
        .fetch_all(pool)
        .await
    }

    /// 收到的待处理申请
    pub async fn list_requests(
        pool: &PgPool,
        user_id: Uuid,
    ) -> Result<Vec<FriendInfo>, sqlx::Error> {
        sqlx::query_as::<_, FriendInfo>(
            r#"
            SELECT u.user_id, u.name, u.email
            FROM friend_requests r
            JOIN users u ON u.user_id = r.sender_id
            WHERE r.receiver_id = $1
            ORDER BY r.created_at
            "#,
        )
        .bind(user_id)
        .fetch_all(pool)
        .await
    }

    pub async fn friend_count(pool: &PgPool, user_id: Uuid) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT count(*) FROM friendships WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(pool)
            .await
    }
}

/// 配额引擎读取好友数的 Postgres 实现
#[derive(Clone)]
pub struct PgSocialGraph {
    pool: PgPool,
}

impl PgSocialGraph {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl SocialGraph for PgSocialGraph {
    async fn friend_count(&self, user_id: Uuid) -> Result<i64, sqlx::Error> {
        FriendRepository::friend_count(&self.pool, user_id).await
    }
}
