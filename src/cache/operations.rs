use std::sync::Arc;

use redis::{AsyncCommands, Client as RedisClient};
use serde::{Deserialize, Serialize};

use crate::cache::keys;
use crate::gate::otp::OtpStore;

/// OTP缓存数据模型
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CachedOtp {
    pub user_id: String,
    pub code: String,
    pub created_at: i64,
}

/// OTP缓存操作。TTL由存储层强制，引擎不做过期判断。
pub struct OtpCacheOperations;

impl OtpCacheOperations {
    /// 写入验证码，TTL到期后自动失效
    pub async fn store_otp(
        redis: &Arc<RedisClient>,
        user_id: &str,
        code: &str,
        ttl: u64,
    ) -> Result<(), redis::RedisError> {
        let mut conn = redis.get_multiplexed_async_connection().await?;

        let cached = CachedOtp {
            user_id: user_id.to_string(),
            code: code.to_string(),
            created_at: chrono::Utc::now().timestamp(),
        };

        let key = keys::otp_key(user_id);
        let json = serde_json::to_string(&cached).map_err(|e| {
            redis::RedisError::from((redis::ErrorKind::IoError, "序列化错误", e.to_string()))
        })?;

        let _: () = conn.set_ex(key, json, ttl).await?;

        Ok(())
    }

    /// 读取未过期的验证码
    pub async fn get_otp(
        redis: &Arc<RedisClient>,
        user_id: &str,
    ) -> Result<Option<CachedOtp>, redis::RedisError> {
        let mut conn = redis.get_multiplexed_async_connection().await?;

        let key = keys::otp_key(user_id);
        let result: Option<String> = conn.get(key).await?;

        match result {
            Some(json) => {
                let cached = serde_json::from_str(&json).map_err(|e| {
                    redis::RedisError::from((
                        redis::ErrorKind::IoError,
                        "反序列化错误",
                        e.to_string(),
                    ))
                })?;
                Ok(Some(cached))
            }
            None => Ok(None),
        }
    }

    /// 验证成功后删除，验证码只能用一次
    pub async fn remove_otp(
        redis: &Arc<RedisClient>,
        user_id: &str,
    ) -> Result<(), redis::RedisError> {
        let mut conn = redis.get_multiplexed_async_connection().await?;

        let key = keys::otp_key(user_id);
        let _: () = conn.del(key).await?;

        Ok(())
    }
}

/// 闸门 OtpStore 契约的 redis 实现
#[derive(Clone)]
pub struct RedisOtpStore {
    redis: Arc<RedisClient>,
}

impl RedisOtpStore {
    pub fn new(redis: Arc<RedisClient>) -> Self {
        Self { redis }
    }
}

impl OtpStore for RedisOtpStore {
    async fn put(&self, user_key: &str, code: &str, ttl_secs: u64) -> Result<(), redis::RedisError> {
        OtpCacheOperations::store_otp(&self.redis, user_key, code, ttl_secs).await
    }

    async fn fetch(&self, user_key: &str) -> Result<Option<String>, redis::RedisError> {
        Ok(OtpCacheOperations::get_otp(&self.redis, user_key)
            .await?
            .map(|cached| cached.code))
    }

    async fn remove(&self, user_key: &str) -> Result<(), redis::RedisError> {
        OtpCacheOperations::remove_otp(&self.redis, user_key).await
    }
}
