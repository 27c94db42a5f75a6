//! 一次性验证码：生成、存取契约与核销流程。
//!
//! 验证码成功核销后立即删除，同一个码不可能换发两次令牌。
//! 存储由 OtpStore 抽象，线上走 redis（cache::operations），TTL由存储层强制。

use rand::Rng;
use subtle::ConstantTimeEq;

pub const OTP_LENGTH: usize = 6;

/// 验证码存取能力
pub trait OtpStore {
    fn put(
        &self,
        user_key: &str,
        code: &str,
        ttl_secs: u64,
    ) -> impl Future<Output = Result<(), redis::RedisError>> + Send;

    fn fetch(
        &self,
        user_key: &str,
    ) -> impl Future<Output = Result<Option<String>, redis::RedisError>> + Send;

    fn remove(&self, user_key: &str) -> impl Future<Output = Result<(), redis::RedisError>> + Send;
}

/// 核销结论。Rejected 不区分「不存在」「过期」「不匹配」。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtpVerification {
    Accepted,
    Rejected,
}

/// 生成6位数字验证码
pub fn generate_code() -> String {
    let mut rng = rand::thread_rng();
    (0..OTP_LENGTH)
        .map(|_| char::from(b'0' + rng.gen_range(0..10)))
        .collect()
}

/// 常数时间比对，避免通过时间差区分「错码」与「过期」之外再泄露信息
pub fn codes_match(submitted: &str, stored: &str) -> bool {
    if submitted.len() != stored.len() {
        return false;
    }
    submitted.as_bytes().ct_eq(stored.as_bytes()).into()
}

/// 校验并核销：匹配则先删后放行，错码保留原码等TTL自然过期。
/// 删除失败时报错而不发令牌，避免一码两用。
pub async fn verify_and_consume<S: OtpStore>(
    store: &S,
    user_key: &str,
    submitted: &str,
) -> Result<OtpVerification, redis::RedisError> {
    let Some(stored) = store.fetch(user_key).await? else {
        return Ok(OtpVerification::Rejected);
    };
    if !codes_match(submitted, &stored) {
        return Ok(OtpVerification::Rejected);
    }
    store.remove(user_key).await?;
    Ok(OtpVerification::Accepted)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;

    /// 内存实现，与 redis 版遵守相同契约
    #[derive(Default)]
    struct MemoryOtpStore {
        codes: Mutex<HashMap<String, String>>,
        fail: AtomicBool,
    }

    impl MemoryOtpStore {
        fn check(&self) -> Result<(), redis::RedisError> {
            if self.fail.load(Ordering::SeqCst) {
                Err(redis::RedisError::from((
                    redis::ErrorKind::IoError,
                    "store unavailable",
                )))
            } else {
                Ok(())
            }
        }
    }

    impl OtpStore for MemoryOtpStore {
        async fn put(
            &self,
            user_key: &str,
            code: &str,
            _ttl_secs: u64,
        ) -> Result<(), redis::RedisError> {
            self.check()?;
            self.codes
                .lock()
                .unwrap()
                .insert(user_key.to_string(), code.to_string());
            Ok(())
        }

        async fn fetch(&self, user_key: &str) -> Result<Option<String>, redis::RedisError> {
            self.check()?;
            Ok(self.codes.lock().unwrap().get(user_key).cloned())
        }

        async fn remove(&self, user_key: &str) -> Result<(), redis::RedisError> {
            self.check()?;
            self.codes.lock().unwrap().remove(user_key);
            Ok(())
        }
    }

    #[test]
    fn code_is_six_digits() {
        for _ in 0..50 {
            let code = generate_code();
            assert_eq!(code.len(), OTP_LENGTH);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn match_is_exact() {
        assert!(codes_match("123456", "123456"));
        assert!(!codes_match("123456", "123457"));
        assert!(!codes_match("12345", "123456"));
    }

    #[tokio::test]
    async fn correct_code_is_accepted_exactly_once() {
        let store = MemoryOtpStore::default();
        store.put("user-1", "482913", 300).await.unwrap();

        let first = verify_and_consume(&store, "user-1", "482913").await.unwrap();
        assert_eq!(first, OtpVerification::Accepted);

        // 核销即删，同一个码不能再用
        let replay = verify_and_consume(&store, "user-1", "482913").await.unwrap();
        assert_eq!(replay, OtpVerification::Rejected);
    }

    #[tokio::test]
    async fn wrong_code_is_rejected_without_consuming() {
        let store = MemoryOtpStore::default();
        store.put("user-1", "482913", 300).await.unwrap();

        let wrong = verify_and_consume(&store, "user-1", "000000").await.unwrap();
        assert_eq!(wrong, OtpVerification::Rejected);

        // 错码不烧掉原码，随后正确的码仍然可用
        let right = verify_and_consume(&store, "user-1", "482913").await.unwrap();
        assert_eq!(right, OtpVerification::Accepted);
    }

    #[tokio::test]
    async fn missing_code_is_rejected() {
        let store = MemoryOtpStore::default();
        let outcome = verify_and_consume(&store, "user-1", "482913").await.unwrap();
        assert_eq!(outcome, OtpVerification::Rejected);
    }

    #[tokio::test]
    async fn store_failure_propagates() {
        let store = MemoryOtpStore::default();
        store.put("user-1", "482913", 300).await.unwrap();
        store.fail.store(true, Ordering::SeqCst);

        let result = verify_and_consume(&store, "user-1", "482913").await;
        assert!(result.is_err());
    }
}
