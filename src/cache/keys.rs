/// OTP缓存键前缀
const OTP_PREFIX: &str = "otp:";

/// 限流缓存键前缀
const RATE_LIMIT_PREFIX: &str = "rate_limit:";

/// 生成OTP缓存键
pub fn otp_key(user_id: &str) -> String {
    format!("{}{}", OTP_PREFIX, user_id)
}

/// 生成按IP限流的缓存键
pub fn rate_limit_key(ip: &str) -> String {
    format!("{}{}", RATE_LIMIT_PREFIX, ip)
}
