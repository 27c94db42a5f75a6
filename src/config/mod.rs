use std::env;
use std::time::Duration;

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Config {
    pub database_url: String,
    pub redis_url: String,
    pub jwt_secret: String,
    pub jwt_expiration_secs: u64,
    pub rate_limit_window_secs: u64,
    pub rate_limit_requests: u32,
    pub server_host: String,
    pub server_port: u16,
    /// 本地时区相对UTC的偏移（分钟），默认330（UTC+5:30）
    pub local_tz_offset_minutes: i32,
    /// 移动端登录允许时段 [start, end)
    pub mobile_window_start_hour: u32,
    pub mobile_window_end_hour: u32,
    /// 需要OTP二次验证的浏览器
    pub stepup_browsers: Vec<String>,
    /// 免OTP直接放行的浏览器
    pub trusted_browsers: Vec<String>,
    pub otp_ttl_secs: u64,
    /// 支付允许时段 [start, end)
    pub payment_window_start_hour: u32,
    pub payment_window_end_hour: u32,
    pub webhook_secret: String,
    pub payment_api_base: String,
    pub payment_api_key: String,
    pub frontend_url: String,
    pub sms_api_base: String,
    pub sms_api_key: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, env::VarError> {
        dotenv::dotenv().ok();

        let jwt_expiration = env::var("JWT_EXPIRATION")?
            .trim_end_matches('h')
            .parse::<u64>()
            .unwrap_or(24);
        Ok(Config {
            database_url: env::var("DATABASE_URL")?,
            redis_url: env::var("REDIS_URL")?,
            server_host: env::var("SERVER_HOST")?,
            server_port: env::var("SERVER_PORT")?.parse().unwrap_or(3000),
            jwt_secret: env::var("JWT_SECRET")?,
            jwt_expiration_secs: jwt_expiration * 3600,
            rate_limit_window_secs: env::var("RATE_LIMIT_WINDOW")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(60),
            rate_limit_requests: env::var("RATE_LIMIT_REQUESTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(100),
            local_tz_offset_minutes: env::var("LOCAL_TZ_OFFSET_MINUTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(330),
            mobile_window_start_hour: env::var("MOBILE_WINDOW_START_HOUR")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),
            mobile_window_end_hour: env::var("MOBILE_WINDOW_END_HOUR")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(13),
            stepup_browsers: parse_browser_list(env::var("STEPUP_BROWSERS").ok(), "Chrome"),
            trusted_browsers: parse_browser_list(env::var("TRUSTED_BROWSERS").ok(), "Edge"),
            otp_ttl_secs: env::var("OTP_TTL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(300),
            payment_window_start_hour: env::var("PAYMENT_WINDOW_START_HOUR")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),
            payment_window_end_hour: env::var("PAYMENT_WINDOW_END_HOUR")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(11),
            webhook_secret: env::var("WEBHOOK_SECRET").unwrap_or_default(),
            payment_api_base: env::var("PAYMENT_API_BASE")
                .unwrap_or_else(|_| "https://api.stripe.com".to_string()),
            payment_api_key: env::var("PAYMENT_API_KEY").unwrap_or_default(),
            frontend_url: env::var("FRONTEND_URL")
                .unwrap_or_else(|_| "http://localhost:5173".to_string()),
            sms_api_base: env::var("SMS_API_BASE")
                .unwrap_or_else(|_| "https://www.fast2sms.com/dev/bulkV2".to_string()),
            sms_api_key: env::var("SMS_API_KEY").ok(),
        })
    }

    pub fn jwt_expiration(&self) -> Duration {
        Duration::from_secs(self.jwt_expiration_secs)
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window_secs)
    }

    /// 业务规则使用的固定参考时区
    pub fn local_offset(&self) -> chrono::FixedOffset {
        chrono::FixedOffset::east_opt(self.local_tz_offset_minutes * 60)
            .unwrap_or_else(|| chrono::FixedOffset::east_opt(0).unwrap())
    }
}

fn parse_browser_list(raw: Option<String>, default: &str) -> Vec<String> {
    raw.unwrap_or_else(|| default.to_string())
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
