//! 通知下发：OTP短信/邮件，发后不等（fire-and-forget）。
//!
//! 下发失败绝不影响登录请求本身，验证码会落日志作为运维侧兜底通道。

use std::sync::Arc;

use crate::config::Config;

pub struct Notifier {
    http: reqwest::Client,
    sms_api_base: String,
    sms_api_key: Option<String>,
}

impl Notifier {
    pub fn new(config: &Config) -> Self {
        Self {
            http: reqwest::Client::new(),
            sms_api_base: config.sms_api_base.clone(),
            sms_api_key: config.sms_api_key.clone(),
        }
    }

    /// 异步下发OTP，立即返回。调用方不感知结果。
    pub fn dispatch_otp(self: &Arc<Self>, email: String, phone: Option<String>, code: String) {
        let notifier = Arc::clone(self);
        tokio::spawn(async move {
            // 邮件通道未接入网关时退化为日志，作为兜底
            tracing::info!("OTP for {}: {} (valid 5 minutes)", email, code);

            if let Some(phone) = phone {
                if let Err(e) = notifier.send_sms(&phone, &code).await {
                    tracing::warn!("OTP SMS to {} failed: {}", phone, e);
                }
            }
        });
    }

    async fn send_sms(&self, phone: &str, code: &str) -> Result<(), reqwest::Error> {
        let Some(api_key) = self.sms_api_key.as_deref() else {
            tracing::debug!("SMS gateway not configured, skipping send to {}", phone);
            return Ok(());
        };

        let message = format!("您的登录验证码是 {}，5分钟内有效", code);
        let response = self
            .http
            .get(&self.sms_api_base)
            .query(&[
                ("authorization", api_key),
                ("route", "q"),
                ("message", &message),
                ("language", "english"),
                ("flash", "0"),
                ("numbers", phone),
            ])
            .send()
            .await?;

        tracing::debug!("SMS gateway responded {} for {}", response.status(), phone);
        Ok(())
    }
}
