//! 支付网关HTTP客户端：创建托管结账会话。

use serde::Deserialize;
use uuid::Uuid;

use super::plan_price;
use crate::config::Config;
use crate::entitlement::policy::Plan;

#[derive(Debug)]
pub enum BillingClientError {
    /// 免费档没有结账流程
    NotPurchasable,
    Http(reqwest::Error),
    /// 网关返回非2xx
    Gateway(u16, String),
}

impl std::fmt::Display for BillingClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BillingClientError::NotPurchasable => write!(f, "plan is not purchasable"),
            BillingClientError::Http(e) => write!(f, "gateway request failed: {}", e),
            BillingClientError::Gateway(status, body) => {
                write!(f, "gateway returned {}: {}", status, body)
            }
        }
    }
}

impl From<reqwest::Error> for BillingClientError {
    fn from(e: reqwest::Error) -> Self {
        BillingClientError::Http(e)
    }
}

/// 结账会话，前端拿 url 跳转
#[derive(Debug, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    pub url: String,
}

pub struct BillingClient {
    http: reqwest::Client,
    api_base: String,
    secret_key: String,
    frontend_url: String,
}

impl BillingClient {
    pub fn new(config: &Config) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: config.payment_api_base.clone(),
            secret_key: config.payment_api_key.clone(),
            frontend_url: config.frontend_url.clone(),
        }
    }

    /// 创建订阅结账会话。metadata 带回 user_id 和套餐，
    /// webhook 对账时靠它定位本地用户。
    pub async fn create_checkout_session(
        &self,
        user_id: Uuid,
        plan: Plan,
        customer_email: &str,
    ) -> Result<CheckoutSession, BillingClientError> {
        let (amount, currency) = plan_price(plan).ok_or(BillingClientError::NotPurchasable)?;

        let user_id = user_id.to_string();
        let amount = amount.to_string();
        let success_url = format!("{}/subscription?status=success", self.frontend_url);
        let cancel_url = format!("{}/subscription?status=canceled", self.frontend_url);
        let product_name = format!("{} 订阅", plan.as_str());

        let params = [
            ("mode", "subscription"),
            ("customer_email", customer_email),
            ("line_items[0][price_data][currency]", currency),
            ("line_items[0][price_data][unit_amount]", amount.as_str()),
            ("line_items[0][price_data][recurring][interval]", "month"),
            (
                "line_items[0][price_data][product_data][name]",
                product_name.as_str(),
            ),
            ("line_items[0][quantity]", "1"),
            ("metadata[user_id]", user_id.as_str()),
            ("metadata[plan]", plan.as_str()),
            ("success_url", success_url.as_str()),
            ("cancel_url", cancel_url.as_str()),
        ];

        let response = self
            .http
            .post(format!("{}/v1/checkout/sessions", self.api_base))
            .bearer_auth(&self.secret_key)
            .form(&params)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BillingClientError::Gateway(status.as_u16(), body));
        }

        Ok(response.json::<CheckoutSession>().await?)
    }
}
