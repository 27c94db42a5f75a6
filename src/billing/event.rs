//! 支付网关 webhook 的验签与事件解析。
//! 验签不过的报文绝不会进入对账流程。

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug)]
pub enum SignatureError {
    MalformedHeader,
    Mismatch,
}

/// 验证签名头 `t=<timestamp>,v1=<signature>`，
/// 签名是对 `timestamp.payload` 的 HMAC-SHA256 十六进制值
pub fn verify_signature(
    payload: &[u8],
    signature_header: &str,
    secret: &str,
) -> Result<(), SignatureError> {
    let mut timestamp = None;
    let mut signature = None;
    for part in signature_header.split(',') {
        let mut kv = part.splitn(2, '=');
        match (kv.next(), kv.next()) {
            (Some("t"), Some(v)) => timestamp = Some(v),
            (Some("v1"), Some(v)) => signature = Some(v),
            _ => {}
        }
    }
    let timestamp = timestamp.ok_or(SignatureError::MalformedHeader)?;
    let signature = signature.ok_or(SignatureError::MalformedHeader)?;

    let payload = std::str::from_utf8(payload).map_err(|_| SignatureError::MalformedHeader)?;
    let signed_payload = format!("{}.{}", timestamp, payload);

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| SignatureError::MalformedHeader)?;
    mac.update(signed_payload.as_bytes());
    let expected = hex::encode(mac.finalize().into_bytes());

    if expected.as_bytes().ct_eq(signature.as_bytes()).into() {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}

/// 结账完成事件携带的数据
#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutData {
    pub customer: String,
    pub subscription: String,
    #[serde(default)]
    pub price_id: Option<String>,
    pub metadata: CheckoutMetadata,
    /// 计费周期（unix秒）
    #[serde(default)]
    pub current_period_start: Option<i64>,
    #[serde(default)]
    pub current_period_end: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutMetadata {
    pub user_id: Uuid,
    pub plan: String,
}

/// 账单事件携带的数据
#[derive(Debug, Clone, Deserialize)]
pub struct InvoiceData {
    pub id: String,
    #[serde(default)]
    pub subscription: Option<String>,
    #[serde(default)]
    pub payment_intent: Option<String>,
    #[serde(default)]
    pub amount_paid: Option<i64>,
    #[serde(default)]
    pub amount_due: Option<i64>,
    pub currency: String,
    pub created: i64,
}

/// 网关侧订阅对象
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderSubscriptionData {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub current_period_start: Option<i64>,
    #[serde(default)]
    pub current_period_end: Option<i64>,
    #[serde(default)]
    pub cancel_at_period_end: bool,
}

/// 对账器处理的事件类型
#[derive(Debug, Clone)]
pub enum BillingEvent {
    CheckoutCompleted(CheckoutData),
    InvoicePaid(InvoiceData),
    InvoicePaymentFailed(InvoiceData),
    SubscriptionUpdated(ProviderSubscriptionData),
    SubscriptionDeleted(ProviderSubscriptionData),
    /// 不处理的事件类型，直接确认收到
    Ignored(String),
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    #[serde(rename = "type")]
    event_type: String,
    data: RawEventData,
}

#[derive(Debug, Deserialize)]
struct RawEventData {
    object: serde_json::Value,
}

pub fn parse_event(payload: &[u8]) -> Result<BillingEvent, serde_json::Error> {
    let raw: RawEvent = serde_json::from_slice(payload)?;
    let object = raw.data.object;
    Ok(match raw.event_type.as_str() {
        "checkout.session.completed" => {
            BillingEvent::CheckoutCompleted(serde_json::from_value(object)?)
        }
        "invoice.payment_succeeded" | "invoice.paid" => {
            BillingEvent::InvoicePaid(serde_json::from_value(object)?)
        }
        "invoice.payment_failed" => {
            BillingEvent::InvoicePaymentFailed(serde_json::from_value(object)?)
        }
        "customer.subscription.updated" => {
            BillingEvent::SubscriptionUpdated(serde_json::from_value(object)?)
        }
        "customer.subscription.deleted" => {
            BillingEvent::SubscriptionDeleted(serde_json::from_value(object)?)
        }
        other => BillingEvent::Ignored(other.to_string()),
    })
}

/// 网关状态映射到本地状态
pub fn map_provider_status(status: &str) -> crate::entitlement::policy::SubscriptionStatus {
    use crate::entitlement::policy::SubscriptionStatus;
    match status {
        "active" | "trialing" => SubscriptionStatus::Active,
        "past_due" | "unpaid" | "incomplete" => SubscriptionStatus::PastDue,
        _ => SubscriptionStatus::Canceled,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(payload: &[u8], timestamp: &str, secret: &str) -> String {
        let signed = format!("{}.{}", timestamp, std::str::from_utf8(payload).unwrap());
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(signed.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    #[test]
    fn valid_signature_passes() {
        let secret = "whsec_test";
        let payload = br#"{"type":"invoice.paid"}"#;
        let sig = sign(payload, "1700000000", secret);
        let header = format!("t=1700000000,v1={}", sig);
        assert!(verify_signature(payload, &header, secret).is_ok());
    }

    #[test]
    fn wrong_signature_fails() {
        let result = verify_signature(b"payload", "t=123,v1=deadbeef", "secret");
        assert!(matches!(result, Err(SignatureError::Mismatch)));
    }

    #[test]
    fn malformed_header_fails() {
        let result = verify_signature(b"payload", "nonsense", "secret");
        assert!(matches!(result, Err(SignatureError::MalformedHeader)));
    }

    #[test]
    fn parses_checkout_completed() {
        let user_id = Uuid::new_v4();
        let payload = format!(
            r#"{{
                "type": "checkout.session.completed",
                "data": {{"object": {{
                    "customer": "cus_123",
                    "subscription": "sub_456",
                    "metadata": {{"user_id": "{user_id}", "plan": "SILVER"}},
                    "current_period_start": 1700000000,
                    "current_period_end": 1702592000
                }}}}
            }}"#
        );
        match parse_event(payload.as_bytes()).unwrap() {
            BillingEvent::CheckoutCompleted(data) => {
                assert_eq!(data.customer, "cus_123");
                assert_eq!(data.subscription, "sub_456");
                assert_eq!(data.metadata.user_id, user_id);
                assert_eq!(data.metadata.plan, "SILVER");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn parses_invoice_payment_failed() {
        let payload = br#"{
            "type": "invoice.payment_failed",
            "data": {"object": {
                "id": "in_789",
                "subscription": "sub_456",
                "amount_due": 30000,
                "currency": "inr",
                "created": 1700000000
            }}
        }"#;
        match parse_event(payload).unwrap() {
            BillingEvent::InvoicePaymentFailed(data) => {
                assert_eq!(data.id, "in_789");
                assert_eq!(data.amount_due, Some(30000));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn unknown_event_type_is_ignored() {
        let payload = br#"{"type": "customer.created", "data": {"object": {}}}"#;
        assert!(matches!(
            parse_event(payload).unwrap(),
            BillingEvent::Ignored(t) if t == "customer.created"
        ));
    }

    #[test]
    fn provider_status_mapping() {
        use crate::entitlement::policy::SubscriptionStatus;
        assert_eq!(map_provider_status("active"), SubscriptionStatus::Active);
        assert_eq!(map_provider_status("past_due"), SubscriptionStatus::PastDue);
        assert_eq!(map_provider_status("canceled"), SubscriptionStatus::Canceled);
        assert_eq!(
            map_provider_status("incomplete_expired"),
            SubscriptionStatus::Canceled
        );
    }
}
