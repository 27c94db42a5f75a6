//! 登录闸门：凭证校验之后、发令牌之前的两道有序检查。
//!
//! 先查设备+时段（移动端只在配置的窗口内放行，优先级最高、与浏览器无关），
//! 再查浏览器家族（step-up 浏览器要求OTP，trusted 浏览器直接放行）。
//! 两道闸是有序的独立规则，不是打分模型，顺序不可调换。

pub mod agent;
pub mod otp;

use chrono::{DateTime, Timelike, Utc};

use crate::config::Config;
use agent::ClientAgent;

/// 审计记录里的认证方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    Password,
    Otp,
    None,
}

impl AuthMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMethod::Password => "PASSWORD",
            AuthMethod::Otp => "OTP",
            AuthMethod::None => "NONE",
        }
    }
}

/// 单次登录尝试的闸门结论
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateOutcome {
    /// 设备+时段拦截，终态
    Blocked,
    /// 需要OTP二次验证，暂不发令牌
    OtpRequired,
    /// 直接发令牌；auth_method 记入审计
    TokenIssued { auth_method: AuthMethod },
}

/// 闸门策略，从配置读取
#[derive(Debug, Clone)]
pub struct GatePolicy {
    pub window_start_hour: u32,
    pub window_end_hour: u32,
    pub stepup_browsers: Vec<String>,
    pub trusted_browsers: Vec<String>,
}

impl GatePolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            window_start_hour: config.mobile_window_start_hour,
            window_end_hour: config.mobile_window_end_hour,
            stepup_browsers: config.stepup_browsers.clone(),
            trusted_browsers: config.trusted_browsers.clone(),
        }
    }

    fn in_window(&self, local_hour: u32) -> bool {
        local_hour >= self.window_start_hour && local_hour < self.window_end_hour
    }
}

/// 按固定参考时区取当前小时
pub fn local_hour(now: DateTime<Utc>, config: &Config) -> u32 {
    now.with_timezone(&config.local_offset()).hour()
}

/// 闸门判定。调用方负责凭证校验、审计落库与OTP下发。
pub fn evaluate(agent: &ClientAgent, local_hour: u32, policy: &GatePolicy) -> GateOutcome {
    // 第一道：移动端时段，无条件优先
    if agent.device.is_handheld() && !policy.in_window(local_hour) {
        return GateOutcome::Blocked;
    }

    // 第二道：浏览器家族
    if policy.stepup_browsers.iter().any(|b| b == &agent.browser) {
        return GateOutcome::OtpRequired;
    }
    if policy.trusted_browsers.iter().any(|b| b == &agent.browser) {
        return GateOutcome::TokenIssued {
            auth_method: AuthMethod::None,
        };
    }
    GateOutcome::TokenIssued {
        auth_method: AuthMethod::Password,
    }
}

#[cfg(test)]
mod tests {
    use super::agent::{DeviceType, classify};
    use super::*;

    fn policy() -> GatePolicy {
        GatePolicy {
            window_start_hour: 10,
            window_end_hour: 13,
            stepup_browsers: vec!["Chrome".to_string()],
            trusted_browsers: vec!["Edge".to_string()],
        }
    }

    fn agent(browser: &str, device: DeviceType) -> ClientAgent {
        ClientAgent {
            browser: browser.to_string(),
            os: "Test".to_string(),
            device,
        }
    }

    #[test]
    fn mobile_outside_window_is_blocked() {
        let outcome = evaluate(&agent("Chrome", DeviceType::Mobile), 14, &policy());
        assert_eq!(outcome, GateOutcome::Blocked);
    }

    #[test]
    fn tablet_outside_window_is_blocked() {
        let outcome = evaluate(&agent("Edge", DeviceType::Tablet), 9, &policy());
        assert_eq!(outcome, GateOutcome::Blocked);
    }

    #[test]
    fn device_gate_takes_precedence_over_trusted_browser() {
        // 即便是 trusted 浏览器，移动端时段外仍然拦截
        let outcome = evaluate(&agent("Edge", DeviceType::Mobile), 23, &policy());
        assert_eq!(outcome, GateOutcome::Blocked);
    }

    #[test]
    fn mobile_inside_window_passes_to_browser_gate() {
        let outcome = evaluate(&agent("Chrome", DeviceType::Mobile), 11, &policy());
        assert_eq!(outcome, GateOutcome::OtpRequired);
    }

    #[test]
    fn desktop_chrome_requires_otp_any_hour() {
        for hour in [0, 9, 11, 14, 23] {
            let outcome = evaluate(&agent("Chrome", DeviceType::Desktop), hour, &policy());
            assert_eq!(outcome, GateOutcome::OtpRequired);
        }
    }

    #[test]
    fn desktop_edge_issues_token_without_otp() {
        let outcome = evaluate(&agent("Edge", DeviceType::Desktop), 11, &policy());
        assert_eq!(
            outcome,
            GateOutcome::TokenIssued {
                auth_method: AuthMethod::None
            }
        );
    }

    #[test]
    fn unrecognized_browser_issues_token_with_password_method() {
        let outcome = evaluate(&agent("Firefox", DeviceType::Desktop), 11, &policy());
        assert_eq!(
            outcome,
            GateOutcome::TokenIssued {
                auth_method: AuthMethod::Password
            }
        );
    }

    #[test]
    fn window_boundaries() {
        let p = policy();
        assert_eq!(
            evaluate(&agent("Firefox", DeviceType::Mobile), 10, &p),
            GateOutcome::TokenIssued {
                auth_method: AuthMethod::Password
            }
        );
        // 13点起窗口关闭
        assert_eq!(
            evaluate(&agent("Firefox", DeviceType::Mobile), 13, &p),
            GateOutcome::Blocked
        );
    }

    #[test]
    fn real_user_agents_flow_through() {
        let chrome = classify(
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
             (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
        );
        assert_eq!(evaluate(&chrome, 11, &policy()), GateOutcome::OtpRequired);
    }
}
