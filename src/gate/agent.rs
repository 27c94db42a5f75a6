//! User-Agent 解析：识别浏览器家族、操作系统与设备类型。
//! 只做登录闸门需要的粗粒度分类，不追求完整的UA数据库。

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DeviceType {
    Desktop,
    Mobile,
    Tablet,
}

impl DeviceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceType::Desktop => "desktop",
            DeviceType::Mobile => "mobile",
            DeviceType::Tablet => "tablet",
        }
    }

    pub fn is_handheld(&self) -> bool {
        matches!(self, DeviceType::Mobile | DeviceType::Tablet)
    }
}

/// 解析出的客户端信息
#[derive(Debug, Clone)]
pub struct ClientAgent {
    pub browser: String,
    pub os: String,
    pub device: DeviceType,
}

pub fn classify(user_agent: &str) -> ClientAgent {
    ClientAgent {
        browser: browser_family(user_agent).to_string(),
        os: os_name(user_agent).to_string(),
        device: device_type(user_agent),
    }
}

fn browser_family(ua: &str) -> &'static str {
    // 顺序有讲究：Edge/Opera 的UA同时带有 Chrome 标识
    if ua.contains("Edg/") || ua.contains("Edge/") {
        "Edge"
    } else if ua.contains("OPR/") || ua.contains("Opera") {
        "Opera"
    } else if ua.contains("Firefox/") {
        "Firefox"
    } else if ua.contains("Chrome/") || ua.contains("CriOS/") {
        "Chrome"
    } else if ua.contains("Safari/") {
        "Safari"
    } else {
        "Unknown"
    }
}

fn os_name(ua: &str) -> &'static str {
    if ua.contains("Windows") {
        "Windows"
    } else if ua.contains("iPhone") || ua.contains("iPad") {
        "iOS"
    } else if ua.contains("Android") {
        "Android"
    } else if ua.contains("Mac OS X") || ua.contains("Macintosh") {
        "macOS"
    } else if ua.contains("Linux") {
        "Linux"
    } else {
        "Unknown"
    }
}

fn device_type(ua: &str) -> DeviceType {
    if ua.contains("iPad") || ua.contains("Tablet") {
        DeviceType::Tablet
    } else if ua.contains("Android") && !ua.contains("Mobile") {
        // Android 平板不带 Mobile 标识
        DeviceType::Tablet
    } else if ua.contains("Mobi") || ua.contains("iPhone") {
        DeviceType::Mobile
    } else {
        DeviceType::Desktop
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHROME_WIN: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
         (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
    const EDGE_WIN: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
         (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36 Edg/120.0.2210.91";
    const CHROME_ANDROID: &str = "Mozilla/5.0 (Linux; Android 14; Pixel 8) AppleWebKit/537.36 \
         (KHTML, like Gecko) Chrome/120.0.0.0 Mobile Safari/537.36";
    const SAFARI_IPAD: &str = "Mozilla/5.0 (iPad; CPU OS 17_0 like Mac OS X) AppleWebKit/605.1.15 \
         (KHTML, like Gecko) Version/17.0 Mobile/15E148 Safari/604.1";
    const FIREFOX_LINUX: &str =
        "Mozilla/5.0 (X11; Linux x86_64; rv:121.0) Gecko/20100101 Firefox/121.0";

    #[test]
    fn desktop_chrome() {
        let agent = classify(CHROME_WIN);
        assert_eq!(agent.browser, "Chrome");
        assert_eq!(agent.os, "Windows");
        assert_eq!(agent.device, DeviceType::Desktop);
    }

    #[test]
    fn edge_is_not_chrome() {
        let agent = classify(EDGE_WIN);
        assert_eq!(agent.browser, "Edge");
        assert_eq!(agent.device, DeviceType::Desktop);
    }

    #[test]
    fn android_phone_is_mobile() {
        let agent = classify(CHROME_ANDROID);
        assert_eq!(agent.browser, "Chrome");
        assert_eq!(agent.os, "Android");
        assert_eq!(agent.device, DeviceType::Mobile);
    }

    #[test]
    fn ipad_is_tablet() {
        let agent = classify(SAFARI_IPAD);
        assert_eq!(agent.browser, "Safari");
        assert_eq!(agent.os, "iOS");
        assert_eq!(agent.device, DeviceType::Tablet);
    }

    #[test]
    fn firefox_on_linux() {
        let agent = classify(FIREFOX_LINUX);
        assert_eq!(agent.browser, "Firefox");
        assert_eq!(agent.os, "Linux");
        assert_eq!(agent.device, DeviceType::Desktop);
    }

    #[test]
    fn unknown_agent_defaults_to_desktop() {
        let agent = classify("curl/8.4.0");
        assert_eq!(agent.browser, "Unknown");
        assert_eq!(agent.device, DeviceType::Desktop);
    }
}
