use crate::scanner::constants::is_tls_port;
use regex::Regex;
use reqwest::Client;
use std::net::IpAddr;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::debug;

pub const USER_AGENT: &str = concat!("iot-sentinel/", env!("CARGO_PKG_VERSION"));

/// 扫描用 HTTP 客户端：不走系统代理、不校验证书，重定向按调用方决定
pub fn build_client(timeout: Duration, follow_redirects: bool) -> reqwest::Result<Client> {
    let policy = if follow_redirects {
        reqwest::redirect::Policy::limited(3)
    } else {
        reqwest::redirect::Policy::none()
    };
    Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout)
        .danger_accept_invalid_certs(true)
        .no_proxy()
        .redirect(policy)
        .user_agent(USER_AGENT)
        .build()
}

pub fn format_host(ip: IpAddr) -> String {
    match ip {
        IpAddr::V4(ipv4) => ipv4.to_string(),
        IpAddr::V6(ipv6) => format!("[{}]", ipv6),
    }
}

pub fn base_url(ip: IpAddr, port: u16) -> String {
    let scheme = if is_tls_port(port) { "https" } else { "http" };
    format!("{}://{}:{}", scheme, format_host(ip), port)
}

pub async fn read_body_limited(resp: &mut reqwest::Response, limit: usize) -> Vec<u8> {
    let mut body_bytes = Vec::new();
    while let Ok(Some(chunk)) = resp.chunk().await {
        if body_bytes.len() + chunk.len() > limit {
            let remaining = limit - body_bytes.len();
            body_bytes.extend_from_slice(&chunk[..remaining]);
            debug!("HTTP response body truncated at {} bytes", limit);
            break;
        }
        body_bytes.extend_from_slice(&chunk);
    }
    body_bytes
}

fn title_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"(?is)<title>(.*?)</title>").expect("Invalid Title Regex"))
}

pub fn extract_title(body: &str) -> Option<String> {
    title_regex()
        .captures(body)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|t| !t.is_empty())
}

/// 把响应头拼成 banner 风格的文本，便于后续统一做关键字/版本匹配
pub fn headers_text(status: reqwest::StatusCode, headers: &reqwest::header::HeaderMap) -> String {
    let mut text = format!("HTTP/1.1 {}", status);
    for (name, value) in headers {
        if let Ok(v) = value.to_str() {
            text.push_str(&format!("\r\n{}: {}", name, v));
        }
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::test_support::{spawn_http_server, HttpBehavior};

    #[test]
    fn test_base_url() {
        assert_eq!(
            base_url("192.168.1.10".parse().unwrap(), 8080),
            "http://192.168.1.10:8080"
        );
        assert_eq!(
            base_url("192.168.1.10".parse().unwrap(), 8443),
            "https://192.168.1.10:8443"
        );
        assert_eq!(base_url("::1".parse().unwrap(), 80), "http://[::1]:80");
    }

    #[test]
    fn test_https_ports_use_tls_scheme() {
        use crate::scanner::service_map::{protocol_for_port, Protocol};
        // 端口表标记为 https 的端口都必须按 TLS 访问
        for port in [443, 4443, 5001, 8443, 9443] {
            assert_eq!(protocol_for_port(port), Protocol::Https);
            assert!(base_url("192.168.1.10".parse().unwrap(), port).starts_with("https://"));
        }
    }

    #[test]
    fn test_extract_title() {
        assert_eq!(
            extract_title("<html><TITLE>\n NVR Login </TITLE></html>"),
            Some("NVR Login".to_string())
        );
        assert_eq!(extract_title("<title>  </title>"), None);
        assert_eq!(extract_title("no title"), None);
    }

    #[tokio::test]
    async fn test_read_body_limited() {
        let fixture = spawn_http_server(HttpBehavior::accepting(&[], "")).await;
        let client = build_client(Duration::from_secs(2), false).unwrap();
        let mut resp = client
            .get(format!("http://{}/", fixture.addr))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 401);
        let body = read_body_limited(&mut resp, 10).await;
        assert_eq!(body, b"<html><tit");
    }
}
