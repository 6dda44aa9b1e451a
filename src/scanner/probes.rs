use crate::error::ScanError;
use crate::models::{ServiceRecord, Transport};
use crate::scanner::constants::{is_tls_port, BANNER_MAX_SIZE};
use crate::scanner::http::{base_url, headers_text};
use crate::scanner::service_map::{protocol_for_port, protocol_from_banner, Protocol};
use reqwest::Client;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeKind {
    Http,
    Rtsp,
    Mqtt,
    Banner,
}

impl ProbeKind {
    pub fn for_port(port: u16, web_ports: &[u16]) -> ProbeKind {
        if web_ports.contains(&port) {
            return ProbeKind::Http;
        }
        match protocol_for_port(port) {
            Protocol::Rtsp => ProbeKind::Rtsp,
            Protocol::Mqtt => ProbeKind::Mqtt,
            p if p.is_web() => ProbeKind::Http,
            _ => ProbeKind::Banner,
        }
    }
}

/// 对开放端口做一次轻量的应用层探测，生成 ServiceRecord
pub struct ServiceProber {
    client: Client,
    web_ports: Vec<u16>,
    timeout: Duration,
}

impl ServiceProber {
    pub fn new(client: Client, web_ports: Vec<u16>, timeout: Duration) -> Self {
        Self {
            client,
            web_ports,
            timeout,
        }
    }

    pub async fn probe(&self, host: IpAddr, port: u16) -> ServiceRecord {
        let kind = ProbeKind::for_port(port, &self.web_ports);
        self.probe_with(kind, host, port).await
    }

    pub async fn probe_with(&self, kind: ProbeKind, host: IpAddr, port: u16) -> ServiceRecord {
        let raw = match kind {
            ProbeKind::Http => self.http_head(host, port).await,
            ProbeKind::Rtsp | ProbeKind::Mqtt | ProbeKind::Banner => {
                self.raw_probe(kind, host, port).await
            }
        };
        let banner = raw
            .map(|b| truncate_banner(&clean_banner(&b), BANNER_MAX_SIZE))
            .unwrap_or_default();
        debug!("服务探测 {}:{} {:?} -> {:?}", host, port, kind, banner);

        let protocol = resolve_protocol(kind, port, &banner);
        ServiceRecord {
            port,
            transport: Transport::Tcp,
            service_name: protocol.name().to_string(),
            banner,
            risk_tag: protocol.risk(),
        }
    }

    /// 关闭服务识别时只查静态端口表，不产生任何流量
    pub fn static_record(port: u16) -> ServiceRecord {
        let protocol = protocol_for_port(port);
        ServiceRecord {
            port,
            transport: Transport::Tcp,
            service_name: protocol.name().to_string(),
            banner: String::new(),
            risk_tag: protocol.risk(),
        }
    }

    async fn http_head(&self, host: IpAddr, port: u16) -> Option<String> {
        let url = format!("{}/", base_url(host, port));
        match self.client.head(&url).timeout(self.timeout).send().await {
            Ok(resp) => Some(headers_text(resp.status(), resp.headers())),
            Err(e) => {
                let err = ScanError::Probe {
                    target: host,
                    port,
                    reason: format!("HEAD {} 失败: {}", url, e),
                };
                debug!("{}", err);
                None
            }
        }
    }

    async fn raw_probe(&self, kind: ProbeKind, host: IpAddr, port: u16) -> Option<String> {
        let addr = SocketAddr::new(host, port);
        let mut stream = match timeout(self.timeout, TcpStream::connect(addr)).await {
            Ok(Ok(s)) => s,
            Ok(Err(e)) => {
                debug!("{}", ScanError::Probe { target: host, port, reason: e.to_string() });
                return None;
            }
            Err(_) => {
                debug!("{}", ScanError::Probe { target: host, port, reason: "连接超时".to_string() });
                return None;
            }
        };
        let mut buffer = [0u8; BANNER_MAX_SIZE];
        let timeout_ms = self.timeout.as_millis() as u64;
        match kind {
            ProbeKind::Rtsp => probe_rtsp(&mut stream, &mut buffer, timeout_ms).await,
            ProbeKind::Mqtt => probe_mqtt(&mut stream, &mut buffer, timeout_ms).await,
            _ => probe_banner(&mut stream, &mut buffer, timeout_ms).await,
        }
    }
}

fn resolve_protocol(kind: ProbeKind, port: u16, banner: &str) -> Protocol {
    let by_port = protocol_for_port(port);
    if kind == ProbeKind::Http {
        // HEAD 得到的是 HTTP 头，Server 等字段里的 UPnP/FTP 字样不改变协议，只看状态行
        let status_line = banner.trim_start().to_ascii_lowercase();
        if status_line.starts_with("rtsp/") {
            return Protocol::Rtsp;
        }
        if status_line.starts_with("sip/2.0") {
            return Protocol::Sip;
        }
        return if by_port.is_web() || by_port == Protocol::Other {
            web_protocol(port)
        } else {
            by_port
        };
    }
    match protocol_from_banner(banner) {
        None => by_port,
        Some(p) if p.is_web() => {
            if by_port.is_web() || by_port == Protocol::Other {
                web_protocol(port)
            } else {
                by_port
            }
        }
        Some(p) => p,
    }
}

fn web_protocol(port: u16) -> Protocol {
    if is_tls_port(port) {
        Protocol::Https
    } else {
        Protocol::Http
    }
}

async fn read_with_timeout(
    stream: &mut TcpStream,
    buffer: &mut [u8],
    timeout_ms: u64,
) -> std::io::Result<usize> {
    let start = std::time::Instant::now();
    let timeout_duration = Duration::from_millis(timeout_ms);
    let mut total_read = match timeout(timeout_duration, stream.read(buffer)).await {
        Ok(Ok(0)) => return Ok(0),
        Ok(Ok(n)) => n,
        Ok(Err(e)) => return Err(e),
        Err(_) => {
            return Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "timed out",
            ))
        }
    };

    while total_read < buffer.len() {
        if start.elapsed() >= timeout_duration {
            break;
        }
        match timeout(
            Duration::from_millis(200),
            stream.read(&mut buffer[total_read..]),
        )
        .await
        {
            Ok(Ok(n)) if n > 0 => total_read += n,
            _ => break,
        }
    }

    Ok(total_read)
}

async fn write_with_timeout(stream: &mut TcpStream, payload: &[u8], timeout_ms: u64) -> bool {
    timeout(Duration::from_millis(timeout_ms), stream.write_all(payload))
        .await
        .map(|r| r.is_ok())
        .unwrap_or(false)
}

pub async fn probe_banner(
    stream: &mut TcpStream,
    buffer: &mut [u8],
    timeout_ms: u64,
) -> Option<String> {
    match read_with_timeout(stream, buffer, timeout_ms).await {
        Ok(n) if n > 0 => {
            if buffer[0] == 0xff {
                return Some("Telnet (Negotiation)".to_string());
            }
            Some(String::from_utf8_lossy(&buffer[..n]).into_owned())
        }
        _ => None,
    }
}

pub async fn probe_rtsp(
    stream: &mut TcpStream,
    buffer: &mut [u8],
    timeout_ms: u64,
) -> Option<String> {
    let rtsp_req = b"OPTIONS * RTSP/1.0\r\nCSeq: 1\r\n\r\n";
    if !write_with_timeout(stream, rtsp_req, timeout_ms).await {
        return None;
    }
    if let Ok(n) = read_with_timeout(stream, buffer, timeout_ms).await {
        let s = String::from_utf8_lossy(&buffer[..n]);
        if s.contains("RTSP/") {
            return Some(s.into_owned());
        }
    }
    None
}

/// MQTT 3.1.1 CONNECT（clean session，无用户名密码）。
/// CONNACK 返回码 0 表示允许匿名接入，4/5 表示需要认证。
pub async fn probe_mqtt(
    stream: &mut TcpStream,
    buffer: &mut [u8],
    timeout_ms: u64,
) -> Option<String> {
    let mqtt_connect = [
        0x10, 0x0c, 0x00, 0x04, b'M', b'Q', b'T', b'T', 0x04, 0x02, 0x00, 0x3c, 0x00, 0x00,
    ];
    if !write_with_timeout(stream, &mqtt_connect, timeout_ms).await {
        return None;
    }
    match read_with_timeout(stream, buffer, timeout_ms).await {
        Ok(n) if n >= 4 && buffer[0] == 0x20 && buffer[1] == 0x02 => {
            let banner = match buffer[3] {
                0x00 => "MQTT 3.1.1 (anonymous access)".to_string(),
                0x04 | 0x05 => format!("MQTT 3.1.1 (auth required, code {})", buffer[3]),
                code => format!("MQTT 3.1.1 (CONNACK code {})", code),
            };
            Some(banner)
        }
        _ => None,
    }
}

pub fn clean_banner(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut last_was_space = false;
    for c in s.chars() {
        let c = if c == '\n' || c == '\r' || c == '\t' { ' ' } else { c };
        if c == ' ' {
            if !last_was_space {
                result.push(c);
                last_was_space = true;
            }
        } else if c.is_ascii_graphic() {
            result.push(c);
            last_was_space = false;
        }
    }
    result.trim().to_string()
}

pub fn truncate_banner(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Severity;
    use crate::scanner::http::build_client;
    use crate::scanner::test_support::{spawn_http_server, HttpBehavior};
    use tokio::net::TcpListener;

    fn prober() -> ServiceProber {
        let client = build_client(Duration::from_secs(2), false).unwrap();
        ServiceProber::new(client, vec![80, 8080], Duration::from_millis(1500))
    }

    async fn one_shot_server(reply: &'static [u8]) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            if let Ok((mut stream, _)) = listener.accept().await {
                let mut buf = [0u8; 64];
                // 主动推送 banner 的服务不等待请求
                if !reply.starts_with(b"SSH-") {
                    let _ = stream.read(&mut buf).await;
                }
                let _ = stream.write_all(reply).await;
                tokio::time::sleep(Duration::from_millis(300)).await;
            }
        });
        addr
    }

    #[test]
    fn test_clean_and_truncate() {
        assert_eq!(clean_banner("220 \r\n  FTP\x00 ready\t"), "220 FTP ready");
        let long = "a".repeat(600);
        assert_eq!(truncate_banner(&long, BANNER_MAX_SIZE).len(), 512);
        assert_eq!(truncate_banner("héllo", 2), "h");
    }

    #[test]
    fn test_probe_kind_selection() {
        assert_eq!(ProbeKind::for_port(8080, &[8080]), ProbeKind::Http);
        assert_eq!(ProbeKind::for_port(443, &[]), ProbeKind::Http);
        assert_eq!(ProbeKind::for_port(554, &[80]), ProbeKind::Rtsp);
        assert_eq!(ProbeKind::for_port(1883, &[80]), ProbeKind::Mqtt);
        assert_eq!(ProbeKind::for_port(23, &[80]), ProbeKind::Banner);
    }

    #[test]
    fn test_static_record() {
        let record = ServiceProber::static_record(1883);
        assert_eq!(record.service_name, "mqtt");
        assert_eq!(record.risk_tag, Severity::High);
        assert!(record.banner.is_empty());
    }

    #[tokio::test]
    async fn test_mqtt_anonymous_and_auth_required() {
        let anon = one_shot_server(&[0x20, 0x02, 0x00, 0x00]).await;
        let record = prober()
            .probe_with(ProbeKind::Mqtt, anon.ip(), anon.port())
            .await;
        assert_eq!(record.service_name, "mqtt");
        assert!(record.banner.contains("anonymous"));

        let auth = one_shot_server(&[0x20, 0x02, 0x00, 0x05]).await;
        let record = prober()
            .probe_with(ProbeKind::Mqtt, auth.ip(), auth.port())
            .await;
        assert!(record.banner.contains("auth required"));
    }

    #[tokio::test]
    async fn test_passive_banner() {
        let addr = one_shot_server(b"SSH-2.0-dropbear_2019.78\r\n").await;
        let record = prober()
            .probe_with(ProbeKind::Banner, addr.ip(), addr.port())
            .await;
        assert_eq!(record.service_name, "ssh");
        assert_eq!(record.banner, "SSH-2.0-dropbear_2019.78");
    }

    #[tokio::test]
    async fn test_http_head_probe() {
        let mut behavior = HttpBehavior::accepting(&[], "");
        behavior.server_header = Some("lighttpd/1.4.35".to_string());
        let fixture = spawn_http_server(behavior).await;
        let record = prober()
            .probe_with(ProbeKind::Http, fixture.addr.ip(), fixture.addr.port())
            .await;
        assert_eq!(record.service_name, "http");
        assert!(record.banner.starts_with("HTTP/1.1 401"));
        assert!(record.banner.contains("lighttpd/1.4.35"));
    }

    #[test]
    fn test_http_status_line_decides_web_protocol() {
        let upnp_server = "HTTP/1.1 200 OK server: Linux/2.x UPnP/1.0 Avtech/1.0";
        assert_eq!(resolve_protocol(ProbeKind::Http, 80, upnp_server), Protocol::Http);
        assert_eq!(
            resolve_protocol(ProbeKind::Http, 8443, "HTTP/1.1 200 OK server: vsftpd-web"),
            Protocol::Https
        );
        assert_eq!(resolve_protocol(ProbeKind::Http, 80, ""), Protocol::Http);
        assert_eq!(
            resolve_protocol(ProbeKind::Http, 8080, "RTSP/1.0 200 OK"),
            Protocol::Rtsp
        );
        assert_eq!(
            resolve_protocol(ProbeKind::Http, 8080, "SIP/2.0 200 OK"),
            Protocol::Sip
        );
        // 非 HTTP 探测仍按 banner 关键字识别
        assert_eq!(
            resolve_protocol(ProbeKind::Banner, 49152, "upnp/1.0 ready"),
            Protocol::Upnp
        );
    }

    #[tokio::test]
    async fn test_upnp_server_header_on_web_port_stays_http() {
        let mut behavior = HttpBehavior::accepting(&[], "");
        behavior.server_header = Some("Linux/2.x UPnP/1.0 Avtech/1.0".to_string());
        let fixture = spawn_http_server(behavior).await;
        let port = fixture.addr.port();
        let client = build_client(Duration::from_secs(2), false).unwrap();
        let prober = ServiceProber::new(client, vec![port], Duration::from_millis(1500));

        let record = prober.probe(fixture.addr.ip(), port).await;
        assert!(record.banner.contains("UPnP/1.0"));
        assert_eq!(record.service_name, "http");
        assert_eq!(record.risk_tag, Protocol::Http.risk());
    }
}
