// 测试夹具：可计数的假连接器、可控响应的本地 HTTP 服务
use crate::scanner::port_probe::{Connector, PortState};
use crate::search::{HostRecord, HostSearch};
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

#[derive(Default)]
pub struct FakeConnector {
    open: HashSet<SocketAddr>,
    slow: HashSet<IpAddr>,
    panicking: HashSet<IpAddr>,
    calls: AtomicUsize,
}

impl FakeConnector {
    pub fn with_open(open: &[(&str, u16)]) -> Self {
        Self {
            open: open
                .iter()
                .map(|(ip, port)| SocketAddr::new(ip.parse().unwrap(), *port))
                .collect(),
            ..Default::default()
        }
    }

    /// 对该地址的每次连接都挂起很久，用于触发设备级超时
    pub fn slow_host(mut self, ip: &str) -> Self {
        self.slow.insert(ip.parse().unwrap());
        self
    }

    /// 对该地址的连接直接 panic，模拟某个阶段的内部错误
    pub fn panicking_host(mut self, ip: &str) -> Self {
        self.panicking.insert(ip.parse().unwrap());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, addr: SocketAddr, _timeout: Duration) -> PortState {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.panicking.contains(&addr.ip()) {
            panic!("connector failure for {}", addr);
        }
        if self.slow.contains(&addr.ip()) {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        if self.open.contains(&addr) {
            PortState::Open
        } else {
            PortState::Closed
        }
    }
}

pub struct HttpFixture {
    pub addr: SocketAddr,
    pub requests: Arc<AtomicUsize>,
}

#[derive(Clone)]
pub struct HttpBehavior {
    /// 接受的 (用户名, 密码)
    pub accepted: Vec<(String, String)>,
    pub ok_body: String,
    pub public_body: String,
    pub server_header: Option<String>,
    /// 返回响应前的等待时间
    pub response_delay: Duration,
    /// 设置后对 `/` 返回 302 跳转到该路径
    pub redirect_root: Option<String>,
}

impl HttpBehavior {
    pub fn accepting(creds: &[(&str, &str)], ok_body: &str) -> Self {
        Self {
            accepted: creds
                .iter()
                .map(|(u, p)| (u.to_string(), p.to_string()))
                .collect(),
            ok_body: ok_body.to_string(),
            public_body: "<html><title>Authorization Required</title></html>".to_string(),
            server_header: None,
            response_delay: Duration::ZERO,
            redirect_root: None,
        }
    }
}

pub async fn spawn_http_server(behavior: HttpBehavior) -> HttpFixture {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let requests = Arc::new(AtomicUsize::new(0));
    let counter = requests.clone();
    let behavior = Arc::new(behavior);

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            let behavior = behavior.clone();
            let counter = counter.clone();
            tokio::spawn(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                let _ = handle(stream, &behavior).await;
            });
        }
    });

    HttpFixture { addr, requests }
}

async fn handle(mut stream: TcpStream, behavior: &HttpBehavior) -> std::io::Result<()> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    while !buf.windows(4).any(|w| w == b"\r\n\r\n") && buf.len() < 16 * 1024 {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    let request = String::from_utf8_lossy(&buf);
    let is_head = request.starts_with("HEAD ");
    let path = request.split_whitespace().nth(1).unwrap_or("/");

    if !behavior.response_delay.is_zero() {
        tokio::time::sleep(behavior.response_delay).await;
    }

    if let Some(location) = behavior.redirect_root.as_deref().filter(|_| path == "/") {
        let response = format!(
            "HTTP/1.1 302 Found\r\nLocation: {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
            location
        );
        stream.write_all(response.as_bytes()).await?;
        return stream.shutdown().await;
    }

    let credentials = request.lines().find_map(|line| {
        let (name, value) = line.split_once(':')?;
        if !name.eq_ignore_ascii_case("authorization") {
            return None;
        }
        let token = value.trim().strip_prefix("Basic ")?;
        let decoded = general_purpose::STANDARD.decode(token.trim()).ok()?;
        let decoded = String::from_utf8(decoded).ok()?;
        let (user, pass) = decoded.split_once(':')?;
        Some((user.to_string(), pass.to_string()))
    });

    let authorized = credentials
        .map(|c| behavior.accepted.contains(&c))
        .unwrap_or(false);

    let (status, body) = if authorized {
        ("200 OK", behavior.ok_body.as_str())
    } else {
        ("401 Unauthorized", behavior.public_body.as_str())
    };

    let mut response = format!(
        "HTTP/1.1 {}\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n",
        status,
        body.len()
    );
    if !authorized {
        response.push_str("WWW-Authenticate: Basic realm=\"device\"\r\n");
    }
    if let Some(server) = &behavior.server_header {
        response.push_str(&format!("Server: {}\r\n", server));
    }
    response.push_str("\r\n");
    if !is_head {
        response.push_str(body);
    }
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await
}

pub struct FakeHostSearch {
    pub records: Vec<HostRecord>,
}

impl FakeHostSearch {
    pub fn record(ip: &str, port: u16, product: &str) -> HostRecord {
        HostRecord {
            address: ip.parse().unwrap(),
            port,
            product: product.to_string(),
            banner: String::new(),
            org: None,
            geolocation: None,
        }
    }
}

#[async_trait]
impl HostSearch for FakeHostSearch {
    async fn search(&self, _query: &str) -> crate::error::Result<Vec<HostRecord>> {
        Ok(self.records.clone())
    }
}
