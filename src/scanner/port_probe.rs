use crate::scanner::scan_cache::ScanCache;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use socket2::Socket;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PortState {
    Open,
    Closed,
}

/// 建立连接的底层原语。超时、拒绝、其他错误一律视为 `Closed`，不重试。
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, addr: SocketAddr, timeout: Duration) -> PortState;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, addr: SocketAddr, connect_timeout: Duration) -> PortState {
        match timeout(connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => {
                // 大范围扫描时避免 TIME_WAIT 堆积
                if let Ok(std_stream) = stream.into_std() {
                    let socket = Socket::from(std_stream);
                    let _ = socket.set_linger(Some(Duration::from_secs(0)));
                }
                PortState::Open
            }
            Ok(Err(e)) => {
                debug!("连接失败 {}: {}", addr, e);
                PortState::Closed
            }
            Err(_) => {
                debug!("连接超时 {}", addr);
                PortState::Closed
            }
        }
    }
}

pub struct PortProbe {
    connector: Arc<dyn Connector>,
    timeout: Duration,
    concurrency: usize,
}

impl PortProbe {
    pub fn new(connector: Arc<dyn Connector>, timeout: Duration, concurrency: usize) -> Self {
        Self {
            connector,
            timeout,
            concurrency: concurrency.max(1),
        }
    }

    /// 单端口检测，同一次扫描内对同一 (host, port) 只连接一次
    pub async fn is_open(&self, cache: &mut ScanCache, host: IpAddr, port: u16) -> bool {
        if let Some(state) = cache.port_state(host, port) {
            return state == PortState::Open;
        }
        let state = self
            .connector
            .connect(SocketAddr::new(host, port), self.timeout)
            .await;
        cache.record_port(host, port, state);
        state == PortState::Open
    }

    /// 批量检测：未缓存的端口并发连接，结果在并发阶段结束后统一写入缓存。
    /// 返回开放端口，保持传入顺序。
    pub async fn scan(&self, cache: &mut ScanCache, host: IpAddr, ports: &[u16]) -> Vec<u16> {
        let mut pending = Vec::new();
        for &port in ports {
            if cache.port_state(host, port).is_none() && !pending.contains(&port) {
                pending.push(port);
            }
        }

        if !pending.is_empty() {
            debug!("{} 待探测端口: {}", host, pending.len());
            let connector = self.connector.as_ref();
            let connect_timeout = self.timeout;
            let results: Vec<(u16, PortState)> = stream::iter(pending)
                .map(|port| async move {
                    let state = connector
                        .connect(SocketAddr::new(host, port), connect_timeout)
                        .await;
                    (port, state)
                })
                .buffer_unordered(self.concurrency)
                .collect()
                .await;

            for (port, state) in results {
                cache.record_port(host, port, state);
            }
        }

        let mut open = Vec::new();
        for &port in ports {
            if cache.peek_port(host, port) == Some(PortState::Open) && !open.contains(&port) {
                open.push(port);
            }
        }
        open
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::test_support::FakeConnector;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_is_open_memoized_per_scan() {
        let connector = Arc::new(FakeConnector::with_open(&[("10.0.0.5", 80)]));
        let probe = PortProbe::new(connector.clone(), Duration::from_millis(100), 4);
        let mut cache = ScanCache::new();
        let host: IpAddr = "10.0.0.5".parse().unwrap();

        assert!(probe.is_open(&mut cache, host, 80).await);
        assert!(probe.is_open(&mut cache, host, 80).await);
        assert_eq!(connector.calls(), 1);

        assert!(!probe.is_open(&mut cache, host, 81).await);
        assert!(!probe.is_open(&mut cache, host, 81).await);
        assert_eq!(connector.calls(), 2);
    }

    #[tokio::test]
    async fn test_fresh_cache_connects_again() {
        let connector = Arc::new(FakeConnector::with_open(&[]));
        let probe = PortProbe::new(connector.clone(), Duration::from_millis(100), 4);
        let host: IpAddr = "10.0.0.5".parse().unwrap();

        probe.is_open(&mut ScanCache::new(), host, 22).await;
        probe.is_open(&mut ScanCache::new(), host, 22).await;
        assert_eq!(connector.calls(), 2);
    }

    #[tokio::test]
    async fn test_batch_scan_skips_cached_and_keeps_order() {
        let connector = Arc::new(FakeConnector::with_open(&[
            ("10.0.0.7", 8080),
            ("10.0.0.7", 23),
        ]));
        let probe = PortProbe::new(connector.clone(), Duration::from_millis(100), 8);
        let mut cache = ScanCache::new();
        let host: IpAddr = "10.0.0.7".parse().unwrap();

        assert!(probe.is_open(&mut cache, host, 23).await);
        let open = probe.scan(&mut cache, host, &[8080, 22, 23, 8080]).await;
        assert_eq!(open, vec![8080, 23]);
        // 23 已缓存，8080 去重
        assert_eq!(connector.calls(), 3);
    }

    #[tokio::test]
    async fn test_tcp_connector_loopback() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let open_addr = listener.local_addr().unwrap();

        let closed = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let closed_addr = closed.local_addr().unwrap();
        drop(closed);

        let connector = TcpConnector;
        assert_eq!(
            connector.connect(open_addr, Duration::from_secs(1)).await,
            PortState::Open
        );
        assert_eq!(
            connector.connect(closed_addr, Duration::from_secs(1)).await,
            PortState::Closed
        );
    }
}
