use crate::models::{DeviceType, Target};
use crate::scanner::constants::*;
use crate::scanner::http::{base_url, extract_title, headers_text, read_body_limited};
use crate::scanner::scan_cache::{Fingerprint, ScanCache};
use crate::scanner::service_map::Protocol;
use crate::scanner::signatures::SignatureDatabase;
use futures::future::join_all;
use reqwest::Client;
use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::debug;

struct HttpEvidence {
    port: u16,
    text: String,
    title: Option<String>,
}

pub struct DeviceFingerprinter {
    signatures: Arc<SignatureDatabase>,
    client: Client,
    http_ports: Vec<u16>,
}

impl DeviceFingerprinter {
    /// `client` 应跟随重定向：设备首页常见 `/` -> `/login.html` 跳转，关键字在跳转后的页面里
    pub fn new(signatures: Arc<SignatureDatabase>, client: Client, http_ports: Vec<u16>) -> Self {
        Self {
            signatures,
            client,
            http_ports,
        }
    }

    /// 综合 HTTP 页面、开放端口与协议特征推断设备类型。
    /// 结果按主机缓存，同一次扫描内第二次调用不再发起任何请求。
    pub async fn classify(&self, cache: &mut ScanCache, target: &Target) -> Fingerprint {
        let host = target.address;
        if let Some(fp) = cache.fingerprint(host) {
            return fp;
        }

        let open_ports = target.open_ports();
        let mut evidence = Vec::new();

        let candidates: Vec<u16> = self
            .http_ports
            .iter()
            .copied()
            .filter(|p| open_ports.contains(p))
            .collect();
        let http = self.collect_http(host, &candidates).await;

        let mut texts: Vec<&str> = http.iter().map(|h| h.text.as_str()).collect();
        texts.extend(
            target
                .services
                .iter()
                .filter(|s| !s.banner.is_empty())
                .map(|s| s.banner.as_str()),
        );

        let mut keyword_sigs: HashSet<usize> = HashSet::new();
        for text in &texts {
            for hit in self.signatures.keyword_hits(text) {
                if keyword_sigs.insert(hit.signature) {
                    evidence.push(format!(
                        "keyword '{}' -> {}",
                        hit.keyword,
                        self.signatures.signatures()[hit.signature].device_type
                    ));
                }
            }
        }
        for h in &http {
            match &h.title {
                Some(title) => evidence.push(format!("web UI on port {}: {}", h.port, title)),
                None => evidence.push(format!("web UI on port {}", h.port)),
            }
        }

        let http_score = if !keyword_sigs.is_empty() {
            HTTP_KEYWORD_SCORE
        } else if !http.is_empty() {
            HTTP_RESPONSE_SCORE
        } else {
            0
        };

        let best_port_matches = self
            .signatures
            .signatures()
            .iter()
            .map(|sig| sig.ports.iter().filter(|p| open_ports.contains(p)).count())
            .max()
            .unwrap_or(0);
        let port_score = (best_port_matches as u32 * PORT_MATCH_SCORE as u32)
            .min(PORT_SCORE_CAP as u32) as u8;

        let protocols: HashSet<Protocol> = target
            .services
            .iter()
            .map(|s| Protocol::from_name(&s.service_name))
            .collect();
        let protocol_score = protocols
            .iter()
            .map(|p| p.presence_weight() as u32)
            .sum::<u32>()
            .min(PROTOCOL_SCORE_CAP as u32) as u8;

        let device_type = self
            .signatures
            .signatures()
            .iter()
            .enumerate()
            .find(|(idx, sig)| {
                keyword_sigs.contains(idx) || sig.ports.iter().any(|p| open_ports.contains(p))
            })
            .map(|(_, sig)| sig.device_type)
            .unwrap_or(DeviceType::Unknown);

        let confidence = (http_score as u32 + port_score as u32 + protocol_score as u32).min(100) as u8;
        debug!(
            "{} 指纹: {} (http {} / port {} / protocol {})",
            host, device_type, http_score, port_score, protocol_score
        );

        let fingerprint = Fingerprint {
            device_type,
            confidence,
            open_ports,
            evidence,
        };
        cache.record_fingerprint(host, fingerprint.clone());
        fingerprint
    }

    async fn collect_http(&self, host: IpAddr, ports: &[u16]) -> Vec<HttpEvidence> {
        let requests = ports.iter().map(|&port| {
            let client = &self.client;
            async move {
                let url = format!("{}/", base_url(host, port));
                let mut resp = match client.get(&url).send().await {
                    Ok(r) => r,
                    Err(e) => {
                        debug!("GET {} 失败: {}", url, e);
                        return None;
                    }
                };
                let mut text = headers_text(resp.status(), resp.headers());
                let body = read_body_limited(&mut resp, FINGERPRINT_BODY_LIMIT).await;
                let body = String::from_utf8_lossy(&body);
                let title = extract_title(&body);
                text.push_str("\r\n\r\n");
                text.push_str(&body);
                Some(HttpEvidence { port, text, title })
            }
        });
        join_all(requests).await.into_iter().flatten().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ServiceRecord, Severity, Transport};
    use crate::scanner::http::build_client;
    use crate::scanner::probes::ServiceProber;
    use crate::scanner::test_support::{spawn_http_server, HttpBehavior};
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn fingerprinter(http_ports: Vec<u16>) -> DeviceFingerprinter {
        let client = build_client(Duration::from_secs(2), true).unwrap();
        DeviceFingerprinter::new(
            Arc::new(SignatureDatabase::load_default()),
            client,
            http_ports,
        )
    }

    fn web_target(ip: IpAddr, ports: &[u16]) -> Target {
        let mut target = Target::new(ip);
        for &port in ports {
            target.services.push(ServiceRecord {
                port,
                transport: Transport::Tcp,
                service_name: "http".to_string(),
                banner: String::new(),
                risk_tag: Severity::Low,
            });
        }
        target
    }

    fn target_with(ip: &str, ports: &[u16]) -> Target {
        let mut target = Target::new(ip.parse().unwrap());
        target.services = ports.iter().map(|&p| ServiceProber::static_record(p)).collect();
        target
    }

    #[tokio::test]
    async fn test_mqtt_port_only_is_smart_hub() {
        let fp = fingerprinter(vec![]);
        let mut cache = ScanCache::new();
        let result = fp.classify(&mut cache, &target_with("10.0.0.2", &[1883])).await;
        assert_eq!(result.device_type, DeviceType::SmartHub);
        // 端口 15 + MQTT 协议 15
        assert_eq!(result.confidence, 30);
        assert_eq!(result.open_ports, vec![1883]);
    }

    #[tokio::test]
    async fn test_priority_order_and_caps() {
        let fp = fingerprinter(vec![]);
        let mut cache = ScanCache::new();
        let target = target_with("10.0.0.3", &[37777, 34567, 554, 8554, 2020, 1883, 5683]);
        let result = fp.classify(&mut cache, &target).await;
        assert_eq!(result.device_type, DeviceType::Nvr);
        // 端口上限 35 + 协议上限 40（rtsp 15 + onvif 10 + mqtt 15 + coap 15）
        assert_eq!(result.confidence, 75);
    }

    #[tokio::test]
    async fn test_no_evidence_is_unknown() {
        let fp = fingerprinter(vec![]);
        let mut cache = ScanCache::new();
        let result = fp.classify(&mut cache, &target_with("10.0.0.4", &[])).await;
        assert_eq!(result.device_type, DeviceType::Unknown);
        assert_eq!(result.confidence, 0);
    }

    #[tokio::test]
    async fn test_http_keyword_and_cache() {
        let mut behavior = HttpBehavior::accepting(&[], "");
        behavior.public_body = "<html><title>Hikvision Network Camera</title></html>".to_string();
        let fixture = spawn_http_server(behavior).await;
        let port = fixture.addr.port();

        let fp = fingerprinter(vec![port]);
        let mut cache = ScanCache::new();
        let mut target = Target::new(fixture.addr.ip());
        target.services.push(ServiceRecord {
            port,
            transport: Transport::Tcp,
            service_name: "http".to_string(),
            banner: String::new(),
            risk_tag: Severity::Low,
        });

        let first = fp.classify(&mut cache, &target).await;
        assert_eq!(first.device_type, DeviceType::IpCamera);
        assert_eq!(first.confidence, HTTP_KEYWORD_SCORE);
        assert!(first
            .evidence
            .iter()
            .any(|e| e.contains("Hikvision Network Camera")));
        assert_eq!(fixture.requests.load(Ordering::SeqCst), 1);

        let second = fp.classify(&mut cache, &target).await;
        assert_eq!(first, second);
        assert_eq!(fixture.requests.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_follows_root_redirect_for_keywords() {
        let mut behavior = HttpBehavior::accepting(&[], "");
        behavior.redirect_root = Some("/login.html".to_string());
        behavior.public_body = "<html><title>Hikvision Network Camera</title></html>".to_string();
        let fixture = spawn_http_server(behavior).await;
        let port = fixture.addr.port();

        let fp = fingerprinter(vec![port]);
        let mut cache = ScanCache::new();
        let result = fp.classify(&mut cache, &web_target(fixture.addr.ip(), &[port])).await;
        assert_eq!(result.device_type, DeviceType::IpCamera);
        assert_eq!(result.confidence, HTTP_KEYWORD_SCORE);
        // 跳转前后各一次请求
        assert_eq!(fixture.requests.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_http_ports_fetched_concurrently() {
        let delay = Duration::from_millis(800);
        let mut slow = HttpBehavior::accepting(&[], "");
        slow.response_delay = delay;
        let a = spawn_http_server(slow.clone()).await;
        let b = spawn_http_server(slow).await;
        let ports = [a.addr.port(), b.addr.port()];

        let fp = fingerprinter(ports.to_vec());
        let mut cache = ScanCache::new();
        let start = std::time::Instant::now();
        let result = fp.classify(&mut cache, &web_target(a.addr.ip(), &ports)).await;
        let elapsed = start.elapsed();

        assert_eq!(result.evidence.iter().filter(|e| e.starts_with("web UI on port")).count(), 2);
        assert!(elapsed >= delay);
        assert!(elapsed < delay * 2, "elapsed {:?}", elapsed);
    }
}
