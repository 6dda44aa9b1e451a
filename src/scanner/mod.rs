pub mod constants;
pub mod credentials;
pub mod dicts;
pub mod fingerprint;
pub mod http;
pub mod port_probe;
pub mod probes;
pub mod risk;
pub mod scan_cache;
pub mod service_map;
pub mod signatures;
pub mod vuln;
#[cfg(test)]
pub(crate) mod test_support;

use crate::config::{ScanConfig, ScanOptions, ScanRequest};
use crate::error::{Result, ScanError};
use crate::models::{DeviceScanResult, FleetScanResult, ScanMetadata, Target};
use crate::search::{HostSearch, ShodanSearch};
use crate::target::AddressSpaceResolver;
use chrono::Utc;
use credentials::{CredentialProbe, CredentialSettings, PageKeywords};
use fingerprint::DeviceFingerprinter;
use futures::FutureExt;
use indicatif::{ProgressBar, ProgressStyle};
use port_probe::{Connector, PortProbe, TcpConnector};
use probes::ServiceProber;
use scan_cache::{CacheStats, ScanCache};
use signatures::SignatureDatabase;
use std::any::Any;
use std::net::IpAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use vuln::VulnerabilityAssessor;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub devices_scanned: usize,
    pub devices_failed: usize,
    pub credential_probe_runs: usize,
    pub credential_probe_skips: usize,
    pub cache: CacheStats,
}

/// 单次扫描中各阶段共用的组件
struct Stages {
    port_probe: PortProbe,
    prober: ServiceProber,
    fingerprinter: DeviceFingerprinter,
    credentials: CredentialProbe,
    assessor: VulnerabilityAssessor,
    scan_ports: Vec<u16>,
    web_ports: Vec<u16>,
}

impl Stages {
    /// 单台设备的完整流程，各阶段严格按顺序执行
    async fn scan_device(
        &self,
        cache: &mut ScanCache,
        stats: &mut PipelineStats,
        ip: IpAddr,
        options: &ScanOptions,
    ) -> DeviceScanResult {
        let start = Instant::now();
        let mut target = Target::new(ip);

        let open_ports = if options.port_scanning {
            self.port_probe.scan(cache, ip, &self.scan_ports).await
        } else {
            Vec::new()
        };
        debug!("{} 开放端口: {:?}", ip, open_ports);

        for &port in &open_ports {
            let record = if options.service_detection {
                self.prober.probe(ip, port).await
            } else {
                ServiceProber::static_record(port)
            };
            target.services.push(record);
        }

        let fingerprint = self.fingerprinter.classify(cache, &target).await;
        target.device_type = fingerprint.device_type;
        target.confidence = fingerprint.confidence;
        target.evidence.extend(fingerprint.evidence.iter().cloned());

        let findings = if options.credential_testing {
            // 直接复用端口探测阶段写入缓存的结果，不再重新连接
            let cached_open = cache.open_ports(ip);
            let has_web = cached_open.iter().any(|p| self.web_ports.contains(p));
            if has_web {
                stats.credential_probe_runs += 1;
                self.credentials.test(ip, &cached_open).await
            } else {
                stats.credential_probe_skips += 1;
                Vec::new()
            }
        } else {
            Vec::new()
        };

        let vulnerabilities = self
            .assessor
            .assess(&target, &findings, options.vulnerability_scanning)
            .await;
        let risk_level = risk::device_risk(&vulnerabilities);

        info!(
            "[*] {} -> {} ({}%), {} 个服务, {} 个漏洞, 风险 {}",
            ip,
            target.device_type,
            target.confidence,
            target.services.len(),
            vulnerabilities.len(),
            risk_level
        );

        DeviceScanResult {
            services: target.services.clone(),
            target,
            vulnerabilities,
            credential_findings: findings,
            risk_level,
            scan_duration_ms: start.elapsed().as_millis() as u64,
            scan_error: None,
        }
    }
}

pub struct ScanPipeline {
    config: ScanConfig,
    connector: Arc<dyn Connector>,
    host_search: Option<Arc<dyn HostSearch>>,
    signatures: Arc<SignatureDatabase>,
    stats: PipelineStats,
}

impl ScanPipeline {
    pub fn new(config: ScanConfig) -> Result<Self> {
        let host_search: Option<Arc<dyn HostSearch>> = match &config.search_api_key {
            Some(key) => Some(Arc::new(ShodanSearch::new(key, config.http_timeout)?)),
            None => None,
        };
        let signatures = Arc::new(SignatureDatabase::load(config.signatures_path.as_deref()));
        Ok(Self {
            config,
            connector: Arc::new(TcpConnector),
            host_search,
            signatures,
            stats: PipelineStats::default(),
        })
    }

    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = connector;
        self
    }

    pub fn with_host_search(mut self, host_search: Arc<dyn HostSearch>) -> Self {
        self.host_search = Some(host_search);
        self
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    fn build_stages(&self) -> Result<Stages> {
        let cfg = &self.config;
        let client = http::build_client(cfg.http_timeout, false)
            .map_err(|e| ScanError::Configuration(format!("HTTP 客户端初始化失败: {}", e)))?;
        // 凭据检测必须看到原始的 401/302，指纹识别则要跟随首页跳转
        let fingerprint_client = http::build_client(cfg.http_timeout, true)
            .map_err(|e| ScanError::Configuration(format!("HTTP 客户端初始化失败: {}", e)))?;

        Ok(Stages {
            port_probe: PortProbe::new(
                self.connector.clone(),
                cfg.connect_timeout,
                cfg.port_concurrency,
            ),
            prober: ServiceProber::new(client.clone(), cfg.web_ports.clone(), cfg.service_timeout),
            fingerprinter: DeviceFingerprinter::new(
                self.signatures.clone(),
                fingerprint_client,
                cfg.http_fingerprint_ports.clone(),
            ),
            credentials: CredentialProbe::new(
                client.clone(),
                PageKeywords {
                    admin: cfg.admin_keywords.clone(),
                    login: cfg.login_keywords.clone(),
                },
                CredentialSettings {
                    credentials: cfg.credentials.clone(),
                    paths: cfg.credential_paths.clone(),
                    web_ports: cfg.web_ports.clone(),
                    max_findings: cfg.max_credential_findings,
                    deadline: cfg.credential_deadline,
                    concurrency: cfg.credential_concurrency,
                },
            ),
            assessor: VulnerabilityAssessor::new(client, cfg.web_ports.clone(), cfg.service_timeout),
            scan_ports: cfg.scan_ports.clone(),
            web_ports: cfg.web_ports.clone(),
        })
    }

    /// 解析目标并逐台扫描。
    ///
    /// 单台设备的失败（包括超过 `device_timeout`）只记录在该设备的 `scan_error` 上；
    /// 只有解析失败或所有设备都失败时才返回错误。
    pub async fn run(&mut self, request: &ScanRequest) -> Result<FleetScanResult> {
        self.stats = PipelineStats::default();

        let mut resolver = AddressSpaceResolver::new(self.config.max_addresses);
        if let Some(search) = &self.host_search {
            resolver = resolver.with_host_search(search.clone());
        }
        let addresses = resolver.resolve(request.search_type, &request.query).await?;
        let addresses: Vec<IpAddr> = addresses.into_iter().take(request.max_devices).collect();
        if addresses.is_empty() {
            return Err(ScanError::NoTargets);
        }

        let stages = self.build_stages()?;
        let mut cache = ScanCache::new();
        let pb = self.progress_bar(addresses.len());

        let mut device_results = Vec::with_capacity(addresses.len());
        for (idx, &ip) in addresses.iter().enumerate() {
            if idx > 0 {
                self.pause().await;
            }
            if let Some(pb) = &pb {
                pb.set_message(ip.to_string());
            }

            let start = Instant::now();
            let scan = AssertUnwindSafe(stages.scan_device(
                &mut cache,
                &mut self.stats,
                ip,
                &request.options,
            ))
            .catch_unwind();
            let outcome = match tokio::time::timeout(self.config.device_timeout, scan).await {
                Ok(Ok(result)) => Ok(result),
                Ok(Err(panic)) => Err(ScanError::Pipeline {
                    target: ip,
                    reason: format!("扫描阶段异常退出: {}", panic_message(&*panic)),
                }),
                Err(_) => Err(ScanError::Pipeline {
                    target: ip,
                    reason: format!("超过设备扫描时限 {:?}", self.config.device_timeout),
                }),
            };
            let result = match outcome {
                Ok(result) => {
                    self.stats.devices_scanned += 1;
                    result
                }
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    warn!("{}", err);
                    self.stats.devices_failed += 1;
                    DeviceScanResult::failed(
                        Target::new(ip),
                        err.to_string(),
                        start.elapsed().as_millis() as u64,
                    )
                }
            };
            device_results.push(result);

            if let Some(pb) = &pb {
                pb.inc(1);
            }
        }

        if let Some(pb) = pb {
            pb.finish_and_clear();
        }

        self.stats.cache = cache.stats().clone();
        debug!("扫描缓存统计: {}", self.stats.cache.format());

        if device_results.iter().all(|r| r.scan_error.is_some()) {
            return Err(ScanError::NoDevicesProcessed {
                attempted: device_results.len(),
            });
        }

        let statistics = risk::fleet_statistics(&device_results);
        Ok(FleetScanResult {
            device_results,
            statistics,
            metadata: ScanMetadata {
                search_type: request.search_type,
                query: request.query.clone(),
                timestamp: Utc::now(),
            },
        })
    }

    async fn pause(&self) {
        let delay = self.config.inter_device_delay;
        if delay.is_zero() {
            return;
        }
        let jitter = rand::random::<u64>() % (constants::INTER_DEVICE_JITTER_MS + 1);
        tokio::time::sleep(delay + Duration::from_millis(jitter)).await;
    }

    fn progress_bar(&self, total: usize) -> Option<ProgressBar> {
        if !self.config.show_progress {
            return None;
        }
        let pb = ProgressBar::new(total as u64);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")
        {
            pb.set_style(style.progress_chars("#>-"));
        }
        pb.enable_steady_tick(Duration::from_millis(100));
        Some(pb)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
