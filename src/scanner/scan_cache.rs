use crate::models::DeviceType;
use crate::scanner::port_probe::PortState;
use std::collections::HashMap;
use std::net::IpAddr;
use tracing::debug;

/// 设备指纹缓存条目，连同当时探测到的开放端口一起保存，供凭据检测复用
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    pub device_type: DeviceType,
    pub confidence: u8,
    pub open_ports: Vec<u16>,
    pub evidence: Vec<String>,
}

/// 单次扫描内的缓存。
///
/// 由 `ScanPipeline::run` 创建，以 `&mut` 在各阶段之间传递，扫描结束即丢弃。
/// 并发阶段只读取快照，写入统一在编排流程中完成，因此不需要锁。
#[derive(Debug, Default)]
pub struct ScanCache {
    ports: HashMap<(IpAddr, u16), PortState>,
    fingerprints: HashMap<IpAddr, Fingerprint>,
    stats: CacheStats,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub total_queries: u64,
    pub hits: u64,
    pub misses: u64,
    pub total_writes: u64,
    pub current_entries: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        if self.total_queries == 0 {
            0.0
        } else {
            (self.hits as f64 / self.total_queries as f64) * 100.0
        }
    }

    pub fn format(&self) -> String {
        format!(
            "查询: {} | 命中: {} ({:.1}%) | 未命中: {} | 写入: {} | 当前条目: {}",
            self.total_queries,
            self.hits,
            self.hit_rate(),
            self.misses,
            self.total_writes,
            self.current_entries
        )
    }
}

impl ScanCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn port_state(&mut self, ip: IpAddr, port: u16) -> Option<PortState> {
        self.stats.total_queries += 1;
        match self.ports.get(&(ip, port)) {
            Some(state) => {
                debug!("缓存命中: {}:{}", ip, port);
                self.stats.hits += 1;
                Some(*state)
            }
            None => {
                self.stats.misses += 1;
                None
            }
        }
    }

    /// 不计入统计的只读查询，用于并发阶段前拆分已知/未知端口
    pub fn peek_port(&self, ip: IpAddr, port: u16) -> Option<PortState> {
        self.ports.get(&(ip, port)).copied()
    }

    pub fn record_port(&mut self, ip: IpAddr, port: u16, state: PortState) {
        self.stats.total_writes += 1;
        self.ports.insert((ip, port), state);
        debug!("缓存写入: {}:{} {:?}", ip, port, state);
        self.refresh_entries();
    }

    pub fn fingerprint(&mut self, ip: IpAddr) -> Option<Fingerprint> {
        self.stats.total_queries += 1;
        match self.fingerprints.get(&ip) {
            Some(fp) => {
                self.stats.hits += 1;
                Some(fp.clone())
            }
            None => {
                self.stats.misses += 1;
                None
            }
        }
    }

    pub fn record_fingerprint(&mut self, ip: IpAddr, fingerprint: Fingerprint) {
        self.stats.total_writes += 1;
        self.fingerprints.insert(ip, fingerprint);
        self.refresh_entries();
    }

    /// 已缓存的开放端口（升序）
    pub fn open_ports(&self, ip: IpAddr) -> Vec<u16> {
        let mut ports: Vec<u16> = self
            .ports
            .iter()
            .filter(|((addr, _), state)| *addr == ip && **state == PortState::Open)
            .map(|((_, port), _)| *port)
            .collect();
        ports.sort_unstable();
        ports
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    fn refresh_entries(&mut self) {
        self.stats.current_entries = self.ports.len() + self.fingerprints.len();
    }
}
