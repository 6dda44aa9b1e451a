use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum SearchType {
    IndexSearch,
    LocalSubnet,
    ExplicitRange,
}

impl fmt::Display for SearchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SearchType::IndexSearch => "index-search",
            SearchType::LocalSubnet => "local-subnet",
            SearchType::ExplicitRange => "explicit-range",
        };
        f.write_str(s)
    }
}

/// 严重程度，声明顺序即比较顺序：low < medium < high < critical
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub const ALL: [Severity; 4] = [
        Severity::Critical,
        Severity::High,
        Severity::Medium,
        Severity::Low,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum DeviceType {
    Nvr,
    IpCamera,
    Router,
    IndustrialController,
    Printer,
    Nas,
    SmartTv,
    VoipPhone,
    SmartHub,
    #[default]
    Unknown,
}

impl DeviceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceType::Nvr => "nvr",
            DeviceType::IpCamera => "ip-camera",
            DeviceType::Router => "router",
            DeviceType::IndustrialController => "industrial-controller",
            DeviceType::Printer => "printer",
            DeviceType::Nas => "nas",
            DeviceType::SmartTv => "smart-tv",
            DeviceType::VoipPhone => "voip-phone",
            DeviceType::SmartHub => "smart-hub",
            DeviceType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    Tcp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceRecord {
    pub port: u16,
    pub transport: Transport,
    pub service_name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub banner: String,
    pub risk_tag: Severity,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Target {
    pub address: IpAddr,
    pub device_type: DeviceType,
    pub confidence: u8,
    pub services: Vec<ServiceRecord>,
    pub evidence: Vec<String>,
}

impl Target {
    pub fn new(address: IpAddr) -> Self {
        Self {
            address,
            device_type: DeviceType::Unknown,
            confidence: 0,
            services: Vec::new(),
            evidence: Vec::new(),
        }
    }

    pub fn open_ports(&self) -> Vec<u16> {
        self.services.iter().map(|s| s.port).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialFinding {
    pub username: String,
    pub password: String,
    pub path: String,
    pub port: u16,
    pub evidence_text: String,
    pub discovered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Vulnerability {
    #[serde(rename = "type")]
    pub vuln_type: String,
    pub severity: Severity,
    pub description: String,
    pub impact: String,
    pub remediation: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related_service: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceScanResult {
    pub target: Target,
    pub services: Vec<ServiceRecord>,
    pub vulnerabilities: Vec<Vulnerability>,
    pub credential_findings: Vec<CredentialFinding>,
    pub risk_level: Severity,
    pub scan_duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scan_error: Option<String>,
}

impl DeviceScanResult {
    /// 设备级失败：保留已经收集到的目标信息，只标注错误
    pub fn failed(target: Target, error: String, scan_duration_ms: u64) -> Self {
        Self {
            services: target.services.clone(),
            target,
            vulnerabilities: Vec::new(),
            credential_findings: Vec::new(),
            risk_level: Severity::Low,
            scan_duration_ms,
            scan_error: Some(error),
        }
    }

    pub fn is_vulnerable(&self) -> bool {
        !self.vulnerabilities.is_empty() || self.risk_level != Severity::Low
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FleetStatistics {
    pub by_device_type: BTreeMap<DeviceType, usize>,
    pub by_risk_level: BTreeMap<Severity, usize>,
    pub total_vulnerabilities: usize,
    pub devices_with_default_creds: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanMetadata {
    pub search_type: SearchType,
    pub query: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FleetScanResult {
    pub device_results: Vec<DeviceScanResult>,
    pub statistics: FleetStatistics,
    pub metadata: ScanMetadata,
}

impl FleetScanResult {
    pub fn vulnerable_devices(&self) -> Vec<&DeviceScanResult> {
        crate::scanner::risk::vulnerable_devices(&self.device_results)
    }
}
