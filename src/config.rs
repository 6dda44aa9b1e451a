use crate::models::SearchType;
use crate::scanner::constants::*;
use crate::scanner::dicts::{
    default_admin_keywords, default_credentials, default_login_keywords, default_paths,
    load_keywords, Credential,
};
use anyhow::{Context, Result};
use clap::Parser;
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug, Clone)]
#[command(name = "iot-sentinel")]
#[command(version)]
#[command(about = "iot-sentinel - IoT 设备发现与安全检测", long_about = None)]
#[command(after_help = "警告：本工具只允许在取得授权的前提下用于内部资产摸排、安全评估等合法场景。禁止对未授权目标进行扫描。")]
pub struct Cli {
    /// CIDR / 地址范围 / 单个地址，或 index-search 模式下的搜索语句
    #[arg(value_name = "QUERY")]
    pub query: String,
    #[arg(short = 's', long, value_enum, default_value = "explicit-range")]
    pub search_type: SearchType,
    #[arg(short = 'm', long, default_value_t = DEFAULT_MAX_DEVICES)]
    pub max_devices: usize,
    #[arg(short, long, value_name = "PORTS")]
    pub ports: Option<String>,
    #[arg(long, value_name = "PORTS")]
    pub web_ports: Option<String>,
    /// 端口连接超时 (毫秒)
    #[arg(short, long, default_value_t = DEFAULT_CONNECT_TIMEOUT_MS)]
    pub timeout: u64,
    /// 服务探测超时 (毫秒)
    #[arg(long, default_value_t = DEFAULT_SERVICE_TIMEOUT_MS)]
    pub service_timeout: u64,
    /// HTTP 请求超时 (秒)
    #[arg(long, default_value_t = DEFAULT_HTTP_TIMEOUT_SECS)]
    pub http_timeout: u64,
    /// 单台设备的扫描时限 (秒)
    #[arg(long, default_value_t = DEFAULT_DEVICE_TIMEOUT_SECS)]
    pub device_timeout: u64,
    /// 凭据检测截止时间 (秒)
    #[arg(long, default_value_t = DEFAULT_CREDENTIAL_DEADLINE_SECS)]
    pub cred_deadline: u64,
    /// 设备间隔 (毫秒)，0 表示不等待
    #[arg(long, default_value_t = DEFAULT_INTER_DEVICE_DELAY_MS)]
    pub delay: u64,
    #[arg(long)]
    pub no_port_scan: bool,
    #[arg(long)]
    pub no_cred_test: bool,
    #[arg(long)]
    pub no_vuln_scan: bool,
    #[arg(long)]
    pub no_service_detect: bool,
    #[arg(long, env = "SHODAN_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,
    #[arg(long, value_name = "FILE")]
    pub signatures: Option<PathBuf>,
    #[arg(long, value_name = "FILE")]
    pub admin_keywords: Option<PathBuf>,
    #[arg(long, value_name = "FILE")]
    pub login_keywords: Option<PathBuf>,
    #[arg(long)]
    pub json: bool,
    #[arg(short = 'o', long, value_name = "FILE")]
    pub output_json: Option<PathBuf>,
    #[arg(long, value_name = "FILE")]
    pub output_markdown: Option<PathBuf>,
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// 每个阶段的开关，默认全部开启
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanOptions {
    pub port_scanning: bool,
    pub credential_testing: bool,
    pub vulnerability_scanning: bool,
    pub service_detection: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            port_scanning: true,
            credential_testing: true,
            vulnerability_scanning: true,
            service_detection: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScanRequest {
    pub search_type: SearchType,
    pub query: String,
    pub max_devices: usize,
    pub options: ScanOptions,
}

impl ScanRequest {
    pub fn new(search_type: SearchType, query: &str) -> Self {
        Self {
            search_type,
            query: query.to_string(),
            max_devices: DEFAULT_MAX_DEVICES,
            options: ScanOptions::default(),
        }
    }

    pub fn from_cli(cli: &Cli) -> Self {
        Self {
            search_type: cli.search_type,
            query: cli.query.clone(),
            max_devices: cli.max_devices,
            options: ScanOptions {
                port_scanning: !cli.no_port_scan,
                credential_testing: !cli.no_cred_test,
                vulnerability_scanning: !cli.no_vuln_scan,
                service_detection: !cli.no_service_detect,
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScanConfig {
    pub search_api_key: Option<String>,
    pub scan_ports: Vec<u16>,
    pub web_ports: Vec<u16>,
    pub http_fingerprint_ports: Vec<u16>,
    pub connect_timeout: Duration,
    pub service_timeout: Duration,
    pub http_timeout: Duration,
    pub port_concurrency: usize,
    pub credential_concurrency: usize,
    pub max_credential_findings: usize,
    pub credential_deadline: Duration,
    pub credentials: Vec<Credential>,
    pub credential_paths: Vec<String>,
    pub admin_keywords: Vec<String>,
    pub login_keywords: Vec<String>,
    pub signatures_path: Option<PathBuf>,
    pub max_addresses: usize,
    pub device_timeout: Duration,
    pub inter_device_delay: Duration,
    pub show_progress: bool,
    pub json_output: bool,
    pub output_file: Option<PathBuf>,
    pub output_markdown: Option<PathBuf>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            search_api_key: None,
            scan_ports: DEFAULT_SCAN_PORTS.to_vec(),
            web_ports: DEFAULT_WEB_PORTS.to_vec(),
            http_fingerprint_ports: HTTP_FINGERPRINT_PORTS.to_vec(),
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            service_timeout: Duration::from_millis(DEFAULT_SERVICE_TIMEOUT_MS),
            http_timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
            port_concurrency: DEFAULT_PORT_CONCURRENCY,
            credential_concurrency: DEFAULT_CREDENTIAL_CONCURRENCY,
            max_credential_findings: DEFAULT_MAX_CREDENTIAL_FINDINGS,
            credential_deadline: Duration::from_secs(DEFAULT_CREDENTIAL_DEADLINE_SECS),
            credentials: default_credentials(),
            credential_paths: default_paths(),
            admin_keywords: default_admin_keywords(),
            login_keywords: default_login_keywords(),
            signatures_path: None,
            max_addresses: DEFAULT_MAX_ADDRESSES,
            device_timeout: Duration::from_secs(DEFAULT_DEVICE_TIMEOUT_SECS),
            inter_device_delay: Duration::from_millis(DEFAULT_INTER_DEVICE_DELAY_MS),
            show_progress: false,
            json_output: false,
            output_file: None,
            output_markdown: None,
        }
    }
}

impl ScanConfig {
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        let mut config = ScanConfig::default();

        if let Some(p) = &cli.ports {
            config.scan_ports = parse_ports(p)?;
        }
        if let Some(p) = &cli.web_ports {
            config.web_ports = parse_ports(p)?;
        }
        if let Some(path) = &cli.admin_keywords {
            config.admin_keywords = load_keywords(path).context("无法加载管理页关键字文件")?;
        }
        if let Some(path) = &cli.login_keywords {
            config.login_keywords = load_keywords(path).context("无法加载登录页关键字文件")?;
        }

        config.search_api_key = cli
            .api_key
            .as_ref()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty());
        config.connect_timeout = Duration::from_millis(cli.timeout.max(1));
        config.service_timeout = Duration::from_millis(cli.service_timeout.max(1));
        config.http_timeout = Duration::from_secs(cli.http_timeout.max(1));
        config.device_timeout = Duration::from_secs(cli.device_timeout.max(1));
        config.credential_deadline = Duration::from_secs(cli.cred_deadline);
        config.inter_device_delay = Duration::from_millis(cli.delay);
        config.signatures_path = cli.signatures.clone();
        // 只有 --json 输出到 stdout 时关闭进度条；-o 输出到文件时保留
        config.json_output = cli.json;
        config.output_file = cli.output_json.clone();
        config.output_markdown = cli.output_markdown.clone();
        config.show_progress = !cli.json;
        Ok(config)
    }
}

pub fn parse_ports(port_str: &str) -> Result<Vec<u16>> {
    let mut ports = HashSet::new();
    for part in port_str.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        if let Some((start, end)) = part.split_once('-') {
            let start: u16 = start.trim().parse().context("解析端口范围起始值失败")?;
            let end: u16 = end.trim().parse().context("解析端口范围结束值失败")?;
            if start > end {
                anyhow::bail!("无效的端口范围: {}-{} (起始端口不能大于结束端口)", start, end);
            }
            ports.extend(start..=end);
        } else {
            let p: u16 = part.parse().context("解析端口失败")?;
            ports.insert(p);
        }
    }
    if ports.is_empty() {
        anyhow::bail!("端口列表为空");
    }
    let mut sorted_ports: Vec<u16> = ports.into_iter().collect();
    sorted_ports.sort();
    Ok(sorted_ports)
}
