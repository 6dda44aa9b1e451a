use crate::error::{Result, ScanError};
use crate::models::SearchType;
use crate::scanner::constants::{IOT_KEYWORDS, IOT_PORT_ALLOWLIST};
use crate::search::{HostRecord, HostSearch};
use ipnet::{IpNet, Ipv4Net};
use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// 扫描目标解析：把搜索描述展开成有上限的地址列表
pub struct AddressSpaceResolver {
    host_search: Option<Arc<dyn HostSearch>>,
    max_addresses: usize,
}

impl AddressSpaceResolver {
    pub fn new(max_addresses: usize) -> Self {
        Self {
            host_search: None,
            max_addresses,
        }
    }

    pub fn with_host_search(mut self, host_search: Arc<dyn HostSearch>) -> Self {
        self.host_search = Some(host_search);
        self
    }

    pub async fn resolve(&self, search_type: SearchType, query: &str) -> Result<Vec<IpAddr>> {
        if query.trim().is_empty() {
            return Err(ScanError::Validation("查询为空".to_string()));
        }
        let addresses = match search_type {
            SearchType::IndexSearch => self.resolve_index(query).await?,
            SearchType::LocalSubnet | SearchType::ExplicitRange => {
                let mut out = AddressSink::new(self.max_addresses);
                for token in query.split(',') {
                    let cleaned = clean_input(token);
                    if cleaned.is_empty() {
                        continue;
                    }
                    expand_token(search_type, cleaned, &mut out)?;
                    if out.is_full() {
                        break;
                    }
                }
                out.finish(query)
            }
        };
        info!("[{}] {} -> {} 个地址", search_type, query, addresses.len());
        Ok(addresses)
    }

    async fn resolve_index(&self, query: &str) -> Result<Vec<IpAddr>> {
        let Some(search) = &self.host_search else {
            return Err(ScanError::Configuration(
                "index-search 需要搜索服务 API Key".to_string(),
            ));
        };
        let records = search.search(query.trim()).await?;
        let mut out = AddressSink::new(self.max_addresses);
        for record in records.iter().filter(|r| is_iot_candidate(r)) {
            out.push(record.address);
        }
        let kept = out.finish(query);
        debug!("搜索结果 {} 条，保留 IoT 候选 {} 个", records.len(), kept.len());
        Ok(kept)
    }
}

pub fn is_iot_candidate(record: &HostRecord) -> bool {
    if IOT_PORT_ALLOWLIST.contains(&record.port) {
        return true;
    }
    let text = format!("{} {}", record.product, record.banner).to_lowercase();
    IOT_KEYWORDS.iter().any(|kw| text.contains(kw))
}

/// 去重、保序、有上限的地址收集器
struct AddressSink {
    seen: HashSet<IpAddr>,
    addresses: Vec<IpAddr>,
    limit: usize,
    truncated: bool,
}

impl AddressSink {
    fn new(limit: usize) -> Self {
        Self {
            seen: HashSet::new(),
            addresses: Vec::new(),
            limit,
            truncated: false,
        }
    }

    fn is_full(&self) -> bool {
        self.addresses.len() >= self.limit
    }

    fn push(&mut self, ip: IpAddr) {
        if self.is_full() {
            if !self.seen.contains(&ip) {
                self.truncated = true;
            }
            return;
        }
        if self.seen.insert(ip) {
            self.addresses.push(ip);
        }
    }

    fn extend<I: Iterator<Item = IpAddr>>(&mut self, iter: I) {
        for ip in iter {
            self.push(ip);
            if self.truncated {
                break;
            }
        }
    }

    fn finish(self, query: &str) -> Vec<IpAddr> {
        if self.truncated {
            warn!(
                "目标 {} 超过上限，仅处理前 {} 个地址",
                query, self.limit
            );
        }
        self.addresses
    }
}

/// 清洗输入：去除 http/https 前缀及其后的路径
fn clean_input(input: &str) -> &str {
    let cleaned = input.trim();
    let lower = cleaned.to_lowercase();
    let stripped = if lower.starts_with("http://") {
        Some(&cleaned[7..])
    } else if lower.starts_with("https://") {
        Some(&cleaned[8..])
    } else {
        None
    };
    match stripped {
        Some(rest) => match rest.find('/') {
            Some(idx) => &rest[..idx],
            None => rest,
        },
        None => cleaned,
    }
}

fn expand_token(search_type: SearchType, token: &str, out: &mut AddressSink) -> Result<()> {
    if token.contains('/') {
        let net: IpNet = token
            .parse()
            .map_err(|_| ScanError::Validation(format!("无效的 CIDR: {}", token)))?;
        return expand_net(net, token, out);
    }

    if search_type == SearchType::LocalSubnet {
        // 本地网段模式下的单个 IPv4 地址扩展为所在 /24
        let ip: Ipv4Addr = token
            .parse()
            .map_err(|_| ScanError::Validation(format!("本地网段需要 CIDR 或 IPv4 地址: {}", token)))?;
        let net = Ipv4Net::new(ip, 24)
            .map_err(|e| ScanError::Validation(e.to_string()))?
            .trunc();
        return expand_net(IpNet::V4(net), token, out);
    }

    if let Some((start, end)) = token.split_once('-') {
        let (start, end) = (start.trim(), end.trim());
        let start_ip: IpAddr = start
            .parse()
            .map_err(|_| ScanError::Validation(format!("无效的起始地址: {}", token)))?;

        let end_ip = match end.parse::<IpAddr>() {
            Ok(ip) => ip,
            Err(_) => last_octet_end(start_ip, end)
                .ok_or_else(|| ScanError::Validation(format!("无效的地址范围: {}", token)))?,
        };

        let (IpAddr::V4(s), IpAddr::V4(e)) = (start_ip, end_ip) else {
            return Err(ScanError::Validation(format!(
                "地址范围仅支持 IPv4 且两端需同族: {}",
                token
            )));
        };
        let (s, e) = (u32::from(s), u32::from(e));
        if s > e {
            return Err(ScanError::Validation(format!(
                "无效的地址范围: {} (起始地址不能大于结束地址)",
                token
            )));
        }
        out.extend((s..=e).map(|i| IpAddr::V4(Ipv4Addr::from(i))));
        return Ok(());
    }

    let ip: IpAddr = token
        .parse()
        .map_err(|_| ScanError::Validation(format!("无效的目标地址: {}", token)))?;
    out.push(ip);
    Ok(())
}

// 192.168.1.10-20 形式的末段范围
fn last_octet_end(start: IpAddr, end: &str) -> Option<IpAddr> {
    let IpAddr::V4(s) = start else {
        return None;
    };
    let last: u8 = end.parse().ok()?;
    let o = s.octets();
    Some(IpAddr::V4(Ipv4Addr::new(o[0], o[1], o[2], last)))
}

fn expand_net(net: IpNet, token: &str, out: &mut AddressSink) -> Result<()> {
    match net {
        IpNet::V4(_) => {
            out.extend(net.hosts());
            Ok(())
        }
        IpNet::V6(v6) if v6.prefix_len() == 128 => {
            out.push(IpAddr::V6(v6.addr()));
            Ok(())
        }
        IpNet::V6(_) => Err(ScanError::Validation(format!(
            "IPv6 网段过大无法枚举: {}",
            token
        ))),
    }
}
