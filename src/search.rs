//! 设备搜索引擎客户端。
//!
//! `index-search` 模式把查询委托给外部搜索服务，返回的记录只作为
//! 候选地址的来源，内容本身视为不可信证据。

use crate::error::{Result, ScanError};
use crate::scanner::http::build_client;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

pub const SHODAN_SEARCH_ENDPOINT: &str = "https://api.shodan.io/shodan/host/search";

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoLocation {
    pub country: Option<String>,
    pub city: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HostRecord {
    pub address: IpAddr,
    pub port: u16,
    pub product: String,
    pub banner: String,
    pub org: Option<String>,
    pub geolocation: Option<GeoLocation>,
}

#[async_trait]
pub trait HostSearch: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<HostRecord>>;
}

#[derive(Debug, Deserialize)]
struct ShodanResponse {
    #[serde(default)]
    matches: Vec<ShodanMatch>,
}

#[derive(Debug, Deserialize)]
struct ShodanMatch {
    ip_str: String,
    port: u16,
    #[serde(default)]
    product: Option<String>,
    #[serde(default)]
    data: Option<String>,
    #[serde(default)]
    org: Option<String>,
    #[serde(default)]
    location: Option<ShodanLocation>,
}

#[derive(Debug, Deserialize)]
struct ShodanLocation {
    country_name: Option<String>,
    city: Option<String>,
    latitude: Option<f64>,
    longitude: Option<f64>,
}

pub struct ShodanSearch {
    client: Client,
    api_key: String,
    endpoint: String,
}

impl ShodanSearch {
    pub fn new(api_key: &str, timeout: Duration) -> Result<Self> {
        let client = build_client(timeout, true)
            .map_err(|e| ScanError::Configuration(format!("HTTP 客户端初始化失败: {}", e)))?;
        Ok(Self {
            client,
            api_key: api_key.trim().to_string(),
            endpoint: SHODAN_SEARCH_ENDPOINT.to_string(),
        })
    }

    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = endpoint.to_string();
        self
    }
}

#[async_trait]
impl HostSearch for ShodanSearch {
    async fn search(&self, query: &str) -> Result<Vec<HostRecord>> {
        if self.api_key.is_empty() {
            return Err(ScanError::Configuration("缺少搜索服务 API Key".to_string()));
        }
        let url = Url::parse_with_params(
            &self.endpoint,
            &[("key", self.api_key.as_str()), ("query", query)],
        )
        .map_err(|e| ScanError::Configuration(format!("搜索服务地址无效: {}", e)))?;

        debug!("查询搜索服务: {}", query);
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ScanError::HostSearch(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ScanError::HostSearch(format!("HTTP {}", status)));
        }
        let body: ShodanResponse = resp
            .json()
            .await
            .map_err(|e| ScanError::HostSearch(format!("响应解析失败: {}", e)))?;

        let mut records = Vec::with_capacity(body.matches.len());
        for m in body.matches {
            let Ok(address) = m.ip_str.parse::<IpAddr>() else {
                debug!("忽略无效地址: {}", m.ip_str);
                continue;
            };
            records.push(HostRecord {
                address,
                port: m.port,
                product: m.product.unwrap_or_default(),
                banner: m.data.unwrap_or_default(),
                org: m.org,
                geolocation: m.location.map(|l| GeoLocation {
                    country: l.country_name,
                    city: l.city,
                    latitude: l.latitude,
                    longitude: l.longitude,
                }),
            });
        }
        info!("搜索服务返回 {} 条记录", records.len());
        Ok(records)
    }
}
