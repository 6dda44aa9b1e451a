use crate::models::DeviceType;
use aho_corasick::{AhoCorasick, AhoCorasickBuilder};
use serde::de::Error as SerdeError;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use tracing::{error, info};

const DEFAULT_SIGNATURES: &str = include_str!("../../device_signatures.json");

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSignature {
    pub device_type: DeviceType,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub ports: Vec<u16>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeywordHit {
    pub signature: usize,
    pub keyword: String,
}

/// 设备签名库，条目顺序即识别优先级
#[derive(Debug, Clone)]
pub struct SignatureDatabase {
    signatures: Vec<DeviceSignature>,
    ac: Option<AhoCorasick>,
    // 自动机中第 i 个模式属于哪条签名
    owners: Vec<usize>,
    patterns: Vec<String>,
}

impl SignatureDatabase {
    /// 优先加载外部签名文件，失败时回退到内置签名库
    pub fn load(path: Option<&Path>) -> SignatureDatabase {
        let Some(p) = path else {
            return Self::load_default();
        };
        match fs::read_to_string(p) {
            Ok(content) => match Self::from_json(&content) {
                Ok(db) => {
                    info!("已加载外部签名库: {:?} ({} 条)", p, db.len());
                    db
                }
                Err(e) => {
                    error!("解析签名文件失败: {}, 将使用内置签名库", e);
                    Self::load_default()
                }
            },
            Err(e) => {
                error!("无法读取签名文件 {:?}: {}, 将使用内置签名库", p, e);
                Self::load_default()
            }
        }
    }

    pub fn load_default() -> SignatureDatabase {
        match Self::from_json(DEFAULT_SIGNATURES) {
            Ok(db) => db,
            Err(e) => {
                error!("内置签名库解析失败: {}", e);
                SignatureDatabase {
                    signatures: Vec::new(),
                    ac: None,
                    owners: Vec::new(),
                    patterns: Vec::new(),
                }
            }
        }
    }

    pub fn from_json(json: &str) -> Result<SignatureDatabase, serde_json::Error> {
        let signatures: Vec<DeviceSignature> = serde_json::from_str(json)?;

        let mut patterns = Vec::new();
        let mut owners = Vec::new();
        for (idx, sig) in signatures.iter().enumerate() {
            for kw in &sig.keywords {
                let kw = kw.trim();
                if !kw.is_empty() {
                    patterns.push(kw.to_lowercase());
                    owners.push(idx);
                }
            }
        }

        let ac = if patterns.is_empty() {
            None
        } else {
            Some(
                AhoCorasickBuilder::new()
                    .ascii_case_insensitive(true)
                    .build(&patterns)
                    .map_err(|e| serde_json::Error::custom(e.to_string()))?,
            )
        };

        Ok(SignatureDatabase {
            signatures,
            ac,
            owners,
            patterns,
        })
    }

    pub fn signatures(&self) -> &[DeviceSignature] {
        &self.signatures
    }

    pub fn len(&self) -> usize {
        self.signatures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }

    /// 文本中命中的关键字，每条签名只报告第一次命中
    pub fn keyword_hits(&self, text: &str) -> Vec<KeywordHit> {
        let Some(ac) = &self.ac else {
            return Vec::new();
        };
        let mut hits: Vec<KeywordHit> = Vec::new();
        for mat in ac.find_overlapping_iter(text) {
            let pattern = mat.pattern().as_usize();
            let signature = self.owners[pattern];
            if hits.iter().any(|h| h.signature == signature) {
                continue;
            }
            hits.push(KeywordHit {
                signature,
                keyword: self.patterns[pattern].clone(),
            });
        }
        hits
    }
}
