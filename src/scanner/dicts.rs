use std::path::Path;

use crate::error::{Result, ScanError};

pub const DEFAULT_CREDENTIALS: &[(&str, &str)] = &[
    ("admin", "admin"),
    ("admin", "password"),
    ("admin", "1234"),
    ("admin", "12345"),
    ("admin", ""),
    ("admin", "admin123"),
    ("root", "root"),
    ("root", "admin"),
    ("root", "12345"),
    ("user", "user"),
    ("guest", "guest"),
    ("support", "support"),
];

pub const DEFAULT_PATHS: &[&str] = &["/", "/admin", "/login", "/cgi-bin/"];

const DEFAULT_ADMIN_KEYWORDS: &str = include_str!("../admin_keywords.txt");
const DEFAULT_LOGIN_KEYWORDS: &str = include_str!("../login_keywords.txt");

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub username: String,
    pub password: String,
}

impl Credential {
    pub fn new(username: &str, password: &str) -> Self {
        Self {
            username: username.to_string(),
            password: password.to_string(),
        }
    }
}

pub fn default_credentials() -> Vec<Credential> {
    DEFAULT_CREDENTIALS
        .iter()
        .map(|(u, p)| Credential::new(u, p))
        .collect()
}

pub fn default_paths() -> Vec<String> {
    DEFAULT_PATHS.iter().map(|p| p.to_string()).collect()
}

/// 一行一个关键字，忽略空行和 # 注释，统一转小写
pub fn parse_keywords(text: &str) -> Vec<String> {
    let mut keywords: Vec<String> = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let kw = line.to_lowercase();
        if !keywords.contains(&kw) {
            keywords.push(kw);
        }
    }
    keywords
}

pub fn default_admin_keywords() -> Vec<String> {
    parse_keywords(DEFAULT_ADMIN_KEYWORDS)
}

pub fn default_login_keywords() -> Vec<String> {
    parse_keywords(DEFAULT_LOGIN_KEYWORDS)
}

pub fn load_keywords(path: &Path) -> Result<Vec<String>> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| ScanError::Configuration(format!("无法读取关键字文件 {:?}: {}", path, e)))?;
    let keywords = parse_keywords(&text);
    if keywords.is_empty() {
        return Err(ScanError::Configuration(format!(
            "关键字文件 {:?} 为空",
            path
        )));
    }
    Ok(keywords)
}
