use crate::models::CredentialFinding;
use crate::scanner::constants::HTTP_BODY_SIZE_LIMIT;
use crate::scanner::dicts::Credential;
use crate::scanner::http::{base_url, read_body_limited};
use chrono::Utc;
use reqwest::{Client, StatusCode};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info};

/// 单次凭据尝试的结果。连接失败也只是一个结果值，不会中断整批检测。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Unreachable,
    Rejected(StatusCode),
    Unconfirmed,
    Confirmed(CredentialFinding),
}

/// 管理页/登录页关键字，用于区分“真正登录成功”和“返回 200 的登录页”
#[derive(Debug, Clone)]
pub struct PageKeywords {
    pub admin: Vec<String>,
    pub login: Vec<String>,
}

impl PageKeywords {
    /// 命中的管理关键字数减去命中的登录关键字数，以及命中的管理关键字
    pub fn score(&self, body: &str) -> (i32, Vec<&str>) {
        let lower = body.to_lowercase();
        let admin_hits: Vec<&str> = self
            .admin
            .iter()
            .filter(|kw| lower.contains(kw.as_str()))
            .map(|kw| kw.as_str())
            .collect();
        let login_hits = self
            .login
            .iter()
            .filter(|kw| lower.contains(kw.as_str()))
            .count();
        (admin_hits.len() as i32 - login_hits as i32, admin_hits)
    }
}

#[derive(Debug, Clone)]
pub struct CredentialSettings {
    pub credentials: Vec<Credential>,
    pub paths: Vec<String>,
    pub web_ports: Vec<u16>,
    pub max_findings: usize,
    pub deadline: Duration,
    pub concurrency: usize,
}

pub struct CredentialProbe {
    client: Client,
    keywords: Arc<PageKeywords>,
    settings: CredentialSettings,
}

impl CredentialProbe {
    pub fn new(client: Client, keywords: PageKeywords, settings: CredentialSettings) -> Self {
        Self {
            client,
            keywords: Arc::new(keywords),
            settings,
        }
    }

    /// 默认凭据检测：先同步尝试 admin/admin，未命中再在截止时间内并发尝试其余组合。
    /// 截止时间到达时仍在进行的请求被放弃，结果丢弃。
    pub async fn test(&self, host: IpAddr, open_ports: &[u16]) -> Vec<CredentialFinding> {
        let web_ports: Vec<u16> = open_ports
            .iter()
            .copied()
            .filter(|p| self.settings.web_ports.contains(p))
            .collect();
        let Some(&first_port) = web_ports.first() else {
            debug!("{} 无可用 Web 端口，跳过凭据检测", host);
            return Vec::new();
        };
        if self.settings.max_findings == 0 {
            return Vec::new();
        }

        let first = Credential::new("admin", "admin");
        if let AttemptOutcome::Confirmed(finding) =
            attempt(&self.client, &self.keywords, host, first_port, "/", &first).await
        {
            info!("[+] 默认凭据: {}:{} admin/admin", host, first_port);
            return vec![finding];
        }

        let mut combos = Vec::new();
        for &port in &web_ports {
            for path in &self.settings.paths {
                for cred in &self.settings.credentials {
                    if port == first_port && path == "/" && *cred == first {
                        continue;
                    }
                    combos.push((port, path.clone(), cred.clone()));
                }
            }
        }
        if combos.is_empty() {
            return Vec::new();
        }

        let deadline = Instant::now() + self.settings.deadline;
        let semaphore = Arc::new(Semaphore::new(self.settings.concurrency.max(1)));
        let (tx, mut rx) = mpsc::channel(combos.len());
        debug!("{} 并发凭据检测: {} 个组合", host, combos.len());

        for (port, path, cred) in combos {
            let tx = tx.clone();
            let semaphore = semaphore.clone();
            let client = self.client.clone();
            let keywords = self.keywords.clone();
            // 不保留 JoinHandle：截止后任务继续跑完，结果因通道关闭而丢弃
            tokio::spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return;
                };
                let outcome = attempt(&client, &keywords, host, port, &path, &cred).await;
                let _ = tx.send(outcome).await;
            });
        }
        drop(tx);

        let mut findings = Vec::new();
        loop {
            tokio::select! {
                msg = rx.recv() => match msg {
                    Some(AttemptOutcome::Confirmed(finding)) => {
                        info!(
                            "[+] 默认凭据: {}:{}{} {}/{}",
                            host, finding.port, finding.path, finding.username, finding.password
                        );
                        findings.push(finding);
                        if findings.len() >= self.settings.max_findings {
                            break;
                        }
                    }
                    Some(_) => {}
                    None => break,
                },
                _ = sleep_until(deadline) => {
                    debug!("{} 凭据检测到达截止时间，已收集 {} 条", host, findings.len());
                    break;
                }
            }
        }
        findings
    }
}

pub async fn attempt(
    client: &Client,
    keywords: &PageKeywords,
    host: IpAddr,
    port: u16,
    path: &str,
    cred: &Credential,
) -> AttemptOutcome {
    let url = format!("{}{}", base_url(host, port), path);
    let request = || {
        client
            .get(&url)
            .basic_auth(&cred.username, Some(&cred.password))
    };

    let status = match request().send().await {
        Ok(resp) => resp.status(),
        Err(e) => {
            debug!("凭据请求失败 {}: {}", url, e);
            return AttemptOutcome::Unreachable;
        }
    };
    if status != StatusCode::OK {
        return AttemptOutcome::Rejected(status);
    }

    // 二次确认：取回页面内容，用关键字判断是否真的进入了管理界面
    let mut resp = match request().send().await {
        Ok(resp) if resp.status() == StatusCode::OK => resp,
        Ok(_) => return AttemptOutcome::Unconfirmed,
        Err(_) => return AttemptOutcome::Unreachable,
    };
    let body = read_body_limited(&mut resp, HTTP_BODY_SIZE_LIMIT).await;
    let body = String::from_utf8_lossy(&body);
    let (score, admin_hits) = keywords.score(&body);
    if score <= 0 {
        return AttemptOutcome::Unconfirmed;
    }

    AttemptOutcome::Confirmed(CredentialFinding {
        username: cred.username.clone(),
        password: cred.password.clone(),
        path: path.to_string(),
        port,
        evidence_text: format!("HTTP 200, admin keywords: {}", admin_hits.join(", ")),
        discovered_at: Utc::now(),
    })
}
