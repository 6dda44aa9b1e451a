use crate::models::{CredentialFinding, Severity, Target, Vulnerability};
use crate::scanner::http::{base_url, headers_text};
use crate::scanner::probes::clean_banner;
use crate::scanner::service_map::Protocol;
use regex::Regex;
use reqwest::Client;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::debug;

struct Advisory {
    protocol: Protocol,
    vuln_type: &'static str,
    severity: Severity,
    description: &'static str,
    impact: &'static str,
    remediation: &'static str,
}

const ADVISORIES: &[Advisory] = &[
    Advisory {
        protocol: Protocol::Mqtt,
        vuln_type: "MQTT Security Issue",
        severity: Severity::High,
        description: "Plaintext MQTT broker reachable; anonymous clients may publish or subscribe to device topics",
        impact: "Attackers can read telemetry and inject commands into connected devices",
        remediation: "Require client authentication, enable TLS on 8883 and restrict topic ACLs",
    },
    Advisory {
        protocol: Protocol::MqttTls,
        vuln_type: "MQTT Broker Exposed",
        severity: Severity::Low,
        description: "TLS-protected MQTT broker is reachable from the scanning network",
        impact: "Broker becomes a target for credential guessing and protocol attacks",
        remediation: "Limit broker exposure to trusted networks",
    },
    Advisory {
        protocol: Protocol::Telnet,
        vuln_type: "Insecure Telnet Service",
        severity: Severity::High,
        description: "Telnet transmits credentials and sessions in cleartext",
        impact: "Credential capture and full device takeover; common botnet entry point",
        remediation: "Disable Telnet and use SSH for remote administration",
    },
    Advisory {
        protocol: Protocol::Ftp,
        vuln_type: "Unencrypted FTP Service",
        severity: Severity::Medium,
        description: "FTP service transmits credentials and files in cleartext",
        impact: "Credential capture and unauthorized file access",
        remediation: "Disable FTP or replace it with SFTP/FTPS",
    },
    Advisory {
        protocol: Protocol::Rtsp,
        vuln_type: "Exposed RTSP Stream",
        severity: Severity::Medium,
        description: "RTSP media service is reachable and may serve video without authentication",
        impact: "Unauthorized viewing of camera streams",
        remediation: "Enable RTSP authentication and restrict access to the streaming port",
    },
    Advisory {
        protocol: Protocol::Coap,
        vuln_type: "CoAP Service Exposed",
        severity: Severity::Medium,
        description: "CoAP endpoint is reachable without transport security",
        impact: "Resource enumeration, device control and amplification abuse",
        remediation: "Enable DTLS and restrict CoAP to the local network",
    },
    Advisory {
        protocol: Protocol::Upnp,
        vuln_type: "UPnP Service Exposed",
        severity: Severity::Medium,
        description: "UPnP service is reachable and discloses device details",
        impact: "Information disclosure and unauthorized port-mapping changes",
        remediation: "Disable UPnP where not required",
    },
    Advisory {
        protocol: Protocol::Modbus,
        vuln_type: "Unauthenticated Modbus Access",
        severity: Severity::High,
        description: "Modbus/TCP has no authentication; any client can read and write registers",
        impact: "Manipulation of industrial process values and equipment state",
        remediation: "Isolate Modbus devices behind a firewall or industrial DMZ",
    },
    Advisory {
        protocol: Protocol::Tr069,
        vuln_type: "TR-069 Management Interface Exposed",
        severity: Severity::High,
        description: "CWMP (TR-069) management port is reachable",
        impact: "Remote configuration changes and known CWMP exploits",
        remediation: "Restrict TR-069 to the provider's ACS addresses",
    },
    Advisory {
        protocol: Protocol::Smb,
        vuln_type: "SMB Service Exposed",
        severity: Severity::Medium,
        description: "SMB file sharing service is reachable",
        impact: "Share enumeration, credential attacks and wormable SMB exploits",
        remediation: "Disable SMBv1 and restrict SMB to trusted hosts",
    },
    Advisory {
        protocol: Protocol::Http,
        vuln_type: "Unencrypted Web Interface",
        severity: Severity::Low,
        description: "Web management interface served over plaintext HTTP",
        impact: "Credentials and session cookies can be intercepted",
        remediation: "Serve the management interface over HTTPS only",
    },
];

// 协议标识本身带版本号（HTTP/1.1、RTSP/1.0），不是固件版本
const PROTOCOL_TOKENS: &[&str] = &["http", "https", "rtsp", "sip", "mqtt", "upnp", "ssh", "ftp"];

fn version_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r"(?i)\b(?:firmware|fw|version|ver|v)[\s:/_-]*(\d+\.\d+(?:\.\d+){0,3})")
            .expect("Invalid Version Regex")
    })
}

fn product_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r"([A-Za-z][A-Za-z0-9-]+)[/_](\d+\.\d+(?:\.\d+)*)").expect("Invalid Product Regex")
    })
}

/// 从 banner / 响应头中提取版本字符串
pub fn extract_versions(text: &str) -> Vec<String> {
    let mut versions: Vec<String> = Vec::new();
    for caps in product_regex().captures_iter(text) {
        let product = &caps[1];
        if PROTOCOL_TOKENS.contains(&product.to_lowercase().as_str()) {
            continue;
        }
        let v = format!("{} {}", product, &caps[2]);
        if !versions.contains(&v) {
            versions.push(v);
        }
    }
    for caps in version_regex().captures_iter(text) {
        let number = &caps[1];
        if versions.iter().any(|v| v.ends_with(number)) {
            continue;
        }
        let v = format!("version {}", number);
        if !versions.contains(&v) {
            versions.push(v);
        }
    }
    versions
}

pub fn credential_vulnerabilities(findings: &[CredentialFinding]) -> Vec<Vulnerability> {
    findings
        .iter()
        .map(|f| Vulnerability {
            vuln_type: "Default Credentials".to_string(),
            severity: Severity::Critical,
            description: format!(
                "Web interface on port {} accepts default credentials {}/{} at {}",
                f.port,
                f.username,
                if f.password.is_empty() { "<empty>" } else { &f.password },
                f.path
            ),
            impact: "Full administrative control of the device".to_string(),
            remediation: "Change the default password and disable unused accounts".to_string(),
            related_service: Some(format!("http:{}", f.port)),
        })
        .collect()
}

/// 按协议查静态通告表，每个协议每台设备最多一条
pub fn protocol_advisories(target: &Target) -> Vec<Vulnerability> {
    let mut seen: Vec<Protocol> = Vec::new();
    let mut vulns = Vec::new();
    for service in &target.services {
        let protocol = Protocol::from_name(&service.service_name);
        if seen.contains(&protocol) {
            continue;
        }
        let Some(advisory) = ADVISORIES.iter().find(|a| a.protocol == protocol) else {
            continue;
        };
        seen.push(protocol);

        let mut severity = advisory.severity;
        if protocol == Protocol::Mqtt && service.banner.contains("auth required") {
            severity = Severity::Medium;
        }
        vulns.push(Vulnerability {
            vuln_type: advisory.vuln_type.to_string(),
            severity,
            description: format!("{} (port {})", advisory.description, service.port),
            impact: advisory.impact.to_string(),
            remediation: advisory.remediation.to_string(),
            related_service: Some(protocol.name().to_string()),
        });
    }
    vulns
}

pub struct VulnerabilityAssessor {
    client: Client,
    web_ports: Vec<u16>,
    timeout: Duration,
}

impl VulnerabilityAssessor {
    pub fn new(client: Client, web_ports: Vec<u16>, timeout: Duration) -> Self {
        Self {
            client,
            web_ports,
            timeout,
        }
    }

    /// `run_checks` 为 false 时只映射已有的凭据发现，不做通告匹配与固件推断
    pub async fn assess(
        &self,
        target: &Target,
        findings: &[CredentialFinding],
        run_checks: bool,
    ) -> Vec<Vulnerability> {
        let mut vulns = credential_vulnerabilities(findings);
        if !run_checks {
            return vulns;
        }
        vulns.extend(protocol_advisories(target));
        if let Some(v) = self.firmware_heuristic(target).await {
            vulns.push(v);
        }
        vulns
    }

    pub async fn firmware_heuristic(&self, target: &Target) -> Option<Vulnerability> {
        let mut versions: Vec<String> = Vec::new();
        for service in &target.services {
            for v in extract_versions(&service.banner) {
                if !versions.contains(&v) {
                    versions.push(v);
                }
            }
        }

        if versions.is_empty() {
            // 唯一允许的补充探测：对第一个尚无 banner 的 Web 端口做一次 HEAD
            let web = target
                .services
                .iter()
                .find(|s| self.web_ports.contains(&s.port) || Protocol::from_name(&s.service_name).is_web())?;
            if !web.banner.is_empty() {
                return None;
            }
            let url = format!("{}/", base_url(target.address, web.port));
            let resp = match self.client.head(&url).timeout(self.timeout).send().await {
                Ok(r) => r,
                Err(e) => {
                    debug!("固件探测 HEAD {} 失败: {}", url, e);
                    return None;
                }
            };
            versions = extract_versions(&clean_banner(&headers_text(resp.status(), resp.headers())));
        }

        if versions.is_empty() {
            return None;
        }
        Some(Vulnerability {
            vuln_type: "Potentially Outdated Firmware".to_string(),
            severity: Severity::Medium,
            description: format!("Version strings observed: {}", versions.join(", ")),
            impact: "Old firmware often carries publicly known vulnerabilities".to_string(),
            remediation: "Verify the version against vendor advisories and update the firmware".to_string(),
            related_service: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ServiceRecord, Transport};
    use crate::scanner::http::build_client;
    use crate::scanner::probes::ServiceProber;
    use crate::scanner::test_support::{spawn_http_server, HttpBehavior};
    use chrono::Utc;
    use std::sync::atomic::Ordering;

    fn assessor(web_ports: Vec<u16>) -> VulnerabilityAssessor {
        VulnerabilityAssessor::new(
            build_client(Duration::from_secs(2), false).unwrap(),
            web_ports,
            Duration::from_secs(2),
        )
    }

    fn service(port: u16, name: &str, banner: &str) -> ServiceRecord {
        ServiceRecord {
            port,
            transport: Transport::Tcp,
            service_name: name.to_string(),
            banner: banner.to_string(),
            risk_tag: Protocol::from_name(name).risk(),
        }
    }

    #[test]
    fn test_extract_versions() {
        let v = extract_versions("HTTP/1.1 200 OK server: lighttpd/1.4.35");
        assert_eq!(v, vec!["lighttpd 1.4.35".to_string()]);

        let v = extract_versions("RTSP/1.0 200 OK Server: Firmware V5.5.0 build 170725");
        assert_eq!(v, vec!["version 5.5.0".to_string()]);

        assert_eq!(
            extract_versions("SSH-2.0-dropbear_2019.78"),
            vec!["dropbear 2019.78".to_string()]
        );
        assert!(extract_versions("MQTT 3.1.1 (anonymous access)").is_empty());
        assert!(extract_versions("").is_empty());
    }

    #[test]
    fn test_credential_mapping() {
        let finding = CredentialFinding {
            username: "admin".to_string(),
            password: "admin".to_string(),
            path: "/".to_string(),
            port: 80,
            evidence_text: "dashboard".to_string(),
            discovered_at: Utc::now(),
        };
        let vulns = credential_vulnerabilities(&[finding]);
        assert_eq!(vulns.len(), 1);
        assert_eq!(vulns[0].vuln_type, "Default Credentials");
        assert_eq!(vulns[0].severity, Severity::Critical);
    }

    #[test]
    fn test_advisories_one_per_protocol() {
        let mut target = Target::new("10.0.0.1".parse().unwrap());
        target.services = vec![
            ServiceProber::static_record(23),
            ServiceProber::static_record(2323),
            ServiceProber::static_record(1883),
            ServiceProber::static_record(443),
            ServiceProber::static_record(22),
        ];
        let vulns = protocol_advisories(&target);
        let types: Vec<&str> = vulns.iter().map(|v| v.vuln_type.as_str()).collect();
        assert_eq!(types, vec!["Insecure Telnet Service", "MQTT Security Issue"]);
        assert_eq!(vulns[1].severity, Severity::High);
    }

    #[test]
    fn test_mqtt_auth_required_is_medium() {
        let mut target = Target::new("10.0.0.1".parse().unwrap());
        target.services = vec![service(1883, "mqtt", "MQTT 3.1.1 (auth required, code 5)")];
        let vulns = protocol_advisories(&target);
        assert_eq!(vulns[0].severity, Severity::Medium);
    }

    #[tokio::test]
    async fn test_assess_without_checks_keeps_credentials_only() {
        let mut target = Target::new("10.0.0.1".parse().unwrap());
        target.services = vec![service(23, "telnet", "BusyBox v1.19.4 login:")];
        let finding = CredentialFinding {
            username: "root".to_string(),
            password: "root".to_string(),
            path: "/admin".to_string(),
            port: 80,
            evidence_text: String::new(),
            discovered_at: Utc::now(),
        };
        let a = assessor(vec![80]);
        let vulns = a.assess(&target, &[finding.clone()], false).await;
        assert_eq!(vulns.len(), 1);

        let vulns = a.assess(&target, &[finding], true).await;
        let types: Vec<&str> = vulns.iter().map(|v| v.vuln_type.as_str()).collect();
        assert_eq!(
            types,
            vec![
                "Default Credentials",
                "Insecure Telnet Service",
                "Potentially Outdated Firmware"
            ]
        );
    }

    #[tokio::test]
    async fn test_firmware_reprobe_only_when_banner_missing() {
        let mut behavior = HttpBehavior::accepting(&[], "");
        behavior.server_header = Some("GoAhead-Webs/2.5.0".to_string());
        let fixture = spawn_http_server(behavior).await;
        let port = fixture.addr.port();
        let a = assessor(vec![port]);

        let mut target = Target::new(fixture.addr.ip());
        target.services = vec![service(port, "http", "")];
        let vuln = a.firmware_heuristic(&target).await.unwrap();
        assert_eq!(vuln.severity, Severity::Medium);
        assert!(vuln.description.contains("GoAhead-Webs 2.5.0"));
        assert_eq!(fixture.requests.load(Ordering::SeqCst), 1);

        target.services = vec![service(port, "http", "HTTP/1.1 401 Unauthorized")];
        assert!(a.firmware_heuristic(&target).await.is_none());
        assert_eq!(fixture.requests.load(Ordering::SeqCst), 1);
    }
}
