use crate::models::Severity;
use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Ftp,
    Ssh,
    Telnet,
    Http,
    Https,
    Smb,
    Modbus,
    Rtsp,
    Mqtt,
    MqttTls,
    Upnp,
    Onvif,
    Coap,
    Tr069,
    Sip,
    Jetdirect,
    DvrControl,
    Other,
}

impl Protocol {
    pub fn name(&self) -> &'static str {
        match self {
            Protocol::Ftp => "ftp",
            Protocol::Ssh => "ssh",
            Protocol::Telnet => "telnet",
            Protocol::Http => "http",
            Protocol::Https => "https",
            Protocol::Smb => "smb",
            Protocol::Modbus => "modbus",
            Protocol::Rtsp => "rtsp",
            Protocol::Mqtt => "mqtt",
            Protocol::MqttTls => "mqtt-tls",
            Protocol::Upnp => "upnp",
            Protocol::Onvif => "onvif",
            Protocol::Coap => "coap",
            Protocol::Tr069 => "tr-069",
            Protocol::Sip => "sip",
            Protocol::Jetdirect => "jetdirect",
            Protocol::DvrControl => "dvr-control",
            Protocol::Other => "unknown",
        }
    }

    pub fn from_name(name: &str) -> Protocol {
        match name {
            "ftp" => Protocol::Ftp,
            "ssh" => Protocol::Ssh,
            "telnet" => Protocol::Telnet,
            "http" => Protocol::Http,
            "https" => Protocol::Https,
            "smb" => Protocol::Smb,
            "modbus" => Protocol::Modbus,
            "rtsp" => Protocol::Rtsp,
            "mqtt" => Protocol::Mqtt,
            "mqtt-tls" => Protocol::MqttTls,
            "upnp" => Protocol::Upnp,
            "onvif" => Protocol::Onvif,
            "coap" => Protocol::Coap,
            "tr-069" => Protocol::Tr069,
            "sip" => Protocol::Sip,
            "jetdirect" => Protocol::Jetdirect,
            "dvr-control" => Protocol::DvrControl,
            _ => Protocol::Other,
        }
    }

    pub fn risk(&self) -> Severity {
        match self {
            Protocol::Telnet | Protocol::Mqtt | Protocol::Modbus | Protocol::Tr069 => Severity::High,
            Protocol::Ftp
            | Protocol::Rtsp
            | Protocol::Smb
            | Protocol::Upnp
            | Protocol::Onvif
            | Protocol::Coap
            | Protocol::Sip
            | Protocol::Jetdirect
            | Protocol::DvrControl => Severity::Medium,
            Protocol::Http
            | Protocol::Https
            | Protocol::Ssh
            | Protocol::MqttTls
            | Protocol::Other => Severity::Low,
        }
    }

    /// 设备指纹中“协议存在”一项的权重
    pub fn presence_weight(&self) -> u8 {
        match self {
            Protocol::Mqtt | Protocol::MqttTls | Protocol::Rtsp | Protocol::Coap => 15,
            Protocol::Onvif | Protocol::Upnp => 10,
            Protocol::Telnet => 5,
            _ => 0,
        }
    }

    pub fn is_web(&self) -> bool {
        matches!(self, Protocol::Http | Protocol::Https)
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

static TCP_SERVICES: OnceLock<HashMap<u16, Protocol>> = OnceLock::new();

fn init_tcp_services() -> HashMap<u16, Protocol> {
    let mut m = HashMap::new();
    m.insert(21, Protocol::Ftp);
    m.insert(22, Protocol::Ssh);
    m.insert(23, Protocol::Telnet);
    m.insert(2323, Protocol::Telnet);
    m.insert(80, Protocol::Http);
    m.insert(81, Protocol::Http);
    m.insert(8000, Protocol::Http);
    m.insert(8008, Protocol::Http);
    m.insert(8080, Protocol::Http);
    m.insert(8081, Protocol::Http);
    m.insert(8123, Protocol::Http);
    m.insert(8888, Protocol::Http);
    m.insert(5000, Protocol::Http);
    m.insert(443, Protocol::Https);
    m.insert(4443, Protocol::Https);
    m.insert(5001, Protocol::Https);
    m.insert(8443, Protocol::Https);
    m.insert(9443, Protocol::Https);
    m.insert(445, Protocol::Smb);
    m.insert(139, Protocol::Smb);
    m.insert(502, Protocol::Modbus);
    m.insert(554, Protocol::Rtsp);
    m.insert(8554, Protocol::Rtsp);
    m.insert(1883, Protocol::Mqtt);
    m.insert(8883, Protocol::MqttTls);
    m.insert(1900, Protocol::Upnp);
    m.insert(49152, Protocol::Upnp);
    m.insert(2020, Protocol::Onvif);
    m.insert(5683, Protocol::Coap);
    m.insert(7547, Protocol::Tr069);
    m.insert(5060, Protocol::Sip);
    m.insert(5061, Protocol::Sip);
    m.insert(9100, Protocol::Jetdirect);
    m.insert(37777, Protocol::DvrControl);
    m.insert(34567, Protocol::DvrControl);
    m
}

pub fn protocol_for_port(port: u16) -> Protocol {
    TCP_SERVICES
        .get_or_init(init_tcp_services)
        .get(&port)
        .copied()
        .unwrap_or(Protocol::Other)
}

// 顺序即优先级：ONVIF / UPnP 响应本身也是 HTTP 报文
const BANNER_KEYWORDS: &[(&str, Protocol)] = &[
    ("ssh-", Protocol::Ssh),
    ("rtsp/", Protocol::Rtsp),
    ("mqtt", Protocol::Mqtt),
    ("onvif", Protocol::Onvif),
    ("upnp", Protocol::Upnp),
    ("cwmp", Protocol::Tr069),
    ("coap", Protocol::Coap),
    ("modbus", Protocol::Modbus),
    ("sip/2.0", Protocol::Sip),
    ("ftp", Protocol::Ftp),
    ("telnet", Protocol::Telnet),
    ("login:", Protocol::Telnet),
    ("http/", Protocol::Http),
    ("server:", Protocol::Http),
];

pub fn protocol_from_banner(banner: &str) -> Option<Protocol> {
    if banner.is_empty() {
        return None;
    }
    let lower = banner.to_lowercase();
    BANNER_KEYWORDS
        .iter()
        .find(|(kw, _)| lower.contains(kw))
        .map(|(_, p)| *p)
}
