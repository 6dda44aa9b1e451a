pub const HTTP_BODY_SIZE_LIMIT: usize = 1024 * 1024;

// 指纹识别只看首页前 64KB
pub const FINGERPRINT_BODY_LIMIT: usize = 64 * 1024;

pub const BANNER_MAX_SIZE: usize = 512;

pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 1000;
pub const DEFAULT_SERVICE_TIMEOUT_MS: u64 = 2000;
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 3;

pub const DEFAULT_PORT_CONCURRENCY: usize = 64;
pub const DEFAULT_CREDENTIAL_CONCURRENCY: usize = 16;
pub const DEFAULT_MAX_CREDENTIAL_FINDINGS: usize = 5;
pub const DEFAULT_CREDENTIAL_DEADLINE_SECS: u64 = 5;

pub const DEFAULT_MAX_DEVICES: usize = 50;
pub const DEFAULT_MAX_ADDRESSES: usize = 65_536;
pub const DEFAULT_DEVICE_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_INTER_DEVICE_DELAY_MS: u64 = 100;
pub const INTER_DEVICE_JITTER_MS: u64 = 50;

pub const HTTP_KEYWORD_SCORE: u8 = 25;
pub const HTTP_RESPONSE_SCORE: u8 = 10;
pub const PORT_MATCH_SCORE: u8 = 15;
pub const PORT_SCORE_CAP: u8 = 35;
pub const PROTOCOL_SCORE_CAP: u8 = 40;

pub const TLS_WEB_PORTS: [u16; 5] = [443, 8443, 4443, 9443, 5001];

pub const DEFAULT_SCAN_PORTS: [u16; 30] = [
    21, 22, 23, 80, 81, 443, 445, 502, 554, 1883, 1900, 2020, 2323, 5000, 5001, 5060, 5683, 7547,
    8000, 8008, 8080, 8081, 8123, 8443, 8554, 8883, 8888, 9100, 37777, 49152,
];

pub const DEFAULT_WEB_PORTS: [u16; 9] = [80, 81, 443, 8000, 8008, 8080, 8081, 8443, 8888];

pub const HTTP_FINGERPRINT_PORTS: [u16; 7] = [80, 443, 8080, 8443, 8000, 8081, 8888];

pub const IOT_PORT_ALLOWLIST: [u16; 15] = [
    23, 502, 554, 1883, 1900, 2323, 5000, 5683, 7547, 8554, 8883, 9100, 37777, 47808, 49152,
];

pub const IOT_KEYWORDS: [&str; 24] = [
    "camera", "webcam", "ipcam", "dvr", "nvr", "router", "mqtt", "iot", "hikvision", "dahua",
    "netgear", "tp-link", "smart", "thermostat", "printer", "plc", "scada", "gateway", "rtsp",
    "onvif", "upnp", "mikrotik", "ubiquiti", "axis",
];

pub fn is_tls_port(port: u16) -> bool {
    TLS_WEB_PORTS.contains(&port)
}
