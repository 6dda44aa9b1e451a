//! iot-sentinel：IoT 设备发现与安全检测。
//!
//! 入口是 [`scanner::ScanPipeline`]：解析目标地址空间，逐台完成端口探测、
//! 服务识别、设备指纹、默认凭据检测和漏洞评估，最后汇总为 [`models::FleetScanResult`]。

pub mod config;
pub mod error;
pub mod models;
pub mod output;
pub mod scanner;
pub mod search;
pub mod target;
