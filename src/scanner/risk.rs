use crate::models::{DeviceScanResult, FleetStatistics, Severity, Vulnerability};

/// 设备风险等级 = 漏洞中的最高严重程度，没有漏洞时为 low
pub fn device_risk(vulnerabilities: &[Vulnerability]) -> Severity {
    vulnerabilities
        .iter()
        .map(|v| v.severity)
        .max()
        .unwrap_or(Severity::Low)
}

pub fn fleet_statistics(results: &[DeviceScanResult]) -> FleetStatistics {
    let mut stats = FleetStatistics::default();
    for level in Severity::ALL {
        stats.by_risk_level.insert(level, 0);
    }
    for result in results {
        *stats
            .by_device_type
            .entry(result.target.device_type)
            .or_insert(0) += 1;
        *stats.by_risk_level.entry(result.risk_level).or_insert(0) += 1;
        stats.total_vulnerabilities += result.vulnerabilities.len();
        if !result.credential_findings.is_empty() {
            stats.devices_with_default_creds += 1;
        }
    }
    stats
}

pub fn vulnerable_devices(results: &[DeviceScanResult]) -> Vec<&DeviceScanResult> {
    results.iter().filter(|r| r.is_vulnerable()).collect()
}
