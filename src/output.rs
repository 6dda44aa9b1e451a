use crate::config::ScanConfig;
use crate::error::Result;
use crate::models::{DeviceScanResult, FleetScanResult, Severity};
use colored::*;
use std::fs::File;
use std::io::Write;
use std::path::Path;

fn severity_colored(severity: Severity) -> ColoredString {
    match severity {
        Severity::Critical => severity.as_str().red().bold(),
        Severity::High => severity.as_str().red(),
        Severity::Medium => severity.as_str().yellow(),
        Severity::Low => severity.as_str().green(),
    }
}

fn short_banner(banner: &str) -> String {
    if banner.chars().count() > 60 {
        let head: String = banner.chars().take(57).collect();
        format!("{}...", head)
    } else {
        banner.to_string()
    }
}

fn print_device(res: &DeviceScanResult) {
    let t = &res.target;
    println!(
        "\nScan result for {} ({}, {}%)  risk: {}",
        t.address.to_string().bold().blue(),
        t.device_type.to_string().yellow(),
        t.confidence,
        severity_colored(res.risk_level)
    );
    if let Some(err) = &res.scan_error {
        println!("  {} {}", "error:".red(), err);
        return;
    }
    println!("{}", "─".repeat(80).dimmed());
    println!(
        "{:<12} {:<16} {:<10} {}",
        "PORT".bold(),
        "SERVICE".bold(),
        "RISK".bold(),
        "BANNER".bold()
    );
    println!("{}", "─".repeat(80).dimmed());
    for s in &res.services {
        println!(
            "{:<12} {:<16} {:<10} {}",
            format!("{}/tcp", s.port),
            s.service_name,
            severity_colored(s.risk_tag),
            short_banner(&s.banner).dimmed()
        );
    }
    println!("{}", "─".repeat(80).dimmed());

    for c in &res.credential_findings {
        println!(
            "  {} {}:{} @ :{}{}",
            "[cred]".red().bold(),
            c.username,
            c.password,
            c.port,
            c.path
        );
    }
    for v in &res.vulnerabilities {
        println!("  [{}] {} - {}", severity_colored(v.severity), v.vuln_type, v.description);
    }
}

pub fn print_human_readable(fleet: &FleetScanResult, _config: &ScanConfig) {
    for res in &fleet.device_results {
        // 无开放服务且无错误的设备不展开
        if res.services.is_empty() && res.scan_error.is_none() && res.vulnerabilities.is_empty() {
            continue;
        }
        print_device(res);
    }

    let stats = &fleet.statistics;
    println!("\n{}", "Scan summary:".bold().underline());
    println!(
        "  Devices scanned: {}",
        fleet.device_results.len().to_string().cyan()
    );
    println!(
        "  Vulnerable devices: {}",
        fleet.vulnerable_devices().len().to_string().red()
    );
    println!(
        "  Vulnerabilities: {}",
        stats.total_vulnerabilities.to_string().yellow()
    );
    println!(
        "  Default credentials: {}",
        stats.devices_with_default_creds.to_string().red()
    );
    for sev in Severity::ALL.iter().rev() {
        let count = stats.by_risk_level.get(sev).copied().unwrap_or(0);
        println!("    {:<10} {}", severity_colored(*sev), count);
    }
    if !stats.by_device_type.is_empty() {
        println!("  Device types:");
        for (device_type, count) in &stats.by_device_type {
            println!("    {:<24} {}", device_type.to_string(), count);
        }
    }
}

/// 写入失败统一转换为 `ScanError::Io`
pub fn output_json(fleet: &FleetScanResult, config: &ScanConfig) -> Result<()> {
    if let Some(path) = &config.output_file {
        let file = File::create(path)?;
        let writer = std::io::BufWriter::new(file);
        serde_json::to_writer_pretty(writer, fleet).map_err(std::io::Error::from)?;
        eprintln!("\nJSON 结果已保存至: {:?}", path);
    } else {
        let stdout = std::io::stdout();
        let mut writer = std::io::BufWriter::new(stdout.lock());
        serde_json::to_writer_pretty(&mut writer, fleet).map_err(std::io::Error::from)?;
        writeln!(writer)?;
    }
    Ok(())
}

fn md_cell(s: &str) -> String {
    s.replace('|', "\\|").replace(['\r', '\n'], " ")
}

pub fn write_markdown<W: Write>(fleet: &FleetScanResult, out: &mut W) -> std::io::Result<()> {
    let stats = &fleet.statistics;
    writeln!(out, "# iot-sentinel 扫描报告")?;
    writeln!(out)?;
    writeln!(
        out,
        "**扫描模式**: {} (`{}`)",
        fleet.metadata.search_type,
        md_cell(&fleet.metadata.query)
    )?;
    writeln!(out, "**扫描时间**: {}", fleet.metadata.timestamp.to_rfc3339())?;
    writeln!(out, "**设备数**: {}", fleet.device_results.len())?;
    writeln!(out, "**存在风险的设备**: {}", fleet.vulnerable_devices().len())?;
    writeln!(out, "**漏洞总数**: {}", stats.total_vulnerabilities)?;
    writeln!(out, "**默认凭据设备**: {}", stats.devices_with_default_creds)?;
    writeln!(out)?;
    writeln!(out, "| Risk | Devices |")?;
    writeln!(out, "| :--- | :--- |")?;
    for sev in Severity::ALL.iter().rev() {
        let count = stats.by_risk_level.get(sev).copied().unwrap_or(0);
        writeln!(out, "| {} | {} |", sev, count)?;
    }
    writeln!(out)?;
    writeln!(out, "---")?;
    writeln!(out)?;

    for res in &fleet.device_results {
        let t = &res.target;
        writeln!(
            out,
            "## 设备: {} ({}, {}%)",
            t.address, t.device_type, t.confidence
        )?;
        writeln!(out)?;
        writeln!(out, "**风险等级**: {}", res.risk_level)?;
        if let Some(err) = &res.scan_error {
            writeln!(out)?;
            writeln!(out, "**扫描错误**: {}", md_cell(err))?;
            writeln!(out)?;
            continue;
        }
        writeln!(out)?;
        if !res.services.is_empty() {
            writeln!(out, "| Port | Service | Risk | Banner |")?;
            writeln!(out, "| :--- | :--- | :--- | :--- |")?;
            for s in &res.services {
                writeln!(
                    out,
                    "| {} | {} | {} | {} |",
                    s.port,
                    md_cell(&s.service_name),
                    s.risk_tag,
                    md_cell(&s.banner)
                )?;
            }
            writeln!(out)?;
        }
        if !res.vulnerabilities.is_empty() {
            writeln!(out, "**Vulnerabilities:**")?;
            for v in &res.vulnerabilities {
                writeln!(
                    out,
                    "- [{}] **{}**: {} 修复建议: {}",
                    v.severity,
                    md_cell(&v.vuln_type),
                    md_cell(&v.description),
                    md_cell(&v.remediation)
                )?;
            }
            writeln!(out)?;
        }
    }
    Ok(())
}

pub fn output_markdown(fleet: &FleetScanResult, path: &Path) -> Result<()> {
    let file = File::create(path)?;
    let mut writer = std::io::BufWriter::new(file);
    write_markdown(fleet, &mut writer)?;
    writer.flush()?;
    eprintln!("\nMarkdown 报告已保存至: {:?}", path);
    Ok(())
}
