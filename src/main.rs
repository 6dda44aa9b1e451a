use anyhow::{Context, Result};
use clap::Parser;
use iot_sentinel::config::{Cli, ScanConfig, ScanRequest};
use iot_sentinel::error::ScanError;
use iot_sentinel::output;
use iot_sentinel::scanner::ScanPipeline;
use std::process;
use tracing_subscriber::EnvFilter;

fn print_banner() {
    let banner = r#"
  _       _                        _   _            _
 (_) ___ | |_      ___  ___ _ __  | |_(_)_ __   ___| |
 | |/ _ \| __|____/ __|/ _ \ '_ \ | __| | '_ \ / _ \ |
 | | (_) | ||_____\__ \  __/ | | || |_| | | | |  __/ |
 |_|\___/ \__|    |___/\___|_| |_| \__|_|_| |_|\___|_|
    iot-sentinel v0.3.0 - IoT Discovery & Security Scanner
    "#;
    eprintln!("{}", banner);
}

fn main() -> Result<()> {
    // 凭据检测会同时挂起大量请求，blocking 线程池保持在 500 以内
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .max_blocking_threads(500)
        .build()
        .context("无法创建 Tokio Runtime")?;

    runtime.block_on(async_main())
}

/// 解析类错误退出码 2，配置类错误退出码 1
fn exit_code(err: &ScanError) -> i32 {
    match err {
        ScanError::Validation(_) | ScanError::HostSearch(_) | ScanError::NoTargets => 2,
        _ => 1,
    }
}

async fn async_main() -> Result<()> {
    print_banner();
    let cli = Cli::parse();

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_level.clone()));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .try_init();

    let config = match ScanConfig::from_cli(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("配置错误: {:#}", e);
            process::exit(1);
        }
    };
    let request = ScanRequest::from_cli(&cli);

    let mut pipeline = match ScanPipeline::new(config.clone()) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("{}", e);
            process::exit(exit_code(&e));
        }
    };

    let fleet = match pipeline.run(&request).await {
        Ok(f) => f,
        Err(e) => {
            eprintln!("[{}] {}", e.severity().label(), e);
            if let Some(hint) = e.user_hint() {
                eprintln!("{}", hint);
            }
            process::exit(exit_code(&e));
        }
    };

    if config.json_output || config.output_file.is_some() {
        if let Err(e) = output::output_json(&fleet, &config) {
            eprintln!("JSON 输出失败: {}", e);
        }
    }
    if !config.json_output {
        output::print_human_readable(&fleet, &config);
    }
    if let Some(path) = &config.output_markdown {
        if let Err(e) = output::output_markdown(&fleet, path) {
            eprintln!("Markdown 输出失败: {}", e);
        }
    }
    Ok(())
}
