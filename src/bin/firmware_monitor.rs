//! firmware-monitor - 固件替换监控命令行
//!
//! 用法: firmware-monitor <固件文件> [--dir <目录>] [--prefix <前缀>] [--json]
//!
//! 未指定的参数从环境变量（FIRMWARE_MONITOR_*）或默认值读取。

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use firmware_monitor::{Notifier, WatchConfig, WatchSession};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// 退出时等待进行中任务的上限
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// 退出前等待状态行打印完的上限
const PRINTER_FLUSH_TIMEOUT: Duration = Duration::from_millis(500);

struct Args {
    payload: Option<PathBuf>,
    directory: Option<PathBuf>,
    prefix: Option<String>,
    json: bool,
}

fn parse_args() -> Result<Args> {
    let mut args = Args {
        payload: None,
        directory: None,
        prefix: None,
        json: false,
    };

    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--dir" => args.directory = Some(iter.next().context("--dir 需要参数")?.into()),
            "--prefix" => args.prefix = Some(iter.next().context("--prefix 需要参数")?),
            "--json" => args.json = true,
            "-h" | "--help" => {
                println!("用法: firmware-monitor <固件文件> [--dir <目录>] [--prefix <前缀>] [--json]");
                std::process::exit(0);
            }
            other if other.starts_with("--") => bail!("未知参数: {}", other),
            other => args.payload = Some(other.into()),
        }
    }

    Ok(args)
}

#[tokio::main]
async fn main() -> Result<()> {
    // 初始化日志
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive("firmware_monitor=info".parse()?))
        .init();

    tracing::info!("🚀 firmware-monitor v{}", firmware_monitor::VERSION);

    let args = parse_args()?;

    let mut config = WatchConfig::from_env()?;
    if let Some(dir) = args.directory {
        config.directory = dir;
    }
    if let Some(prefix) = args.prefix {
        config.prefix = prefix;
    }
    let payload = args.payload.or_else(|| config.payload.take());

    let notifier = Notifier::new();
    let mut status = notifier.subscribe();
    let json = args.json;
    let printer = tokio::spawn(async move {
        while let Some(line) = status.recv().await {
            if json {
                match serde_json::to_string(&line) {
                    Ok(s) => println!("{}", s),
                    Err(e) => tracing::error!("Failed to serialize status line: {}", e),
                }
            } else {
                println!("{}", line);
            }
        }
    });

    tracing::info!("监控路径: {}", config.directory.display());
    tracing::info!("文件名前缀: {}", config.prefix);

    let session = WatchSession::new(config, notifier);

    // 未给出固件时由 start 报告 PayloadMissing
    let started = match &payload {
        Some(path) => session.select_payload(path).map(|_| ()),
        None => Ok(()),
    }
    .and_then(|_| session.start());

    if let Err(e) = started {
        // 先让状态行打印出来再退出
        drop(session);
        let _ = tokio::time::timeout(PRINTER_FLUSH_TIMEOUT, printer).await;
        return Err(e).context("无法开始监控");
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("收到中断信号，准备退出...");

    session.stop().await;
    if tokio::time::timeout(DRAIN_TIMEOUT, session.drain()).await.is_err() {
        tracing::warn!("⏰ {} task(s) still running, exiting anyway", session.in_flight());
    }

    // 会话释放后通道关闭，打印剩余的状态
    drop(session);
    let _ = tokio::time::timeout(PRINTER_FLUSH_TIMEOUT, printer).await;

    tracing::info!("👋 firmware-monitor exiting");
    Ok(())
}
