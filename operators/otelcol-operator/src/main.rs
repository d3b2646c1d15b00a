//! Otelcol Operator 入口
//!
//! 解析命令行参数，加载配置，初始化日志，然后运行控制器直到收到停止信号。

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use otelcol_operator::config::OperatorConfig;
use otelcol_operator::OtelcolOperator;

/// OpenTelemetry Collector 扩展控制器
#[derive(Parser, Debug)]
#[command(name = "otelcol-operator")]
#[command(about = "Gardener extension controller for the OpenTelemetry Collector")]
#[command(version)]
struct Args {
    /// 配置文件路径（YAML 或 JSON）
    #[arg(long, env = "OTELCOL_CONFIG")]
    config: Option<PathBuf>,

    /// 以 JSON 格式输出日志
    #[arg(long, env = "OTELCOL_LOG_JSON", default_value = "false")]
    log_json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => OperatorConfig::load(path)
            .with_context(|| format!("无法加载配置文件: {:?}", path))?,
        None => OperatorConfig::from_env().context("无法从环境变量加载配置")?,
    };

    init_logging(&config, args.log_json)?;

    info!(version = env!("CARGO_PKG_VERSION"), "启动 Otelcol Operator");

    let operator = Arc::new(
        OtelcolOperator::new(config)
            .await
            .context("创建 Kubernetes 客户端失败")?,
    );

    let signal_operator = operator.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal_operator.stop();
        }
    });

    operator.run().await.context("控制器运行失败")?;

    Ok(())
}

/// 初始化日志，`RUST_LOG` 优先于配置中的日志级别
fn init_logging(config: &OperatorConfig, json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .context("日志级别无效")?;

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    if json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    Ok(())
}
