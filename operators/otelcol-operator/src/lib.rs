//! Otelcol Operator - OpenTelemetry Collector 扩展控制器
//!
//! 该模块实现了 otelcol 扩展的控制器：在准入阶段校验 Shoot 中的扩展配置，
//! 在协调阶段把 Extension 资源收敛为目标集群中的一组托管资源。

pub mod actuator;
pub mod admission;
pub mod bundle;
pub mod cluster;
pub mod config;
pub mod controller;
pub mod crd;
pub mod error;
pub mod metrics;
pub mod webhook;

use kube::Client;
use otelcol_common::ConfigDecoder;
use prometheus::Registry;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::actuator::Actuator;
use crate::admission::ShootValidator;
use crate::bundle::{KubeBundler, Renderer};
use crate::cluster::KubeClusterSource;
use crate::config::OperatorConfig;
use crate::controller::{Controller, ControllerContext};
use crate::error::{OperatorError, Result};
use crate::metrics::ActuatorMetrics;

/// Operator 主结构体
pub struct OtelcolOperator {
    /// Kubernetes 客户端
    client: Client,
    /// 控制器配置
    config: OperatorConfig,
    /// Prometheus 注册表
    registry: Registry,
    /// 执行器指标
    metrics: ActuatorMetrics,
    /// 停止信号
    shutdown: CancellationToken,
}

impl OtelcolOperator {
    /// 创建新的 Operator 实例
    pub async fn new(config: OperatorConfig) -> Result<Self> {
        let client = Client::try_default().await?;
        let registry = Registry::new();
        let metrics = ActuatorMetrics::new(&registry)?;

        Ok(Self {
            client,
            config,
            registry,
            metrics,
            shutdown: CancellationToken::new(),
        })
    }

    /// 运行 Operator，直到调用 `stop`
    pub async fn run(&self) -> Result<()> {
        let metrics_addr = parse_address(&self.config.metrics.socket_address())?;
        let webhook_addr = parse_address(&self.config.webhook.socket_address())?;

        let validator = ShootValidator::new(ConfigDecoder::new())?;
        let actuator = Actuator::new(
            ConfigDecoder::new(),
            Renderer::new(self.config.images.clone()),
            Arc::new(KubeBundler::new(self.client.clone())),
            Arc::new(KubeClusterSource::new(self.client.clone())),
            self.config.feature_gates(),
            self.metrics.clone(),
        );

        let registry = self.registry.clone();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = metrics::serve(metrics_addr, registry, shutdown).await {
                error!(error = %e, "指标服务器错误");
            }
        });

        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = webhook::serve(webhook_addr, validator, shutdown).await {
                error!(error = %e, "准入 webhook 服务器错误");
            }
        });

        info!(
            gardener_version = ?self.config.gardener_version,
            feature_gates = ?self.config.feature_gates,
            "Otelcol Operator 已启动"
        );

        let controller = Controller::new(ControllerContext {
            client: self.client.clone(),
            actuator,
            settings: self.config.controller.clone(),
            shutdown: self.shutdown.clone(),
        });
        controller.run().await
    }

    /// 停止 Operator
    pub fn stop(&self) {
        info!("正在停止 Otelcol Operator");
        self.shutdown.cancel();
    }
}

/// 解析监听地址
fn parse_address(address: &str) -> Result<SocketAddr> {
    address.parse().map_err(|e| {
        OperatorError::Config(::config::ConfigError::Message(format!(
            "invalid listen address {}: {}",
            address, e
        )))
    })
}
