//! 配置管理模块
//!
//! 该模块负责加载控制器配置，支持 YAML/JSON 配置文件，
//! 并允许通过 `OTELCOL_` 前缀的环境变量覆盖（层级分隔符为 `__`）。

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use crate::cluster::FeatureGates;
use crate::error::Result;

/// 环境变量前缀
const ENV_PREFIX: &str = "OTELCOL";

/// 控制器配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperatorConfig {
    /// 日志级别
    pub log_level: String,
    /// gardenlet 下发的特性开关
    #[serde(default)]
    pub feature_gates: BTreeMap<String, bool>,
    /// Gardener 版本
    #[serde(default)]
    pub gardener_version: Option<String>,
    /// 指标服务器配置
    pub metrics: ListenConfig,
    /// 准入 webhook 服务器配置
    pub webhook: ListenConfig,
    /// 协调循环配置
    pub controller: ControllerConfig,
    /// 渲染对象使用的镜像
    pub images: ImagesConfig,
}

/// 监听地址配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListenConfig {
    /// 监听地址
    pub listen_address: String,
    /// 监听端口
    pub port: u16,
}

impl ListenConfig {
    /// 拼接为 `host:port`
    pub fn socket_address(&self) -> String {
        format!("{}:{}", self.listen_address, self.port)
    }
}

/// 协调循环配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// 单次协调的超时时间（秒）
    pub reconcile_timeout_seconds: u64,
    /// 成功后的周期性重新协调间隔（秒）
    pub requeue_seconds: u64,
    /// 配置错误后的重试间隔（秒）
    pub config_error_requeue_seconds: u64,
    /// 暂时性错误后的重试间隔（秒）
    pub transient_error_requeue_seconds: u64,
}

impl ControllerConfig {
    /// 单次协调超时
    pub fn reconcile_timeout(&self) -> Duration {
        Duration::from_secs(self.reconcile_timeout_seconds)
    }

    /// 成功后的重新协调间隔
    pub fn requeue_interval(&self) -> Duration {
        Duration::from_secs(self.requeue_seconds)
    }
}

/// 镜像配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImagesConfig {
    /// OpenTelemetry Collector 镜像
    pub collector: String,
    /// Target Allocator 镜像
    pub target_allocator: String,
}

impl OperatorConfig {
    /// 特性开关集合
    pub fn feature_gates(&self) -> FeatureGates {
        FeatureGates::new(self.feature_gates.clone())
    }

    /// 从配置文件加载，环境变量优先级更高
    pub fn load(config_path: &Path) -> Result<Self> {
        let format = match config_path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => FileFormat::Yaml,
            Some("json") => FileFormat::Json,
            _ => {
                return Err(config::ConfigError::Message(format!(
                    "unsupported configuration format for {:?}, expected YAML or JSON",
                    config_path
                ))
                .into())
            }
        };

        let path = config_path.to_string_lossy();
        let config = Self::builder()?
            .add_source(File::new(&path, format))
            .add_source(Self::environment())
            .build()?;

        let operator_config = config.try_deserialize::<OperatorConfig>()?;
        debug!(path = %path, "控制器配置已加载");

        Ok(operator_config)
    }

    /// 没有配置文件时，使用默认值和环境变量
    pub fn from_env() -> Result<Self> {
        let config = Self::builder()?.add_source(Self::environment()).build()?;
        Ok(config.try_deserialize::<OperatorConfig>()?)
    }

    /// 以默认配置为底层的构建器
    fn builder() -> Result<config::ConfigBuilder<config::builder::DefaultState>> {
        let defaults = Config::try_from(&create_default_config())?;
        Ok(Config::builder().add_source(defaults))
    }

    /// 环境变量数据源
    fn environment() -> Environment {
        Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
    }
}

/// 创建默认配置
pub fn create_default_config() -> OperatorConfig {
    OperatorConfig {
        log_level: "info".to_string(),
        feature_gates: BTreeMap::new(),
        gardener_version: None,
        metrics: ListenConfig {
            listen_address: "0.0.0.0".to_string(),
            port: 8080,
        },
        webhook: ListenConfig {
            listen_address: "0.0.0.0".to_string(),
            port: 9443,
        },
        controller: ControllerConfig {
            reconcile_timeout_seconds: 180,
            requeue_seconds: 3600,
            config_error_requeue_seconds: 300,
            transient_error_requeue_seconds: 30,
        },
        images: ImagesConfig {
            collector: "otel/opentelemetry-collector-contrib:0.140.0".to_string(),
            target_allocator: "otel/target-allocator:v0.140.0".to_string(),
        },
    }
}
