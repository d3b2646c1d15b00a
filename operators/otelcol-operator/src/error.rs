//! 错误处理模块
//!
//! 该模块定义控制器的统一错误类型，并区分两类失败：
//! 配置错误（用户修正配置前会稳定复现）与暂时性错误（API 调用失败等，可退避重试）。

use otelcol_common::ConfigurationError;
use thiserror::Error;

use crate::bundle::BundleError;

/// 配置问题的错误代码，写入 `status.lastError.codes`
pub const ERR_CONFIGURATION_PROBLEM: &str = "ERR_CONFIGURATION_PROBLEM";

/// 控制器统一错误类型
#[derive(Error, Debug)]
pub enum OperatorError {
    /// 资源中没有本扩展的配置
    #[error("extension not found: {0}")]
    ExtensionNotFound(String),

    /// 准入校验器的解码器不可用
    #[error("invalid decoder specified for shoot validator {0}")]
    InvalidDecoder(String),

    /// 配置缺失或非法
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// 托管资源下发或删除失败
    #[error("managed resource bundle error: {0}")]
    Bundle(#[from] BundleError),

    /// Kubernetes API 错误
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// JSON 序列化错误
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML 序列化错误
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// 协调被取消或超时
    #[error("reconciliation cancelled")]
    Cancelled,

    /// finalizer 处理失败
    #[error("finalizer error: {0}")]
    Finalizer(String),

    /// 控制器配置加载失败
    #[error("operator configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// 指标注册失败
    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

/// 控制器结果类型别名
pub type Result<T> = std::result::Result<T, OperatorError>;

impl OperatorError {
    /// 是否为配置错误
    pub fn is_configuration_error(&self) -> bool {
        matches!(self, OperatorError::Configuration(_))
    }

    /// 是否值得按暂时性错误退避重试
    ///
    /// 配置错误和被标记为永久失败的下发错误在输入变化前会重复失败。
    pub fn is_retryable(&self) -> bool {
        match self {
            OperatorError::Configuration(_) => false,
            OperatorError::Bundle(e) => !e.is_permanent(),
            _ => true,
        }
    }

    /// 写入状态的错误代码
    pub fn error_codes(&self) -> Vec<String> {
        if self.is_configuration_error() {
            vec![ERR_CONFIGURATION_PROBLEM.to_string()]
        } else {
            Vec::new()
        }
    }
}

/// 忽略 `ExtensionNotFound`，其他错误原样返回
pub fn ignore_extension_not_found(err: OperatorError) -> Result<()> {
    match err {
        OperatorError::ExtensionNotFound(_) => Ok(()),
        other => Err(other),
    }
}
