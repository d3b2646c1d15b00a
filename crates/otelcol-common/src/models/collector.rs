//! 采集器配置模型
//!
//! 该模块定义扩展 providerConfig 解码后的强类型配置 `CollectorConfig`，
//! 包括各个导出器（debug、otlphttp）的设置、TLS 设置和资源引用。
//! 所有结构都拒绝未知字段，保证严格解码。

use serde::{Deserialize, Serialize};
use std::fmt;

/// 当前支持的 apiVersion
pub const API_VERSION: &str = "otelcol.extensions.gardener.cloud/v1alpha1";

/// 配置对象的 kind
pub const KIND: &str = "CollectorConfig";

/// 采集器配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CollectorConfig {
    /// API 版本
    pub api_version: String,
    /// 资源类型
    pub kind: String,
    /// 配置内容
    #[serde(default)]
    pub spec: CollectorConfigSpec,
}

impl CollectorConfig {
    /// 使用当前 API 版本创建配置
    pub fn new(spec: CollectorConfigSpec) -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            spec,
        }
    }
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self::new(CollectorConfigSpec::default())
    }
}

/// 采集器配置规格
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CollectorConfigSpec {
    /// 导出器集合
    #[serde(default)]
    pub exporters: CollectorExportersConfig,
}

/// 导出器集合
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CollectorExportersConfig {
    /// debug 导出器
    #[serde(default)]
    pub debug: DebugExporterConfig,
    /// OTLP/HTTP 导出器
    #[serde(default)]
    pub otlphttp: OtlpHttpExporterConfig,
}

impl CollectorExportersConfig {
    /// 是否至少启用了一个导出器
    pub fn any_enabled(&self) -> bool {
        self.debug.is_enabled() || self.otlphttp.is_enabled()
    }
}

/// debug 导出器输出详细程度
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DebugVerbosity {
    /// 仅输出摘要
    #[default]
    Basic,
    /// 常规输出
    Normal,
    /// 输出全部细节
    Detailed,
}

impl fmt::Display for DebugVerbosity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DebugVerbosity::Basic => write!(f, "basic"),
            DebugVerbosity::Normal => write!(f, "normal"),
            DebugVerbosity::Detailed => write!(f, "detailed"),
        }
    }
}

/// debug 导出器配置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DebugExporterConfig {
    /// 是否启用，未设置视为未启用
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    /// 输出详细程度
    #[serde(default)]
    pub verbosity: DebugVerbosity,
}

impl DebugExporterConfig {
    /// 是否启用
    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(false)
    }
}

/// 消息编码方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    /// protobuf 编码
    Proto,
    /// JSON 编码
    Json,
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Encoding::Proto => write!(f, "proto"),
            Encoding::Json => write!(f, "json"),
        }
    }
}

/// 压缩方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    /// gzip 压缩
    Gzip,
    /// zstd 压缩
    Zstd,
    /// snappy 压缩
    Snappy,
    /// 不压缩
    None,
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Compression::Gzip => write!(f, "gzip"),
            Compression::Zstd => write!(f, "zstd"),
            Compression::Snappy => write!(f, "snappy"),
            Compression::None => write!(f, "none"),
        }
    }
}

/// 对 Shoot 中命名资源的引用
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ResourceReference {
    /// 被引用的资源
    #[serde(default)]
    pub resource_ref: ResourceRef,
}

/// 资源名称和数据键
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ResourceRef {
    /// 资源名称
    #[serde(default)]
    pub name: String,
    /// 资源中的数据键
    #[serde(default)]
    pub data_key: String,
}

impl ResourceReference {
    /// 创建新的资源引用
    pub fn new(name: &str, data_key: &str) -> Self {
        Self {
            resource_ref: ResourceRef {
                name: name.to_string(),
                data_key: data_key.to_string(),
            },
        }
    }

    /// 名称和数据键是否都已填写
    pub fn is_complete(&self) -> bool {
        !self.resource_ref.name.is_empty() && !self.resource_ref.data_key.is_empty()
    }
}

/// TLS 配置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TlsConfig {
    /// 是否禁用传输层安全
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insecure: Option<bool>,
    /// 启用 TLS 但跳过证书校验
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insecure_skip_verify: Option<bool>,
    /// 最低 TLS 版本，例如 "1.2"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_version: Option<String>,
    /// 最高 TLS 版本
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_version: Option<String>,
    /// CA 证书引用
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca: Option<ResourceReference>,
    /// 客户端证书引用
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert: Option<ResourceReference>,
    /// 客户端私钥引用
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<ResourceReference>,
    /// 证书重新加载间隔，例如 "1h"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reload_interval: Option<String>,
}

/// 失败重试配置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RetryOnFailureConfig {
    /// 是否启用重试
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    /// 首次重试等待时间
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_interval: Option<String>,
    /// 最大重试间隔
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_interval: Option<String>,
    /// 放弃前的总重试时长
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_elapsed_time: Option<String>,
    /// 退避倍数
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multiplier: Option<f64>,
}

/// OTLP/HTTP 导出器配置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct OtlpHttpExporterConfig {
    /// 是否启用，未设置视为未启用
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    /// 基础端点
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub endpoint: String,
    /// traces 端点
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub traces_endpoint: String,
    /// metrics 端点
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub metrics_endpoint: String,
    /// logs 端点
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub logs_endpoint: String,
    /// profiles 端点
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub profiles_endpoint: String,
    /// TLS 设置
    #[serde(default)]
    pub tls: TlsConfig,
    /// Bearer token 引用
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<ResourceReference>,
    /// 请求超时，例如 "30s"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
    /// HTTP 客户端读缓冲区大小
    #[serde(default)]
    pub read_buffer_size: i64,
    /// HTTP 客户端写缓冲区大小
    #[serde(default)]
    pub write_buffer_size: i64,
    /// 消息编码
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<Encoding>,
    /// 压缩方式
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compression: Option<Compression>,
    /// 失败重试
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_on_failure: Option<RetryOnFailureConfig>,
}

impl OtlpHttpExporterConfig {
    /// 是否启用
    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(false)
    }
}
