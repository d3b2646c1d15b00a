//! 错误处理模块
//!
//! 该模块定义采集器配置在解码、校验阶段产生的错误类型。
//! 解码错误（格式问题）与校验错误（语义问题）互相独立，
//! 再由 `ConfigurationError` 统一包装后交给准入和协调两条路径使用。

use std::fmt;
use thiserror::Error;

/// 解码错误
#[derive(Error, Debug)]
pub enum DecodeError {
    /// 未提供任何配置内容
    #[error("provider config payload is empty")]
    Missing,

    /// 缺少 apiVersion 或 kind
    #[error("object 'apiVersion' or 'kind' is missing in provider config")]
    MissingTypeMeta,

    /// 无法识别的 schema 版本
    #[error("no kind {kind:?} is registered for version {api_version:?}")]
    UnrecognizedVersion {
        /// 载荷中声明的 apiVersion
        api_version: String,
        /// 载荷中声明的 kind
        kind: String,
    },

    /// 载荷格式错误
    #[error("malformed provider config: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// 字段错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldErrorKind {
    /// 缺少必填值
    Required,
    /// 取值非法
    Invalid,
}

impl fmt::Display for FieldErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldErrorKind::Required => write!(f, "Required value"),
            FieldErrorKind::Invalid => write!(f, "Invalid value"),
        }
    }
}

/// 单个字段的校验错误
///
/// 输出格式沿用 Kubernetes 字段错误的约定：`<path>: <kind>: <value>: <detail>`。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    /// 错误类别
    pub kind: FieldErrorKind,
    /// 字段路径，例如 `spec.exporters.otlphttp.endpoint`
    pub path: String,
    /// 出错的取值（已格式化）
    pub value: Option<String>,
    /// 错误说明
    pub detail: String,
}

impl FieldError {
    /// 创建“缺少必填值”错误
    pub fn required(path: &str, detail: &str) -> Self {
        Self {
            kind: FieldErrorKind::Required,
            path: path.to_string(),
            value: None,
            detail: detail.to_string(),
        }
    }

    /// 创建“取值非法”错误，取值以 Debug 形式记录（字符串带引号，数字原样）
    pub fn invalid<V: fmt::Debug>(path: &str, value: V, detail: &str) -> Self {
        Self {
            kind: FieldErrorKind::Invalid,
            path: path.to_string(),
            value: Some(format!("{:?}", value)),
            detail: detail.to_string(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Some(value) => write!(f, "{}: {}: {}: {}", self.path, self.kind, value, self.detail),
            None => write!(f, "{}: {}: {}", self.path, self.kind, self.detail),
        }
    }
}

/// 校验错误集合
///
/// 所有规则的违规项都会累积在这里，不会因为第一条失败而提前返回。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors(Vec<FieldError>);

impl ValidationErrors {
    /// 创建空集合
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// 追加一条字段错误
    pub fn push(&mut self, error: FieldError) {
        self.0.push(error);
    }

    /// 是否没有任何错误
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// 错误数量
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// 所有字段错误
    pub fn errors(&self) -> &[FieldError] {
        &self.0
    }

    /// 是否包含指定路径上的错误
    pub fn contains_path(&self, path: &str) -> bool {
        self.0.iter().any(|e| e.path == path)
    }

    /// 为空时返回 `Ok(())`，否则返回自身作为错误
    pub fn into_result(self) -> Result<(), Self> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.as_slice() {
            [] => Ok(()),
            [single] => write!(f, "{}", single),
            many => {
                let joined = many
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(f, "[{}]", joined)
            }
        }
    }
}

impl std::error::Error for ValidationErrors {}

/// 配置错误
///
/// 协调器和准入校验在“配置缺失或非法、无法继续”时使用的统一错误。
/// 这类错误在用户修正配置之前会稳定复现，重试不会改变结果。
#[derive(Error, Debug)]
pub enum ConfigurationError {
    /// 扩展已启用但没有提供 providerConfig
    #[error("no provider config specified for {extension_type}")]
    MissingProviderConfig {
        /// 扩展类型
        extension_type: String,
    },

    /// providerConfig 无法解码
    #[error("invalid provider spec configuration for {extension_type}: {source}")]
    Decode {
        /// 扩展类型
        extension_type: String,
        /// 解码失败原因
        #[source]
        source: DecodeError,
    },

    /// providerConfig 解码成功但未通过校验
    #[error("invalid extension configuration for {extension_type}: {source}")]
    Invalid {
        /// 扩展类型
        extension_type: String,
        /// 校验失败原因
        #[source]
        source: ValidationErrors,
    },
}
