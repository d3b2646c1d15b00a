//! 配置解码模块
//!
//! 该模块把扩展资源中不透明、带版本的 providerConfig 载荷解码为 `CollectorConfig`。
//! 解码先检查类型元信息（apiVersion/kind），再进行拒绝未知字段的严格反序列化。

use serde::Deserialize;
use tracing::debug;

use crate::error::DecodeError;
use crate::models::collector::{CollectorConfig, API_VERSION, KIND};

/// 载荷中的类型元信息
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TypeMeta {
    #[serde(default)]
    api_version: Option<String>,
    #[serde(default)]
    kind: Option<String>,
}

/// 解码器认可的 schema 版本
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaVersion {
    /// API 版本
    pub api_version: String,
    /// 资源类型
    pub kind: String,
}

impl SchemaVersion {
    /// 创建新的 schema 版本
    pub fn new(api_version: &str, kind: &str) -> Self {
        Self {
            api_version: api_version.to_string(),
            kind: kind.to_string(),
        }
    }

    /// 当前版本 `otelcol.extensions.gardener.cloud/v1alpha1, CollectorConfig`
    pub fn current() -> Self {
        Self::new(API_VERSION, KIND)
    }
}

/// providerConfig 解码器
#[derive(Debug, Clone)]
pub struct ConfigDecoder {
    /// 已注册的 schema 版本
    versions: Vec<SchemaVersion>,
}

impl ConfigDecoder {
    /// 创建只认可当前版本的解码器
    pub fn new() -> Self {
        Self::with_versions(vec![SchemaVersion::current()])
    }

    /// 使用指定的 schema 版本创建解码器
    pub fn with_versions(versions: Vec<SchemaVersion>) -> Self {
        Self { versions }
    }

    /// 解码器是否可用（至少注册了一个 schema 版本）
    pub fn is_usable(&self) -> bool {
        !self.versions.is_empty()
    }

    /// 已注册的 schema 版本
    pub fn supported_versions(&self) -> &[SchemaVersion] {
        &self.versions
    }

    /// 解码原始载荷
    pub fn decode(&self, raw: &[u8]) -> Result<CollectorConfig, DecodeError> {
        if raw.iter().all(u8::is_ascii_whitespace) {
            return Err(DecodeError::Missing);
        }

        let value: serde_json::Value = serde_json::from_slice(raw)?;
        if value.is_null() {
            return Err(DecodeError::Missing);
        }

        // 先确认版本，再做严格解码
        let meta: TypeMeta = serde_json::from_value(value.clone())?;
        let (api_version, kind) = match (meta.api_version, meta.kind) {
            (Some(api_version), Some(kind)) if !api_version.is_empty() && !kind.is_empty() => {
                (api_version, kind)
            }
            _ => return Err(DecodeError::MissingTypeMeta),
        };

        if !self
            .versions
            .iter()
            .any(|v| v.api_version == api_version && v.kind == kind)
        {
            return Err(DecodeError::UnrecognizedVersion { api_version, kind });
        }

        let config: CollectorConfig = serde_json::from_value(value)?;
        debug!(api_version = %config.api_version, kind = %config.kind, "providerConfig 解码成功");

        Ok(config)
    }
}

impl Default for ConfigDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_valid_payload() {
        let raw = br#"{
            "apiVersion": "otelcol.extensions.gardener.cloud/v1alpha1",
            "kind": "CollectorConfig",
            "spec": { "exporters": { "debug": { "enabled": true, "verbosity": "detailed" } } }
        }"#;

        let config = ConfigDecoder::new().decode(raw).unwrap();
        assert!(config.spec.exporters.debug.is_enabled());
        assert_eq!(config.kind, "CollectorConfig");
    }

    #[test]
    fn test_decode_missing_payload() {
        let decoder = ConfigDecoder::new();
        assert!(matches!(decoder.decode(b""), Err(DecodeError::Missing)));
        assert!(matches!(decoder.decode(b"  \n"), Err(DecodeError::Missing)));
        assert!(matches!(decoder.decode(b"null"), Err(DecodeError::Missing)));
    }

    #[test]
    fn test_decode_malformed_payload() {
        let decoder = ConfigDecoder::new();
        assert!(matches!(decoder.decode(b"{not json"), Err(DecodeError::Malformed(_))));
        assert!(matches!(decoder.decode(b"\"a string\""), Err(DecodeError::Malformed(_))));
    }

    #[test]
    fn test_decode_requires_type_meta() {
        let raw = br#"{ "spec": { "exporters": {} } }"#;
        assert!(matches!(
            ConfigDecoder::new().decode(raw),
            Err(DecodeError::MissingTypeMeta)
        ));
    }

    #[test]
    fn test_decode_unrecognized_version() {
        let raw = br#"{ "apiVersion": "otelcol.extensions.gardener.cloud/v9", "kind": "CollectorConfig" }"#;
        match ConfigDecoder::new().decode(raw) {
            Err(DecodeError::UnrecognizedVersion { api_version, kind }) => {
                assert_eq!(api_version, "otelcol.extensions.gardener.cloud/v9");
                assert_eq!(kind, "CollectorConfig");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_decode_is_strict() {
        let raw = br#"{
            "apiVersion": "otelcol.extensions.gardener.cloud/v1alpha1",
            "kind": "CollectorConfig",
            "spec": { "exporters": { "debug": { "enabled": true, "colour": "red" } } }
        }"#;
        assert!(matches!(ConfigDecoder::new().decode(raw), Err(DecodeError::Malformed(_))));
    }

    #[test]
    fn test_decoder_usability() {
        assert!(ConfigDecoder::new().is_usable());
        assert!(!ConfigDecoder::with_versions(vec![]).is_usable());
        assert_eq!(ConfigDecoder::default().supported_versions(), &[SchemaVersion::current()]);
    }
}
