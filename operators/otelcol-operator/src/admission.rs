//! 准入校验模块
//!
//! 该模块在 Shoot 变更被持久化之前校验其中本扩展的配置块，
//! 与协调阶段使用同一套解码和校验逻辑。

use kube::ResourceExt;
use otelcol_common::ConfigDecoder;
use tracing::debug;

use crate::actuator::{decode_and_validate, EXTENSION_TYPE};
use crate::crd::{Shoot, ShootExtension};
use crate::error::{ignore_extension_not_found, OperatorError, Result};

/// Shoot 准入校验器
#[derive(Debug, Clone)]
pub struct ShootValidator {
    /// providerConfig 解码器
    decoder: ConfigDecoder,
    /// 扩展类型
    extension_type: String,
}

impl ShootValidator {
    /// 创建新的校验器，解码器不可用时失败
    pub fn new(decoder: ConfigDecoder) -> Result<Self> {
        if !decoder.is_usable() {
            return Err(OperatorError::InvalidDecoder(EXTENSION_TYPE.to_string()));
        }

        Ok(Self {
            decoder,
            extension_type: EXTENSION_TYPE.to_string(),
        })
    }

    /// webhook 名称
    pub fn webhook_name(&self) -> String {
        format!("validator.{}", self.extension_type)
    }

    /// webhook 路径
    pub fn webhook_path(&self) -> String {
        format!("/webhooks/validate/{}", self.extension_type)
    }

    /// 选择需要校验的 Shoot 的标签
    pub fn object_selector_label(&self) -> String {
        format!("extensions.extensions.gardener.cloud/{}", self.extension_type)
    }

    /// 校验 Shoot 变更
    ///
    /// 正在删除的 Shoot、未包含本扩展或已禁用本扩展的 Shoot 都直接放行。
    pub fn check(&self, new: &Shoot, _old: Option<&Shoot>) -> Result<()> {
        if new.metadata.deletion_timestamp.is_some() {
            debug!(shoot = %new.name_any(), "Shoot 正在删除，跳过校验");
            return Ok(());
        }

        match self.find_extension(new) {
            Ok(extension) => self.validate_extension(extension),
            Err(err) => ignore_extension_not_found(err),
        }
    }

    /// 查找本扩展的配置块
    fn find_extension<'a>(&self, shoot: &'a Shoot) -> Result<&'a ShootExtension> {
        shoot
            .spec
            .extensions
            .iter()
            .find(|ext| ext.type_ == self.extension_type)
            .ok_or_else(|| OperatorError::ExtensionNotFound(self.extension_type.clone()))
    }

    fn validate_extension(&self, extension: &ShootExtension) -> Result<()> {
        if extension.is_disabled() {
            return Ok(());
        }

        let raw = extension.provider_config.as_ref().filter(|raw| !raw.0.is_null());
        decode_and_validate(&self.decoder, raw)?;

        Ok(())
    }
}
