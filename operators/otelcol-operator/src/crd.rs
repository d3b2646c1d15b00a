//! 资源定义模块
//!
//! 该模块定义控制器读写的 Kubernetes 资源类型：由控制器协调的 Extension，
//! 准入阶段校验的 Shoot，提供休眠状态的 Cluster，以及承载托管对象的 ManagedResource。
//! 这些资源的 CRD 由外部系统注册，这里只声明控制器用到的字段。

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::LocalObjectReference;
use k8s_openapi::apimachinery::pkg::runtime::RawExtension;
use kube::CustomResource;
use serde::{Deserialize, Serialize};

/// 扩展资源规格
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default)]
#[kube(group = "extensions.gardener.cloud", version = "v1alpha1", kind = "Extension", namespaced)]
#[kube(status = "ExtensionStatus", schema = "disabled")]
#[serde(rename_all = "camelCase")]
pub struct ExtensionSpec {
    /// 扩展类型
    #[serde(rename = "type")]
    pub type_: String,

    /// 扩展类别
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class: Option<String>,

    /// 扩展配置载荷
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_config: Option<RawExtension>,
}

/// 扩展资源状态
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionStatus {
    /// 上一次操作
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_operation: Option<LastOperation>,

    /// 上一次错误
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<LastError>,

    /// 已处理的资源代数
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

/// 上一次操作记录
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct LastOperation {
    /// 操作类型：Reconcile、Restore、Migrate
    #[serde(rename = "type")]
    pub type_: String,

    /// 操作结果：Succeeded、Error
    pub state: String,

    /// 结果说明
    pub description: String,

    /// 更新时间
    pub last_update_time: DateTime<Utc>,

    /// 进度百分比
    pub progress: i32,
}

/// 上一次错误记录
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct LastError {
    /// 错误说明
    pub description: String,

    /// 错误代码
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub codes: Vec<String>,

    /// 更新时间
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update_time: Option<DateTime<Utc>>,
}

/// Shoot 规格（仅包含准入校验和休眠判断需要的字段）
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default)]
#[kube(group = "core.gardener.cloud", version = "v1beta1", kind = "Shoot", namespaced)]
#[kube(schema = "disabled")]
#[serde(rename_all = "camelCase")]
pub struct ShootSpec {
    /// 为该集群请求的扩展
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extensions: Vec<ShootExtension>,

    /// 休眠设置
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hibernation: Option<Hibernation>,
}

impl ShootSpec {
    /// 集群是否处于休眠状态
    pub fn hibernation_enabled(&self) -> bool {
        self.hibernation
            .as_ref()
            .and_then(|h| h.enabled)
            .unwrap_or(false)
    }
}

/// Shoot 中的扩展配置块
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct ShootExtension {
    /// 扩展类型
    #[serde(rename = "type")]
    pub type_: String,

    /// 扩展配置载荷
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_config: Option<RawExtension>,

    /// 是否禁用：未设置、false、true
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disabled: Option<bool>,
}

impl ShootExtension {
    /// 是否被显式禁用
    pub fn is_disabled(&self) -> bool {
        self.disabled.unwrap_or(false)
    }
}

/// 休眠设置
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct Hibernation {
    /// 是否启用休眠
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
}

/// Cluster 规格，名称与目标集群的命名空间相同
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default)]
#[kube(group = "extensions.gardener.cloud", version = "v1alpha1", kind = "Cluster")]
#[kube(schema = "disabled")]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    /// 内嵌的 Shoot 对象
    #[serde(default)]
    pub shoot: RawExtension,
}

/// Cluster 中内嵌的 Shoot，只关心 spec
#[derive(Deserialize, Default)]
struct EmbeddedShoot {
    #[serde(default)]
    spec: ShootSpec,
}

impl Cluster {
    /// 解析内嵌 Shoot 的规格
    pub fn shoot_spec(&self) -> Result<ShootSpec, serde_json::Error> {
        if self.spec.shoot.0.is_null() {
            return Ok(ShootSpec::default());
        }

        let shoot: EmbeddedShoot = serde_json::from_value(self.spec.shoot.0.clone())?;
        Ok(shoot.spec)
    }
}

/// 托管资源规格
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default)]
#[kube(group = "resources.gardener.cloud", version = "v1alpha1", kind = "ManagedResource", namespaced)]
#[kube(schema = "disabled")]
#[serde(rename_all = "camelCase")]
pub struct ManagedResourceSpec {
    /// 负责处理该资源的 resource-manager 类别
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class: Option<String>,

    /// 保存对象清单的 Secret
    #[serde(default)]
    pub secret_refs: Vec<LocalObjectReference>,

    /// 删除托管资源时是否保留目标对象
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keep_objects: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_shoot_hibernation_flag() {
        let mut spec = ShootSpec::default();
        assert!(!spec.hibernation_enabled());

        spec.hibernation = Some(Hibernation { enabled: None });
        assert!(!spec.hibernation_enabled());

        spec.hibernation = Some(Hibernation { enabled: Some(true) });
        assert!(spec.hibernation_enabled());
    }

    #[test]
    fn test_cluster_embedded_shoot() {
        let cluster = Cluster::new(
            "shoot--garden--local",
            ClusterSpec {
                shoot: RawExtension(json!({
                    "apiVersion": "core.gardener.cloud/v1beta1",
                    "kind": "Shoot",
                    "metadata": { "name": "local", "namespace": "garden-local" },
                    "spec": {
                        "region": "local",
                        "hibernation": { "enabled": true },
                        "extensions": [{ "type": "otelcol", "disabled": false }]
                    }
                })),
            },
        );

        let spec = cluster.shoot_spec().unwrap();
        assert!(spec.hibernation_enabled());
        assert_eq!(spec.extensions.len(), 1);
        assert!(!spec.extensions[0].is_disabled());
    }

    #[test]
    fn test_cluster_without_shoot() {
        let cluster = Cluster::new("shoot--garden--local", ClusterSpec::default());
        assert!(!cluster.shoot_spec().unwrap().hibernation_enabled());
    }

    #[test]
    fn test_extension_spec_field_names() {
        let spec: ExtensionSpec = serde_json::from_value(json!({
            "type": "otelcol",
            "providerConfig": { "apiVersion": "otelcol.extensions.gardener.cloud/v1alpha1" }
        }))
        .unwrap();

        assert_eq!(spec.type_, "otelcol");
        assert!(spec.provider_config.is_some());
    }
}
