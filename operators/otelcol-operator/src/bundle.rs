//! 托管资源打包模块
//!
//! 该模块把期望状态渲染为一组 Kubernetes 对象清单，打包为 `ManagedResourceBundle`，
//! 并通过 `Bundler` 以整体方式下发或删除。下发是幂等的：重复提交同一个包不会产生变化。

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{LocalObjectReference, Secret, ServiceAccount};
use k8s_openapi::api::rbac::v1::{PolicyRule, Role, RoleBinding, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kube::api::{Api, DeleteParams, Patch, PatchParams};
use kube::client::Client;
use otelcol_common::{
    CollectorConfig, DebugExporterConfig, OtlpHttpExporterConfig, ResourceReference,
};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

use crate::config::ImagesConfig;
use crate::crd::{ManagedResource, ManagedResourceSpec};

/// 所有渲染对象的基础名称
pub const BASE_RESOURCE_NAME: &str = "external-otelcol";

/// 托管资源类别：由 seed 上的 resource-manager 处理
pub const MANAGED_RESOURCE_CLASS: &str = "seed";

/// 服务端应用使用的字段管理者
pub const FIELD_MANAGER: &str = "gardener-extension-otelcol";

/// Target Allocator 相关对象名称
const TARGET_ALLOCATOR_NAME: &str = "external-otelcol-targetallocator";

/// Target Allocator 服务端口
const TARGET_ALLOCATOR_SERVICE_PORT: u16 = 80;

/// Collector 自身指标端口
const COLLECTOR_METRICS_PORT: u16 = 8888;

/// 控制平面组件的优先级类
const PRIORITY_CLASS_NAME: &str = "gardener-system-100";

/// 引用资源在控制平面命名空间中的名称前缀
const REFERENCED_RESOURCE_PREFIX: &str = "ref-";

/// 引用资源在 Collector 容器中的挂载根目录
const REFERENCED_RESOURCE_MOUNT_ROOT: &str = "/etc/otelcol/refs";

/// Bearer token 注入的环境变量
const TOKEN_ENV_VAR: &str = "OTLPHTTP_BEARER_TOKEN";

/// 下发错误
#[derive(Error, Debug)]
pub enum BundleError {
    /// Kubernetes API 调用失败，可重试
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// 被 API 服务器拒绝，输入不变时重试没有意义
    #[error("managed resource rejected: {0}")]
    Permanent(String),
}

impl BundleError {
    /// 是否为永久失败
    pub fn is_permanent(&self) -> bool {
        matches!(self, BundleError::Permanent(_))
    }

    /// 按 API 状态码对错误分类
    fn classify(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(ref response) if matches!(response.code, 400 | 422) => {
                BundleError::Permanent(response.message.clone())
            }
            other => BundleError::Kube(other),
        }
    }
}

/// 一组作为整体下发的对象清单
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedResourceBundle {
    /// 托管资源名称
    pub name: String,
    /// 托管资源类别
    pub class: String,
    /// 删除时是否保留目标对象
    pub keep_objects: bool,
    /// `<kind>__<namespace>__<name>.yaml` 到 YAML 清单的有序映射
    pub data: BTreeMap<String, Vec<u8>>,
}

impl ManagedResourceBundle {
    /// 创建空的包
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            class: MANAGED_RESOURCE_CLASS.to_string(),
            keep_objects: false,
            data: BTreeMap::new(),
        }
    }

    /// 序列化对象并加入包中
    pub fn insert<T: Serialize>(
        &mut self,
        kind: &str,
        namespace: &str,
        name: &str,
        object: &T,
    ) -> Result<(), serde_yaml::Error> {
        let key = format!("{}__{}__{}.yaml", kind.to_lowercase(), namespace, name);
        let manifest = serde_yaml::to_string(object)?;
        self.data.insert(key, manifest.into_bytes());
        Ok(())
    }

    /// 包中对象的键
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.data.keys().map(String::as_str)
    }

    /// 承载清单的 Secret 名称
    pub fn secret_name(&self) -> String {
        secret_name(&self.name)
    }
}

/// 托管资源对应的 Secret 名称
pub fn secret_name(managed_resource_name: &str) -> String {
    format!("managedresource-{}", managed_resource_name)
}

/// 托管资源下发器
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Bundler: Send + Sync {
    /// 创建或更新托管资源，使目标对象与包内容一致
    async fn apply(&self, namespace: &str, bundle: &ManagedResourceBundle) -> Result<(), BundleError>;

    /// 删除托管资源及其所有对象，不存在时视为成功
    async fn remove(&self, namespace: &str, name: &str) -> Result<(), BundleError>;
}

/// 基于 ManagedResource 和 Secret 的下发器
pub struct KubeBundler {
    /// Kubernetes 客户端
    client: Client,
}

impl KubeBundler {
    /// 创建新的下发器
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Bundler for KubeBundler {
    async fn apply(&self, namespace: &str, bundle: &ManagedResourceBundle) -> Result<(), BundleError> {
        let params = PatchParams::apply(FIELD_MANAGER).force();
        let secret_name = bundle.secret_name();

        let secret = Secret {
            metadata: ObjectMeta {
                name: Some(secret_name.clone()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            type_: Some("Opaque".to_string()),
            data: Some(
                bundle
                    .data
                    .iter()
                    .map(|(key, value)| (key.clone(), ByteString(value.clone())))
                    .collect(),
            ),
            ..Default::default()
        };

        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        secrets
            .patch(&secret_name, &params, &Patch::Apply(&secret))
            .await
            .map_err(BundleError::classify)?;

        let mut managed_resource = ManagedResource::new(
            &bundle.name,
            ManagedResourceSpec {
                class: Some(bundle.class.clone()),
                secret_refs: vec![LocalObjectReference {
                    name: Some(secret_name),
                }],
                keep_objects: Some(bundle.keep_objects),
            },
        );
        managed_resource.metadata.namespace = Some(namespace.to_string());

        let managed_resources: Api<ManagedResource> = Api::namespaced(self.client.clone(), namespace);
        managed_resources
            .patch(&bundle.name, &params, &Patch::Apply(&managed_resource))
            .await
            .map_err(BundleError::classify)?;

        info!(namespace, name = %bundle.name, objects = bundle.data.len(), "托管资源已下发");

        Ok(())
    }

    async fn remove(&self, namespace: &str, name: &str) -> Result<(), BundleError> {
        let managed_resources: Api<ManagedResource> = Api::namespaced(self.client.clone(), namespace);
        ignore_not_found(managed_resources.delete(name, &DeleteParams::default()).await.map(|_| ()))?;

        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        ignore_not_found(secrets.delete(&secret_name(name), &DeleteParams::default()).await.map(|_| ()))?;

        info!(namespace, name, "托管资源已删除");

        Ok(())
    }
}

/// 忽略 404 错误
fn ignore_not_found(result: Result<(), kube::Error>) -> Result<(), BundleError> {
    match result {
        Err(kube::Error::Api(response)) if response.code == 404 => {
            debug!(reason = %response.message, "对象不存在，跳过删除");
            Ok(())
        }
        other => other.map_err(BundleError::classify),
    }
}

/// 期望状态渲染器
#[derive(Debug, Clone)]
pub struct Renderer {
    /// 渲染对象使用的镜像
    images: ImagesConfig,
}

impl Renderer {
    /// 创建新的渲染器
    pub fn new(images: ImagesConfig) -> Self {
        Self { images }
    }

    /// 渲染指定命名空间的托管资源包
    ///
    /// 输出只取决于输入：相同的命名空间和配置总是得到字节相同的包。
    pub fn render(
        &self,
        namespace: &str,
        config: &CollectorConfig,
    ) -> Result<ManagedResourceBundle, serde_yaml::Error> {
        let mut bundle = ManagedResourceBundle::new(BASE_RESOURCE_NAME);

        bundle.insert(
            "ServiceAccount",
            namespace,
            TARGET_ALLOCATOR_NAME,
            &self.target_allocator_service_account(namespace),
        )?;
        bundle.insert("Role", namespace, TARGET_ALLOCATOR_NAME, &self.target_allocator_role(namespace))?;
        bundle.insert(
            "RoleBinding",
            namespace,
            TARGET_ALLOCATOR_NAME,
            &self.target_allocator_role_binding(namespace),
        )?;
        bundle.insert(
            "TargetAllocator",
            namespace,
            BASE_RESOURCE_NAME,
            &self.target_allocator(namespace),
        )?;
        bundle.insert(
            "OpenTelemetryCollector",
            namespace,
            BASE_RESOURCE_NAME,
            &self.collector(namespace, config),
        )?;

        debug!(namespace, objects = bundle.data.len(), "托管资源包已渲染");

        Ok(bundle)
    }

    /// 公共标签
    fn labels(&self) -> BTreeMap<String, String> {
        [
            ("role", "observability"),
            ("gardener.cloud/role", "observability"),
            ("observability.gardener.cloud/app", BASE_RESOURCE_NAME),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    fn metadata(&self, namespace: &str, name: &str) -> ObjectMeta {
        ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(self.labels()),
            ..Default::default()
        }
    }

    fn target_allocator_service_account(&self, namespace: &str) -> ServiceAccount {
        ServiceAccount {
            metadata: self.metadata(namespace, TARGET_ALLOCATOR_NAME),
            automount_service_account_token: Some(false),
            ..Default::default()
        }
    }

    fn target_allocator_role(&self, namespace: &str) -> Role {
        let read_only = |group: &str, resources: &[&str]| PolicyRule {
            api_groups: Some(vec![group.to_string()]),
            resources: Some(resources.iter().map(|r| r.to_string()).collect()),
            verbs: vec!["get".to_string(), "list".to_string(), "watch".to_string()],
            ..Default::default()
        };

        Role {
            metadata: self.metadata(namespace, TARGET_ALLOCATOR_NAME),
            rules: Some(vec![
                read_only("", &["pods", "services", "endpoints", "secrets", "namespaces"]),
                read_only("discovery.k8s.io", &["endpointslices"]),
                read_only(
                    "monitoring.coreos.com",
                    &["servicemonitors", "podmonitors", "scrapeconfigs", "probes"],
                ),
            ]),
        }
    }

    fn target_allocator_role_binding(&self, namespace: &str) -> RoleBinding {
        RoleBinding {
            metadata: self.metadata(namespace, TARGET_ALLOCATOR_NAME),
            role_ref: RoleRef {
                api_group: "rbac.authorization.k8s.io".to_string(),
                kind: "Role".to_string(),
                name: TARGET_ALLOCATOR_NAME.to_string(),
            },
            subjects: Some(vec![Subject {
                kind: "ServiceAccount".to_string(),
                name: TARGET_ALLOCATOR_NAME.to_string(),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            }]),
        }
    }

    fn target_allocator(&self, namespace: &str) -> Value {
        json!({
            "apiVersion": "opentelemetry.io/v1alpha1",
            "kind": "TargetAllocator",
            "metadata": self.metadata(namespace, BASE_RESOURCE_NAME),
            "spec": {
                "image": self.images.target_allocator,
                "replicas": 1,
                "priorityClassName": PRIORITY_CLASS_NAME,
                "resources": {
                    "requests": { "cpu": "10m", "memory": "50Mi" }
                },
                "securityContext": { "allowPrivilegeEscalation": false },
                "serviceAccount": TARGET_ALLOCATOR_NAME,
                "prometheusCR": {
                    "enabled": true,
                    "allowNamespaces": [namespace],
                    "serviceMonitorSelector": {
                        "matchLabels": { "prometheus": "shoot" }
                    }
                }
            }
        })
    }

    fn collector(&self, namespace: &str, config: &CollectorConfig) -> Value {
        let exporters = &config.spec.exporters;
        let mut rendered = Map::new();
        let mut mounts = ReferenceMounts::default();

        if exporters.debug.is_enabled() {
            rendered.insert("debug".to_string(), debug_exporter(&exporters.debug));
        }
        if exporters.otlphttp.is_enabled() {
            rendered.insert(
                "otlphttp".to_string(),
                otlphttp_exporter(&exporters.otlphttp, &mut mounts),
            );
        }
        let exporter_names: Vec<&String> = rendered.keys().collect();

        let mut metadata = self.metadata(namespace, BASE_RESOURCE_NAME);
        if let Some(labels) = metadata.labels.as_mut() {
            labels.insert(
                "opentelemetry.io/target-allocator".to_string(),
                BASE_RESOURCE_NAME.to_string(),
            );
        }

        json!({
            "apiVersion": "opentelemetry.io/v1beta1",
            "kind": "OpenTelemetryCollector",
            "metadata": metadata,
            "spec": {
                "mode": "statefulset",
                "replicas": 1,
                "image": self.images.collector,
                "priorityClassName": PRIORITY_CLASS_NAME,
                "env": mounts.env(),
                "volumes": mounts.volumes(),
                "volumeMounts": mounts.volume_mounts(),
                "config": {
                    "receivers": {
                        "prometheus": {
                            "config": { "scrape_configs": [] },
                            "target_allocator": {
                                "endpoint": format!(
                                    "http://{}:{}",
                                    TARGET_ALLOCATOR_NAME, TARGET_ALLOCATOR_SERVICE_PORT
                                ),
                                "interval": "30s",
                                "collector_id": "${POD_NAME}"
                            }
                        }
                    },
                    "exporters": rendered,
                    "service": {
                        "telemetry": {
                            "metrics": { "address": format!("0.0.0.0:{}", COLLECTOR_METRICS_PORT) }
                        },
                        "pipelines": {
                            "metrics": {
                                "receivers": ["prometheus"],
                                "exporters": exporter_names
                            }
                        }
                    }
                }
            }
        })
    }
}

/// debug 导出器配置
fn debug_exporter(config: &DebugExporterConfig) -> Value {
    json!({ "verbosity": config.verbosity.to_string() })
}

/// otlphttp 导出器配置，只输出已设置的字段
fn otlphttp_exporter(config: &OtlpHttpExporterConfig, mounts: &mut ReferenceMounts) -> Value {
    let mut out = Map::new();

    let endpoints = [
        ("endpoint", &config.endpoint),
        ("traces_endpoint", &config.traces_endpoint),
        ("metrics_endpoint", &config.metrics_endpoint),
        ("logs_endpoint", &config.logs_endpoint),
        ("profiles_endpoint", &config.profiles_endpoint),
    ];
    for (key, value) in endpoints {
        if !value.is_empty() {
            out.insert(key.to_string(), json!(value));
        }
    }

    if let Some(timeout) = &config.timeout {
        out.insert("timeout".to_string(), json!(timeout));
    }
    if config.read_buffer_size > 0 {
        out.insert("read_buffer_size".to_string(), json!(config.read_buffer_size));
    }
    if config.write_buffer_size > 0 {
        out.insert("write_buffer_size".to_string(), json!(config.write_buffer_size));
    }
    if let Some(encoding) = config.encoding {
        out.insert("encoding".to_string(), json!(encoding.to_string()));
    }
    if let Some(compression) = config.compression {
        out.insert("compression".to_string(), json!(compression.to_string()));
    }

    if let Some(retry) = &config.retry_on_failure {
        let mut r = Map::new();
        insert_opt(&mut r, "enabled", retry.enabled.map(Value::from));
        insert_opt(&mut r, "initial_interval", retry.initial_interval.clone().map(Value::from));
        insert_opt(&mut r, "max_interval", retry.max_interval.clone().map(Value::from));
        insert_opt(&mut r, "max_elapsed_time", retry.max_elapsed_time.clone().map(Value::from));
        insert_opt(&mut r, "multiplier", retry.multiplier.map(Value::from));
        out.insert("retry_on_failure".to_string(), Value::Object(r));
    }

    let tls = &config.tls;
    let mut t = Map::new();
    insert_opt(&mut t, "insecure", tls.insecure.map(Value::from));
    insert_opt(&mut t, "insecure_skip_verify", tls.insecure_skip_verify.map(Value::from));
    insert_opt(&mut t, "min_version", tls.min_version.clone().map(Value::from));
    insert_opt(&mut t, "max_version", tls.max_version.clone().map(Value::from));
    insert_opt(&mut t, "ca_file", tls.ca.as_ref().map(|r| Value::from(mounts.file(r))));
    insert_opt(&mut t, "cert_file", tls.cert.as_ref().map(|r| Value::from(mounts.file(r))));
    insert_opt(&mut t, "key_file", tls.key.as_ref().map(|r| Value::from(mounts.file(r))));
    insert_opt(&mut t, "reload_interval", tls.reload_interval.clone().map(Value::from));
    if !t.is_empty() {
        out.insert("tls".to_string(), Value::Object(t));
    }

    if let Some(token) = &config.token {
        mounts.token = Some(token.clone());
        out.insert(
            "headers".to_string(),
            json!({ "Authorization": format!("Bearer ${{env:{}}}", TOKEN_ENV_VAR) }),
        );
    }

    Value::Object(out)
}

fn insert_opt(map: &mut Map<String, Value>, key: &str, value: Option<Value>) {
    if let Some(value) = value {
        map.insert(key.to_string(), value);
    }
}

/// Collector 需要挂载或注入的引用资源
#[derive(Default)]
struct ReferenceMounts {
    /// 需要挂载的资源名称
    volumes: BTreeMap<String, String>,
    /// Bearer token 引用
    token: Option<ResourceReference>,
}

impl ReferenceMounts {
    /// 记录一个文件引用，返回容器内路径
    fn file(&mut self, reference: &ResourceReference) -> String {
        let name = &reference.resource_ref.name;
        self.volumes
            .insert(name.clone(), format!("{}{}", REFERENCED_RESOURCE_PREFIX, name));
        format!(
            "{}/{}/{}",
            REFERENCED_RESOURCE_MOUNT_ROOT, name, reference.resource_ref.data_key
        )
    }

    fn volumes(&self) -> Vec<Value> {
        self.volumes
            .iter()
            .map(|(name, secret)| json!({ "name": name, "secret": { "secretName": secret } }))
            .collect()
    }

    fn volume_mounts(&self) -> Vec<Value> {
        self.volumes
            .keys()
            .map(|name| {
                json!({
                    "name": name,
                    "mountPath": format!("{}/{}", REFERENCED_RESOURCE_MOUNT_ROOT, name),
                    "readOnly": true
                })
            })
            .collect()
    }

    fn env(&self) -> Vec<Value> {
        let mut env = vec![json!({
            "name": "POD_NAME",
            "valueFrom": { "fieldRef": { "fieldPath": "metadata.name" } }
        })];

        if let Some(token) = &self.token {
            env.push(json!({
                "name": TOKEN_ENV_VAR,
                "valueFrom": {
                    "secretKeyRef": {
                        "name": format!("{}{}", REFERENCED_RESOURCE_PREFIX, token.resource_ref.name),
                        "key": token.resource_ref.data_key
                    }
                }
            }));
        }

        env
    }
}
