//! 扩展执行器模块
//!
//! 该模块负责把 Extension 资源的期望状态收敛到目标集群：每次调用都从资源和集群上下文
//! 重新计算期望状态（电平触发），然后通过 `Bundler` 下发或删除托管资源。
//!
//! 五种触发方式只对应两种意图：
//! - Reconcile、Restore、Migrate 收敛到期望状态
//! - Delete、ForceDelete 删除全部托管对象

use k8s_openapi::apimachinery::pkg::runtime::RawExtension;
use kube::ResourceExt;
use otelcol_common::{validate, ConfigDecoder, ConfigurationError};
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::bundle::{Bundler, ManagedResourceBundle, Renderer, BASE_RESOURCE_NAME};
use crate::cluster::{ClusterContext, ClusterContextSource, FeatureGates, FEATURE_GATE};
use crate::crd::Extension;
use crate::error::{OperatorError, Result};
use crate::metrics::ActuatorMetrics;

/// 本执行器处理的扩展类型
pub const EXTENSION_TYPE: &str = "otelcol";

/// 托管资源名称
pub const MANAGED_RESOURCE_NAME: &str = BASE_RESOURCE_NAME;

/// finalizer 名称，后缀与扩展名称一致
pub const FINALIZER: &str = "extensions.gardener.cloud/gardener-extension-otelcol";

/// 触发方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Trigger {
    /// 常规协调
    Reconcile,
    /// 删除
    Delete,
    /// 集群被强制删除
    ForceDelete,
    /// 控制平面迁移后恢复
    Restore,
    /// 控制平面迁移
    Migrate,
}

/// 意图
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    /// 收敛到期望状态
    Converge,
    /// 删除所有托管对象
    Teardown,
}

impl Trigger {
    /// 触发方式对应的意图
    pub fn intent(self) -> Intent {
        match self {
            Trigger::Reconcile | Trigger::Restore | Trigger::Migrate => Intent::Converge,
            Trigger::Delete | Trigger::ForceDelete => Intent::Teardown,
        }
    }

    /// 指标标签值
    pub fn as_str(self) -> &'static str {
        match self {
            Trigger::Reconcile => "reconcile",
            Trigger::Delete => "delete",
            Trigger::ForceDelete => "force_delete",
            Trigger::Restore => "restore",
            Trigger::Migrate => "migrate",
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 删除托管资源的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownReason {
    /// 特性开关缺失或关闭
    FeatureDisabled,
}

/// 收敛计划
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Plan {
    /// 删除托管资源
    Teardown(TeardownReason),
    /// 集群休眠，不做任何变更
    SkipHibernated,
    /// 下发渲染好的资源包
    Converge(ManagedResourceBundle),
}

/// 单次调用的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// 托管资源已下发
    Applied,
    /// 托管资源已删除
    Removed,
    /// 集群休眠，跳过
    Skipped,
}

/// 读取扩展资源中本扩展的配置载荷
fn provider_config(extension: &Extension) -> Option<&RawExtension> {
    extension
        .spec
        .provider_config
        .as_ref()
        .filter(|raw| !raw.0.is_null())
}

/// 解码并校验载荷
pub(crate) fn decode_and_validate(
    decoder: &ConfigDecoder,
    raw: Option<&RawExtension>,
) -> std::result::Result<otelcol_common::CollectorConfig, ConfigurationError> {
    let extension_type = EXTENSION_TYPE.to_string();
    let raw = raw.ok_or_else(|| ConfigurationError::MissingProviderConfig {
        extension_type: extension_type.clone(),
    })?;

    let bytes = serde_json::to_vec(&raw.0).map_err(|e| ConfigurationError::Decode {
        extension_type: extension_type.clone(),
        source: e.into(),
    })?;

    let config = decoder
        .decode(&bytes)
        .map_err(|source| ConfigurationError::Decode {
            extension_type: extension_type.clone(),
            source,
        })?;

    validate(&config).map_err(|source| ConfigurationError::Invalid {
        extension_type,
        source,
    })?;

    Ok(config)
}

/// 计算收敛计划
///
/// 纯函数：只读取参数，不访问集群。依次检查特性开关、休眠状态、配置有效性，
/// 全部通过后渲染资源包。
pub fn plan(
    extension: &Extension,
    context: &ClusterContext,
    decoder: &ConfigDecoder,
    renderer: &Renderer,
) -> Result<Plan> {
    if !context.feature_enabled() {
        return Ok(Plan::Teardown(TeardownReason::FeatureDisabled));
    }

    if context.hibernated {
        return Ok(Plan::SkipHibernated);
    }

    let config = decode_and_validate(decoder, provider_config(extension))?;
    let namespace = extension.namespace().unwrap_or_default();
    let bundle = renderer.render(&namespace, &config)?;

    Ok(Plan::Converge(bundle))
}

/// 扩展执行器
pub struct Actuator {
    /// providerConfig 解码器
    decoder: ConfigDecoder,
    /// 期望状态渲染器
    renderer: Renderer,
    /// 托管资源下发器
    bundler: Arc<dyn Bundler>,
    /// 集群上下文来源
    source: Arc<dyn ClusterContextSource>,
    /// gardenlet 下发的特性开关
    feature_gates: FeatureGates,
    /// 操作指标
    metrics: ActuatorMetrics,
}

impl Actuator {
    /// 创建新的执行器
    pub fn new(
        decoder: ConfigDecoder,
        renderer: Renderer,
        bundler: Arc<dyn Bundler>,
        source: Arc<dyn ClusterContextSource>,
        feature_gates: FeatureGates,
        metrics: ActuatorMetrics,
    ) -> Self {
        Self {
            decoder,
            renderer,
            bundler,
            source,
            feature_gates,
            metrics,
        }
    }

    /// 处理一次触发
    ///
    /// 每次触发都会让 `otelcol_actuator_operations_total` 按触发方式加一，无论成功与否。
    /// 非本扩展类型的资源返回 `ExtensionNotFound`。
    #[instrument(skip_all, fields(name = %extension.name_any(), cluster = tracing::field::Empty, trigger = %trigger))]
    pub async fn run(
        &self,
        trigger: Trigger,
        extension: &Extension,
        cancel: &CancellationToken,
    ) -> Result<Outcome> {
        if extension.spec.type_ != EXTENSION_TYPE {
            return Err(OperatorError::ExtensionNotFound(extension.spec.type_.clone()));
        }

        // 集群名称与扩展资源所在命名空间相同
        let cluster = extension.namespace().unwrap_or_default();
        tracing::Span::current().record("cluster", cluster.as_str());

        self.metrics.record(&cluster, trigger);

        match trigger.intent() {
            Intent::Teardown => {
                if trigger == Trigger::ForceDelete {
                    info!("集群已被强制删除，删除扩展管理的资源");
                } else {
                    info!("删除扩展管理的资源");
                }
                self.teardown(&cluster, cancel).await
            }
            Intent::Converge => self.converge(extension, &cluster, cancel).await,
        }
    }

    /// 常规协调
    pub async fn reconcile(&self, extension: &Extension, cancel: &CancellationToken) -> Result<Outcome> {
        self.run(Trigger::Reconcile, extension, cancel).await
    }

    /// 删除
    pub async fn delete(&self, extension: &Extension, cancel: &CancellationToken) -> Result<Outcome> {
        self.run(Trigger::Delete, extension, cancel).await
    }

    /// 强制删除
    pub async fn force_delete(&self, extension: &Extension, cancel: &CancellationToken) -> Result<Outcome> {
        self.run(Trigger::ForceDelete, extension, cancel).await
    }

    /// 恢复
    pub async fn restore(&self, extension: &Extension, cancel: &CancellationToken) -> Result<Outcome> {
        self.run(Trigger::Restore, extension, cancel).await
    }

    /// 迁移
    pub async fn migrate(&self, extension: &Extension, cancel: &CancellationToken) -> Result<Outcome> {
        self.run(Trigger::Migrate, extension, cancel).await
    }

    async fn converge(
        &self,
        extension: &Extension,
        cluster: &str,
        cancel: &CancellationToken,
    ) -> Result<Outcome> {
        info!("协调扩展");

        // 特性开关不依赖集群状态，关闭时即使 Cluster 不可读也要删除
        if !self.feature_gates.is_enabled(FEATURE_GATE) {
            return self.teardown_disabled(cluster, cancel).await;
        }

        let mut context = tokio::select! {
            _ = cancel.cancelled() => return Err(OperatorError::Cancelled),
            context = self.source.fetch(cluster) => context?,
        };
        context.feature_gates = self.feature_gates.clone();

        match plan(extension, &context, &self.decoder, &self.renderer)? {
            Plan::Teardown(TeardownReason::FeatureDisabled) => self.teardown_disabled(cluster, cancel).await,
            Plan::SkipHibernated => {
                debug!("集群处于休眠状态，跳过");
                Ok(Outcome::Skipped)
            }
            Plan::Converge(bundle) => {
                if cancel.is_cancelled() {
                    return Err(OperatorError::Cancelled);
                }
                self.bundler.apply(cluster, &bundle).await?;
                Ok(Outcome::Applied)
            }
        }
    }

    async fn teardown_disabled(&self, cluster: &str, cancel: &CancellationToken) -> Result<Outcome> {
        info!("gardenlet 特性开关 OpenTelemetryCollector 缺失或已关闭");
        self.teardown(cluster, cancel).await
    }

    async fn teardown(&self, cluster: &str, cancel: &CancellationToken) -> Result<Outcome> {
        if cancel.is_cancelled() {
            return Err(OperatorError::Cancelled);
        }
        self.bundler.remove(cluster, MANAGED_RESOURCE_NAME).await?;
        Ok(Outcome::Removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::{BundleError, MockBundler};
    use crate::cluster::{FeatureGates, MockClusterContextSource, FEATURE_GATE};
    use crate::config::create_default_config;
    use crate::crd::ExtensionSpec;
    use async_trait::async_trait;
    use prometheus::Registry;
    use rstest::rstest;
    use serde_json::json;
    use std::sync::Mutex;

    const NAMESPACE: &str = "shoot--garden--local";

    fn extension(provider_config: Option<serde_json::Value>) -> Extension {
        let mut ext = Extension::new(
            "otelcol",
            ExtensionSpec {
                type_: EXTENSION_TYPE.to_string(),
                class: None,
                provider_config: provider_config.map(RawExtension),
            },
        );
        ext.metadata.namespace = Some(NAMESPACE.to_string());
        ext
    }

    fn valid_config() -> serde_json::Value {
        json!({
            "apiVersion": "otelcol.extensions.gardener.cloud/v1alpha1",
            "kind": "CollectorConfig",
            "spec": {
                "exporters": {
                    "otlphttp": { "enabled": true, "endpoint": "https://otlp.example.com:4318" }
                }
            }
        })
    }

    fn context(gate: bool, hibernated: bool) -> ClusterContext {
        ClusterContext {
            name: NAMESPACE.to_string(),
            hibernated,
            feature_gates: FeatureGates::from_iter([(FEATURE_GATE, gate)]),
        }
    }

    fn renderer() -> Renderer {
        Renderer::new(create_default_config().images)
    }

    fn metrics() -> ActuatorMetrics {
        ActuatorMetrics::new(&Registry::new()).unwrap()
    }

    fn source(ctx: ClusterContext) -> Arc<MockClusterContextSource> {
        let mut source = MockClusterContextSource::new();
        source.expect_fetch().returning(move |_| Ok(ctx.clone()));
        Arc::new(source)
    }

    fn actuator(bundler: Arc<dyn Bundler>, ctx: ClusterContext, metrics: ActuatorMetrics) -> Actuator {
        let gates = ctx.feature_gates.clone();
        Actuator::new(ConfigDecoder::new(), renderer(), bundler, source(ctx), gates, metrics)
    }

    fn unreachable_cluster(code: u16) -> Arc<MockClusterContextSource> {
        let mut source = MockClusterContextSource::new();
        source.expect_fetch().returning(move |_| {
            Err(OperatorError::Kube(kube::Error::Api(kube::error::ErrorResponse {
                status: "Failure".into(),
                message: "clusters not found".into(),
                reason: "NotFound".into(),
                code,
            })))
        });
        Arc::new(source)
    }

    /// 记录每次下发内容的下发器
    #[derive(Default)]
    struct RecordingBundler {
        applied: Mutex<Vec<ManagedResourceBundle>>,
        removed: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Bundler for RecordingBundler {
        async fn apply(&self, _namespace: &str, bundle: &ManagedResourceBundle) -> std::result::Result<(), BundleError> {
            self.applied.lock().unwrap().push(bundle.clone());
            Ok(())
        }

        async fn remove(&self, _namespace: &str, name: &str) -> std::result::Result<(), BundleError> {
            self.removed.lock().unwrap().push(name.to_string());
            Ok(())
        }
    }

    #[rstest]
    #[case(Trigger::Reconcile, Intent::Converge, "reconcile")]
    #[case(Trigger::Restore, Intent::Converge, "restore")]
    #[case(Trigger::Migrate, Intent::Converge, "migrate")]
    #[case(Trigger::Delete, Intent::Teardown, "delete")]
    #[case(Trigger::ForceDelete, Intent::Teardown, "force_delete")]
    fn test_trigger_mapping(#[case] trigger: Trigger, #[case] intent: Intent, #[case] label: &str) {
        assert_eq!(trigger.intent(), intent);
        assert_eq!(trigger.as_str(), label);
    }

    #[test]
    fn test_plan_feature_disabled() {
        let plan = plan(
            &extension(Some(valid_config())),
            &context(false, false),
            &ConfigDecoder::new(),
            &renderer(),
        )
        .unwrap();
        assert_eq!(plan, Plan::Teardown(TeardownReason::FeatureDisabled));
    }

    #[test]
    fn test_plan_hibernated_skips_validation() {
        // 休眠时即使配置缺失也不报错
        let plan = plan(&extension(None), &context(true, true), &ConfigDecoder::new(), &renderer()).unwrap();
        assert_eq!(plan, Plan::SkipHibernated);
    }

    #[test]
    fn test_plan_missing_provider_config() {
        let err = plan(&extension(None), &context(true, false), &ConfigDecoder::new(), &renderer()).unwrap_err();
        assert!(err.is_configuration_error());
        assert_eq!(err.to_string(), "no provider config specified for otelcol");
    }

    #[test]
    fn test_plan_distinguishes_decode_and_validation_errors() {
        let undecodable = json!({ "apiVersion": "v1", "kind": "ConfigMap" });
        let err = plan(&extension(Some(undecodable)), &context(true, false), &ConfigDecoder::new(), &renderer())
            .unwrap_err();
        assert!(err.to_string().starts_with("invalid provider spec configuration for otelcol: "));

        let invalid = json!({
            "apiVersion": "otelcol.extensions.gardener.cloud/v1alpha1",
            "kind": "CollectorConfig",
            "spec": { "exporters": {} }
        });
        let err = plan(&extension(Some(invalid)), &context(true, false), &ConfigDecoder::new(), &renderer())
            .unwrap_err();
        assert!(err.to_string().starts_with("invalid extension configuration for otelcol: "));
        assert!(err.to_string().contains("no exporter enabled"));
    }

    #[test]
    fn test_plan_converge() {
        match plan(&extension(Some(valid_config())), &context(true, false), &ConfigDecoder::new(), &renderer()) {
            Ok(Plan::Converge(bundle)) => {
                assert_eq!(bundle.name, MANAGED_RESOURCE_NAME);
                assert!(bundle.keys().all(|k| k.contains(NAMESPACE)));
            }
            other => panic!("unexpected plan: {:?}", other),
        }
    }

    #[test_log::test(tokio::test)]
    async fn test_reconcile_applies_bundle() {
        let mut bundler = MockBundler::new();
        bundler
            .expect_apply()
            .withf(|namespace, bundle| namespace == NAMESPACE && bundle.name == "external-otelcol")
            .times(1)
            .returning(|_, _| Ok(()));
        bundler.expect_remove().never();

        let actuator = actuator(Arc::new(bundler), context(true, false), metrics());
        let outcome = actuator
            .reconcile(&extension(Some(valid_config())), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Applied);
    }

    #[test_log::test(tokio::test)]
    async fn test_hibernated_cluster_makes_no_bundler_calls() {
        let mut bundler = MockBundler::new();
        bundler.expect_apply().never();
        bundler.expect_remove().never();

        let actuator = actuator(Arc::new(bundler), context(true, true), metrics());
        for trigger in [Trigger::Reconcile, Trigger::Restore, Trigger::Migrate] {
            let outcome = actuator
                .run(trigger, &extension(Some(valid_config())), &CancellationToken::new())
                .await
                .unwrap();
            assert_eq!(outcome, Outcome::Skipped);
        }
    }

    #[test_log::test(tokio::test)]
    async fn test_feature_gate_off_behaves_like_delete() {
        let disabled = Arc::new(RecordingBundler::default());
        actuator(disabled.clone(), context(false, false), metrics())
            .reconcile(&extension(Some(valid_config())), &CancellationToken::new())
            .await
            .unwrap();

        let deleted = Arc::new(RecordingBundler::default());
        actuator(deleted.clone(), context(true, false), metrics())
            .delete(&extension(Some(valid_config())), &CancellationToken::new())
            .await
            .unwrap();

        assert!(disabled.applied.lock().unwrap().is_empty());
        assert_eq!(*disabled.removed.lock().unwrap(), *deleted.removed.lock().unwrap());
        assert_eq!(*deleted.removed.lock().unwrap(), vec!["external-otelcol".to_string()]);
    }

    #[test_log::test(tokio::test)]
    async fn test_invalid_config_never_applies() {
        let mut bundler = MockBundler::new();
        bundler.expect_apply().never();
        bundler.expect_remove().never();

        let invalid = json!({
            "apiVersion": "otelcol.extensions.gardener.cloud/v1alpha1",
            "kind": "CollectorConfig",
            "spec": { "exporters": { "otlphttp": { "enabled": true, "endpoint": "not a url" } } }
        });

        let actuator = actuator(Arc::new(bundler), context(true, false), metrics());
        let err = actuator
            .reconcile(&extension(Some(invalid)), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_configuration_error());
        assert!(!err.is_retryable());
    }

    #[test_log::test(tokio::test)]
    async fn test_delete_ignores_config_and_hibernation() {
        let bundler = Arc::new(RecordingBundler::default());
        let actuator = actuator(bundler.clone(), context(true, true), metrics());

        actuator.delete(&extension(None), &CancellationToken::new()).await.unwrap();
        actuator.force_delete(&extension(None), &CancellationToken::new()).await.unwrap();

        assert_eq!(bundler.removed.lock().unwrap().len(), 2);
    }

    #[test_log::test(tokio::test)]
    async fn test_repeated_reconcile_submits_identical_bundle() {
        let bundler = Arc::new(RecordingBundler::default());
        let actuator = actuator(bundler.clone(), context(true, false), metrics());
        let ext = extension(Some(valid_config()));

        actuator.reconcile(&ext, &CancellationToken::new()).await.unwrap();
        actuator.reconcile(&ext, &CancellationToken::new()).await.unwrap();

        let applied = bundler.applied.lock().unwrap();
        assert_eq!(applied.len(), 2);
        assert_eq!(applied[0], applied[1]);
    }

    #[test_log::test(tokio::test)]
    async fn test_cancelled_pass_never_calls_bundler() {
        let mut bundler = MockBundler::new();
        bundler.expect_apply().never();
        bundler.expect_remove().never();

        let actuator = actuator(Arc::new(bundler), context(true, false), metrics());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = actuator
            .reconcile(&extension(Some(valid_config())), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, OperatorError::Cancelled));

        let err = actuator.delete(&extension(None), &cancel).await.unwrap_err();
        assert!(matches!(err, OperatorError::Cancelled));
    }

    #[test_log::test(tokio::test)]
    async fn test_transient_apply_failure_is_retryable() {
        let mut bundler = MockBundler::new();
        bundler.expect_apply().returning(|_, _| {
            Err(BundleError::Kube(kube::Error::Api(kube::error::ErrorResponse {
                status: "Failure".into(),
                message: "etcd unavailable".into(),
                reason: "ServiceUnavailable".into(),
                code: 503,
            })))
        });

        let actuator = actuator(Arc::new(bundler), context(true, false), metrics());
        let err = actuator
            .reconcile(&extension(Some(valid_config())), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(!err.is_configuration_error());
        assert!(err.is_retryable());
    }

    #[test_log::test(tokio::test)]
    async fn test_foreign_extension_type() {
        let mut bundler = MockBundler::new();
        bundler.expect_apply().never();
        bundler.expect_remove().never();

        let mut ext = extension(Some(valid_config()));
        ext.spec.type_ = "shoot-dns-service".to_string();

        let metrics = metrics();
        let actuator = actuator(Arc::new(bundler), context(true, false), metrics.clone());
        let err = actuator.reconcile(&ext, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, OperatorError::ExtensionNotFound(_)));
        assert!(crate::error::ignore_extension_not_found(err).is_ok());
        assert_eq!(metrics.count(NAMESPACE, Trigger::Reconcile), 0);
    }

    #[test_log::test(tokio::test)]
    async fn test_every_trigger_counts_once() {
        let metrics = metrics();
        let bundler = Arc::new(RecordingBundler::default());
        let actuator = actuator(bundler, context(false, false), metrics.clone());
        let ext = extension(Some(valid_config()));
        let cancel = CancellationToken::new();

        actuator.reconcile(&ext, &cancel).await.unwrap();
        actuator.restore(&ext, &cancel).await.unwrap();
        actuator.migrate(&ext, &cancel).await.unwrap();
        actuator.delete(&ext, &cancel).await.unwrap();
        actuator.force_delete(&ext, &cancel).await.unwrap();

        // 特性开关关闭时 reconcile 走删除流程，但只按 reconcile 计数
        for trigger in [
            Trigger::Reconcile,
            Trigger::Restore,
            Trigger::Migrate,
            Trigger::Delete,
            Trigger::ForceDelete,
        ] {
            assert_eq!(metrics.count(NAMESPACE, trigger), 1, "{}", trigger);
        }
    }

    #[tokio::test]
    async fn test_context_fetch_failure_is_transient() {
        let mut bundler = MockBundler::new();
        bundler.expect_apply().never();

        let actuator = Actuator::new(
            ConfigDecoder::new(),
            renderer(),
            Arc::new(bundler),
            unreachable_cluster(500),
            FeatureGates::from_iter([(FEATURE_GATE, true)]),
            metrics(),
        );
        let err = actuator
            .reconcile(&extension(Some(valid_config())), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[test_log::test(tokio::test)]
    async fn test_feature_gate_off_tears_down_without_cluster() {
        for code in [404, 500] {
            let bundler = Arc::new(RecordingBundler::default());
            let actuator = Actuator::new(
                ConfigDecoder::new(),
                renderer(),
                bundler.clone(),
                unreachable_cluster(code),
                FeatureGates::default(),
                metrics(),
            );

            let outcome = actuator
                .reconcile(&extension(Some(valid_config())), &CancellationToken::new())
                .await
                .unwrap();
            assert_eq!(outcome, Outcome::Removed);
            assert!(bundler.applied.lock().unwrap().is_empty());
            assert_eq!(*bundler.removed.lock().unwrap(), vec!["external-otelcol".to_string()]);
        }
    }
}
