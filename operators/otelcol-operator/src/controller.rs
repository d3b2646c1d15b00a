//! 控制器模块
//!
//! 该模块监听 Extension 资源，管理 finalizer，从资源状态推导触发方式，
//! 调用执行器并把结果写回 `status`。

use chrono::Utc;
use futures::StreamExt;
use kube::{
    api::{Api, Patch, PatchParams},
    client::Client,
    runtime::{
        controller::{Action, Controller as KubeController},
        finalizer::{finalizer, Error as FinalizerError, Event as FinalizerEvent},
        watcher,
    },
    ResourceExt,
};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::actuator::{Actuator, Intent, Outcome, Trigger, EXTENSION_TYPE, FINALIZER};
use crate::config::ControllerConfig;
use crate::crd::{Extension, LastError, LastOperation};
use crate::error::{OperatorError, Result};

/// 迁移和恢复操作的注解
pub const ANNOTATION_OPERATION: &str = "gardener.cloud/operation";

/// 强制删除确认注解
pub const ANNOTATION_FORCE_DELETION: &str = "confirmation.gardener.cloud/force-deletion";

/// 控制器上下文
pub struct ControllerContext {
    /// Kubernetes 客户端
    pub client: Client,
    /// 扩展执行器
    pub actuator: Actuator,
    /// 协调循环配置
    pub settings: ControllerConfig,
    /// 全局停止信号
    pub shutdown: CancellationToken,
}

/// 从资源状态推导触发方式
pub fn trigger_for(extension: &Extension) -> Trigger {
    let annotations = extension.annotations();

    if extension.metadata.deletion_timestamp.is_some() {
        let forced = annotations
            .get(ANNOTATION_FORCE_DELETION)
            .map(|v| v == "true")
            .unwrap_or(false);
        return if forced { Trigger::ForceDelete } else { Trigger::Delete };
    }

    match annotations.get(ANNOTATION_OPERATION).map(String::as_str) {
        Some("migrate") => Trigger::Migrate,
        Some("restore") => Trigger::Restore,
        _ => Trigger::Reconcile,
    }
}

/// 按错误类型决定重试间隔
pub fn requeue_delay(error: &OperatorError, settings: &ControllerConfig) -> Duration {
    if error.is_retryable() {
        Duration::from_secs(settings.transient_error_requeue_seconds)
    } else {
        Duration::from_secs(settings.config_error_requeue_seconds)
    }
}

/// 生成状态补丁
///
/// 成功时清除 `lastError`，失败时写入错误说明和错误代码。
pub fn status_patch(extension: &Extension, trigger: Trigger, result: &Result<Outcome>) -> Value {
    let now = Utc::now();
    let operation_type = match trigger {
        Trigger::Migrate => "Migrate",
        Trigger::Restore => "Restore",
        _ => "Reconcile",
    };

    let (last_operation, last_error) = match result {
        Ok(outcome) => (
            LastOperation {
                type_: operation_type.to_string(),
                state: "Succeeded".to_string(),
                description: match outcome {
                    Outcome::Skipped => "Cluster is hibernated, nothing to do".to_string(),
                    Outcome::Removed => "Managed resources removed".to_string(),
                    Outcome::Applied => "Managed resources applied".to_string(),
                },
                last_update_time: now,
                progress: 100,
            },
            None,
        ),
        Err(err) => (
            LastOperation {
                type_: operation_type.to_string(),
                state: "Error".to_string(),
                description: err.to_string(),
                last_update_time: now,
                progress: 50,
            },
            Some(LastError {
                description: err.to_string(),
                codes: err.error_codes(),
                last_update_time: Some(now),
            }),
        ),
    };

    json!({
        "status": {
            "lastOperation": last_operation,
            "lastError": last_error,
            "observedGeneration": extension.metadata.generation,
        }
    })
}

/// 合并执行器结果和状态更新结果
///
/// 执行器失败时返回执行器的错误，状态更新失败只记录日志，保证错误分类不被覆盖。
pub fn merge_results(result: Result<Outcome>, patched: std::result::Result<(), kube::Error>) -> Result<Outcome> {
    match (result, patched) {
        (Err(err), Err(patch_err)) => {
            warn!(error = %patch_err, "更新扩展状态失败");
            Err(err)
        }
        (Err(err), Ok(())) => Err(err),
        (Ok(_), Err(patch_err)) => Err(patch_err.into()),
        (Ok(outcome), Ok(())) => Ok(outcome),
    }
}

/// 启动 Extension 控制器，直到停止信号触发
pub async fn run_controller(ctx: Arc<ControllerContext>) -> Result<()> {
    let extensions: Api<Extension> = Api::all(ctx.client.clone());
    let shutdown = ctx.shutdown.clone();

    info!(extension_type = EXTENSION_TYPE, "启动 Extension 控制器");

    KubeController::new(extensions, watcher::Config::default())
        .run(reconcile, error_policy, ctx)
        .take_until(shutdown.cancelled())
        .for_each(|result| async move {
            match result {
                Ok((obj, action)) => debug!(name = %obj.name, namespace = ?obj.namespace, ?action, "协调成功"),
                Err(e) => error!(error = %e, "协调错误"),
            }
        })
        .await;

    info!("Extension 控制器已停止");
    Ok(())
}

/// 协调入口
#[instrument(skip(extension, ctx), fields(name = %extension.name_any(), namespace = ?extension.namespace()))]
async fn reconcile(extension: Arc<Extension>, ctx: Arc<ControllerContext>) -> Result<Action> {
    if extension.spec.type_ != EXTENSION_TYPE {
        debug!(extension_type = %extension.spec.type_, "非本扩展类型，跳过");
        return Ok(Action::await_change());
    }

    let namespace = extension.namespace().unwrap_or_default();
    let api: Api<Extension> = Api::namespaced(ctx.client.clone(), &namespace);

    // 单次协调的取消令牌：全局停止或超时都会触发
    let cancel = ctx.shutdown.child_token();
    let timer = {
        let cancel = cancel.clone();
        let timeout = ctx.settings.reconcile_timeout();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            cancel.cancel();
        })
    };

    let (api_ref, ctx_ref, cancel_ref) = (&api, ctx.as_ref(), &cancel);
    let result = finalizer(&api, FINALIZER, extension, |event| async move {
        match event {
            FinalizerEvent::Apply(extension) => apply(api_ref, extension, ctx_ref, cancel_ref).await,
            FinalizerEvent::Cleanup(extension) => cleanup(extension, ctx_ref, cancel_ref).await,
        }
    })
    .await;

    timer.abort();

    result.map_err(|e| match e {
        FinalizerError::ApplyFailed(err) | FinalizerError::CleanupFailed(err) => err,
        other => OperatorError::Finalizer(other.to_string()),
    })
}

/// 收敛：Reconcile、Restore、Migrate
async fn apply(
    api: &Api<Extension>,
    extension: Arc<Extension>,
    ctx: &ControllerContext,
    cancel: &CancellationToken,
) -> Result<Action> {
    let trigger = trigger_for(&extension);
    let result = ctx.actuator.run(trigger, &extension, cancel).await;

    let patch = status_patch(&extension, trigger, &result);
    let patched = api
        .patch_status(
            &extension.name_any(),
            &PatchParams::default(),
            &Patch::Merge(&patch),
        )
        .await
        .map(|_| ());

    merge_results(result, patched)?;

    if matches!(trigger, Trigger::Migrate | Trigger::Restore) {
        remove_operation_annotation(api, &extension).await?;
    }

    Ok(Action::requeue(ctx.settings.requeue_interval()))
}

/// 删除：Delete、ForceDelete
async fn cleanup(
    extension: Arc<Extension>,
    ctx: &ControllerContext,
    cancel: &CancellationToken,
) -> Result<Action> {
    let trigger = trigger_for(&extension);
    debug_assert_eq!(trigger.intent(), Intent::Teardown);

    ctx.actuator.run(trigger, &extension, cancel).await?;
    Ok(Action::await_change())
}

/// 操作完成后移除 `gardener.cloud/operation` 注解
async fn remove_operation_annotation(api: &Api<Extension>, extension: &Extension) -> Result<()> {
    let mut annotations = Map::new();
    annotations.insert(ANNOTATION_OPERATION.to_string(), Value::Null);
    let patch = json!({ "metadata": { "annotations": annotations } });
    api.patch(&extension.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
        .await?;

    info!(name = %extension.name_any(), "已移除操作注解");
    Ok(())
}

/// 错误处理策略
fn error_policy(extension: Arc<Extension>, error: &OperatorError, ctx: Arc<ControllerContext>) -> Action {
    let delay = requeue_delay(error, &ctx.settings);

    if error.is_configuration_error() {
        warn!(name = %extension.name_any(), error = %error, delay_secs = delay.as_secs(), "扩展配置错误");
    } else {
        error!(name = %extension.name_any(), error = %error, delay_secs = delay.as_secs(), "协调失败，稍后重试");
    }

    Action::requeue(delay)
}

/// 控制器
pub struct Controller {
    /// 控制器上下文
    ctx: Arc<ControllerContext>,
}

impl Controller {
    /// 创建新的控制器
    pub fn new(ctx: ControllerContext) -> Self {
        Self { ctx: Arc::new(ctx) }
    }

    /// 运行控制器，直到停止信号触发
    pub async fn run(&self) -> Result<()> {
        run_controller(self.ctx.clone()).await
    }

    /// 停止控制器
    pub fn stop(&self) {
        self.ctx.shutdown.cancel();
    }
}
