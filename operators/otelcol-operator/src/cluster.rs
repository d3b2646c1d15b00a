//! 集群上下文模块
//!
//! 协调需要目标集群的两个事实：是否处于休眠状态，以及 gardenlet 下发的特性开关。
//! 休眠状态在每次收敛时从 Cluster 资源重新获取，不做缓存；特性开关来自控制器配置。

use async_trait::async_trait;
use kube::{api::Api, client::Client};
use std::collections::BTreeMap;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::crd::Cluster;
use crate::error::Result;

/// 控制本扩展是否生效的特性开关
pub const FEATURE_GATE: &str = "OpenTelemetryCollector";

/// 特性开关集合
///
/// 名称统一转为小写保存。同一开关的多种大小写写法同时出现时，
/// 只有全部启用才算启用。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeatureGates(BTreeMap<String, bool>);

impl FeatureGates {
    /// 从名称到开关状态的映射创建
    pub fn new(gates: BTreeMap<String, bool>) -> Self {
        gates.into_iter().collect()
    }

    /// 开关是否存在且已启用，名称不区分大小写
    pub fn is_enabled(&self, name: &str) -> bool {
        self.0
            .get(&name.to_ascii_lowercase())
            .copied()
            .unwrap_or(false)
    }
}

impl<S: Into<String>> FromIterator<(S, bool)> for FeatureGates {
    fn from_iter<I: IntoIterator<Item = (S, bool)>>(iter: I) -> Self {
        let mut gates = BTreeMap::new();
        for (name, enabled) in iter {
            gates
                .entry(name.into().to_ascii_lowercase())
                .and_modify(|current: &mut bool| *current &= enabled)
                .or_insert(enabled);
        }
        Self(gates)
    }
}

/// 目标集群上下文
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterContext {
    /// 集群名称，与扩展资源所在命名空间相同
    pub name: String,
    /// 是否处于休眠状态
    pub hibernated: bool,
    /// 特性开关，由执行器按控制器配置填入
    pub feature_gates: FeatureGates,
}

impl ClusterContext {
    /// 本扩展的特性开关是否启用
    pub fn feature_enabled(&self) -> bool {
        self.feature_gates.is_enabled(FEATURE_GATE)
    }
}

/// 集群上下文来源，只负责集群自身的状态
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterContextSource: Send + Sync {
    /// 获取指定集群的最新上下文
    async fn fetch(&self, name: &str) -> Result<ClusterContext>;
}

/// 从 Cluster 资源读取上下文
pub struct KubeClusterSource {
    /// Kubernetes 客户端
    client: Client,
}

impl KubeClusterSource {
    /// 创建新的上下文来源
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ClusterContextSource for KubeClusterSource {
    async fn fetch(&self, name: &str) -> Result<ClusterContext> {
        let api: Api<Cluster> = Api::all(self.client.clone());
        let cluster = api.get(name).await?;
        let shoot = cluster.shoot_spec()?;

        debug!(cluster = name, hibernated = shoot.hibernation_enabled(), "已获取集群上下文");

        Ok(ClusterContext {
            name: name.to_string(),
            hibernated: shoot.hibernation_enabled(),
            feature_gates: FeatureGates::default(),
        })
    }
}
