//! 指标收集与导出模块
//!
//! 该模块定义执行器的操作计数器，并通过 HTTP 以 Prometheus 格式导出，
//! 同时提供 `/healthz` 存活探针端点。

use hyper::{
    service::{make_service_fn, service_fn},
    Body, Method, Request, Response, Server, StatusCode,
};
use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};
use std::convert::Infallible;
use std::net::SocketAddr;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::actuator::Trigger;

/// 执行器操作指标
#[derive(Clone)]
pub struct ActuatorMetrics {
    /// 按集群和操作统计的调用次数
    operations_total: IntCounterVec,
}

impl ActuatorMetrics {
    /// 创建指标并注册到给定的注册表
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let operations_total = IntCounterVec::new(
            Opts::new(
                "otelcol_actuator_operations_total",
                "Total number of operations performed by the actuator",
            ),
            &["cluster", "operation"],
        )?;
        registry.register(Box::new(operations_total.clone()))?;

        Ok(Self { operations_total })
    }

    /// 记录一次操作
    pub fn record(&self, cluster: &str, trigger: Trigger) {
        self.operations_total
            .with_label_values(&[cluster, trigger.as_str()])
            .inc();
    }

    /// 读取当前计数
    pub fn count(&self, cluster: &str, trigger: Trigger) -> u64 {
        self.operations_total
            .with_label_values(&[cluster, trigger.as_str()])
            .get()
    }
}

/// 把注册表编码为 Prometheus 文本格式
fn encode(registry: &Registry) -> Result<(Vec<u8>, String), prometheus::Error> {
    let encoder = TextEncoder::new();
    let mut buffer = vec![];
    encoder.encode(&registry.gather(), &mut buffer)?;
    Ok((buffer, encoder.format_type().to_string()))
}

/// 处理单个指标服务器请求
async fn handle(registry: Registry, req: Request<Body>) -> Result<Response<Body>, hyper::http::Error> {
    match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => match encode(&registry) {
            Ok((buffer, content_type)) => Response::builder()
                .status(StatusCode::OK)
                .header("Content-Type", content_type)
                .body(Body::from(buffer)),
            Err(e) => {
                error!("编码指标失败: {}", e);
                Response::builder()
                    .status(StatusCode::INTERNAL_SERVER_ERROR)
                    .body(Body::from(e.to_string()))
            }
        },
        (&Method::GET, "/healthz") => Response::builder()
            .status(StatusCode::OK)
            .body(Body::from("ok")),
        _ => Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Body::empty()),
    }
}

/// 启动指标服务器，直到取消令牌触发
pub async fn serve(addr: SocketAddr, registry: Registry, shutdown: CancellationToken) -> hyper::Result<()> {
    let make_svc = make_service_fn(move |_| {
        let registry = registry.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req| handle(registry.clone(), req)))
        }
    });

    info!("指标服务器启动在 {}", addr);

    Server::try_bind(&addr)?
        .serve(make_svc)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}
