//! 准入 webhook 服务模块
//!
//! 通过 HTTP 接收 `AdmissionReview` 请求，调用 `ShootValidator` 校验 Shoot，
//! 并返回允许或拒绝的 `AdmissionReview` 响应。TLS 在进程外终止。

use hyper::{
    service::{make_service_fn, service_fn},
    Body, Method, Request, Response, Server, StatusCode,
};
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::admission::ShootValidator;
use crate::crd::Shoot;
use crate::error::Result;

/// 处理一个序列化的 `AdmissionReview`，返回序列化的响应
pub fn handle_review(validator: &ShootValidator, body: &[u8]) -> Result<Vec<u8>> {
    let review: AdmissionReview<Shoot> = match serde_json::from_slice(body) {
        Ok(review) => review,
        Err(e) => {
            warn!("无法解析 AdmissionReview: {}", e);
            return Ok(serde_json::to_vec(&AdmissionResponse::invalid(e.to_string()).into_review())?);
        }
    };

    let request: AdmissionRequest<Shoot> = match review.try_into() {
        Ok(request) => request,
        Err(e) => {
            warn!("AdmissionReview 中缺少请求: {}", e);
            return Ok(serde_json::to_vec(&AdmissionResponse::invalid(e.to_string()).into_review())?);
        }
    };

    let response = review_request(validator, &request);
    Ok(serde_json::to_vec(&response.into_review())?)
}

/// 对单个准入请求做出决定
fn review_request(validator: &ShootValidator, request: &AdmissionRequest<Shoot>) -> AdmissionResponse {
    let response = AdmissionResponse::from(request);

    // 删除请求没有新对象
    let Some(shoot) = request.object.as_ref() else {
        return response;
    };

    match validator.check(shoot, request.old_object.as_ref()) {
        Ok(()) => {
            debug!(name = %request.name, namespace = ?request.namespace, "Shoot 准入校验通过");
            response
        }
        Err(e) => {
            info!(name = %request.name, namespace = ?request.namespace, error = %e, "拒绝 Shoot 变更");
            response.deny(e.to_string())
        }
    }
}

/// 处理单个 HTTP 请求
async fn handle(validator: Arc<ShootValidator>, req: Request<Body>) -> std::result::Result<Response<Body>, hyper::Error> {
    if *req.method() != Method::POST || req.uri().path() != validator.webhook_path() {
        return Ok(status_response(StatusCode::NOT_FOUND, "not found"));
    }

    let body = hyper::body::to_bytes(req.into_body()).await?;
    match handle_review(&validator, &body) {
        Ok(payload) => Ok(Response::builder()
            .status(StatusCode::OK)
            .header("Content-Type", "application/json")
            .body(Body::from(payload))
            .unwrap_or_else(|_| status_response(StatusCode::INTERNAL_SERVER_ERROR, "response error"))),
        Err(e) => {
            error!("处理准入请求失败: {}", e);
            Ok(status_response(StatusCode::INTERNAL_SERVER_ERROR, "internal error"))
        }
    }
}

fn status_response(status: StatusCode, message: &'static str) -> Response<Body> {
    let mut response = Response::new(Body::from(message));
    *response.status_mut() = status;
    response
}

/// 启动 webhook 服务器，直到取消令牌触发
pub async fn serve(
    addr: SocketAddr,
    validator: ShootValidator,
    shutdown: CancellationToken,
) -> hyper::Result<()> {
    let validator = Arc::new(validator);
    info!(
        name = %validator.webhook_name(),
        path = %validator.webhook_path(),
        label = %validator.object_selector_label(),
        "准入 webhook 服务器启动在 {}",
        addr
    );

    let make_svc = make_service_fn(move |_| {
        let validator = validator.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req| handle(validator.clone(), req)))
        }
    });

    Server::try_bind(&addr)?
        .serve(make_svc)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use otelcol_common::ConfigDecoder;
    use serde_json::{json, Value};

    fn validator() -> ShootValidator {
        ShootValidator::new(ConfigDecoder::new()).unwrap()
    }

    fn review(operation: &str, object: Option<Value>) -> Vec<u8> {
        let mut request = json!({
            "uid": "705ab4f5-6393-11e8-b7cc-42010a800002",
            "kind": { "group": "core.gardener.cloud", "version": "v1beta1", "kind": "Shoot" },
            "resource": { "group": "core.gardener.cloud", "version": "v1beta1", "resource": "shoots" },
            "requestKind": { "group": "core.gardener.cloud", "version": "v1beta1", "kind": "Shoot" },
            "requestResource": { "group": "core.gardener.cloud", "version": "v1beta1", "resource": "shoots" },
            "name": "local",
            "namespace": "garden-local",
            "operation": operation,
            "userInfo": { "username": "admin" },
            "dryRun": false
        });
        if let Some(object) = object {
            request["object"] = object;
        }

        serde_json::to_vec(&json!({
            "apiVersion": "admission.k8s.io/v1",
            "kind": "AdmissionReview",
            "request": request
        }))
        .unwrap()
    }

    fn shoot(exporters: Value) -> Value {
        json!({
            "apiVersion": "core.gardener.cloud/v1beta1",
            "kind": "Shoot",
            "metadata": { "name": "local", "namespace": "garden-local" },
            "spec": {
                "extensions": [{
                    "type": "otelcol",
                    "providerConfig": {
                        "apiVersion": "otelcol.extensions.gardener.cloud/v1alpha1",
                        "kind": "CollectorConfig",
                        "spec": { "exporters": exporters }
                    }
                }]
            }
        })
    }

    fn review_response(payload: &[u8]) -> Value {
        let review: Value = serde_json::from_slice(payload).unwrap();
        review["response"].clone()
    }

    #[test]
    fn test_allows_valid_shoot() {
        let body = review("CREATE", Some(shoot(json!({ "debug": { "enabled": true } }))));
        let response = review_response(&handle_review(&validator(), &body).unwrap());

        assert_eq!(response["allowed"], true);
        assert_eq!(response["uid"], "705ab4f5-6393-11e8-b7cc-42010a800002");
    }

    #[test]
    fn test_denies_invalid_shoot() {
        let body = review("UPDATE", Some(shoot(json!({}))));
        let response = review_response(&handle_review(&validator(), &body).unwrap());

        assert_eq!(response["allowed"], false);
        let message = response["status"]["message"].as_str().unwrap();
        assert!(message.contains("invalid extension configuration for otelcol"));
        assert!(message.contains("no exporter enabled"));
    }

    #[test]
    fn test_allows_request_without_object() {
        let body = review("DELETE", None);
        let response = review_response(&handle_review(&validator(), &body).unwrap());
        assert_eq!(response["allowed"], true);
    }

    #[test]
    fn test_malformed_review() {
        let response = review_response(&handle_review(&validator(), b"{not json").unwrap());
        assert_eq!(response["allowed"], false);

        let missing_request = serde_json::to_vec(&json!({
            "apiVersion": "admission.k8s.io/v1",
            "kind": "AdmissionReview"
        }))
        .unwrap();
        let response = review_response(&handle_review(&validator(), &missing_request).unwrap());
        assert_eq!(response["allowed"], false);
    }

    #[tokio::test]
    async fn test_http_routing() {
        let validator = Arc::new(validator());

        let req = Request::get("/webhooks/validate/otelcol").body(Body::empty()).unwrap();
        let resp = handle(validator.clone(), req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let body = review("CREATE", Some(shoot(json!({ "debug": { "enabled": true } }))));
        let req = Request::post("/webhooks/validate/otelcol").body(Body::from(body)).unwrap();
        let resp = handle(validator, req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
