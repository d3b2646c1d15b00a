//! 配置校验模块
//!
//! 该模块对解码后的 `CollectorConfig` 做结构和语义校验。
//! 校验是无副作用的全函数：所有规则都会执行，违规项全部累积后一次性返回。

use url::Url;

use crate::error::{FieldError, ValidationErrors};
use crate::models::collector::{CollectorConfig, ResourceReference};

/// 导出器集合路径
const EXPORTERS_PATH: &str = "spec.exporters";

/// 校验采集器配置
///
/// 规则：
/// - 至少启用一个导出器
/// - 非空端点必须是合法 URL
/// - 读写缓冲区大小不能为负
/// - 资源引用必须同时填写 name 和 dataKey
pub fn validate(config: &CollectorConfig) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::new();

    validate_exporters_enabled(config, &mut errors);
    validate_url_fields(config, &mut errors);
    validate_non_negative(config, &mut errors);
    validate_resource_references(config, &mut errors);

    errors.into_result()
}

/// 至少启用一个导出器
fn validate_exporters_enabled(config: &CollectorConfig, errors: &mut ValidationErrors) {
    if !config.spec.exporters.any_enabled() {
        errors.push(FieldError::required(EXPORTERS_PATH, "no exporter enabled"));
    }
}

/// 端点字段必须可以解析为 URL
fn validate_url_fields(config: &CollectorConfig, errors: &mut ValidationErrors) {
    let otlp = &config.spec.exporters.otlphttp;
    let url_fields = [
        ("spec.exporters.otlphttp.endpoint", &otlp.endpoint),
        ("spec.exporters.otlphttp.tracesEndpoint", &otlp.traces_endpoint),
        ("spec.exporters.otlphttp.metricsEndpoint", &otlp.metrics_endpoint),
        ("spec.exporters.otlphttp.logsEndpoint", &otlp.logs_endpoint),
        ("spec.exporters.otlphttp.profilesEndpoint", &otlp.profiles_endpoint),
    ];

    for (path, value) in url_fields {
        if !value.is_empty() && Url::parse(value).is_err() {
            errors.push(FieldError::invalid(path, value, "invalid URL specified"));
        }
    }
}

/// HTTP 客户端读写缓冲区不能为负
fn validate_non_negative(config: &CollectorConfig, errors: &mut ValidationErrors) {
    let otlp = &config.spec.exporters.otlphttp;
    let fields = [
        ("spec.exporters.otlphttp.readBufferSize", otlp.read_buffer_size),
        ("spec.exporters.otlphttp.writeBufferSize", otlp.write_buffer_size),
    ];

    for (path, value) in fields {
        if value < 0 {
            errors.push(FieldError::invalid(path, value, "value cannot be negative"));
        }
    }
}

/// 已设置的资源引用必须完整
fn validate_resource_references(config: &CollectorConfig, errors: &mut ValidationErrors) {
    let otlp = &config.spec.exporters.otlphttp;
    let refs: [(&str, Option<&ResourceReference>); 4] = [
        ("spec.exporters.otlphttp.token", otlp.token.as_ref()),
        ("spec.exporters.otlphttp.tls.ca", otlp.tls.ca.as_ref()),
        ("spec.exporters.otlphttp.tls.cert", otlp.tls.cert.as_ref()),
        ("spec.exporters.otlphttp.tls.key", otlp.tls.key.as_ref()),
    ];

    for (path, reference) in refs {
        if let Some(reference) = reference {
            if !reference.is_complete() {
                errors.push(FieldError::invalid(path, path, "name or dataKey is empty"));
            }
        }
    }
}
