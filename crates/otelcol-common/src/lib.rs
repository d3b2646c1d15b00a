//! Otelcol Common - 采集器配置的共享模型与校验
//!
//! 该模块提供准入校验和协调器共用的配置模型、解码器、校验器与错误类型。
//! 两条路径使用同一套解码和校验逻辑，保证“配置是否合法”只有一个判定来源。

pub mod decoder;
pub mod error;
pub mod models;
pub mod validation;

/// 重新导出常用类型，方便使用
pub use decoder::{ConfigDecoder, SchemaVersion};
pub use error::{ConfigurationError, DecodeError, FieldError, FieldErrorKind, ValidationErrors};
pub use models::collector::*;
pub use validation::validate;
