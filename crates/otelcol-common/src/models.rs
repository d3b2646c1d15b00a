//! 数据模型模块
//!
//! 该模块定义扩展 providerConfig 对应的强类型配置模型。

pub mod collector;
