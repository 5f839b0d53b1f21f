//! 共享库
//!
//! 包含网关各二进制共用的配置加载与可观测性（日志、指标、HTTP 中间件）代码。

pub mod config;
pub mod observability;
