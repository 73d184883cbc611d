//! Loki 日志分析 MCP 工具核心库
//! 查询构造 → 范围查询 → 条目解析 → 汇总分析，外加 stdio / HTTP 两种服务入口。

pub mod config;
pub mod error;
pub mod model;
pub mod query;
pub mod client;
pub mod parser;
pub mod analyzer;
pub mod render;
pub mod tools;
pub mod http;
pub mod mcp;
