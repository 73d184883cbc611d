//! 对外暴露的工具：参数解析 → 分析器 → 文本渲染。stdio 与 HTTP 共用。

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::analyzer::{LogAnalyzer, Scope};
use crate::client::LokiClient;
use crate::config::LokiConfig;
use crate::error::{LokiMcpError, Result};
use crate::render;

#[derive(Debug, Default, Deserialize)]
struct ScopeArgs {
    #[serde(default)]
    namespace: String,
    hours: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct SearchArgs {
    query: String,
    #[serde(default)]
    namespace: String,
    hours: Option<u32>,
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct PodLogsArgs {
    pod_name: String,
    #[serde(default)]
    namespace: String,
    hours: Option<u32>,
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct ListPodsArgs {
    namespace: String,
}

/// 工具集合。持有共享的 Loki 客户端，自身不可变。
#[derive(Clone)]
pub struct LokiTools {
    analyzer: LogAnalyzer,
    default_hours: u32,
    default_limit: usize,
}

impl LokiTools {
    pub fn new(client: Arc<LokiClient>, config: &LokiConfig) -> Self {
        Self {
            analyzer: LogAnalyzer::new(client, config.summary_limit),
            default_hours: config.default_hours,
            default_limit: config.default_limit,
        }
    }

    pub fn names(&self) -> Vec<&'static str> {
        vec![
            "get_error_summary",
            "find_pod_restarts",
            "search_logs",
            "list_namespaces",
            "list_pods",
            "get_pod_logs",
        ]
    }

    /// 调用工具并返回文本结果。未知工具与参数错误都是 `InvalidRequest`。
    pub async fn call(&self, name: &str, args: Value) -> Result<String> {
        debug!(tool = name, %args, "tool call");
        // 没有参数时按空对象处理
        let args = if args.is_null() { json!({}) } else { args };
        match name {
            "get_error_summary" => {
                let a: ScopeArgs = parse_args(name, args)?;
                let scope = self.scope(&a.namespace, a.hours);
                let summary = self.analyzer.error_summary(&scope).await?;
                Ok(render::error_summary(&summary))
            }
            "find_pod_restarts" => {
                let a: ScopeArgs = parse_args(name, args)?;
                let scope = self.scope(&a.namespace, a.hours);
                let summary = self.analyzer.pod_restarts(&scope).await?;
                Ok(render::restart_summary(&summary))
            }
            "search_logs" => {
                let a: SearchArgs = parse_args(name, args)?;
                let scope = self.scope(&a.namespace, a.hours);
                let limit = a.limit.unwrap_or(self.default_limit);
                let result = self.analyzer.search(&a.query, &scope, limit).await?;
                Ok(render::search_result(&result))
            }
            "list_namespaces" => {
                let names = self.analyzer.client().namespaces().await?;
                Ok(render::namespaces(&names))
            }
            "list_pods" => {
                let a: ListPodsArgs = parse_args(name, args)?;
                if a.namespace.is_empty() {
                    return Err(LokiMcpError::InvalidRequest("namespace 不能为空".into()));
                }
                let names = self.analyzer.client().pods_in_namespace(&a.namespace).await?;
                Ok(render::pods(&a.namespace, &names))
            }
            "get_pod_logs" => {
                let a: PodLogsArgs = parse_args(name, args)?;
                let scope = self.scope(&a.namespace, a.hours);
                let limit = a.limit.unwrap_or(self.default_limit);
                let logs = self.analyzer.pod_logs(&a.pod_name, &scope, limit).await?;
                Ok(render::pod_logs(&logs))
            }
            other => Err(LokiMcpError::InvalidRequest(format!("unknown tool: {other}"))),
        }
    }

    fn scope(&self, namespace: &str, hours: Option<u32>) -> Scope {
        Scope::new(Some(namespace), hours.unwrap_or(self.default_hours))
    }

    /// MCP `tools/list` 使用的描述与 JSON Schema。
    pub fn definitions(&self) -> Vec<Value> {
        let namespace = json!({
            "type": "string",
            "description": "Filter to specific namespace (empty = all namespaces)"
        });
        let hours = json!({
            "type": "integer",
            "minimum": 1,
            "description": "Look back this many hours (default: 1)"
        });
        let limit = json!({
            "type": "integer",
            "minimum": 1,
            "description": "Maximum number of log lines to return (default: 100)"
        });
        vec![
            json!({
                "name": "get_error_summary",
                "description": "Get a summary of errors happening in your cluster: error counts, types, affected pods and sample errors.",
                "inputSchema": {
                    "type": "object",
                    "properties": { "namespace": namespace, "hours": hours }
                }
            }),
            json!({
                "name": "find_pod_restarts",
                "description": "Find pods that have restarted or crashed recently, with restart counts and reasons.",
                "inputSchema": {
                    "type": "object",
                    "properties": { "namespace": namespace, "hours": hours }
                }
            }),
            json!({
                "name": "search_logs",
                "description": "Search logs with a regex pattern; matching logs are grouped by pod.",
                "inputSchema": {
                    "type": "object",
                    "required": ["query"],
                    "properties": {
                        "query": { "type": "string", "description": "Regex pattern to search for" },
                        "namespace": namespace,
                        "hours": hours,
                        "limit": limit
                    }
                }
            }),
            json!({
                "name": "list_namespaces",
                "description": "List all namespaces that have logs in Loki.",
                "inputSchema": { "type": "object", "properties": {} }
            }),
            json!({
                "name": "list_pods",
                "description": "List all pods that have logs in a namespace.",
                "inputSchema": {
                    "type": "object",
                    "required": ["namespace"],
                    "properties": { "namespace": { "type": "string" } }
                }
            }),
            json!({
                "name": "get_pod_logs",
                "description": "Get recent logs for a specific pod (pod_name is a regex, e.g. \"ollama.*\").",
                "inputSchema": {
                    "type": "object",
                    "required": ["pod_name"],
                    "properties": {
                        "pod_name": { "type": "string", "description": "Name (regex) of the pod to query" },
                        "namespace": namespace,
                        "hours": hours,
                        "limit": limit
                    }
                }
            }),
        ]
    }
}

fn parse_args<T: for<'de> Deserialize<'de>>(tool: &str, args: Value) -> Result<T> {
    serde_json::from_value(args)
        .map_err(|e| LokiMcpError::InvalidRequest(format!("{tool} 参数无效: {e}")))
}
