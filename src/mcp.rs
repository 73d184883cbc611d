use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{info, warn};

use crate::error::Result;
use crate::tools::LokiTools;

pub const PROTOCOL_VERSION: &str = "2024-11-05";

#[derive(Debug, Deserialize)]
pub struct RpcRequest {
    #[serde(default)]
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
}

#[derive(Debug, Deserialize)]
struct CallToolParams {
    name: String,
    #[serde(default)]
    arguments: Value,
}

fn ok(id: Value, result: Value) -> RpcResponse {
    RpcResponse {
        jsonrpc: "2.0".to_string(),
        id,
        result: Some(result),
        error: None,
    }
}

fn rpc_error(id: Value, code: i32, message: String) -> RpcResponse {
    RpcResponse {
        jsonrpc: "2.0".to_string(),
        id,
        result: None,
        error: Some(RpcError { code, message }),
    }
}

pub async fn run_stdio(tools: LokiTools) -> Result<()> {
    info!("serving MCP over stdio");
    serve_lines(&tools, BufReader::new(tokio::io::stdin()), tokio::io::stdout()).await
}

/// 逐行读取 JSON-RPC 请求并逐行写回响应。通知（无 id）不回复。
pub async fn serve_lines<R, W>(tools: &LokiTools, reader: R, mut writer: W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let resp = match serde_json::from_str::<RpcRequest>(&line) {
            Ok(req) => process_request(tools, req).await,
            Err(e) => {
                warn!(error = %e, "unparseable JSON-RPC frame");
                Some(rpc_error(Value::Null, -32700, format!("parse error: {e}")))
            }
        };
        if let Some(resp) = resp {
            write_response(&mut writer, &resp).await?;
        }
    }
    Ok(())
}

/// 处理单个请求。返回 `None` 表示这是一个通知，不需要响应。
pub async fn process_request(tools: &LokiTools, req: RpcRequest) -> Option<RpcResponse> {
    let is_notification = req.id.is_null();
    let resp = match req.method.as_str() {
        "initialize" => ok(
            req.id,
            serde_json::json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": { "tools": {} },
                "serverInfo": {
                    "name": env!("CARGO_PKG_NAME"),
                    "version": env!("CARGO_PKG_VERSION")
                }
            }),
        ),
        "notifications/initialized" | "notifications/cancelled" => {
            if is_notification {
                return None;
            }
            ok(req.id, Value::Bool(true))
        }
        "ping" => ok(req.id, serde_json::json!({})),
        "tools/list" => ok(req.id, serde_json::json!({ "tools": tools.definitions() })),
        "tools/call" => handle_call(tools, req).await,
        _ => {
            if is_notification {
                return None;
            }
            rpc_error(req.id, -32601, format!("method not found: {}", req.method))
        }
    };
    Some(resp)
}

async fn handle_call(tools: &LokiTools, req: RpcRequest) -> RpcResponse {
    let params: CallToolParams = match serde_json::from_value(req.params) {
        Ok(p) => p,
        Err(e) => return rpc_error(req.id, -32602, format!("invalid params: {e}")),
    };
    if !tools.names().iter().any(|n| *n == params.name) {
        return rpc_error(req.id, -32602, format!("unknown tool: {}", params.name));
    }

    // 工具执行失败按 MCP 约定放进结果里（isError），而不是 JSON-RPC 错误。
    let (text, is_error) = match tools.call(&params.name, params.arguments).await {
        Ok(text) => (text, false),
        Err(e) => {
            warn!(tool = %params.name, error = %e, "tool call failed");
            (format!("Error: {e}"), true)
        }
    };
    ok(
        req.id,
        serde_json::json!({
            "content": [{ "type": "text", "text": text }],
            "isError": is_error
        }),
    )
}

async fn write_response<W: AsyncWrite + Unpin>(writer: &mut W, resp: &RpcResponse) -> Result<()> {
    let line = serde_json::to_string(resp).map_err(std::io::Error::from)?;
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::client::testing::{client_with, FixtureTransport};
    use crate::config::LokiConfig;
    use crate::error::LokiMcpError;
    use serde_json::json;

    fn tools_for(transport: Arc<FixtureTransport>) -> LokiTools {
        LokiTools::new(Arc::new(client_with(transport)), &LokiConfig::default())
    }

    async fn roundtrip(tools: &LokiTools, input: &str) -> Vec<RpcResponse> {
        let mut out = Vec::new();
        serve_lines(tools, input.as_bytes(), &mut out).await.unwrap();
        String::from_utf8(out)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn initialize_list_and_notification() {
        let tools = tools_for(FixtureTransport::returning(json!({})));
        let input = concat!(
            r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#, "\n",
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#, "\n",
            r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#, "\n",
        );
        let resps = roundtrip(&tools, input).await;
        assert_eq!(resps.len(), 2);
        let init = resps[0].result.as_ref().unwrap();
        assert_eq!(init["protocolVersion"], PROTOCOL_VERSION);
        assert_eq!(init["serverInfo"]["name"], "loki-mcp");
        let listed = resps[1].result.as_ref().unwrap()["tools"].as_array().unwrap().len();
        assert_eq!(listed, tools.names().len());
    }

    #[tokio::test]
    async fn tools_call_returns_text_content() {
        let body = json!({"data": {"result": [
            {"stream": {"pod_name": "x"}, "values": [["1704067200000000000", "CrashLoopBackOff"]]}
        ]}});
        let tools = tools_for(FixtureTransport::returning(body));
        let input = r#"{"jsonrpc":"2.0","id":"a","method":"tools/call","params":{"name":"find_pod_restarts","arguments":{"hours":3}}}"#;
        let resps = roundtrip(&tools, input).await;
        let result = resps[0].result.as_ref().unwrap();
        assert_eq!(result["isError"], false);
        let text = result["content"][0]["text"].as_str().unwrap();
        assert!(text.starts_with("Pod Restart Summary (last 3 hour(s)):"));
        assert!(text.contains("  x: 1 events"));
    }

    #[tokio::test]
    async fn backend_failure_is_tool_error_not_crash() {
        let tools = tools_for(FixtureTransport::failing(LokiMcpError::TransportError {
            url: "http://loki.test:3100".into(),
            reason: "connection refused".into(),
        }));
        let input = concat!(
            r#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"list_namespaces"}}"#, "\n",
            r#"{"jsonrpc":"2.0","id":2,"method":"ping"}"#, "\n",
        );
        let resps = roundtrip(&tools, input).await;
        assert_eq!(resps.len(), 2);
        let result = resps[0].result.as_ref().unwrap();
        assert_eq!(result["isError"], true);
        assert!(result["content"][0]["text"].as_str().unwrap().contains("connection refused"));
        assert!(resps[1].error.is_none());
    }

    #[tokio::test]
    async fn protocol_errors_use_jsonrpc_codes() {
        let tools = tools_for(FixtureTransport::returning(json!({})));
        let input = concat!(
            "not json\n",
            r#"{"jsonrpc":"2.0","id":1,"method":"resources/list"}"#, "\n",
            r#"{"jsonrpc":"2.0","id":2,"method":"tools/call","params":{"name":"nope"}}"#, "\n",
            r#"{"jsonrpc":"2.0","id":3,"method":"tools/call","params":[]}"#, "\n",
        );
        let resps = roundtrip(&tools, input).await;
        let codes: Vec<i32> = resps.iter().map(|r| r.error.as_ref().unwrap().code).collect();
        assert_eq!(codes, vec![-32700, -32601, -32602, -32602]);
    }

    #[tokio::test]
    async fn response_frame_is_single_jsonrpc_line() {
        let mut out = Vec::new();
        let resp = rpc_error(json!(7), -32601, "method not found: x".into());
        write_response(&mut out, &resp).await.unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.ends_with('\n'));
        assert_eq!(text.matches('\n').count(), 1);
        let v: Value = serde_json::from_str(text.trim_end()).unwrap();
        assert_eq!(v["jsonrpc"], "2.0");
        assert_eq!(v["id"], 7);
        assert_eq!(v["error"]["code"], -32601);
        assert!(v.get("result").is_none());
    }
}
