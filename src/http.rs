use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
    routing::{get, post},
    Json, Router,
};
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::error::{LokiMcpError, Result};
use crate::mcp::{process_request, serve_lines, RpcRequest};
use crate::tools::LokiTools;

type Sessions = Arc<RwLock<HashMap<String, mpsc::UnboundedSender<Event>>>>;

#[derive(Clone)]
pub struct AppState {
    pub tools: LokiTools,
    pub sessions: Sessions,
}

impl AppState {
    pub fn new(tools: LokiTools) -> Self {
        Self {
            tools,
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

/// SSE 流被丢弃（客户端断开）时从会话表中移除对应会话。
struct SessionGuard {
    id: String,
    sessions: Sessions,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if let Ok(mut sessions) = self.sessions.write() {
            sessions.remove(&self.id);
        }
        info!(session_id = %self.id, "sse session closed");
    }
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ToolResponse {
    pub text: String,
}

fn error_response(status: StatusCode, error: String) -> axum::response::Response {
    (status, Json(ErrorResponse { error })).into_response()
}

fn status_for(err: &LokiMcpError) -> StatusCode {
    match err {
        LokiMcpError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        LokiMcpError::TransportError { .. } | LokiMcpError::ParseError(_) => StatusCode::BAD_GATEWAY,
        LokiMcpError::ConfigError(_) | LokiMcpError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn list_tools_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({ "tools": state.tools.definitions() }))
}

async fn call_tool_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
    payload: std::result::Result<Json<Value>, JsonRejection>,
) -> impl IntoResponse {
    let args = match payload {
        Ok(Json(args)) => args,
        Err(e) => {
            return error_response(StatusCode::BAD_REQUEST, format!("invalid request body: {e}"))
        }
    };

    match state.tools.call(&name, args).await {
        Ok(text) => (StatusCode::OK, Json(ToolResponse { text })).into_response(),
        Err(e) => {
            warn!(tool = %name, error = %e, "tool call failed");
            error_response(status_for(&e), e.to_string())
        }
    }
}

async fn sse_handler(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = std::result::Result<Event, axum::Error>>> {
    let (tx, rx) = mpsc::unbounded_channel();
    let session_id = format!("{}", chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0));

    // MCP SSE 约定：先推送 endpoint 事件，客户端随后向该地址 POST 请求。
    let endpoint_url = format!("/message?session_id={session_id}");
    let _ = tx.send(Event::default().event("endpoint").data(endpoint_url));

    if let Ok(mut sessions) = state.sessions.write() {
        sessions.insert(session_id.clone(), tx);
    }
    info!(%session_id, "sse session opened");

    let guard = SessionGuard {
        id: session_id,
        sessions: state.sessions.clone(),
    };
    let stream = futures::stream::unfold((rx, guard), |(mut rx, guard)| async move {
        rx.recv()
            .await
            .map(|event| (Ok::<_, axum::Error>(event), (rx, guard)))
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

#[derive(Deserialize)]
struct MessageQuery {
    session_id: String,
}

async fn message_handler(
    State(state): State<AppState>,
    Query(q): Query<MessageQuery>,
    Json(req): Json<RpcRequest>,
) -> impl IntoResponse {
    let sender = state
        .sessions
        .read()
        .ok()
        .and_then(|sessions| sessions.get(&q.session_id).cloned());

    let Some(sender) = sender else {
        return StatusCode::NOT_FOUND;
    };

    let tools = state.tools.clone();
    let sessions = state.sessions.clone();
    tokio::spawn(async move {
        let Some(resp) = process_request(&tools, req).await else {
            return;
        };
        let Ok(json_str) = serde_json::to_string(&resp) else {
            return;
        };
        if sender.send(Event::default().event("message").data(json_str)).is_err() {
            // 客户端已断开
            if let Ok(mut s) = sessions.write() {
                s.remove(&q.session_id);
            }
        }
    });
    StatusCode::ACCEPTED
}

pub fn build_router(tools: LokiTools) -> Router {
    router_with_state(AppState::new(tools))
}

pub fn router_with_state(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/tools", get(list_tools_handler))
        .route("/tools/:name", post(call_tool_handler))
        .route("/sse", get(sse_handler))
        .route("/message", post(message_handler))
        .with_state(state)
}

pub async fn serve_http(tools: LokiTools, addr: &str) -> Result<()> {
    let router = build_router(tools);
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| LokiMcpError::ConfigError(format!("bind {addr} failed: {e}")))?;
    info!("HTTP server listening on http://{addr}");
    axum::serve(listener, router).await.map_err(|e| e.into())
}

/// `both` 模式：同时服务 stdio 与 HTTP。
///
/// 任一方先结束即返回：stdin 关闭时正常退出；HTTP 服务失败（例如端口被占用）时返回其错误。
pub async fn serve_both<R, W>(tools: LokiTools, addr: &str, reader: R, writer: W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let http_tools = tools.clone();
    tokio::select! {
        res = serve_http(http_tools, addr) => {
            if let Err(e) = &res {
                error!(error = %e, "HTTP server stopped");
            }
            res
        }
        res = serve_lines(&tools, reader, writer) => res,
    }
}
