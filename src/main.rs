use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use loki_mcp::client::LokiClient;
use loki_mcp::config::{Config, ServerMode};
use loki_mcp::error::Result;
use loki_mcp::http::{serve_both, serve_http};
use loki_mcp::mcp::run_stdio;
use loki_mcp::tools::LokiTools;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // stdout 留给 JSON-RPC，日志一律写 stderr
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cfg_path = env::args().nth(1).map(PathBuf::from);
    let config = Config::load(cfg_path.as_deref())?;
    info!(
        loki = %config.loki.url,
        mode = ?config.server.mode,
        "loki-mcp starting"
    );

    // 客户端只创建一次，所有请求处理器共享
    let client = Arc::new(LokiClient::new(&config.loki)?);
    let tools = LokiTools::new(client, &config.loki);
    let addr = config.http_bind_addr();

    match config.server.mode {
        ServerMode::Stdio => run_stdio(tools).await?,
        ServerMode::Http => serve_http(tools, &addr).await?,
        ServerMode::Both => {
            let stdin = tokio::io::BufReader::new(tokio::io::stdin());
            serve_both(tools, &addr, stdin, tokio::io::stdout()).await?
        }
    }

    Ok(())
}
