use thiserror::Error;

pub type Result<T> = std::result::Result<T, LokiMcpError>;

#[derive(Debug, Error)]
pub enum LokiMcpError {
    #[error("配置错误: {0}")]
    ConfigError(String),

    /// 网络失败或 Loki 返回非 2xx 状态。
    #[error("Loki 请求失败: {url} - {reason}")]
    TransportError { url: String, reason: String },

    /// 响应结构不符合预期（字段类型错误、时间戳非数字等）。
    #[error("响应解析错误: {0}")]
    ParseError(String),

    #[error("无效请求: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl LokiMcpError {
    /// 是否由调用方输入导致（而不是后端或配置）。
    pub fn is_client_error(&self) -> bool {
        matches!(self, LokiMcpError::InvalidRequest(_))
    }
}
