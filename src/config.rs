use std::path::Path;
use std::time::Duration;

use reqwest::Url;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{LokiMcpError, Result};

pub const DEFAULT_LOKI_URL: &str = "http://loki.monitoring.svc.cluster.local:3100";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerMode {
    Stdio,
    Http,
    Both,
}

impl std::str::FromStr for ServerMode {
    type Err = LokiMcpError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stdio" => Ok(ServerMode::Stdio),
            "http" => Ok(ServerMode::Http),
            "both" => Ok(ServerMode::Both),
            other => Err(LokiMcpError::ConfigError(format!("未知的运行模式: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_mode")]
    pub mode: ServerMode,
    pub http_addr: Option<String>,
    pub http_port: Option<u16>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            http_addr: None,
            http_port: None,
        }
    }
}

/// Loki 后端及查询默认值。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LokiConfig {
    #[serde(default = "default_url")]
    pub url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// 未指定 hours 时的回溯窗口。
    #[serde(default = "default_hours")]
    pub default_hours: u32,
    /// search_logs / get_pod_logs 未指定 limit 时使用。
    #[serde(default = "default_limit")]
    pub default_limit: usize,
    /// 错误汇总、重启检测单次拉取的最大条数。
    #[serde(default = "default_summary_limit")]
    pub summary_limit: usize,
}

impl Default for LokiConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            timeout_secs: default_timeout_secs(),
            default_hours: default_hours(),
            default_limit: default_limit(),
            summary_limit: default_summary_limit(),
        }
    }
}

impl LokiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// 解析并校验 base URL，只接受 http/https。
    pub fn base_url(&self) -> Result<Url> {
        let url = Url::parse(self.url.trim()).map_err(|e| {
            LokiMcpError::ConfigError(format!("无效的 Loki 地址 {:?}: {e}", self.url))
        })?;
        match url.scheme() {
            "http" | "https" => {}
            other => {
                return Err(LokiMcpError::ConfigError(format!(
                    "Loki 地址协议不受支持: {other}"
                )))
            }
        }
        if url.cannot_be_a_base() || url.host_str().is_none() {
            return Err(LokiMcpError::ConfigError(format!(
                "Loki 地址缺少主机名: {}",
                self.url
            )));
        }
        Ok(url)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub loki: LokiConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

impl Config {
    /// 从 YAML 或 JSON 文件加载（serde_yaml 同样接受 JSON）。
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            LokiMcpError::ConfigError(format!("读取配置文件失败 {}: {e}", path.display()))
        })?;
        let cfg: Config = serde_yaml::from_str(&raw).map_err(|e| {
            LokiMcpError::ConfigError(format!("解析配置文件失败 {}: {e}", path.display()))
        })?;
        info!(path = %path.display(), "config loaded");
        Ok(cfg)
    }

    /// 文件（可选）+ 环境变量覆盖 + 校验。
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut cfg = match path {
            Some(p) => Self::load_from_path(p)?,
            None => Self::default(),
        };
        cfg.apply_env(|key| std::env::var(key).ok())?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// 环境变量覆盖。lookup 抽出来便于测试。
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("LOKI_URL").filter(|v| !v.trim().is_empty()) {
            self.loki.url = url;
        }
        if let Some(secs) = lookup("LOKI_TIMEOUT_SECS") {
            self.loki.timeout_secs = secs.trim().parse().map_err(|_| {
                LokiMcpError::ConfigError(format!("LOKI_TIMEOUT_SECS 不是整数: {secs}"))
            })?;
        }
        if let Some(mode) = lookup("LOKI_MCP_MODE") {
            self.server.mode = mode.parse()?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.loki.base_url()?;
        if self.loki.default_hours == 0 {
            return Err(LokiMcpError::ConfigError("default_hours 必须 >= 1".into()));
        }
        if self.loki.default_limit == 0 || self.loki.summary_limit == 0 {
            return Err(LokiMcpError::ConfigError("limit 必须 >= 1".into()));
        }
        Ok(())
    }

    pub fn http_bind_addr(&self) -> String {
        format!(
            "{}:{}",
            self.server.http_addr.as_deref().unwrap_or("0.0.0.0"),
            self.server.http_port.unwrap_or(3000)
        )
    }
}

fn default_mode() -> ServerMode {
    ServerMode::Stdio
}

fn default_url() -> String {
    DEFAULT_LOKI_URL.to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_hours() -> u32 {
    1
}

fn default_limit() -> usize {
    100
}

fn default_summary_limit() -> usize {
    5000
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn defaults_point_at_in_cluster_loki() {
        let cfg = Config::default();
        assert_eq!(cfg.loki.url, DEFAULT_LOKI_URL);
        assert_eq!(cfg.loki.default_hours, 1);
        assert_eq!(cfg.loki.summary_limit, 5000);
        assert_eq!(cfg.server.mode, ServerMode::Stdio);
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.http_bind_addr(), "0.0.0.0:3000");
    }

    #[test]
    fn yaml_file_with_partial_fields_keeps_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(
            &path,
            "loki:\n  url: http://localhost:3100\nserver:\n  mode: http\n  http_port: 8080\n",
        )
        .unwrap();

        let cfg = Config::load_from_path(&path).unwrap();
        assert_eq!(cfg.loki.url, "http://localhost:3100");
        assert_eq!(cfg.loki.timeout_secs, 30);
        assert_eq!(cfg.server.mode, ServerMode::Http);
        assert_eq!(cfg.http_bind_addr(), "0.0.0.0:8080");
    }

    #[test]
    fn json_file_is_accepted() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"loki": {"url": "https://loki.example.com", "default_limit": 50}}"#)
            .unwrap();

        let cfg = Config::load_from_path(&path).unwrap();
        assert_eq!(cfg.loki.url, "https://loki.example.com");
        assert_eq!(cfg.loki.default_limit, 50);
    }

    #[test]
    fn missing_file_is_config_error() {
        let err = Config::load_from_path(Path::new("/definitely/not/here.yaml")).unwrap_err();
        assert!(matches!(err, LokiMcpError::ConfigError(_)));
    }

    #[test]
    fn env_overrides_file_values() {
        let env: HashMap<&str, &str> = [
            ("LOKI_URL", "http://127.0.0.1:3100"),
            ("LOKI_TIMEOUT_SECS", "5"),
            ("LOKI_MCP_MODE", "both"),
        ]
        .into_iter()
        .collect();

        let mut cfg = Config::default();
        cfg.apply_env(|k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(cfg.loki.url, "http://127.0.0.1:3100");
        assert_eq!(cfg.loki.timeout_secs, 5);
        assert_eq!(cfg.server.mode, ServerMode::Both);
    }

    #[test]
    fn bad_env_timeout_is_rejected() {
        let mut cfg = Config::default();
        let err = cfg
            .apply_env(|k| (k == "LOKI_TIMEOUT_SECS").then(|| "soon".to_string()))
            .unwrap_err();
        assert!(matches!(err, LokiMcpError::ConfigError(_)));
    }

    #[test]
    fn invalid_urls_are_config_errors() {
        for url in ["not a url", "ftp://loki:3100", "unix:/var/run/loki.sock"] {
            let cfg = LokiConfig {
                url: url.to_string(),
                ..LokiConfig::default()
            };
            assert!(
                matches!(cfg.base_url(), Err(LokiMcpError::ConfigError(_))),
                "{url} should be rejected"
            );
        }
    }
}
