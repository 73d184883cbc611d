use std::sync::Arc;

use futures::future::BoxFuture;
use reqwest::Url;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::LokiConfig;
use crate::error::{LokiMcpError, Result};
use crate::model::TimeWindow;
use crate::query::LogQuery;

const QUERY_RANGE_PATH: &str = "loki/api/v1/query_range";
const LABEL_PATH: &str = "loki/api/v1/label";
const VALUES_PATH: &str = "values";

/// 不传 limit 时 query_range 的默认条数。
pub const DEFAULT_QUERY_LIMIT: usize = 1000;

/// HTTP GET 原语：成功返回解码后的 JSON，非 2xx 状态直接报错。
///
/// 连接池、TLS 和超时都归实现方负责。
pub trait Transport: Send + Sync {
    fn get<'a>(&'a self, url: &'a Url, params: &'a [(&'a str, String)]) -> BoxFuture<'a, Result<Value>>;
}

/// 基于 reqwest 的默认实现。
#[derive(Clone)]
pub struct HttpTransport {
    http: reqwest::Client,
}

impl HttpTransport {
    pub fn new(config: &LokiConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| LokiMcpError::ConfigError(format!("创建 HTTP 客户端失败: {e}")))?;
        Ok(Self { http })
    }
}

impl Transport for HttpTransport {
    fn get<'a>(&'a self, url: &'a Url, params: &'a [(&'a str, String)]) -> BoxFuture<'a, Result<Value>> {
        Box::pin(async move {
            let transport_err = |reason: String| LokiMcpError::TransportError {
                url: url.to_string(),
                reason,
            };
            let resp = self
                .http
                .get(url.clone())
                .query(params)
                .send()
                .await
                .map_err(|e| transport_err(e.to_string()))?;

            let status = resp.status();
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                let body = body.trim();
                return Err(transport_err(if body.is_empty() {
                    format!("HTTP {status}")
                } else {
                    format!("HTTP {status}: {body}")
                }));
            }

            resp.json::<Value>()
                .await
                .map_err(|e| LokiMcpError::ParseError(format!("响应不是合法 JSON: {e}")))
        })
    }
}

#[derive(Debug, Default, Deserialize)]
struct LabelValuesResponse {
    #[serde(default)]
    data: Vec<String>,
}

/// Loki 客户端：进程启动时创建一次，通过 `Arc` 共享给各个请求处理器。
#[derive(Clone)]
pub struct LokiClient {
    base: Url,
    transport: Arc<dyn Transport>,
}

impl LokiClient {
    pub fn new(config: &LokiConfig) -> Result<Self> {
        let transport = HttpTransport::new(config)?;
        Self::with_transport(config, Arc::new(transport))
    }

    pub fn with_transport(config: &LokiConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        let mut base = config.base_url()?;
        // 保证以 `/` 结尾，join 时才不会吞掉已有的路径前缀。
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(Self { base, transport })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base
            .join(path)
            .map_err(|e| LokiMcpError::ConfigError(format!("拼接 Loki 地址失败 {path}: {e}")))
    }

    /// 执行一次范围查询，返回未经解释的 JSON。
    pub async fn query_range(
        &self,
        query: &str,
        window: Option<TimeWindow>,
        limit: usize,
    ) -> Result<Value> {
        if limit == 0 {
            return Err(LokiMcpError::InvalidRequest("limit 必须 >= 1".into()));
        }
        let window = match window {
            Some(w) => w,
            None => TimeWindow::last_hours(1)?,
        };
        let (start, end) = window.as_nanos()?;
        let url = self.endpoint(QUERY_RANGE_PATH)?;
        let params = [
            ("query", query.to_string()),
            ("start", start.to_string()),
            ("end", end.to_string()),
            ("limit", limit.to_string()),
        ];
        debug!(%query, start, end, limit, "loki query_range");
        self.transport.get(&url, &params).await.map_err(|e| {
            warn!(%query, error = %e, "loki query_range failed");
            e
        })
    }

    /// 某个标签的全部取值，可选用选择器限定范围。
    pub async fn label_values(&self, label: &str, selector: Option<&str>) -> Result<Vec<String>> {
        if label.is_empty() {
            return Err(LokiMcpError::InvalidRequest("label 不能为空".into()));
        }
        let path = format!(
            "{LABEL_PATH}/{}/{VALUES_PATH}",
            urlencoding::encode(label)
        );
        let url = self.endpoint(&path)?;
        let params: Vec<(&str, String)> = selector
            .filter(|s| !s.is_empty())
            .map(|s| vec![("query", s.to_string())])
            .unwrap_or_default();
        debug!(%label, ?selector, "loki label values");

        let body = self.transport.get(&url, &params).await?;
        let resp: LabelValuesResponse = serde_json::from_value(body)
            .map_err(|e| LokiMcpError::ParseError(format!("标签值响应格式错误: {e}")))?;
        Ok(resp.data)
    }

    pub async fn namespaces(&self) -> Result<Vec<String>> {
        self.label_values("namespace", None).await
    }

    pub async fn pods_in_namespace(&self, namespace: &str) -> Result<Vec<String>> {
        let selector = LogQuery::new().namespace(Some(namespace)).selector();
        self.label_values("pod_name", Some(&selector)).await
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::*;

    /// 记录请求并返回固定响应的假 Transport。
    #[derive(Default)]
    pub struct FixtureTransport {
        responses: Mutex<Vec<Result<Value>>>,
        pub calls: Mutex<Vec<(String, Vec<(String, String)>)>>,
    }

    impl FixtureTransport {
        pub fn returning(body: Value) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(vec![Ok(body)]),
                calls: Mutex::new(Vec::new()),
            })
        }

        pub fn failing(err: LokiMcpError) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(vec![Err(err)]),
                calls: Mutex::new(Vec::new()),
            })
        }

        pub fn param(&self, call: usize, key: &str) -> Option<String> {
            self.calls.lock().unwrap()[call]
                .1
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone())
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    impl Transport for FixtureTransport {
        fn get<'a>(&'a self, url: &'a Url, params: &'a [(&'a str, String)]) -> BoxFuture<'a, Result<Value>> {
            self.calls.lock().unwrap().push((
                url.to_string(),
                params.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
            ));
            let mut responses = self.responses.lock().unwrap();
            // 最后一个响应会被重复返回。
            let next = if responses.len() > 1 {
                responses.remove(0)
            } else {
                match responses.first() {
                    Some(Ok(v)) => Ok(v.clone()),
                    Some(Err(e)) => Err(LokiMcpError::TransportError {
                        url: url.to_string(),
                        reason: e.to_string(),
                    }),
                    None => Ok(Value::Null),
                }
            };
            Box::pin(async move { next })
        }
    }

    pub fn client_with(transport: Arc<FixtureTransport>) -> LokiClient {
        let cfg = LokiConfig {
            url: "http://loki.test:3100".into(),
            ..LokiConfig::default()
        };
        LokiClient::with_transport(&cfg, transport).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{client_with, FixtureTransport};
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    #[tokio::test]
    async fn query_range_sends_nanosecond_bounds() {
        let transport = FixtureTransport::returning(json!({"data": {"result": []}}));
        let client = client_with(transport.clone());
        let end = Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).single().unwrap();
        let window = TimeWindow::ending_at(end, 1).unwrap();

        client
            .query_range(r#"{namespace="a"}"#, Some(window), 50)
            .await
            .unwrap();

        let calls = transport.calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "http://loki.test:3100/loki/api/v1/query_range");
        drop(calls);
        assert_eq!(transport.param(0, "query").unwrap(), r#"{namespace="a"}"#);
        assert_eq!(transport.param(0, "start").unwrap(), "1704067200000000000");
        assert_eq!(transport.param(0, "end").unwrap(), "1704070800000000000");
        assert_eq!(transport.param(0, "limit").unwrap(), "50");
    }

    #[tokio::test]
    async fn query_range_defaults_to_last_hour() {
        let transport = FixtureTransport::returning(json!({}));
        let client = client_with(transport.clone());
        client.query_range("{}", None, DEFAULT_QUERY_LIMIT).await.unwrap();

        let start: i64 = transport.param(0, "start").unwrap().parse().unwrap();
        let end: i64 = transport.param(0, "end").unwrap().parse().unwrap();
        assert_eq!(end - start, 3600 * 1_000_000_000);
        assert_eq!(transport.param(0, "limit").unwrap(), "1000");
    }

    #[tokio::test]
    async fn zero_limit_is_rejected_without_a_request() {
        let transport = FixtureTransport::returning(json!({}));
        let client = client_with(transport.clone());
        let err = client.query_range("{}", None, 0).await.unwrap_err();
        assert!(err.is_client_error());
        assert_eq!(transport.call_count(), 0);
    }

    #[tokio::test]
    async fn transport_errors_propagate() {
        let transport = FixtureTransport::failing(LokiMcpError::TransportError {
            url: "x".into(),
            reason: "HTTP 500".into(),
        });
        let client = client_with(transport);
        let err = client.query_range("{}", None, 10).await.unwrap_err();
        assert!(matches!(err, LokiMcpError::TransportError { .. }));
    }

    #[tokio::test]
    async fn pods_in_namespace_scopes_with_selector() {
        let transport = FixtureTransport::returning(json!({"status": "success", "data": ["api-1", "api-2"]}));
        let client = client_with(transport.clone());
        let pods = client.pods_in_namespace("prod").await.unwrap();

        assert_eq!(pods, vec!["api-1", "api-2"]);
        let url = transport.calls.lock().unwrap()[0].0.clone();
        assert_eq!(url, "http://loki.test:3100/loki/api/v1/label/pod_name/values");
        assert_eq!(transport.param(0, "query").unwrap(), r#"{namespace="prod"}"#);
    }

    #[tokio::test]
    async fn label_values_without_data_is_empty() {
        let transport = FixtureTransport::returning(json!({"status": "success"}));
        let client = client_with(transport.clone());
        assert!(client.namespaces().await.unwrap().is_empty());
        assert!(transport.calls.lock().unwrap()[0].1.is_empty());
    }

    #[tokio::test]
    async fn label_values_with_wrong_shape_is_parse_error() {
        let transport = FixtureTransport::returning(json!({"data": {"oops": 1}}));
        let client = client_with(transport);
        let err = client.namespaces().await.unwrap_err();
        assert!(matches!(err, LokiMcpError::ParseError(_)));
    }

    #[test]
    fn base_path_prefix_is_preserved() {
        let cfg = LokiConfig {
            url: "https://gateway.example.com/loki-proxy".into(),
            ..LokiConfig::default()
        };
        let client = LokiClient::with_transport(&cfg, FixtureTransport::returning(json!({}))).unwrap();
        assert_eq!(
            client.endpoint(QUERY_RANGE_PATH).unwrap().as_str(),
            "https://gateway.example.com/loki-proxy/loki/api/v1/query_range"
        );
    }

    #[test]
    fn invalid_base_url_fails_at_construction() {
        let cfg = LokiConfig {
            url: "loki:3100".into(),
            ..LokiConfig::default()
        };
        let err = LokiClient::new(&cfg).err().unwrap();
        assert!(matches!(err, LokiMcpError::ConfigError(_)));
    }
}
