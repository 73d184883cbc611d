use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::error::{LokiMcpError, Result};
use crate::model::{LabelSet, LogEntry};

const NANOS_PER_SEC: i64 = 1_000_000_000;

/// query_range 响应外壳。所有嵌套字段缺失时取默认值。
#[derive(Debug, Default, Deserialize)]
pub struct QueryRangeResponse {
    #[serde(default)]
    pub data: QueryData,
}

#[derive(Debug, Default, Deserialize)]
pub struct QueryData {
    #[serde(default)]
    pub result: Vec<StreamResult>,
}

/// 一个日志流：固定标签集 + `[纳秒时间戳字符串, 日志行]` 列表。
#[derive(Debug, Default, Deserialize)]
pub struct StreamResult {
    #[serde(default)]
    pub stream: LabelSet,
    #[serde(default)]
    pub values: Vec<(String, String)>,
}

/// 条目解析器：把按流嵌套的响应展平成有序的 `LogEntry` 序列。
#[derive(Clone, Default)]
pub struct EntryParser;

impl EntryParser {
    pub fn new() -> Self {
        Self
    }

    /// 全有或全无：任何一条记录格式错误都会让整次调用失败。
    pub fn parse(&self, body: Value) -> Result<Vec<LogEntry>> {
        let resp: QueryRangeResponse = if body.is_null() {
            QueryRangeResponse::default()
        } else {
            serde_json::from_value(body)
                .map_err(|e| LokiMcpError::ParseError(format!("query_range 响应格式错误: {e}")))?
        };
        self.flatten(resp)
    }

    pub fn flatten(&self, resp: QueryRangeResponse) -> Result<Vec<LogEntry>> {
        let total: usize = resp.data.result.iter().map(|s| s.values.len()).sum();
        let mut entries = Vec::with_capacity(total);
        for stream in resp.data.result {
            let StreamResult { stream: labels, values } = stream;
            for (ts, line) in values {
                entries.push(LogEntry {
                    timestamp: parse_nanos(&ts)?,
                    message: line,
                    labels: labels.clone(),
                });
            }
        }
        Ok(entries)
    }
}

/// 纳秒时间戳字符串转为 UTC 时间。
pub fn parse_nanos(raw: &str) -> Result<DateTime<Utc>> {
    let ns: i64 = raw
        .trim()
        .parse()
        .map_err(|_| LokiMcpError::ParseError(format!("时间戳不是整数纳秒: {raw:?}")))?;
    let secs = ns.div_euclid(NANOS_PER_SEC);
    let nanos = ns.rem_euclid(NANOS_PER_SEC) as u32;
    DateTime::from_timestamp(secs, nanos)
        .ok_or_else(|| LokiMcpError::ParseError(format!("时间戳超出范围: {raw}")))
}
