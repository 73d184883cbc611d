use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{LokiMcpError, Result};

/// 日志流标签。缺失的 key 与空字符串值是两回事。
pub type LabelSet = BTreeMap<String, String>;

/// 缺少 pod_name 标签时使用的分组名。
pub const UNKNOWN_POD: &str = "unknown";

/// 查询时间窗口 `[start, end)`，构造后不可变。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeWindow {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self> {
        if start >= end {
            return Err(LokiMcpError::InvalidRequest(format!(
                "时间窗口起点必须早于终点: {start} >= {end}"
            )));
        }
        Ok(Self { start, end })
    }

    /// `[now - hours, now)`
    pub fn last_hours(hours: u32) -> Result<Self> {
        Self::ending_at(Utc::now(), hours)
    }

    pub fn ending_at(end: DateTime<Utc>, hours: u32) -> Result<Self> {
        if hours == 0 {
            return Err(LokiMcpError::InvalidRequest("hours 必须 >= 1".into()));
        }
        let start = Duration::try_hours(i64::from(hours))
            .and_then(|span| end.checked_sub_signed(span))
            .ok_or_else(|| LokiMcpError::InvalidRequest(format!("hours 超出可表示的时间范围: {hours}")))?;
        Self::new(start, end)
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    /// Loki 使用的纳秒时间戳 (start, end)。
    pub fn as_nanos(&self) -> Result<(i64, i64)> {
        let to_ns = |t: DateTime<Utc>| {
            t.timestamp_nanos_opt().ok_or_else(|| {
                LokiMcpError::InvalidRequest(format!("时间超出纳秒时间戳范围: {t}"))
            })
        };
        Ok((to_ns(self.start)?, to_ns(self.end)?))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub labels: LabelSet,
}

impl LogEntry {
    pub fn pod(&self) -> &str {
        self.labels
            .get("pod_name")
            .map(String::as_str)
            .unwrap_or(UNKNOWN_POD)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelCount {
    pub level: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodCount {
    pub pod: String,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorSummary {
    /// 解析出的条目数，不是 token 出现次数。
    pub total_errors: usize,
    /// 按次数降序。
    pub breakdown: Vec<LevelCount>,
    pub affected_pods: BTreeSet<String>,
    pub sample_messages: Vec<String>,
    pub window_hours: u32,
    pub namespace: Option<String>,
}

impl ErrorSummary {
    pub fn count_for(&self, level: &str) -> usize {
        self.breakdown
            .iter()
            .find(|c| c.level == level)
            .map(|c| c.count)
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestartSummary {
    pub total_events: usize,
    pub top_pods: Vec<PodCount>,
    pub first_reason_per_pod: BTreeMap<String, String>,
    pub window_hours: u32,
}

impl RestartSummary {
    pub fn count_for(&self, pod: &str) -> Option<usize> {
        self.top_pods.iter().find(|p| p.pod == pod).map(|p| p.count)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PodGroup {
    pub pod: String,
    pub lines: Vec<SearchHit>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub query: String,
    pub total_matches: usize,
    /// 按 pod 首次出现的顺序。
    pub grouped_by_pod: Vec<PodGroup>,
    pub window_hours: u32,
}

impl SearchResult {
    pub fn group(&self, pod: &str) -> Option<&PodGroup> {
        self.grouped_by_pod.iter().find(|g| g.pod == pod)
    }
}

/// 单个 pod（或 pod 模式）的原始日志。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PodLogs {
    pub pod_name: String,
    pub namespace: Option<String>,
    pub total_lines: usize,
    pub entries: Vec<LogEntry>,
    pub level_counts: Vec<LevelCount>,
    pub window_hours: u32,
}
