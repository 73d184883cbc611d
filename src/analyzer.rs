use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, OnceLock};

use regex::Regex;
use tracing::info;

use crate::client::LokiClient;
use crate::error::{LokiMcpError, Result};
use crate::model::{
    ErrorSummary, LevelCount, LogEntry, PodCount, PodGroup, PodLogs, RestartSummary, SearchHit,
    SearchResult, TimeWindow,
};
use crate::parser::EntryParser;
use crate::query::{LogQuery, ERROR_TOKENS};

pub const SAMPLE_LIMIT: usize = 10;
pub const TOP_PODS_LIMIT: usize = 10;
pub const SUMMARY_MESSAGE_CHARS: usize = 200;
pub const SEARCH_MESSAGE_CHARS: usize = 300;

/// 按字符（不是字节）截断。
pub fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

/// 消息中出现的错误级别关键字。各关键字独立判断，一条消息可能命中多个。
pub fn error_levels(message: &str) -> impl Iterator<Item = &'static str> + '_ {
    ERROR_TOKENS
        .iter()
        .copied()
        .filter(move |token| message.contains(token))
}

fn level_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(ERROR|WARN|WARNING|PANIC|FATAL|DEBUG|INFO|TRACE)\b")
            .expect("level regex is valid")
    })
}

/// 提取第一个整词出现的日志级别，统一为大写。
pub fn extract_level(message: &str) -> Option<String> {
    level_regex()
        .captures(message)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_ascii_uppercase())
}

/// 计数器：按首次出现顺序保存 key，排序时同数保持该顺序。
#[derive(Default)]
struct OrderedCounter {
    order: Vec<String>,
    counts: HashMap<String, usize>,
}

impl OrderedCounter {
    fn add(&mut self, key: &str) {
        match self.counts.get_mut(key) {
            Some(n) => *n += 1,
            None => {
                self.order.push(key.to_string());
                self.counts.insert(key.to_string(), 1);
            }
        }
    }

    fn most_common(self, limit: Option<usize>) -> Vec<(String, usize)> {
        let Self { order, mut counts } = self;
        let mut ranked: Vec<(String, usize)> = order
            .into_iter()
            .map(|k| {
                let n = counts.remove(&k).unwrap_or(0);
                (k, n)
            })
            .collect();
        // sort_by 是稳定排序
        ranked.sort_by(|a, b| b.1.cmp(&a.1));
        if let Some(limit) = limit {
            ranked.truncate(limit);
        }
        ranked
    }
}

pub fn summarize_errors(entries: &[LogEntry], window_hours: u32, namespace: Option<&str>) -> ErrorSummary {
    let mut levels = OrderedCounter::default();
    let mut affected_pods = BTreeSet::new();
    let mut sample_messages = Vec::new();

    for entry in entries {
        for level in error_levels(&entry.message) {
            levels.add(level);
        }
        affected_pods.insert(entry.pod().to_string());
        if sample_messages.len() < SAMPLE_LIMIT {
            sample_messages.push(truncate_chars(&entry.message, SUMMARY_MESSAGE_CHARS));
        }
    }

    ErrorSummary {
        total_errors: entries.len(),
        breakdown: levels
            .most_common(None)
            .into_iter()
            .map(|(level, count)| LevelCount { level, count })
            .collect(),
        affected_pods,
        sample_messages,
        window_hours,
        namespace: namespace.filter(|ns| !ns.is_empty()).map(str::to_string),
    }
}

pub fn summarize_restarts(entries: &[LogEntry], window_hours: u32) -> RestartSummary {
    let mut per_pod = OrderedCounter::default();
    let mut first_reason_per_pod = BTreeMap::new();

    for entry in entries {
        let pod = entry.pod();
        per_pod.add(pod);
        first_reason_per_pod
            .entry(pod.to_string())
            .or_insert_with(|| truncate_chars(&entry.message, SUMMARY_MESSAGE_CHARS));
    }

    RestartSummary {
        total_events: entries.len(),
        top_pods: per_pod
            .most_common(Some(TOP_PODS_LIMIT))
            .into_iter()
            .map(|(pod, count)| PodCount { pod, count })
            .collect(),
        first_reason_per_pod,
        window_hours,
    }
}

pub fn group_matches(query: &str, entries: &[LogEntry], window_hours: u32) -> SearchResult {
    let mut groups: Vec<PodGroup> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();

    for entry in entries {
        let pod = entry.pod();
        let slot = *index.entry(pod).or_insert_with(|| {
            groups.push(PodGroup {
                pod: pod.to_string(),
                lines: Vec::new(),
            });
            groups.len() - 1
        });
        groups[slot].lines.push(SearchHit {
            timestamp: entry.timestamp,
            message: truncate_chars(&entry.message, SEARCH_MESSAGE_CHARS),
        });
    }

    SearchResult {
        query: query.to_string(),
        total_matches: entries.len(),
        grouped_by_pod: groups,
        window_hours,
    }
}

pub fn count_levels(entries: &[LogEntry]) -> Vec<LevelCount> {
    let mut levels = OrderedCounter::default();
    for entry in entries {
        if let Some(level) = extract_level(&entry.message) {
            levels.add(&level);
        }
    }
    levels
        .most_common(None)
        .into_iter()
        .map(|(level, count)| LevelCount { level, count })
        .collect()
}

/// 各分析调用的输入参数。
#[derive(Debug, Clone, Default)]
pub struct Scope {
    pub namespace: Option<String>,
    pub hours: u32,
}

impl Scope {
    pub fn new(namespace: Option<&str>, hours: u32) -> Self {
        Self {
            namespace: namespace.filter(|ns| !ns.is_empty()).map(str::to_string),
            hours,
        }
    }

    fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }
}

/// 分析器：构造查询 → 执行一次范围查询 → 解析 → 归约。
///
/// 不保存任何跨调用的可变状态，可以并发调用。
#[derive(Clone)]
pub struct LogAnalyzer {
    client: Arc<LokiClient>,
    parser: EntryParser,
    summary_limit: usize,
}

impl LogAnalyzer {
    pub fn new(client: Arc<LokiClient>, summary_limit: usize) -> Self {
        Self {
            client,
            parser: EntryParser::new(),
            summary_limit,
        }
    }

    pub fn client(&self) -> &LokiClient {
        &self.client
    }

    async fn fetch(&self, query: &LogQuery, hours: u32, limit: usize) -> Result<Vec<LogEntry>> {
        let window = TimeWindow::last_hours(hours)?;
        let body = self
            .client
            .query_range(&query.build(), Some(window), limit)
            .await?;
        self.parser.parse(body)
    }

    pub async fn error_summary(&self, scope: &Scope) -> Result<ErrorSummary> {
        let query = LogQuery::errors(scope.namespace());
        let entries = self.fetch(&query, scope.hours, self.summary_limit).await?;
        let summary = summarize_errors(&entries, scope.hours, scope.namespace());
        info!(
            namespace = scope.namespace().unwrap_or("all"),
            hours = scope.hours,
            total = summary.total_errors,
            "error summary"
        );
        Ok(summary)
    }

    pub async fn pod_restarts(&self, scope: &Scope) -> Result<RestartSummary> {
        let query = LogQuery::restarts(scope.namespace());
        let entries = self.fetch(&query, scope.hours, self.summary_limit).await?;
        let summary = summarize_restarts(&entries, scope.hours);
        info!(
            namespace = scope.namespace().unwrap_or("all"),
            hours = scope.hours,
            total = summary.total_events,
            "restart summary"
        );
        Ok(summary)
    }

    pub async fn search(&self, pattern: &str, scope: &Scope, limit: usize) -> Result<SearchResult> {
        if pattern.is_empty() {
            return Err(LokiMcpError::InvalidRequest("query 不能为空".into()));
        }
        let query = LogQuery::search(pattern, scope.namespace());
        let entries = self.fetch(&query, scope.hours, limit).await?;
        let result = group_matches(pattern, &entries, scope.hours);
        info!(
            pattern,
            hours = scope.hours,
            total = result.total_matches,
            pods = result.grouped_by_pod.len(),
            "search"
        );
        Ok(result)
    }

    pub async fn pod_logs(&self, pod_pattern: &str, scope: &Scope, limit: usize) -> Result<PodLogs> {
        if pod_pattern.is_empty() {
            return Err(LokiMcpError::InvalidRequest("pod_name 不能为空".into()));
        }
        let query = LogQuery::pod_logs(pod_pattern, scope.namespace());
        let entries = self.fetch(&query, scope.hours, limit).await?;
        info!(pod = pod_pattern, lines = entries.len(), "pod logs");
        Ok(PodLogs {
            pod_name: pod_pattern.to_string(),
            namespace: scope.namespace.clone(),
            total_lines: entries.len(),
            level_counts: count_levels(&entries),
            entries,
            window_hours: scope.hours,
        })
    }
}
