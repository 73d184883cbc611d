//! 面向调用方（LLM）的纯文本渲染。只做展示层截断，不改变统计结果。

use std::fmt::Write as _;

use chrono::{DateTime, SecondsFormat, Utc};

use crate::analyzer::truncate_chars;
use crate::model::{ErrorSummary, PodLogs, RestartSummary, SearchResult};

const SHOWN_PODS: usize = 10;
const SHOWN_SAMPLES: usize = 3;
const SHOWN_REASON_CHARS: usize = 100;
const SHOWN_SEARCH_PODS: usize = 5;
const SHOWN_LINES_PER_POD: usize = 3;
const SHOWN_POD_LOG_TAIL: usize = 20;

fn ts(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

pub fn error_summary(s: &ErrorSummary) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Error Summary (last {} hour(s)):", s.window_hours);
    let _ = writeln!(out, "Total Errors: {}", s.total_errors);

    if !s.breakdown.is_empty() {
        out.push_str("Error Breakdown:\n");
        for c in &s.breakdown {
            let _ = writeln!(out, "  {}: {}", c.level, c.count);
        }
    }

    if !s.affected_pods.is_empty() {
        let pods: Vec<&str> = s
            .affected_pods
            .iter()
            .take(SHOWN_PODS)
            .map(String::as_str)
            .collect();
        let _ = writeln!(out, "Affected Pods: {}", pods.join(", "));
    }

    if !s.sample_messages.is_empty() {
        out.push_str("Sample Error Messages:\n");
        for msg in s.sample_messages.iter().take(SHOWN_SAMPLES) {
            let _ = writeln!(out, "  - {msg}");
        }
    }
    out
}

pub fn restart_summary(s: &RestartSummary) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Pod Restart Summary (last {} hour(s)):", s.window_hours);
    let _ = writeln!(out, "Total Restart Events: {}", s.total_events);

    if !s.top_pods.is_empty() {
        out.push_str("Pods with Restarts:\n");
        for p in &s.top_pods {
            let _ = writeln!(out, "  {}: {} events", p.pod, p.count);
            if let Some(reason) = s.first_reason_per_pod.get(&p.pod) {
                let _ = writeln!(
                    out,
                    "    Reason: {}",
                    truncate_chars(reason, SHOWN_REASON_CHARS)
                );
            }
        }
    }
    out
}

pub fn search_result(r: &SearchResult) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Search Results for '{}' (last {} hour(s)):",
        r.query, r.window_hours
    );
    let _ = writeln!(out, "Total Matches: {}\n", r.total_matches);

    for group in r.grouped_by_pod.iter().take(SHOWN_SEARCH_PODS) {
        let _ = writeln!(out, "Pod: {}", group.pod);
        for line in group.lines.iter().take(SHOWN_LINES_PER_POD) {
            let _ = writeln!(out, "  [{}] {}", ts(&line.timestamp), line.message);
        }
        out.push('\n');
    }
    out
}

pub fn namespaces(names: &[String]) -> String {
    let mut out = String::from("Namespaces with logs:\n");
    let lines: Vec<String> = names.iter().map(|ns| format!("  - {ns}")).collect();
    out.push_str(&lines.join("\n"));
    out
}

pub fn pods(namespace: &str, names: &[String]) -> String {
    let mut out = format!("Pods with logs in namespace '{namespace}':\n");
    let lines: Vec<String> = names.iter().map(|p| format!("  - {p}")).collect();
    out.push_str(&lines.join("\n"));
    out
}

pub fn pod_logs(logs: &PodLogs) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Logs for pod '{}' (last {} hour(s)):",
        logs.pod_name, logs.window_hours
    );
    let _ = writeln!(out, "Total Lines: {}", logs.total_lines);
    if !logs.level_counts.is_empty() {
        let levels: Vec<String> = logs
            .level_counts
            .iter()
            .map(|c| format!("{}={}", c.level, c.count))
            .collect();
        let _ = writeln!(out, "Levels: {}", levels.join(", "));
    }
    out.push('\n');

    let skip = logs.entries.len().saturating_sub(SHOWN_POD_LOG_TAIL);
    for entry in logs.entries.iter().skip(skip) {
        let _ = writeln!(out, "[{}] {}", ts(&entry.timestamp), entry.message);
    }
    out
}
