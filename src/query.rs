use std::fmt::Write as _;

/// 错误级别关键字，错误汇总查询与分类共用。
pub const ERROR_TOKENS: &[&str] = &["ERROR", "PANIC", "FATAL"];

/// 重启/崩溃相关关键字。
pub const RESTART_TOKENS: &[&str] = &["restart", "CrashLoopBackOff", "OOMKilled"];

/// 转义要放进 LogQL 双引号字符串字面量的值。
///
/// 反斜杠和双引号必须转义，否则外部输入可以提前结束字符串并拼接新的子句。
/// 换行/回车在字面量中不合法，一并转义。
pub fn escape_literal(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            _ => out.push(c),
        }
    }
    out
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum LabelMatcher {
    Eq(String, String),
    Regex(String, String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum LineFilter {
    Contains(String),
    Regex(String),
    /// `|= "a" or |= "b" ...`
    AnyOf(Vec<String>),
}

/// LogQL 构造器：标签选择器 + 按添加顺序排列的行过滤器。纯字符串拼接。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogQuery {
    matchers: Vec<LabelMatcher>,
    filters: Vec<LineFilter>,
}

impl LogQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// `label="value"`
    pub fn label_eq(mut self, label: &str, value: &str) -> Self {
        self.matchers
            .push(LabelMatcher::Eq(label.to_string(), value.to_string()));
        self
    }

    /// `label=~"pattern"`
    pub fn label_regex(mut self, label: &str, pattern: &str) -> Self {
        self.matchers
            .push(LabelMatcher::Regex(label.to_string(), pattern.to_string()));
        self
    }

    /// 空字符串视为不过滤。
    pub fn namespace(self, namespace: Option<&str>) -> Self {
        match namespace.filter(|ns| !ns.is_empty()) {
            Some(ns) => self.label_eq("namespace", ns),
            None => self,
        }
    }

    pub fn contains(mut self, text: &str) -> Self {
        self.filters.push(LineFilter::Contains(text.to_string()));
        self
    }

    pub fn matches_regex(mut self, pattern: &str) -> Self {
        self.filters.push(LineFilter::Regex(pattern.to_string()));
        self
    }

    pub fn contains_any<S: AsRef<str>>(mut self, terms: &[S]) -> Self {
        let terms: Vec<String> = terms.iter().map(|t| t.as_ref().to_string()).collect();
        match terms.len() {
            0 => {}
            1 => self.filters.push(LineFilter::Contains(terms[0].clone())),
            _ => self.filters.push(LineFilter::AnyOf(terms)),
        }
        self
    }

    /// 只有标签选择器部分，`{}` 之外不含任何过滤器。空选择器返回空字符串。
    pub fn selector(&self) -> String {
        if self.matchers.is_empty() {
            return String::new();
        }
        let parts: Vec<String> = self
            .matchers
            .iter()
            .map(|m| match m {
                LabelMatcher::Eq(k, v) => format!("{k}=\"{}\"", escape_literal(v)),
                LabelMatcher::Regex(k, v) => format!("{k}=~\"{}\"", escape_literal(v)),
            })
            .collect();
        format!("{{{}}}", parts.join(","))
    }

    pub fn build(&self) -> String {
        let mut out = self.selector();
        for filter in &self.filters {
            if !out.is_empty() {
                out.push(' ');
            }
            match filter {
                LineFilter::Contains(t) => {
                    let _ = write!(out, "|= \"{}\"", escape_literal(t));
                }
                LineFilter::Regex(p) => {
                    let _ = write!(out, "|~ \"{}\"", escape_literal(p));
                }
                LineFilter::AnyOf(terms) => {
                    let chain: Vec<String> = terms
                        .iter()
                        .map(|t| format!("|= \"{}\"", escape_literal(t)))
                        .collect();
                    out.push_str(&chain.join(" or "));
                }
            }
        }
        out
    }

    /// 错误汇总查询。
    pub fn errors(namespace: Option<&str>) -> Self {
        Self::new().namespace(namespace).contains_any(ERROR_TOKENS)
    }

    /// 重启检测查询。
    pub fn restarts(namespace: Option<&str>) -> Self {
        Self::new().namespace(namespace).contains_any(RESTART_TOKENS)
    }

    /// 正则搜索查询。
    pub fn search(pattern: &str, namespace: Option<&str>) -> Self {
        Self::new().namespace(namespace).matches_regex(pattern)
    }

    /// 指定 pod（正则）的日志，pod_name 在前、namespace 在后。
    pub fn pod_logs(pod_pattern: &str, namespace: Option<&str>) -> Self {
        Self::new()
            .label_regex("pod_name", pod_pattern)
            .namespace(namespace)
    }
}

impl std::fmt::Display for LogQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.build())
    }
}
