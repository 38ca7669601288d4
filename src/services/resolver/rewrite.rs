// 头像地址升级：把 normal 尺寸改写为 400x400。
use regex::Regex;
use std::sync::OnceLock;

const NORMAL_MARKER: &str = "_normal.";
const HIGH_RES_MARKER: &str = "_400x400.";
const TWIMG_HOST_MARKER: &str = "pbs.twimg.com";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewriteStrategy {
    /// 先把首个 `_normal.` 替换为 `_400x400.`，再把剩余的首个 `_normal.` 去掉尺寸标记。
    DoubleReplace,
    /// 兼容旧后缀、`name=` 查询参数两种写法，都不匹配时为 twimg 地址补尺寸参数。
    Upgrade,
}

impl RewriteStrategy {
    pub fn apply(self, url: &str) -> String {
        match self {
            Self::DoubleReplace => double_replace(url),
            Self::Upgrade => upgrade(url),
        }
    }
}

pub fn double_replace(url: &str) -> String {
    url.replacen(NORMAL_MARKER, HIGH_RES_MARKER, 1)
        .replacen(NORMAL_MARKER, ".", 1)
}

fn suffix_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"_normal(\.\w+)$").ok())
        .as_ref()
}

fn name_normal_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(?:\?|&)name=normal\b").ok())
        .as_ref()
}

fn name_value_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"name=normal\b").ok())
        .as_ref()
}

fn name_param_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(?:\?|&)name=").ok())
        .as_ref()
}

pub fn upgrade(url: &str) -> String {
    if let Some(pattern) = suffix_pattern().filter(|pattern| pattern.is_match(url)) {
        return pattern.replace(url, "_400x400${1}").into_owned();
    }
    if name_normal_pattern().is_some_and(|pattern| pattern.is_match(url)) {
        if let Some(pattern) = name_value_pattern() {
            return pattern.replacen(url, 1, "name=400x400").into_owned();
        }
    }
    let has_name_param = name_param_pattern().is_some_and(|pattern| pattern.is_match(url));
    if !has_name_param && url.contains(TWIMG_HOST_MARKER) {
        let separator = if url.contains('?') { '&' } else { '?' };
        return format!("{url}{separator}name=400x400");
    }
    url.to_string()
}
