//! 按名称或通配符挑选候选节点

use super::ProxyDescriptor;
use crate::error::{ProxyCtxError, Result};
use regex::Regex;
use std::iter::Peekable;
use std::str::Chars;

const GLOB_META: &[char] = &['*', '?', '['];

/// 从全部节点中筛选候选，保持原有顺序
///
/// - 空模式：返回全部节点
/// - 含 `*` `?` `[`：按通配符匹配名称（`*`/`?` 不跨越 `/`）
/// - 其他：名称精确匹配
pub fn match_candidates<'a>(
    candidates: &'a [ProxyDescriptor],
    pattern: &str,
) -> Result<Vec<&'a ProxyDescriptor>> {
    if pattern.is_empty() {
        return Ok(candidates.iter().collect());
    }

    let matched: Vec<&ProxyDescriptor> = if pattern.contains(GLOB_META) {
        let glob = compile_glob(pattern).map_err(|reason| ProxyCtxError::InvalidPattern {
            pattern: pattern.to_string(),
            reason,
        })?;
        candidates.iter().filter(|p| glob.is_match(&p.name)).collect()
    } else {
        candidates.iter().filter(|p| p.name == pattern).collect()
    };

    if matched.is_empty() {
        return Err(ProxyCtxError::NoMatch(pattern.to_string()));
    }
    Ok(matched)
}

/// 把 shell 风格通配符翻译为锚定的正则
fn compile_glob(pattern: &str) -> std::result::Result<Regex, String> {
    let mut re = String::from("^");
    let mut chars = pattern.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '*' => re.push_str("[^/]*"),
            '?' => re.push_str("[^/]"),
            '\\' => {
                let escaped = chars.next().ok_or("trailing backslash")?;
                re.push_str(&regex::escape(&escaped.to_string()));
            }
            '[' => push_class(&mut chars, &mut re)?,
            other => re.push_str(&regex::escape(&other.to_string())),
        }
    }
    re.push('$');

    Regex::new(&re).map_err(|e| e.to_string())
}

/// 字符集 `[...]` / `[^...]`，支持区间与转义
fn push_class(chars: &mut Peekable<Chars<'_>>, re: &mut String) -> std::result::Result<(), String> {
    re.push('[');
    if chars.peek() == Some(&'^') {
        chars.next();
        re.push('^');
    }

    let mut ranges = 0;
    loop {
        let c = chars.next().ok_or("unterminated character class")?;
        if c == ']' && ranges > 0 {
            break;
        }
        let lo = class_char(c, chars)?;
        re.push_str(&regex::escape(&lo.to_string()));

        if chars.peek() == Some(&'-') {
            chars.next();
            let next = chars.next().ok_or("unterminated character class")?;
            let hi = class_char(next, chars)?;
            if hi < lo {
                return Err(format!("invalid range {lo}-{hi}"));
            }
            re.push('-');
            re.push_str(&regex::escape(&hi.to_string()));
        }
        ranges += 1;
    }

    re.push(']');
    Ok(())
}

fn class_char(c: char, chars: &mut Peekable<Chars<'_>>) -> std::result::Result<char, String> {
    match c {
        '-' | ']' => Err(format!("unexpected {c:?} in character class")),
        '\\' => chars.next().ok_or_else(|| "trailing backslash".to_string()),
        other => Ok(other),
    }
}
