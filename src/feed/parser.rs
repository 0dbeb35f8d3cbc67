//! 消息解析：把归一化后的文本切成有序的「作者 / 内容」记录
//!
//! 预处理：剥离推理标签（thinking / think / thought / reasoning / reason）及其内容，再剥离其余标记；
//! 逐行解析：`名字: 内容` 开新消息，无法分割的行接到当前消息后面；最后过滤过短的消息并截断到 N 条。
//! 纯函数：相同输入与 N 永远得到相同输出。

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// 作者名最大字符数
pub const MAX_AUTHOR_CHARS: usize = 40;
/// 内容（trim 后）少于此字符数的消息被丢弃
const MIN_CONTENT_CHARS: usize = 2;
/// 无法识别作者时使用的名字
pub const FALLBACK_AUTHOR: &str = "User";

const REASONING_TAGS: &[&str] = &["thinking", "think", "thought", "reasoning", "reason"];

/// 一条解析出的反应消息（创建后不可变）
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParsedMessage {
    pub author: String,
    pub content: String,
    /// 在本批次中的位置（从 0 开始）
    pub order: usize,
}

static REASONING_RES: OnceLock<Vec<Regex>> = OnceLock::new();
static MARKUP_RE: OnceLock<Regex> = OnceLock::new();
static NOISE_RE: OnceLock<Regex> = OnceLock::new();
static LIST_MARKER_RE: OnceLock<Regex> = OnceLock::new();

/// 去掉成对的推理标签（含内容），再去掉其余标记标签，最后 trim
pub fn clean_text(text: &str) -> String {
    // regex 不支持反向引用，每个标签单独一条非贪婪规则
    let reasoning = REASONING_RES.get_or_init(|| {
        REASONING_TAGS
            .iter()
            .map(|tag| Regex::new(&format!(r"(?is)<{tag}(?:\s[^>]*)?>.*?</{tag}\s*>")).unwrap())
            .collect()
    });
    let markup = MARKUP_RE.get_or_init(|| Regex::new(r"<[^>]*>").unwrap());

    let mut cleaned = text.to_string();
    for re in reasoning {
        cleaned = re.replace_all(&cleaned, "").into_owned();
    }
    markup.replace_all(&cleaned, "").trim().to_string()
}

/// 解析文本为最多 `max` 条消息
pub fn parse_messages(text: &str, max: usize) -> Vec<ParsedMessage> {
    let noise = NOISE_RE.get_or_init(|| Regex::new(r"^[\p{P}~=]+$").unwrap());

    let cleaned = clean_text(text);
    let mut drafts: Vec<(String, String)> = Vec::new();
    let mut open = false;

    for line in cleaned.lines() {
        let line = line.trim();
        if line.is_empty() {
            if open {
                if let Some((_, content)) = drafts.last_mut() {
                    if !content.ends_with("\n\n") {
                        content.push_str("\n\n");
                    }
                }
            }
            continue;
        }
        if noise.is_match(line) {
            continue;
        }

        if let Some((name, content)) = split_name(line) {
            drafts.push((name, content));
            open = true;
        } else if let (true, Some((_, content))) = (open, drafts.last_mut()) {
            if !content.ends_with("\n\n") {
                content.push(' ');
            }
            content.push_str(line);
        } else {
            drafts.push((FALLBACK_AUTHOR.to_string(), line.to_string()));
            open = true;
        }
    }

    drafts
        .into_iter()
        .map(|(author, content)| (author, content.trim().to_string()))
        .filter(|(_, content)| content.chars().count() >= MIN_CONTENT_CHARS)
        .take(max)
        .enumerate()
        .map(|(order, (author, content))| ParsedMessage {
            author,
            content,
            order,
        })
        .collect()
}

/// 按最后一个「后面跟着非空内容」的冒号分割 `名字: 内容`
///
/// 冒号后紧跟 `//`（URL scheme）不算分隔符；清理后名字为空也不算匹配。
fn split_name(line: &str) -> Option<(String, String)> {
    let marker = LIST_MARKER_RE.get_or_init(|| Regex::new(r"^(?:\d+[.)]\s*|[-*•]+\s+)").unwrap());
    let line: &str = &marker.replace(line, "");

    for (idx, _) in line.match_indices(':').collect::<Vec<_>>().into_iter().rev() {
        let rest = &line[idx + 1..];
        if rest.starts_with("//") {
            continue;
        }
        let content = rest.trim();
        if content.is_empty() {
            continue;
        }
        let name = clean_name(&line[..idx]);
        if name.is_empty() {
            return None;
        }
        return Some((name, content.to_string()));
    }
    None
}

fn clean_name(raw: &str) -> String {
    raw.trim()
        .trim_matches(|c: char| matches!(c, '*' | '_' | '"' | '\'' | '`' | '“' | '”') || c.is_whitespace())
        .chars()
        .take(MAX_AUTHOR_CHARS)
        .collect()
}
