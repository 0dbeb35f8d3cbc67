//! 响应归一化：从任意后端响应中提取纯文本
//!
//! 按固定顺序尝试：字符串 → 内容块数组 → content 字段 → choices[0].message.content
//! → text → message → response；全部不匹配时返回 ExtractionError，从不 panic。

use serde_json::Value;
use thiserror::Error;

/// 无法从响应中找到文本
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("no extractable text")]
pub struct ExtractionError;

/// 从原始响应中提取文本（首个命中的规则生效）
pub fn extract_text(response: &Value) -> Result<String, ExtractionError> {
    if let Some(text) = text_from_content(response) {
        return Ok(text);
    }

    if let Some(content) = response.get("content") {
        if let Some(text) = text_from_content(content) {
            return Ok(text);
        }
    }

    if let Some(content) = response
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
    {
        if let Some(text) = text_from_content(content) {
            return Ok(text);
        }
    }

    if let Some(text) = response.get("text").and_then(Value::as_str) {
        return Ok(text.to_string());
    }

    match response.get("message") {
        Some(Value::String(s)) => return Ok(s.clone()),
        Some(obj) => {
            if let Some(text) = obj.get("content").and_then(Value::as_str) {
                return Ok(text.to_string());
            }
        }
        None => {}
    }

    // 本地 HTTP 服务 generate 接口的形状
    if let Some(text) = response.get("response").and_then(Value::as_str) {
        return Ok(text.to_string());
    }

    Err(ExtractionError)
}

/// 规则 1–2：字符串原样返回；数组取 type == "text" 的块，否则按字符串数组拼接
fn text_from_content(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => {
            let blocks: Vec<&str> = items
                .iter()
                .filter(|b| b.get("type").and_then(Value::as_str) == Some("text"))
                .filter_map(|b| b.get("text").and_then(Value::as_str))
                .collect();
            if !blocks.is_empty() {
                return Some(blocks.join("\n"));
            }
            let strings: Vec<&str> = items.iter().filter_map(Value::as_str).collect();
            if strings.is_empty() {
                None
            } else {
                Some(strings.join("\n"))
            }
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_plain_string_passthrough() {
        let v = json!("Alice: hi");
        assert_eq!(extract_text(&v).unwrap(), "Alice: hi");
        let again = json!(extract_text(&v).unwrap());
        assert_eq!(extract_text(&again).unwrap(), "Alice: hi");
    }

    #[test]
    fn test_array_of_text_blocks() {
        let v = json!([
            {"type": "thinking", "thinking": "hmm"},
            {"type": "text", "text": "\n\n"},
            {"type": "text", "text": "Alice: hi"}
        ]);
        assert_eq!(extract_text(&v).unwrap(), "\n\n\nAlice: hi");
    }

    #[test]
    fn test_array_of_strings() {
        let v = json!(["Alice: hi", "Bob: yo"]);
        assert_eq!(extract_text(&v).unwrap(), "Alice: hi\nBob: yo");
    }

    #[test]
    fn test_content_string() {
        let v = json!({"content": "Bob: there", "reasoning": "ignored"});
        assert_eq!(extract_text(&v).unwrap(), "Bob: there");
    }

    #[test]
    fn test_content_array() {
        let v = json!({"content": [
            {"type": "text", "text": "one"},
            {"type": "tool_use", "id": "x"},
            {"type": "text", "text": "two"}
        ]});
        assert_eq!(extract_text(&v).unwrap(), "one\ntwo");
    }

    #[test]
    fn test_choices_shape() {
        let v = json!({"choices": [{"message": {"role": "assistant", "content": "Carol: hey"}}]});
        assert_eq!(extract_text(&v).unwrap(), "Carol: hey");

        let blocks = json!({"choices": [{"message": {"content": [{"type": "text", "text": "x"}]}}]});
        assert_eq!(extract_text(&blocks).unwrap(), "x");
    }

    #[test]
    fn test_text_and_message_fields() {
        assert_eq!(extract_text(&json!({"text": "t"})).unwrap(), "t");
        assert_eq!(extract_text(&json!({"message": "m"})).unwrap(), "m");
        assert_eq!(
            extract_text(&json!({"message": {"role": "assistant", "content": "mc"}})).unwrap(),
            "mc"
        );
        assert_eq!(extract_text(&json!({"response": "r"})).unwrap(), "r");
    }

    #[test]
    fn test_content_array_without_text_falls_through() {
        let v = json!({"content": [{"type": "image"}], "text": "fallback"});
        assert_eq!(extract_text(&v).unwrap(), "fallback");
    }

    #[test]
    fn test_no_extractable_text() {
        assert_eq!(extract_text(&json!(null)), Err(ExtractionError));
        assert_eq!(extract_text(&json!({"foo": 1})), Err(ExtractionError));
        assert_eq!(extract_text(&json!([1, 2])), Err(ExtractionError));
        assert_eq!(extract_text(&json!(42)), Err(ExtractionError));
    }
}
