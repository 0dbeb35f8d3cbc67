//! 请求准备：系统消息、上下文窗口、任务指令与 token 预算
//!
//! 消息顺序固定为：system（角色 + 可选 lore）→ 历史轮次（user/assistant）→ 最后一条 user 指令。

use std::collections::BTreeMap;

use crate::config::{BudgetSection, FeedSettings};
use crate::feed::parser::clean_text;
use crate::feed::styles::Style;
use crate::memory::{ChatTurn, Message, Transcript};

/// 宿主提供的可选背景资料（是否注入由 include_* 开关决定）
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PromptExtras {
    /// (名字, 描述)
    pub persona: Option<(String, String)>,
    /// (名字, 描述)
    pub characters: Vec<(String, String)>,
    pub summary: Option<String>,
    pub world_info: Option<String>,
}

/// 准备好的一次生成请求
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub messages: Vec<Message>,
    pub max_tokens: u32,
    /// 要求生成的消息条数（也是解析截断的 N）
    pub requested_count: usize,
    pub user_count: usize,
}

/// (消息条数, 不同用户数)
pub fn requested_counts(settings: &FeedSettings, style: &Style) -> (usize, usize) {
    if style.narrator {
        (1, 1)
    } else if settings.mode.is_paced() {
        (settings.batch_size, settings.user_count)
    } else {
        (settings.message_count, settings.message_count)
    }
}

/// max(floor, per_message * count + base)
pub fn token_budget(budget: &BudgetSection, count: usize) -> u32 {
    let scaled = budget
        .per_message
        .saturating_mul(count as u32)
        .saturating_add(budget.base);
    budget.floor.max(scaled)
}

/// 截取上下文窗口，返回 (绝对下标, 轮次)
///
/// 不带多轮上下文时只取最后一条可见轮次；否则向前取 context_depth 条，
/// 再回退到最近的一条 user 轮次，最后仍以 context_depth 为上限。
pub fn history_window<'a>(
    transcript: &'a Transcript,
    settings: &FeedSettings,
) -> Vec<(usize, &'a ChatTurn)> {
    let visible: Vec<(usize, &ChatTurn)> = transcript.indexed().filter(|(_, t)| !t.hidden).collect();
    if visible.is_empty() {
        return Vec::new();
    }
    if !settings.include_user_input {
        return visible[visible.len() - 1..].to_vec();
    }

    let depth = settings.context_depth;
    let mut start = visible.len().saturating_sub(depth);
    if let Some(user_idx) = (0..=start).rev().find(|&i| visible[i].1.is_user) {
        start = user_idx;
    }
    let mut window = visible[start..].to_vec();
    if window.len() > depth {
        window.drain(..window.len() - depth);
    }
    window
}

fn lore_block(settings: &FeedSettings, extras: &PromptExtras) -> String {
    let mut parts = Vec::new();
    if settings.include_persona {
        if let Some((name, description)) = &extras.persona {
            parts.push(format!("<user_persona name=\"{}\">\n{}\n</user_persona>", name, description));
        }
    }
    if settings.include_character_description {
        let chars: Vec<String> = extras
            .characters
            .iter()
            .filter(|(_, d)| !d.trim().is_empty())
            .map(|(n, d)| format!("<character name=\"{}\">\n{}\n</character>", n, d))
            .collect();
        if !chars.is_empty() {
            parts.push(chars.join("\n\n"));
        }
    }
    if settings.include_summary {
        if let Some(summary) = extras.summary.as_deref().filter(|s| !s.trim().is_empty()) {
            parts.push(format!("<summary>\n{}\n</summary>", summary.trim()));
        }
    }
    if settings.include_world_info {
        if let Some(info) = extras.world_info.as_deref().filter(|s| !s.trim().is_empty()) {
            parts.push(format!("<world_info>\n{}\n</world_info>", info.trim()));
        }
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!("\n\n<lore>\n{}\n</lore>", parts.join("\n\n"))
    }
}

/// 组装完整请求
pub fn build_request(
    settings: &FeedSettings,
    style: &Style,
    transcript: &Transcript,
    commentaries: &BTreeMap<usize, String>,
    extras: &PromptExtras,
) -> GenerationRequest {
    let (count, users) = requested_counts(settings, style);

    let system = format!(
        "<role>\nYou are an excellent creator of fake chat feeds that react dynamically to the user's conversation context.\n</role>{}\n\n<chat_history>",
        lore_block(settings, extras)
    );
    let mut messages = vec![Message::system(system)];

    for (idx, turn) in history_window(transcript, settings) {
        let mut content = clean_text(&turn.content);
        if settings.include_past_commentary {
            if let Some(past) = commentaries.get(&idx) {
                content.push_str(&format!("\n\n[Previous commentary: {}]", past));
            }
        }
        messages.push(Message {
            role: turn.role(),
            content,
        });
    }

    let (count_instruction, output_line) = if style.narrator {
        (String::new(), String::new())
    } else if settings.mode.is_paced() {
        (
            format!(
                "IMPORTANT: You MUST generate EXACTLY {count} chat messages from EXACTLY {users} different users. \
                 Each user can post multiple messages. Not fewer, not more - exactly {count} messages from {users} users.\n\n"
            ),
            format!("Output exactly {count} messages from {users} users. "),
        )
    } else {
        (
            format!("IMPORTANT: You MUST generate EXACTLY {count} chat messages. Not fewer, not more - exactly {count}.\n\n"),
            format!("Output exactly {count} messages. "),
        )
    };

    let instructions = format!(
        "</chat_history>\n\n<instructions>\n{count_instruction}{style_prompt}\n</instructions>\n\n<task>\n\
         Based on the chat history above, generate fake chat feed reactions.\n\
         STRICTLY follow the format defined in the instruction. {output_line}\
         Do NOT continue the story or roleplay as the characters. \
         The people you create may interact with each other in the feed. \
         Do NOT output preamble like \"Here are the messages\". Just output the content directly.\n</task>",
        style_prompt = style.prompt,
    );
    messages.push(Message::user(instructions));

    GenerationRequest {
        messages,
        max_tokens: token_budget(&settings.budget, count),
        requested_count: count,
        user_count: users,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PlaybackMode;
    use crate::feed::StyleLibrary;
    use crate::memory::Role;

    fn transcript(turns: &[ChatTurn]) -> Transcript {
        let mut t = Transcript::new(100);
        for turn in turns {
            t.push(turn.clone());
        }
        t
    }

    #[test]
    fn test_token_budget() {
        let budget = BudgetSection::default();
        assert_eq!(token_budget(&budget, 1), 2048);
        assert_eq!(token_budget(&budget, 5), 2048);
        assert_eq!(token_budget(&budget, 20), 5024);
    }

    #[test]
    fn test_last_visible_turn_only() {
        let t = transcript(&[
            ChatTurn::user("u1"),
            ChatTurn::assistant("a1"),
            ChatTurn::assistant("secret").hidden(),
        ]);
        let window = history_window(&t, &FeedSettings::default());
        assert_eq!(window.len(), 1);
        assert_eq!(window[0].0, 1);
        assert_eq!(window[0].1.content, "a1");
    }

    #[test]
    fn test_depth_window_walks_back_to_user() {
        let t = transcript(&[
            ChatTurn::user("u1"),
            ChatTurn::assistant("a1"),
            ChatTurn::assistant("a2"),
            ChatTurn::user("u2"),
            ChatTurn::assistant("a3"),
            ChatTurn::assistant("a4"),
        ]);
        let settings = FeedSettings {
            include_user_input: true,
            context_depth: 3,
            ..FeedSettings::default()
        };
        let window: Vec<&str> = history_window(&t, &settings)
            .into_iter()
            .map(|(_, t)| t.content.as_str())
            .collect();
        assert_eq!(window, vec!["u2", "a3", "a4"]);
    }

    #[test]
    fn test_request_shape_and_counts() {
        let settings = FeedSettings {
            mode: PlaybackMode::PacedManual,
            batch_size: 12,
            user_count: 4,
            include_past_commentary: true,
            ..FeedSettings::default()
        };
        let style = StyleLibrary::new().resolve("twitch");
        let t = transcript(&[ChatTurn::user("hi"), ChatTurn::assistant("<think>x</think>hello")]);
        let mut commentaries = BTreeMap::new();
        commentaries.insert(1, "Bob: old take".to_string());

        let req = build_request(&settings, &style, &t, &commentaries, &PromptExtras::default());
        assert_eq!(req.requested_count, 12);
        assert_eq!(req.user_count, 4);
        assert_eq!(req.max_tokens, 3424);
        assert_eq!(req.messages.first().unwrap().role, Role::System);
        assert_eq!(req.messages[1].content, "hello\n\n[Previous commentary: Bob: old take]");
        let last = req.messages.last().unwrap();
        assert_eq!(last.role, Role::User);
        assert!(last.content.contains("EXACTLY 12 chat messages from EXACTLY 4 different users"));
    }

    #[test]
    fn test_narrator_requests_one() {
        let style = StyleLibrary::new().resolve("hypebot");
        let t = transcript(&[ChatTurn::assistant("scene")]);
        let req = build_request(&FeedSettings::default(), &style, &t, &BTreeMap::new(), &PromptExtras::default());
        assert_eq!(req.requested_count, 1);
        assert!(!req.messages.last().unwrap().content.contains("EXACTLY"));
    }

    #[test]
    fn test_lore_block_respects_flags() {
        let extras = PromptExtras {
            persona: Some(("Sam".into(), "a pilot".into())),
            summary: Some("so far".into()),
            ..PromptExtras::default()
        };
        let off = lore_block(&FeedSettings::default(), &extras);
        assert!(off.is_empty());

        let settings = FeedSettings {
            include_persona: true,
            include_summary: true,
            ..FeedSettings::default()
        };
        let on = lore_block(&settings, &extras);
        assert!(on.contains("<user_persona name=\"Sam\">"));
        assert!(on.contains("<summary>\nso far\n</summary>"));
    }
}
