//! 风格库：内置风格提示词 + 目录覆盖
//!
//! 风格决定指令中的格式要求；旁白类风格（narrator）每次只生成一条消息。

use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// 未知风格回退到的默认风格
pub const DEFAULT_STYLE: &str = "twitch";

/// 内置风格：(id, 是否旁白风格, 提示词)
const BUILT_IN: &[(&str, bool, &str)] = &[
    (
        "twitch",
        false,
        "You are simulating a live Discord/Twitch chat reacting to the scene. \
         Each line is one chat message in the form `username: message`. \
         Keep messages short, casual and varied: slang, emotes, hot takes, questions to each other.",
    ),
    (
        "verbose",
        false,
        "You are simulating a thoughtful discussion thread. \
         Each entry is `username: message` with one or two full sentences of considered commentary.",
    ),
    (
        "twitter",
        false,
        "You are simulating a Twitter/X timeline reacting to the scene. \
         Each line is `@handle: post` with hashtags where natural and under 280 characters.",
    ),
    (
        "news",
        false,
        "You are simulating a breaking-news ticker covering the scene. \
         Each line is `Outlet Name: headline-style update`.",
    ),
    (
        "mst3k",
        false,
        "You are simulating riffing commentators watching the scene. \
         Each line is `Name: quip`, dry and rapid-fire.",
    ),
    (
        "hypebot",
        true,
        "You are HypeBot, a single overexcited narrator. \
         Output exactly one message as `HypeBot: message`.",
    ),
    (
        "nsfw_ava",
        true,
        "You are Ava, a single flirtatious companion narrator watching the scene beside the reader. \
         Output exactly one message as `Ava: message`, teasing and in character.",
    ),
    (
        "nsfw_kai",
        true,
        "You are Kai, a single bold and smug companion narrator watching the scene beside the reader. \
         Output exactly one message as `Kai: message`, confident and in character.",
    ),
    (
        "doomscrollers",
        false,
        "You are simulating anxious late-night doomscrollers reacting to the scene. \
         Each line is `username: message`, catastrophizing, over-reading every detail, spiraling together.",
    ),
    (
        "dumbanddumber",
        false,
        "You are simulating two cheerfully clueless friends watching the scene. \
         Each line is `Name: message`, misreading events with total confidence.",
    ),
    (
        "ao3wattpad",
        false,
        "You are simulating fanfic readers leaving comments on the latest chapter. \
         Each line is `username: comment` with ship names, keysmashes and pleas for updates.",
    ),
];

/// 一个可用风格
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Style {
    pub id: String,
    pub narrator: bool,
    pub prompt: String,
}

/// 风格库：目录中的 `<id>.md` 覆盖同名内置风格，也可新增风格
#[derive(Debug, Clone, Default)]
pub struct StyleLibrary {
    overrides: HashMap<String, String>,
    dir: Option<PathBuf>,
}

impl StyleLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从目录加载覆盖；目录不存在或读取失败只记日志
    pub fn with_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref().to_path_buf();
        let mut overrides = HashMap::new();
        match std::fs::read_dir(&dir) {
            Ok(entries) => {
                for entry in entries.flatten() {
                    let path = entry.path();
                    if path.extension().and_then(|e| e.to_str()) != Some("md") {
                        continue;
                    }
                    let Some(id) = path.file_stem().and_then(|s| s.to_str()) else {
                        continue;
                    };
                    match std::fs::read_to_string(&path) {
                        Ok(text) => {
                            overrides.insert(id.to_string(), text);
                        }
                        Err(e) => tracing::warn!("Failed to read style {:?}: {}", path, e),
                    }
                }
                tracing::info!("Loaded {} custom styles from {:?}", overrides.len(), dir);
            }
            Err(e) => tracing::warn!("Styles dir {:?} unavailable: {}", dir, e),
        }
        Self {
            overrides,
            dir: Some(dir),
        }
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// 插入或替换一个风格（宿主的风格编辑器产物）
    pub fn insert(&mut self, id: impl Into<String>, prompt: impl Into<String>) {
        self.overrides.insert(id.into(), prompt.into());
    }

    /// 解析风格；未知 id 回退到默认风格
    pub fn resolve(&self, id: &str) -> Style {
        let built_in = BUILT_IN.iter().find(|(sid, _, _)| *sid == id);
        if let Some(prompt) = self.overrides.get(id) {
            return Style {
                id: id.to_string(),
                narrator: built_in.map(|(_, n, _)| *n).unwrap_or(false),
                prompt: prompt.clone(),
            };
        }
        match built_in {
            Some((sid, narrator, prompt)) => Style {
                id: sid.to_string(),
                narrator: *narrator,
                prompt: prompt.to_string(),
            },
            None => {
                tracing::debug!("Unknown style '{}', falling back to {}", id, DEFAULT_STYLE);
                self.resolve(DEFAULT_STYLE)
            }
        }
    }

    /// 全部可用风格 id（内置在前）
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = BUILT_IN.iter().map(|(id, _, _)| id.to_string()).collect();
        let mut custom: Vec<String> = self
            .overrides
            .keys()
            .filter(|k| !ids.contains(k))
            .cloned()
            .collect();
        custom.sort();
        ids.extend(custom);
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_style_falls_back() {
        let lib = StyleLibrary::new();
        assert_eq!(lib.resolve("nope").id, DEFAULT_STYLE);
        assert!(lib.resolve("hypebot").narrator);
    }

    #[test]
    fn test_narrator_flag_survives_override() {
        let mut lib = StyleLibrary::new();
        lib.insert("nsfw_kai", "custom kai prompt");
        let kai = lib.resolve("nsfw_kai");
        assert_eq!(kai.prompt, "custom kai prompt");
        assert!(kai.narrator);
        assert!(lib.resolve("nsfw_ava").narrator);
        assert!(!lib.resolve("doomscrollers").narrator);
        assert_eq!(lib.ids().len(), 11);
    }

    #[test]
    fn test_dir_override() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("twitch.md"), "custom twitch").unwrap();
        std::fs::write(dir.path().join("pirates.md"), "arr").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let lib = StyleLibrary::with_dir(dir.path());
        assert_eq!(lib.resolve("twitch").prompt, "custom twitch");
        assert_eq!(lib.resolve("pirates").prompt, "arr");
        assert!(lib.ids().contains(&"pirates".to_string()));
        assert!(!lib.ids().contains(&"notes".to_string()));
    }
}
