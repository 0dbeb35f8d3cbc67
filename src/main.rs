//! Chorus - 反应流生成与节奏播放
//!
//! 入口：初始化日志、加载配置、创建反应流运行时，从 stdin 读取宿主消息与命令。

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chorus::config::{load_config, PlaybackMode};
use chorus::core::{create_feed_runtime, Command, FeedEvent};
use chorus::feed::ConsoleSink;
use chorus::llm::MockBackend;
use chorus::memory::ChatTurn;
use tokio::io::{AsyncBufReadExt, BufReader};

const HELP: &str = "\
commands:
  /switch <id>   attach another conversation
  /gen           generate now
  /cancel        cancel the running generation
  /stop          stop paced playback
  /reset         clear this conversation's feed
  /delete <id>   delete a conversation's saved feed
  /enable | /disable | /pause | /unpause
  /mode <immediate|manual|oncomplete|onmessage>
  /style <id>
  /quit
anything else is sent as a new user message";

fn parse_command(line: &str) -> Result<Option<Command>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Some(Command::Input(ChatTurn::user(line))));
    };
    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (rest, ""),
    };
    let cmd = match name {
        "switch" if !arg.is_empty() => Command::Switch {
            conversation_id: arg.to_string(),
            history: Vec::new(),
        },
        "delete" if !arg.is_empty() => Command::Delete(arg.to_string()),
        "gen" => Command::Generate,
        "cancel" => Command::Cancel,
        "stop" => Command::Stop,
        "reset" => Command::Reset,
        "enable" => Command::SetEnabled(true),
        "disable" => Command::SetEnabled(false),
        "pause" => Command::SetPaused(true),
        "unpause" => Command::SetPaused(false),
        "mode" => Command::SetMode(arg.parse::<PlaybackMode>()?),
        "style" if !arg.is_empty() => Command::SetStyle(arg.to_string()),
        "quit" | "exit" => Command::Quit,
        _ => return Err(HELP.to_string()),
    };
    Ok(Some(cmd))
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    chorus::observability::init();

    let cfg = load_config(None).context("Failed to load config")?;

    let backend = Arc::new(MockBackend::new().with_latency(Duration::from_millis(800)));
    let (cmd_tx, mut events, handle) = create_feed_runtime(&cfg, backend, Arc::new(ConsoleSink));

    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if let FeedEvent::PlaybackComplete { conversation_id } = event {
                tracing::info!("[{}] playback finished", conversation_id);
            }
        }
    });

    cmd_tx
        .send(Command::Switch {
            conversation_id: "default".to_string(),
            history: Vec::new(),
        })
        .context("Feed runtime stopped")?;
    println!("{}", HELP);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        match parse_command(&line) {
            Ok(Some(cmd)) => {
                let quit = matches!(cmd, Command::Quit);
                cmd_tx.send(cmd).context("Feed runtime stopped")?;
                if quit {
                    break;
                }
            }
            Ok(None) => {}
            Err(msg) => eprintln!("{}", msg),
        }
    }

    drop(cmd_tx);
    handle.await.context("Feed runtime panicked")?;
    Ok(())
}
