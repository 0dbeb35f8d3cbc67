//! 反应流编排器：主控循环
//!
//! 负责：按配置创建状态存储、风格库与会话中心，建立 cmd/event 两通道，
//! 并在后台任务中消费宿主命令（切换会话、新消息、生成、取消、停止、重置、开关），驱动当前会话。

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::config::{AppConfig, FeedSettings, PlaybackMode};
use crate::core::hub::FeedHub;
use crate::core::session::FeedDeps;
use crate::core::{FeedEvent, Trigger};
use crate::feed::{DisplaySink, PromptExtras, StyleLibrary};
use crate::llm::BackendAdapter;
use crate::memory::{create_store, ChatTurn};

/// 从宿主发往编排器的命令
#[derive(Debug, Clone)]
pub enum Command {
    /// 切换到另一个会话，附带宿主当前的对话记录
    Switch {
        conversation_id: String,
        history: Vec<ChatTurn>,
    },
    /// 宿主对话出现新消息
    Input(ChatTurn),
    /// 手动生成
    Generate,
    /// 取消当前生成
    Cancel,
    /// 停止节奏播放
    Stop,
    /// 清空当前会话的反应流
    Reset,
    /// 删除会话的持久化状态
    Delete(String),
    SetEnabled(bool),
    SetPaused(bool),
    SetMode(PlaybackMode),
    SetStyle(String),
    SetExtras(PromptExtras),
    /// 退出
    Quit,
}

/// 创建反应流运行时：返回命令发送端、事件接收端与后台任务句柄
pub fn create_feed_runtime(
    cfg: &AppConfig,
    backend: Arc<dyn BackendAdapter>,
    sink: Arc<dyn DisplaySink>,
) -> (
    mpsc::UnboundedSender<Command>,
    broadcast::Receiver<FeedEvent>,
    JoinHandle<()>,
) {
    let settings = FeedSettings::from_config(cfg);
    let store = create_store(cfg.app.data_dir.as_deref());
    let styles = settings
        .styles_dir
        .as_ref()
        .map(StyleLibrary::with_dir)
        .unwrap_or_default();

    let deps = FeedDeps::new(backend, store, sink).with_styles(styles);
    let mut hub = FeedHub::new(deps, settings, cfg.app.max_transcript_turns);
    let events = hub.subscribe();

    let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel::<Command>();

    let handle = tokio::spawn(async move {
        while let Some(cmd) = cmd_rx.recv().await {
            if let Command::Quit = cmd {
                break;
            }
            handle_command(&mut hub, cmd).await;
        }
        // cmd_tx 已关闭或收到 Quit：卸载当前会话，保留持久化状态
        hub.detach().await;
        tracing::info!("Feed runtime stopped");
    });

    (cmd_tx, events, handle)
}

async fn handle_command(hub: &mut FeedHub, cmd: Command) {
    match cmd {
        Command::Switch {
            conversation_id,
            history,
        } => {
            hub.switch_to(&conversation_id, history).await;
        }
        Command::Delete(conversation_id) => {
            if let Err(e) = hub.delete(&conversation_id).await {
                tracing::warn!("Failed to delete feed state for {}: {}", conversation_id, e);
            }
        }
        Command::SetMode(mode) => {
            let mut settings = hub.settings().clone();
            settings.mode = mode;
            hub.update_settings(settings).await;
        }
        Command::SetStyle(style) => {
            let mut settings = hub.settings().clone();
            settings.style = style;
            hub.update_settings(settings).await;
        }
        Command::SetEnabled(enabled) => {
            let mut settings = hub.settings().clone();
            settings.enabled = enabled;
            hub.update_settings(settings).await;
        }
        Command::SetPaused(paused) => {
            let mut settings = hub.settings().clone();
            settings.paused = paused;
            hub.update_settings(settings).await;
        }
        cmd => {
            let Some(session) = hub.current().cloned() else {
                tracing::warn!("No conversation attached, ignoring {:?}", cmd);
                return;
            };
            match cmd {
                Command::Input(turn) => {
                    session.on_new_input(turn).await;
                }
                Command::Generate => {
                    let outcome = session.start(Trigger::Manual).await;
                    tracing::debug!("[{}] manual generate: {:?}", session.conversation_id(), outcome);
                }
                Command::Cancel => {
                    session.cancel().await;
                }
                Command::Stop => {
                    session.stop_playback().await;
                }
                Command::Reset => {
                    if let Err(e) = session.reset().await {
                        tracing::warn!("[{}] reset failed to clear state: {}", session.conversation_id(), e);
                    }
                }
                Command::SetExtras(extras) => session.set_extras(extras).await,
                _ => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::feed::RecordingSink;
    use crate::llm::MockBackend;

    #[tokio::test]
    async fn test_runtime_generates_and_quits() {
        let sink = Arc::new(RecordingSink::new());
        let (cmd_tx, mut events, handle) =
            create_feed_runtime(&AppConfig::default(), Arc::new(MockBackend::new()), sink.clone());

        cmd_tx
            .send(Command::Switch {
                conversation_id: "demo".into(),
                history: vec![ChatTurn::user("the dragon lands")],
            })
            .unwrap();
        cmd_tx.send(Command::Generate).unwrap();

        loop {
            if let FeedEvent::JobFinished { outcome, .. } = events.recv().await.unwrap() {
                assert_eq!(outcome, crate::core::JobOutcome::Succeeded { count: 5 });
                break;
            }
        }
        assert_eq!(sink.snapshot().visible.len(), 5);

        cmd_tx.send(Command::Quit).unwrap();
        handle.await.unwrap();
    }
}
