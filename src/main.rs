use crate::config::AppConfig;
use crate::console::{run_console, spawn_stdin_reader};
use crate::error::InitProcessError;
use crate::network::capture::{CaptureEvent, CaptureSession};
use crate::security::firewall::{Disposition, RuleBook};
use crate::select_device::default_local_address;
use crate::setup_logger::setup_logger;
use log::{debug, error, info, warn};
use std::sync::Arc;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use tokio::sync::{Notify, RwLock};

mod config;
mod console;
mod error;
mod network;
mod security;
mod select_device;
mod setup_logger;

/// ルールで表示と判定されたパケットだけを出力する
async fn consume_events(mut events: UnboundedReceiver<CaptureEvent>, rules: Arc<RwLock<RuleBook>>, terminated: Arc<Notify>) {
    while let Some(event) = events.recv().await {
        match event {
            CaptureEvent::Packet(packet) => {
                if rules.read().await.decide(&packet) == Disposition::Suppress {
                    debug!("{} -> {} をフィルタしました", packet.src_addr(), packet.dst_addr());
                    continue;
                }
                println!("{}", packet);
                if let Some(text) = packet.tcp_payload_text() {
                    println!("{}", text);
                }
            }
            CaptureEvent::Terminated(e) => {
                error!("キャプチャが停止しました: {}", e);
                terminated.notify_one();
                break;
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), InitProcessError> {
    let config = AppConfig::from_env()?;

    setup_logger(config.log_level()?, config.logging.file.as_deref())
        .map_err(|e| InitProcessError::LoggerError(e.to_string()))?;

    let rules = Arc::new(RwLock::new(config.rule_book()?));
    {
        let book = rules.read().await;
        info!("ルールを読み込みました: allow={} filter={}", book.allows().len(), book.filters().len());
    }

    // デバイスの選択
    let local_addr = match config.network.local_addr {
        Some(addr) => addr,
        None => default_local_address().ok_or_else(|| {
            InitProcessError::DeviceSelectionError("IPv4アドレスを持つインターフェースが見つかりません".to_string())
        })?,
    };

    let (events_tx, events_rx) = unbounded_channel();
    let mut session = CaptureSession::new(config.capture_config(), events_tx);
    session.create_and_bind(&local_addr.to_string())?;
    if session.error_occurred() {
        warn!("全受信モードが無効です。自ホスト宛て以外のパケットは表示されない可能性があります");
    }

    let terminated = Arc::new(Notify::new());
    let consumer = tokio::spawn(consume_events(events_rx, Arc::clone(&rules), Arc::clone(&terminated)));

    session.start()?;
    println!("キャプチャ中です: {} (help でコマンド一覧)", local_addr);

    run_console(&mut session, &rules, &terminated, spawn_stdin_reader()).await;

    session.shutdown().await;
    let stats = session.stats();
    info!(
        "受信={} 出力={} 破棄={}",
        stats.received, stats.emitted, stats.dropped
    );

    // 送信側を閉じてコンシューマを終了させる
    drop(session);
    if let Err(e) = consumer.await {
        error!("出力タスクが異常終了しました: {}", e);
    }

    Ok(())
}
