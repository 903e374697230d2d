use crate::error::CommandError;
use crate::network::capture::CaptureSession;
use crate::security::firewall::{Rule, RuleBook};
use log::{error, info, warn};
use std::io::{self, BufRead};
use std::str::FromStr;
use std::thread;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use tokio::sync::{Notify, RwLock};

const HELP: &str = "\
start                 キャプチャを開始
stop                  キャプチャを停止
allow <rule>          許可ルールを追加
filter <rule>         フィルタルールを追加
unallow <rule>        許可ルールを削除
unfilter <rule>       フィルタルールを削除
filter-all            すべてのパケットをフィルタ
rules                 ルール一覧
stats                 受信統計
quit                  終了
<rule> = protocol:srcAddr:srcPort:dstAddr:dstPort (例: TCP::0::80)";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Stop,
    Allow(Rule),
    Filter(Rule),
    Unallow(Rule),
    Unfilter(Rule),
    FilterAll,
    Rules,
    Stats,
    Help,
    Quit,
}

fn rule_arg(name: &'static str, arg: Option<&str>) -> Result<Rule, CommandError> {
    match arg {
        Some(text) if !text.trim().is_empty() => Ok(text.parse()?),
        _ => Err(CommandError::MissingRule(name)),
    }
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let line = s.trim();
        let (name, arg) = match line.split_once(char::is_whitespace) {
            Some((name, arg)) => (name, Some(arg)),
            None => (line, None),
        };

        match name.to_ascii_lowercase().as_str() {
            "start" => Ok(Command::Start),
            "stop" => Ok(Command::Stop),
            "allow" => Ok(Command::Allow(rule_arg("allow", arg)?)),
            "filter" => Ok(Command::Filter(rule_arg("filter", arg)?)),
            "unallow" => Ok(Command::Unallow(rule_arg("unallow", arg)?)),
            "unfilter" => Ok(Command::Unfilter(rule_arg("unfilter", arg)?)),
            "filter-all" => Ok(Command::FilterAll),
            "rules" => Ok(Command::Rules),
            "stats" => Ok(Command::Stats),
            "help" | "?" => Ok(Command::Help),
            "quit" | "exit" => Ok(Command::Quit),
            _ => Err(CommandError::Unknown(line.to_string())),
        }
    }
}

pub fn render_rules(book: &RuleBook) -> String {
    let mut out = String::from("allow:\n");
    for (i, rule) in book.allows().iter().enumerate() {
        out.push_str(&format!("  {}. {}\n", i + 1, rule));
    }
    out.push_str("filter:\n");
    for (i, rule) in book.filters().iter().enumerate() {
        out.push_str(&format!("  {}. {}\n", i + 1, rule));
    }
    out
}

/// コマンドを実行する。終了要求ならfalseを返す
pub async fn execute(command: Command, session: &mut CaptureSession, rules: &RwLock<RuleBook>) -> bool {
    match command {
        Command::Start => {
            if let Err(e) = session.start() {
                error!("{}", e);
            }
        }
        Command::Stop => {
            if let Err(e) = session.stop() {
                error!("{}", e);
            }
        }
        Command::Allow(rule) => {
            info!("許可ルールを追加しました: {}", rule);
            rules.write().await.add_allow(rule);
        }
        Command::Filter(rule) => {
            info!("フィルタルールを追加しました: {}", rule);
            rules.write().await.add_filter(rule);
        }
        Command::Unallow(rule) => {
            let removed = rules.write().await.remove_allow(&rule);
            info!("許可ルールを{}件削除しました: {}", removed, rule);
        }
        Command::Unfilter(rule) => {
            let removed = rules.write().await.remove_filter(&rule);
            info!("フィルタルールを{}件削除しました: {}", removed, rule);
        }
        Command::FilterAll => {
            rules.write().await.filter_all();
            info!("すべてのパケットをフィルタします");
        }
        Command::Rules => print!("{}", render_rules(&*rules.read().await)),
        Command::Stats => {
            let stats = session.stats();
            println!(
                "state={} interface={} promiscuous_error={} received={} emitted={} dropped={}",
                session.state().as_str(),
                session.interface_name().unwrap_or("-"),
                session.error_occurred(),
                stats.received,
                stats.emitted,
                stats.dropped
            );
        }
        Command::Help => println!("{}", HELP),
        Command::Quit => return false,
    }
    true
}

/// 標準入力を専用スレッドで行単位に読む。
/// 読み込み中のスレッドは中断できないので、終了時に待たないようjoinしない
pub fn spawn_stdin_reader() -> UnboundedReceiver<io::Result<String>> {
    let (tx, rx) = unbounded_channel();
    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let failed = line.is_err();
            if tx.send(line).is_err() || failed {
                break;
            }
        }
    });
    rx
}

/// コマンドを読み、quit・Ctrl-C・キャプチャ異常終了のいずれかで戻る。
/// 入力が閉じてもキャプチャは続ける
pub async fn run_console(
    session: &mut CaptureSession,
    rules: &RwLock<RuleBook>,
    terminated: &Notify,
    mut lines: UnboundedReceiver<io::Result<String>>,
) {
    let mut input_open = true;

    loop {
        tokio::select! {
            line = lines.recv(), if input_open => match line {
                Some(Ok(line)) if line.trim().is_empty() => {}
                Some(Ok(line)) => match line.parse::<Command>() {
                    Ok(command) => {
                        if !execute(command, session, rules).await {
                            break;
                        }
                    }
                    Err(e) => warn!("{}", e),
                },
                Some(Err(e)) => {
                    warn!("標準入力の読み込みに失敗しました: {}", e);
                    input_open = false;
                }
                None => input_open = false,
            },
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    error!("シグナルの待機に失敗しました: {}", e);
                }
                break;
            }
            _ = terminated.notified() => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::capture::{CaptureConfig, SessionState};
    use crate::security::firewall::rules::RuleProtocol;
    use std::time::Duration;

    #[test]
    fn parses_simple_commands() {
        assert_eq!("start".parse::<Command>().unwrap(), Command::Start);
        assert_eq!("  STOP ".parse::<Command>().unwrap(), Command::Stop);
        assert_eq!("filter-all".parse::<Command>().unwrap(), Command::FilterAll);
        assert_eq!("exit".parse::<Command>().unwrap(), Command::Quit);
        assert_eq!("?".parse::<Command>().unwrap(), Command::Help);
    }

    #[test]
    fn parses_rule_arguments() {
        assert_eq!(
            "allow TCP::0::80".parse::<Command>().unwrap(),
            Command::Allow(Rule::new(RuleProtocol::Tcp, None, 0, None, 80))
        );
        assert_eq!(
            "unfilter   *::0::0".parse::<Command>().unwrap(),
            Command::Unfilter(Rule::any())
        );
    }

    #[test]
    fn reports_bad_input() {
        assert!(matches!("dance".parse::<Command>(), Err(CommandError::Unknown(_))));
        assert!(matches!("allow".parse::<Command>(), Err(CommandError::MissingRule("allow"))));
        assert!(matches!("filter TCP".parse::<Command>(), Err(CommandError::Rule(_))));
    }

    #[test]
    fn renders_numbered_rules() {
        let mut book = RuleBook::new();
        book.add_allow(Rule::new(RuleProtocol::Tcp, None, 0, None, 80));
        book.filter_all();
        assert_eq!(render_rules(&book), "allow:\n  1. TCP::0::80\nfilter:\n  1. *::0::0\n");
    }

    #[tokio::test]
    async fn execute_mutates_rules_and_survives_session_errors() {
        let (events_tx, _events_rx) = unbounded_channel();
        let mut session = CaptureSession::new(CaptureConfig::default(), events_tx);
        let rules = RwLock::new(RuleBook::new());

        assert!(execute(Command::FilterAll, &mut session, &rules).await);
        assert!(execute(Command::Allow(Rule::any()), &mut session, &rules).await);
        assert!(execute(Command::Unfilter(Rule::any()), &mut session, &rules).await);
        // 未バインドのセッションでも失敗をログに残して続行する
        assert!(execute(Command::Start, &mut session, &rules).await);
        assert_eq!(session.state(), SessionState::Idle);
        assert!(!execute(Command::Quit, &mut session, &rules).await);

        let book = rules.read().await;
        assert_eq!(book.allows(), &[Rule::any()]);
        assert!(book.filters().is_empty());
    }

    #[tokio::test]
    async fn console_runs_commands_until_quit() {
        let (events_tx, _events_rx) = unbounded_channel();
        let mut session = CaptureSession::new(CaptureConfig::default(), events_tx);
        let rules = RwLock::new(RuleBook::new());
        let terminated = Notify::new();

        let (tx, rx) = unbounded_channel();
        for line in ["", "filter-all", "bogus", "allow UDP::0::53", "quit", "filter TCP::0::80"] {
            tx.send(Ok(line.to_string())).unwrap();
        }

        tokio::time::timeout(Duration::from_secs(1), run_console(&mut session, &rules, &terminated, rx))
            .await
            .unwrap();

        // quit 以降の行は実行されない
        let book = rules.read().await;
        assert_eq!(book.filters(), &[Rule::any()]);
        assert_eq!(book.allows().len(), 1);
    }

    #[tokio::test]
    async fn console_returns_on_termination_while_input_is_still_open() {
        let (events_tx, _events_rx) = unbounded_channel();
        let mut session = CaptureSession::new(CaptureConfig::default(), events_tx);
        let rules = RwLock::new(RuleBook::new());
        let terminated = Notify::new();

        // 送信側を保持したまま、入力が来ない状態にする
        let (_tx, rx) = unbounded_channel::<io::Result<String>>();
        terminated.notify_one();

        tokio::time::timeout(Duration::from_secs(1), run_console(&mut session, &rules, &terminated, rx))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn closed_input_keeps_waiting_for_termination() {
        let (events_tx, _events_rx) = unbounded_channel();
        let mut session = CaptureSession::new(CaptureConfig::default(), events_tx);
        let rules = RwLock::new(RuleBook::new());
        let terminated = Notify::new();

        let (tx, rx) = unbounded_channel::<io::Result<String>>();
        drop(tx);

        let console = run_console(&mut session, &rules, &terminated, rx);
        tokio::pin!(console);
        assert!(tokio::time::timeout(Duration::from_millis(50), &mut console).await.is_err());

        terminated.notify_one();
        tokio::time::timeout(Duration::from_secs(1), console).await.unwrap();
    }
}
