use crate::error::CaptureError;
use crate::network::packet::{self, PacketEvent};
use crate::select_device::find_interface;
use log::{debug, error, info, warn};
use pnet::datalink::{self, Channel, ChannelType, Config, DataLinkReceiver, NetworkInterface};
use std::io;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::Mutex;
use tokio::task::{self, JoinHandle};

pub const DEFAULT_BUFFER_SIZE: usize = 4096;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

const ETHERTYPE_IPV4: u16 = 0x0800;

// Linuxのerrno
const EBADF: i32 = 9;
const ENODEV: i32 = 19;
const ENETDOWN: i32 = 100;

#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// 1回の受信で読み込む最大バイト数
    pub buffer_size: usize,
    /// 受信待ちを打ち切って停止/終了要求を確認する間隔
    pub poll_interval: Duration,
    pub promiscuous: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            poll_interval: DEFAULT_POLL_INTERVAL,
            promiscuous: true,
        }
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle = 0,
    Bound = 1,
    Running = 2,
    Stopped = 3,
    Closed = 4,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionState::Idle,
            1 => SessionState::Bound,
            2 => SessionState::Running,
            3 => SessionState::Stopped,
            _ => SessionState::Closed,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "Idle",
            SessionState::Bound => "Bound",
            SessionState::Running => "Running",
            SessionState::Stopped => "Stopped",
            SessionState::Closed => "Closed",
        }
    }
}

/// コンシューマーに届く通知。`Terminated` の後には何も届かない
#[derive(Debug)]
pub enum CaptureEvent {
    Packet(PacketEvent),
    Terminated(CaptureError),
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CaptureStats {
    pub received: u64,
    pub emitted: u64,
    pub dropped: u64,
}

#[derive(Debug, PartialEq, Eq)]
enum ReceiveErrorKind {
    /// 待ち時間切れ。受信をやり直す
    Idle,
    /// ログに残して受信を続ける
    Transient,
    /// ソケットが使えなくなった
    Fatal,
}

fn classify_receive_error(e: &io::Error) -> ReceiveErrorKind {
    match e.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted => {
            ReceiveErrorKind::Idle
        }
        io::ErrorKind::NotConnected
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::UnexpectedEof => ReceiveErrorKind::Fatal,
        _ => match e.raw_os_error() {
            Some(EBADF) | Some(ENODEV) | Some(ENETDOWN) => ReceiveErrorKind::Fatal,
            _ => ReceiveErrorKind::Transient,
        },
    }
}

/// 制御スレッドと受信ループで共有する状態
struct Shared {
    state: AtomicU8,
    error_occurred: AtomicBool,
    /// 受信ループが存在する間はtrue。受信を同時に2つ発行しないためのもの
    armed: AtomicBool,
    receiver: Mutex<Option<Box<dyn DataLinkReceiver>>>,
    events: UnboundedSender<CaptureEvent>,
    received: AtomicU64,
    emitted: AtomicU64,
    dropped: AtomicU64,
}

impl Shared {
    fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// `from` のいずれかの状態にあれば `to` に遷移し、遷移前の状態を返す
    fn transition(&self, from: &[SessionState], to: SessionState) -> Result<SessionState, SessionState> {
        let mut current = self.state();
        loop {
            if !from.contains(&current) {
                return Err(current);
            }
            match self.state.compare_exchange(current as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst) {
                Ok(_) => return Ok(current),
                Err(actual) => current = SessionState::from_u8(actual),
            }
        }
    }

    fn handle_datagram(&self, data: &[u8]) {
        self.received.fetch_add(1, Ordering::Relaxed);

        match packet::decode(data) {
            Ok(event) => {
                // コンシューマーが受け取る前に数える
                self.emitted.fetch_add(1, Ordering::Relaxed);
                if self.events.send(CaptureEvent::Packet(event)).is_err() {
                    self.emitted.fetch_sub(1, Ordering::Relaxed);
                    debug!("コンシューマーが存在しないためパケットを破棄しました");
                }
            }
            Err(e) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                debug!("デコードできないデータグラムを破棄しました ({}バイト): {}", data.len(), e);
            }
        }
    }

    fn terminate(&self, e: CaptureError) {
        self.state.store(SessionState::Closed as u8, Ordering::SeqCst);
        error!("キャプチャセッションを終了します: {}", e);
        let _ = self.events.send(CaptureEvent::Terminated(e));
    }
}

/// 受信を1つ発行し、デコードと通知が終わってから次の受信を発行するループ
async fn receive_loop(shared: Arc<Shared>) {
    let mut rx = match shared.receiver.lock().await.take() {
        Some(rx) => rx,
        None => {
            shared.armed.store(false, Ordering::SeqCst);
            return;
        }
    };

    loop {
        let pending = task::spawn_blocking(move || {
            let result = rx.next().map(|data| data.to_vec());
            (rx, result)
        });

        let result = match pending.await {
            Ok((returned, result)) => {
                rx = returned;
                result
            }
            Err(e) => {
                shared.armed.store(false, Ordering::SeqCst);
                shared.terminate(CaptureError::Task(e.to_string()));
                return;
            }
        };

        match shared.state() {
            SessionState::Running => match result {
                Ok(data) => shared.handle_datagram(&data),
                Err(e) => match classify_receive_error(&e) {
                    ReceiveErrorKind::Idle => {}
                    ReceiveErrorKind::Transient => warn!("パケットの受信中にエラーが発生しました: {}", e),
                    ReceiveErrorKind::Fatal => {
                        shared.terminate(CaptureError::Receive(e));
                        break;
                    }
                },
            },
            SessionState::Closed => break,
            _ => {
                // 停止中に完了した受信は捨て、次の受信は発行しない
                *shared.receiver.lock().await = Some(rx);
                shared.armed.store(false, Ordering::SeqCst);

                // 手放す直前に start() された場合はこのループが引き継ぐ
                if shared.state() == SessionState::Running
                    && shared
                        .armed
                        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                        .is_ok()
                {
                    match shared.receiver.lock().await.take() {
                        Some(taken) => {
                            rx = taken;
                            continue;
                        }
                        None => shared.armed.store(false, Ordering::SeqCst),
                    }
                }
                return;
            }
        }
    }

    // ここでソケットを閉じる
    drop(rx);
    shared.armed.store(false, Ordering::SeqCst);
}

fn open_receiver(interface: &NetworkInterface, config: Config) -> Result<Box<dyn DataLinkReceiver>, CaptureError> {
    match datalink::channel(interface, config) {
        Ok(Channel::Ethernet(_, rx)) => Ok(rx),
        Ok(_) => Err(CaptureError::UnsupportedChannel),
        Err(e) => Err(CaptureError::Channel(e)),
    }
}

pub struct CaptureSession {
    config: CaptureConfig,
    shared: Arc<Shared>,
    interface: Option<String>,
    worker: Option<JoinHandle<()>>,
}

impl CaptureSession {
    pub fn new(config: CaptureConfig, events: UnboundedSender<CaptureEvent>) -> Self {
        Self {
            config,
            shared: Arc::new(Shared {
                state: AtomicU8::new(SessionState::Idle as u8),
                error_occurred: AtomicBool::new(false),
                armed: AtomicBool::new(false),
                receiver: Mutex::new(None),
                events,
                received: AtomicU64::new(0),
                emitted: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
            }),
            interface: None,
            worker: None,
        }
    }

    fn channel_config(&self, promiscuous: bool) -> Config {
        Config {
            read_buffer_size: self.config.buffer_size,
            read_timeout: Some(self.config.poll_interval),
            // リンク層ヘッダーを除いたIPv4データグラムをヘッダー付きで受け取る
            channel_type: ChannelType::Layer3(ETHERTYPE_IPV4),
            promiscuous,
            ..Default::default()
        }
    }

    /// `local_address` を持つインターフェースで受信チャネルを開く。
    /// 全受信モードを有効にできなかった場合は `error_occurred` を立てて非プロミスキャスで続行する
    pub fn create_and_bind(&mut self, local_address: &str) -> Result<(), CaptureError> {
        let state = self.state();
        if state != SessionState::Idle {
            return Err(CaptureError::InvalidState { op: "bind", state: state.as_str() });
        }

        let addr: Ipv4Addr = local_address
            .trim()
            .parse()
            .map_err(|_| CaptureError::InvalidAddress(local_address.to_string()))?;
        let interface = find_interface(addr)?;
        self.bind_interface(interface, open_receiver)?;
        info!("{} ({}) にバインドしました", self.interface_name().unwrap_or("-"), addr);
        Ok(())
    }

    /// `open` でチャネルを開く。全受信モードで失敗したら非プロミスキャスで開き直す
    pub(crate) fn bind_interface<F>(&mut self, interface: NetworkInterface, mut open: F) -> Result<(), CaptureError>
    where
        F: FnMut(&NetworkInterface, Config) -> Result<Box<dyn DataLinkReceiver>, CaptureError>,
    {
        let state = self.state();
        if state != SessionState::Idle {
            return Err(CaptureError::InvalidState { op: "bind", state: state.as_str() });
        }

        let (rx, error_occurred) = if self.config.promiscuous {
            match open(&interface, self.channel_config(true)) {
                Ok(rx) => (rx, false),
                Err(e) => {
                    warn!("全受信モードを有効にできませんでした ({}): {}", interface.name, e);
                    (open(&interface, self.channel_config(false))?, true)
                }
            }
        } else {
            (open(&interface, self.channel_config(false))?, false)
        };

        self.attach_receiver(rx, error_occurred)?;
        self.interface = Some(interface.name);
        Ok(())
    }

    pub(crate) fn attach_receiver(
        &mut self,
        receiver: Box<dyn DataLinkReceiver>,
        error_occurred: bool,
    ) -> Result<(), CaptureError> {
        let state = self.state();
        let mut slot = match self.shared.receiver.try_lock() {
            Ok(slot) if state == SessionState::Idle => slot,
            _ => return Err(CaptureError::InvalidState { op: "bind", state: state.as_str() }),
        };
        *slot = Some(receiver);
        drop(slot);

        self.shared.error_occurred.store(error_occurred, Ordering::SeqCst);
        self.shared.state.store(SessionState::Bound as u8, Ordering::SeqCst);
        Ok(())
    }

    /// 受信ループを開始する。tokioランタイム上で呼び出すこと
    pub fn start(&mut self) -> Result<(), CaptureError> {
        match self
            .shared
            .transition(&[SessionState::Bound, SessionState::Stopped], SessionState::Running)
        {
            Ok(_) => {}
            Err(SessionState::Running) => return Ok(()),
            Err(state) => return Err(CaptureError::InvalidState { op: "start", state: state.as_str() }),
        }

        // 停止前の受信がまだ完了していなければ、そのループが再開する
        if self
            .shared
            .armed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            self.worker = Some(tokio::spawn(receive_loop(Arc::clone(&self.shared))));
        }

        info!("キャプチャを開始しました");
        Ok(())
    }

    /// 受信中のものは取り消さない。その完了後に次の受信を発行しないだけ
    pub fn stop(&mut self) -> Result<(), CaptureError> {
        match self.shared.transition(&[SessionState::Running], SessionState::Stopped) {
            Ok(_) | Err(SessionState::Stopped) => {
                info!("キャプチャを停止しました");
                Ok(())
            }
            Err(state) => Err(CaptureError::InvalidState { op: "stop", state: state.as_str() }),
        }
    }

    /// ソケットを閉じる。何度呼んでもよい
    pub async fn shutdown(&mut self) {
        let previous = self.shared.state.swap(SessionState::Closed as u8, Ordering::SeqCst);

        // 受信中のものは待ち時間切れで完了し、ループがソケットを手放す
        if let Some(worker) = self.worker.take() {
            if let Err(e) = worker.await {
                warn!("受信ループの終了待ちに失敗しました: {}", e);
            }
        }
        drop(self.shared.receiver.lock().await.take());

        if SessionState::from_u8(previous) != SessionState::Closed {
            info!("キャプチャセッションを閉じました");
        }
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    /// 全受信モードの設定に失敗したかどうか。立っている間はキャプチャ結果を信用しないこと
    pub fn error_occurred(&self) -> bool {
        self.shared.error_occurred.load(Ordering::SeqCst)
    }

    pub fn interface_name(&self) -> Option<&str> {
        self.interface.as_deref()
    }

    pub fn stats(&self) -> CaptureStats {
        CaptureStats {
            received: self.shared.received.load(Ordering::Relaxed),
            emitted: self.shared.emitted.load(Ordering::Relaxed),
            dropped: self.shared.dropped.load(Ordering::Relaxed),
        }
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.shared.state.store(SessionState::Closed as u8, Ordering::SeqCst);
    }
}
