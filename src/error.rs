use std::net::Ipv4Addr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum InitProcessError {
    #[error("ロガーのセットアップに失敗しました: {0}")]
    LoggerError(String),

    #[error("環境変数ファイルの読み込みに失敗しました: {0}")]
    EnvFileReadError(String),

    #[error("環境変数の解析に失敗しました: {0}")]
    EnvVarParseError(String),

    #[error("デバイス選択エラー: {0}")]
    DeviceSelectionError(String),

    #[error("ルールの読み込みに失敗しました: {0}")]
    RuleLoadError(#[from] RuleError),

    #[error("キャプチャの開始に失敗しました: {0}")]
    CaptureStartError(#[from] CaptureError),
}

/// ヘッダーデコード時のエラー
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("パケットが短すぎます: 必要={needed}バイト, 実際={actual}バイト")]
    TruncatedPacket { needed: usize, actual: usize },

    #[error("不正なIPヘッダー長です: {0}バイト")]
    InvalidHeaderLength(usize),

    #[error("不正なTCPヘッダー長です: {0}バイト")]
    InvalidTcpHeaderLength(usize),
}

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("アドレスが不正です: {0}")]
    InvalidAddress(String),

    #[error("アドレス {0} を持つインターフェースが見つかりません")]
    InterfaceNotFound(Ipv4Addr),

    #[error("チャネルの作成に失敗しました: {0}")]
    Channel(std::io::Error),

    #[error("未対応のチャンネルタイプです")]
    UnsupportedChannel,

    #[error("{state} 状態では {op} を実行できません")]
    InvalidState { op: &'static str, state: &'static str },

    #[error("パケットの受信に失敗しました: {0}")]
    Receive(std::io::Error),

    #[error("受信タスクが異常終了しました: {0}")]
    Task(String),
}

#[derive(Error, Debug)]
pub enum RuleError {
    #[error("ルールの形式が不正です (protocol:srcAddr:srcPort:dstAddr:dstPort): {0}")]
    InvalidFormat(String),

    #[error("未対応のプロトコルです: {0}")]
    InvalidProtocol(String),

    #[error("ポート番号が不正です: {0}")]
    InvalidPort(String),

    #[error("ルールファイルの読み込みに失敗しました: {0}")]
    RulesFile(String),
}

#[derive(Error, Debug)]
pub enum CommandError {
    #[error("不明なコマンドです: {0} (help で一覧を表示)")]
    Unknown(String),

    #[error("{0} にはルールを指定してください")]
    MissingRule(&'static str),

    #[error(transparent)]
    Rule(#[from] RuleError),
}
