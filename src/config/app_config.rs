use crate::error::{InitProcessError, RuleError};
use crate::network::capture::{CaptureConfig, DEFAULT_BUFFER_SIZE, DEFAULT_POLL_INTERVAL};
use crate::security::firewall::{Rule, RuleBook};
use log::LevelFilter;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub network: NetworkConfig,
    pub logging: LoggingConfig,
    pub rules: RulesConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// 未指定の場合はインターフェース一覧から選ぶ
    pub local_addr: Option<Ipv4Addr>,
    pub buffer_size: usize,
    pub poll_interval_ms: u64,
    pub promiscuous: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RulesConfig {
    pub file: Option<PathBuf>,
    pub allow: Vec<Rule>,
    pub filter: Vec<Rule>,
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T, InitProcessError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(value) if !value.trim().is_empty() => value
            .trim()
            .parse::<T>()
            .map_err(|e| InitProcessError::EnvVarParseError(format!("{}: {}", key, e))),
        _ => Ok(default),
    }
}

fn parse_bool(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: bool) -> Result<bool, InitProcessError> {
    match lookup(key).map(|v| v.trim().to_ascii_lowercase()) {
        None => Ok(default),
        Some(value) => match value.as_str() {
            "" => Ok(default),
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(InitProcessError::EnvVarParseError(format!("{}: {}", key, value))),
        },
    }
}

/// `;` 区切りのルール列を解析する
pub fn parse_rules(text: &str) -> Result<Vec<Rule>, RuleError> {
    text.split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(Rule::from_str)
        .collect()
}

impl AppConfig {
    pub fn from_env() -> Result<Self, InitProcessError> {
        match dotenv::dotenv() {
            Ok(_) => {}
            // .envファイルがなくても環境変数だけで動作する
            Err(dotenv::Error::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(InitProcessError::EnvFileReadError(e.to_string())),
        }

        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, InitProcessError> {
        let local_addr = match lookup("SNIFFER_LOCAL_ADDR") {
            Some(value) if !value.trim().is_empty() => Some(value.trim().parse::<Ipv4Addr>().map_err(|e| {
                InitProcessError::EnvVarParseError(format!("SNIFFER_LOCAL_ADDR: {}", e))
            })?),
            _ => None,
        };

        let buffer_size = parse_var(&lookup, "SNIFFER_BUFFER_SIZE", DEFAULT_BUFFER_SIZE)?;
        if buffer_size < 20 {
            return Err(InitProcessError::EnvVarParseError(format!(
                "SNIFFER_BUFFER_SIZE: {} はIPヘッダーより小さい値です",
                buffer_size
            )));
        }

        let rule_list = |key: &str| -> Result<Vec<Rule>, InitProcessError> {
            match lookup(key) {
                Some(text) => parse_rules(&text).map_err(InitProcessError::from),
                None => Ok(Vec::new()),
            }
        };

        Ok(Self {
            network: NetworkConfig {
                local_addr,
                buffer_size,
                poll_interval_ms: parse_var(
                    &lookup,
                    "SNIFFER_POLL_INTERVAL_MS",
                    DEFAULT_POLL_INTERVAL.as_millis() as u64,
                )?,
                promiscuous: parse_bool(&lookup, "SNIFFER_PROMISCUOUS", true)?,
            },
            logging: LoggingConfig {
                level: lookup("SNIFFER_LOG_LEVEL")
                    .map(|v| v.trim().to_string())
                    .filter(|v| !v.is_empty())
                    .unwrap_or_else(|| "info".to_string()),
                file: lookup("SNIFFER_LOG_FILE").filter(|v| !v.trim().is_empty()).map(PathBuf::from),
            },
            rules: RulesConfig {
                file: lookup("SNIFFER_RULES_FILE").filter(|v| !v.trim().is_empty()).map(PathBuf::from),
                allow: rule_list("SNIFFER_ALLOW_RULES")?,
                filter: rule_list("SNIFFER_FILTER_RULES")?,
            },
        })
    }

    pub fn log_level(&self) -> Result<LevelFilter, InitProcessError> {
        self.logging
            .level
            .parse::<LevelFilter>()
            .map_err(|e| InitProcessError::EnvVarParseError(format!("SNIFFER_LOG_LEVEL: {}", e)))
    }

    pub fn capture_config(&self) -> CaptureConfig {
        CaptureConfig {
            buffer_size: self.network.buffer_size,
            poll_interval: Duration::from_millis(self.network.poll_interval_ms.max(1)),
            promiscuous: self.network.promiscuous,
        }
    }

    /// ルールファイルを読み込み、環境変数で指定されたルールを後ろに追加する
    pub fn rule_book(&self) -> Result<RuleBook, RuleError> {
        let mut book = match &self.rules.file {
            Some(path) => RuleBook::load_file(path)?,
            None => RuleBook::new(),
        };
        for rule in &self.rules.allow {
            book.add_allow(rule.clone());
        }
        for rule in &self.rules.filter {
            book.add_filter(rule.clone());
        }
        Ok(book)
    }

    #[cfg(test)]
    pub fn for_testing() -> Self {
        Self {
            network: NetworkConfig {
                local_addr: Some(Ipv4Addr::LOCALHOST),
                buffer_size: DEFAULT_BUFFER_SIZE,
                poll_interval_ms: 10,
                promiscuous: false,
            },
            logging: LoggingConfig {
                level: "debug".to_string(),
                file: None,
            },
            rules: RulesConfig::default(),
        }
    }
}
