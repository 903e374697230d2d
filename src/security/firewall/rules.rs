use crate::error::RuleError;
use crate::network::packet::{PacketEvent, Protocol};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RuleProtocol {
    #[serde(rename = "*")]
    Any,
    #[serde(rename = "ICMP")]
    Icmp,
    #[serde(rename = "IGMP")]
    Igmp,
    #[serde(rename = "TCP")]
    Tcp,
    #[serde(rename = "UDP")]
    Udp,
}

impl RuleProtocol {
    fn accepts(&self, protocol: Protocol) -> bool {
        match self {
            RuleProtocol::Any => true,
            RuleProtocol::Icmp => protocol == Protocol::Icmp,
            RuleProtocol::Igmp => protocol == Protocol::Igmp,
            RuleProtocol::Tcp => protocol == Protocol::Tcp,
            RuleProtocol::Udp => protocol == Protocol::Udp,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            RuleProtocol::Any => "*",
            RuleProtocol::Icmp => "ICMP",
            RuleProtocol::Igmp => "IGMP",
            RuleProtocol::Tcp => "TCP",
            RuleProtocol::Udp => "UDP",
        }
    }
}

impl FromStr for RuleProtocol {
    type Err = RuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "*" | "" => Ok(RuleProtocol::Any),
            "ICMP" => Ok(RuleProtocol::Icmp),
            "IGMP" => Ok(RuleProtocol::Igmp),
            "TCP" => Ok(RuleProtocol::Tcp),
            "UDP" => Ok(RuleProtocol::Udp),
            _ => Err(RuleError::InvalidProtocol(s.to_string())),
        }
    }
}

impl fmt::Display for RuleProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 許可/フィルタ共通のルール。空のアドレスと0のポートはワイルドカード
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawRule")]
pub struct Rule {
    protocol: RuleProtocol,
    src_addr: Option<String>,
    src_port: u16,
    dst_addr: Option<String>,
    dst_port: u16,
}

/// ルールファイル上の表現。アドレスは文字列形式と同じ検証を通してから `Rule` にする
#[derive(Deserialize)]
struct RawRule {
    protocol: RuleProtocol,
    #[serde(default)]
    src_addr: Option<String>,
    #[serde(default)]
    src_port: u16,
    #[serde(default)]
    dst_addr: Option<String>,
    #[serde(default)]
    dst_port: u16,
}

impl TryFrom<RawRule> for Rule {
    type Error = RuleError;

    fn try_from(raw: RawRule) -> Result<Self, Self::Error> {
        Ok(Self {
            protocol: raw.protocol,
            src_addr: parse_addr(raw.src_addr.as_deref().unwrap_or(""))?,
            src_port: raw.src_port,
            dst_addr: parse_addr(raw.dst_addr.as_deref().unwrap_or(""))?,
            dst_port: raw.dst_port,
        })
    }
}

fn non_empty(addr: Option<&str>) -> Option<String> {
    addr.map(str::trim).filter(|a| !a.is_empty()).map(str::to_string)
}

impl Rule {
    pub fn new(
        protocol: RuleProtocol,
        src_addr: Option<&str>,
        src_port: u16,
        dst_addr: Option<&str>,
        dst_port: u16,
    ) -> Self {
        Self {
            protocol,
            src_addr: non_empty(src_addr),
            src_port,
            dst_addr: non_empty(dst_addr),
            dst_port,
        }
    }

    /// すべてのパケットに一致するルール
    pub fn any() -> Self {
        Self::new(RuleProtocol::Any, None, 0, None, 0)
    }

    pub fn protocol(&self) -> RuleProtocol {
        self.protocol
    }

    pub fn src_addr(&self) -> Option<&str> {
        self.src_addr.as_deref().filter(|a| !a.is_empty())
    }

    pub fn src_port(&self) -> u16 {
        self.src_port
    }

    pub fn dst_addr(&self) -> Option<&str> {
        self.dst_addr.as_deref().filter(|a| !a.is_empty())
    }

    pub fn dst_port(&self) -> u16 {
        self.dst_port
    }

    /// プロトコル、送信元アドレス、送信元ポート、宛先アドレス、宛先ポートの順に判定し、
    /// 最初に一致しなかった条件で打ち切る
    pub fn matches(&self, event: &PacketEvent) -> bool {
        if !self.protocol().accepts(event.protocol()) {
            return false;
        }
        if let Some(addr) = self.src_addr() {
            if event.src_addr().to_string() != addr {
                return false;
            }
        }
        if self.src_port() != 0 && event.src_port() != Some(self.src_port()) {
            return false;
        }
        if let Some(addr) = self.dst_addr() {
            if event.dst_addr().to_string() != addr {
                return false;
            }
        }
        if self.dst_port() != 0 && event.dst_port() != Some(self.dst_port()) {
            return false;
        }
        true
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}:{}",
            self.protocol(),
            self.src_addr().unwrap_or(""),
            self.src_port(),
            self.dst_addr().unwrap_or(""),
            self.dst_port()
        )
    }
}

fn parse_addr(field: &str) -> Result<Option<String>, RuleError> {
    let field = field.trim();
    if field.is_empty() || field == "*" {
        return Ok(None);
    }
    let addr = Ipv4Addr::from_str(field).map_err(|_| RuleError::InvalidFormat(field.to_string()))?;
    Ok(Some(addr.to_string()))
}

fn parse_port(field: &str) -> Result<u16, RuleError> {
    let field = field.trim();
    if field.is_empty() || field == "*" {
        return Ok(0);
    }
    field.parse::<u16>().map_err(|_| RuleError::InvalidPort(field.to_string()))
}

/// `protocol:srcAddr:srcPort:dstAddr:dstPort` 形式を解析する
impl FromStr for Rule {
    type Err = RuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = s.trim().split(':').collect();
        if fields.len() != 5 {
            return Err(RuleError::InvalidFormat(s.to_string()));
        }

        Ok(Self {
            protocol: fields[0].parse()?,
            src_addr: parse_addr(fields[1])?,
            src_port: parse_port(fields[2])?,
            dst_addr: parse_addr(fields[3])?,
            dst_port: parse_port(fields[4])?,
        })
    }
}
