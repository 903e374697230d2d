use crate::error::CaptureError;
use ipnetwork::IpNetwork;
use pnet::datalink::{self, NetworkInterface};
use std::net::{IpAddr, Ipv4Addr};

/// 指定したIPv4アドレスを持つインターフェースを探す
pub fn find_interface(addr: Ipv4Addr) -> Result<NetworkInterface, CaptureError> {
    datalink::interfaces()
        .into_iter()
        .find(|interface| owns_address(&interface.ips, addr))
        .ok_or(CaptureError::InterfaceNotFound(addr))
}

/// 稼働中でループバック以外のインターフェースから最初のIPv4アドレスを選ぶ
pub fn default_local_address() -> Option<Ipv4Addr> {
    datalink::interfaces()
        .iter()
        .filter(|interface| interface.is_up() && !interface.is_loopback())
        .find_map(|interface| first_ipv4(&interface.ips))
}

fn owns_address(ips: &[IpNetwork], addr: Ipv4Addr) -> bool {
    ips.iter().any(|network| network.ip() == IpAddr::V4(addr))
}

fn first_ipv4(ips: &[IpNetwork]) -> Option<Ipv4Addr> {
    ips.iter().find_map(|network| match network.ip() {
        IpAddr::V4(addr) => Some(addr),
        IpAddr::V6(_) => None,
    })
}
