use crate::error::DecodeError;
use crate::network::packet::ipv4::IpFields;
use bytes::Bytes;

pub const HEADER_LENGTH: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UdpPacket {
    pub ip: IpFields,
    pub src_port: u16,
    pub dst_port: u16,
    pub header: Bytes,
    pub payload: Bytes,
}

impl UdpPacket {
    pub fn header_length(&self) -> usize {
        HEADER_LENGTH
    }

    pub fn payload_length(&self) -> usize {
        self.payload.len()
    }
}

pub fn decode_udp(data: &[u8]) -> Result<UdpPacket, DecodeError> {
    let ip = IpFields::parse(data)?;
    let data = &data[..ip.total_length];
    let base = ip.header_length;

    if data.len() < base + HEADER_LENGTH {
        return Err(DecodeError::TruncatedPacket {
            needed: base + HEADER_LENGTH,
            actual: data.len(),
        });
    }
    let udp = &data[base..];

    Ok(UdpPacket {
        src_port: u16::from_be_bytes([udp[0], udp[1]]),
        dst_port: u16::from_be_bytes([udp[2], udp[3]]),
        header: Bytes::copy_from_slice(&udp[..HEADER_LENGTH]),
        payload: Bytes::copy_from_slice(&udp[HEADER_LENGTH..]),
        ip,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn datagram(total: usize) -> Vec<u8> {
        let mut data = vec![0u8; total];
        data[0] = 0x45;
        data[9] = 17;
        data[20..22].copy_from_slice(&5353u16.to_be_bytes());
        data[22..24].copy_from_slice(&53u16.to_be_bytes());
        data
    }

    #[test]
    fn payload_length_excludes_both_headers() {
        let packet = decode_udp(&datagram(48)).unwrap();
        assert_eq!(packet.header_length(), 8);
        assert_eq!(packet.payload_length(), 20);
        assert_eq!(packet.src_port, 5353);
        assert_eq!(packet.dst_port, 53);
    }

    #[test]
    fn empty_payload() {
        let packet = decode_udp(&datagram(28)).unwrap();
        assert_eq!(packet.payload_length(), 0);
        assert_eq!(packet.header.len(), 8);
    }

    #[test]
    fn padding_after_total_length_is_dropped() {
        let mut data = datagram(30);
        data[2..4].copy_from_slice(&30u16.to_be_bytes());
        data.resize(46, 0xEE);
        let packet = decode_udp(&data).unwrap();
        assert_eq!(&packet.payload[..], &[0, 0]);
    }

    #[test]
    fn missing_udp_header_is_truncated() {
        assert_eq!(
            decode_udp(&datagram(26)),
            Err(DecodeError::TruncatedPacket { needed: 28, actual: 26 })
        );
    }
}
