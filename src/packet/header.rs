//! IPv4 header decoding.
//!
//! Field offsets follow RFC 791:
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |Version|  IHL  |Type of Service|          Total Length         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |         Identification        |Flags|      Fragment Offset    |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |  Time to Live |    Protocol   |         Header Checksum       |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                       Source Address                          |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                    Destination Address                        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Decoding reads the fixed 20-byte part only. Options are skipped but their
//! presence is validated against the buffer length.

use super::error::PacketError;
use std::net::Ipv4Addr;

/// Length of an IPv4 header without options.
pub const MIN_HEADER_LEN: usize = 20;

/// IP protocol number for ICMP.
pub const PROTO_ICMP: u8 = 1;
/// IP protocol number for TCP.
pub const PROTO_TCP: u8 = 6;
/// IP protocol number for UDP.
pub const PROTO_UDP: u8 = 17;

/// Decoded fields of an IPv4 header.
///
/// Addresses are kept as the big-endian `u32` read straight off the wire;
/// use [`to_octets`] or the `*_addr` accessors for the dotted form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4HeaderView {
    /// IP version (always 4 for a successfully decoded header).
    pub version: u8,
    /// Header length in bytes (IHL × 4).
    pub header_len: u8,
    /// Total datagram length from the header.
    pub total_len: u16,
    /// Transport protocol number.
    pub protocol: u8,
    /// Source address.
    pub src: u32,
    /// Destination address.
    pub dst: u32,
}

impl Ipv4HeaderView {
    /// Source as an [`Ipv4Addr`].
    pub fn src_addr(&self) -> Ipv4Addr {
        Ipv4Addr::from(to_octets(self.src))
    }

    /// Destination as an [`Ipv4Addr`].
    pub fn dst_addr(&self) -> Ipv4Addr {
        Ipv4Addr::from(to_octets(self.dst))
    }

    /// Short protocol name for logging.
    pub fn protocol_name(&self) -> &'static str {
        match self.protocol {
            PROTO_ICMP => "icmp",
            PROTO_TCP => "tcp",
            PROTO_UDP => "udp",
            _ => "other",
        }
    }
}

/// Decode the IPv4 header at the start of `buf`.
///
/// Fails with [`PacketError::MalformedHeader`] when `buf` is shorter than 20
/// bytes or than the header length it declares, whatever the version field
/// says. Otherwise a version other than 4 fails with [`PacketError::NotIpv4`].
pub fn decode(buf: &[u8]) -> Result<Ipv4HeaderView, PacketError> {
    if buf.len() < MIN_HEADER_LEN {
        return Err(PacketError::MalformedHeader {
            len: buf.len(),
            required: MIN_HEADER_LEN,
        });
    }

    // Declared length is checked before the version
    let header_len = usize::from(buf[0] & 0x0f) * 4;
    if buf.len() < header_len {
        return Err(PacketError::MalformedHeader {
            len: buf.len(),
            required: header_len,
        });
    }

    let version = buf[0] >> 4;
    if version != 4 {
        return Err(PacketError::NotIpv4(version));
    }

    if header_len < MIN_HEADER_LEN {
        return Err(PacketError::MalformedHeader {
            len: buf.len(),
            required: MIN_HEADER_LEN,
        });
    }

    Ok(Ipv4HeaderView {
        version,
        header_len: header_len as u8,
        total_len: u16::from_be_bytes([buf[2], buf[3]]),
        protocol: buf[9],
        src: u32::from_be_bytes([buf[12], buf[13], buf[14], buf[15]]),
        dst: u32::from_be_bytes([buf[16], buf[17], buf[18], buf[19]]),
    })
}

/// Split a wire-order address into its four octets.
pub fn to_octets(addr: u32) -> [u8; 4] {
    addr.to_be_bytes()
}

/// Join four octets into a wire-order address.
pub fn from_octets(octets: [u8; 4]) -> u32 {
    u32::from_be_bytes(octets)
}
