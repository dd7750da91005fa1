//! Packet capture error types.

use thiserror::Error;

/// Errors from decoding or capturing packets.
#[derive(Debug, Error)]
pub enum PacketError {
    /// Buffer is shorter than the minimum or declared header length.
    #[error("Malformed IPv4 header: {len} bytes available, {required} required")]
    MalformedHeader {
        /// Bytes available in the buffer.
        len: usize,
        /// Bytes the header needs.
        required: usize,
    },

    /// Packet is not IPv4.
    #[error("Unsupported IP version {0}")]
    NotIpv4(u8),

    /// Reading from the virtual interface failed.
    #[error("Failed to read from interface: {0}")]
    Read(#[source] std::io::Error),

    /// Creating or configuring the virtual interface failed.
    #[error("Interface setup failed: {0}")]
    Device(String),
}

impl PacketError {
    /// Whether this error only affects a single packet.
    ///
    /// Decode failures drop the packet; anything else ends the capture loop.
    pub fn is_per_packet(&self) -> bool {
        matches!(self, PacketError::MalformedHeader { .. } | PacketError::NotIpv4(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_header_display() {
        let err = PacketError::MalformedHeader { len: 12, required: 20 };
        let msg = err.to_string();
        assert!(msg.contains("12"));
        assert!(msg.contains("20"));
    }

    #[test]
    fn test_per_packet_classification() {
        assert!(PacketError::NotIpv4(6).is_per_packet());
        assert!(PacketError::MalformedHeader { len: 0, required: 20 }.is_per_packet());
        let read = PacketError::Read(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            "closed",
        ));
        assert!(!read.is_per_packet());
    }
}
