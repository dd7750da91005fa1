//! Per-packet classification loop.
//!
//! Reads one packet at a time from a [`PacketSource`] into an MTU-sized
//! buffer, decodes its IPv4 header and hands the result to a [`RouteSink`].
//! Malformed packets are dropped; a failing read ends the loop with an error.

use super::error::PacketError;
use super::header::{self, Ipv4HeaderView};
use std::future::Future;
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

/// A readable source of raw IP packets.
pub trait PacketSource: Send + Sync {
    /// Read one packet into `buf`, returning its length.
    fn recv(&self, buf: &mut [u8]) -> impl Future<Output = std::io::Result<usize>> + Send;
}

/// Receives decoded headers; the forwarding decision lives behind this.
pub trait RouteSink: Send + Sync {
    /// Handle one decoded packet.
    fn route(&self, header: &Ipv4HeaderView, packet: &[u8]);
}

/// Sink that logs each destination.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl RouteSink for LogSink {
    fn route(&self, header: &Ipv4HeaderView, packet: &[u8]) {
        info!(
            "{} {} -> {} ({} bytes)",
            header.protocol_name(),
            header.src_addr(),
            header.dst_addr(),
            packet.len()
        );
    }
}

/// Counters kept by the classifier.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ClassifierStats {
    /// Packets decoded and routed.
    pub routed: u64,
    /// Packets dropped because they failed to decode.
    pub dropped: u64,
}

/// Reads, decodes and routes packets until shutdown or a read failure.
pub struct PacketClassifier<S, R> {
    source: S,
    sink: R,
    mtu: usize,
    stats: ClassifierStats,
}

impl<S: PacketSource, R: RouteSink> PacketClassifier<S, R> {
    /// Create a classifier with a receive buffer of `mtu` bytes.
    pub fn new(source: S, sink: R, mtu: usize) -> Self {
        Self {
            source,
            sink,
            mtu,
            stats: ClassifierStats::default(),
        }
    }

    /// Counters so far.
    pub fn stats(&self) -> ClassifierStats {
        self.stats
    }

    /// Run the read loop.
    ///
    /// Returns `Ok` when shutdown is signalled and `Err(PacketError::Read)`
    /// when the source fails.
    pub async fn run(
        &mut self,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> Result<ClassifierStats, PacketError> {
        let mut buf = vec![0u8; self.mtu];
        info!("Packet classifier started (mtu {})", self.mtu);

        loop {
            tokio::select! {
                read = self.source.recv(&mut buf) => {
                    let n = read.map_err(PacketError::Read)?;
                    self.handle(&buf[..n]);
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        debug!("Packet classifier received shutdown signal");
                        break;
                    }
                }
            }
        }

        info!(
            "Packet classifier stopped: {} routed, {} dropped",
            self.stats.routed, self.stats.dropped
        );
        Ok(self.stats)
    }

    fn handle(&mut self, packet: &[u8]) {
        match header::decode(packet) {
            Ok(header) => {
                trace!("Decoded {:?}", header);
                self.sink.route(&header, packet);
                self.stats.routed += 1;
            }
            Err(e) => {
                if matches!(e, PacketError::NotIpv4(_)) {
                    trace!("Dropping packet: {}", e);
                } else {
                    warn!("Dropping packet: {}", e);
                }
                self.stats.dropped += 1;
            }
        }
    }
}
