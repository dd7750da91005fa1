//! Raw packet capture and IPv4 header decoding.
//!
//! ```text
//!   TUN interface ──recv──► PacketClassifier ──decode──► RouteSink
//!                               │
//!                               └─ malformed → dropped, loop continues
//! ```
//!
//! The decoder is a pure function over a byte slice. The classifier owns the
//! read loop; a read failure is fatal to it and is returned to the caller.

pub mod classifier;
pub mod error;
pub mod header;
pub mod tun;

pub use classifier::{ClassifierStats, LogSink, PacketClassifier, PacketSource, RouteSink};
pub use error::PacketError;
pub use header::{Ipv4HeaderView, MIN_HEADER_LEN, decode, from_octets, to_octets};
pub use tun::TunDevice;
