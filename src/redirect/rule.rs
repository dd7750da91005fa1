//! Backend-independent description of what gets redirected.

use std::fmt;
use std::net::{Ipv4Addr, SocketAddrV4};

/// Prefix of the comment tag carried by rules this program owns.
pub const RULE_TAG_PREFIX: &str = "procredirect";

/// Transport protocol of a redirected flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    /// TCP.
    Tcp,
    /// UDP.
    Udp,
}

impl Protocol {
    /// Lowercase name as the firewall tools spell it.
    pub fn as_str(self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Flows redirected for every classified process: HTTP, HTTPS and DNS.
pub const REDIRECTED_FLOWS: [(Protocol, u16); 3] =
    [(Protocol::Tcp, 80), (Protocol::Tcp, 443), (Protocol::Udp, 53)];

/// One redirection intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RedirectRule {
    /// Matched transport protocol.
    pub protocol: Protocol,
    /// Matched destination port.
    pub dport: u16,
    /// Destination left alone so the proxy's own connections are not looped back.
    pub exclude_dst: Ipv4Addr,
    /// Where matching traffic is sent.
    pub target: SocketAddrV4,
}

impl RedirectRule {
    /// Comment tag identifying this rule in the firewall tables.
    pub fn tag(&self) -> String {
        format!("{}:{}:{}", RULE_TAG_PREFIX, self.protocol, self.dport)
    }
}

impl fmt::Display for RedirectRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} -> {}", self.protocol, self.dport, self.target)
    }
}

/// The three rules that redirect to `target`, in install order.
pub fn rule_set(target: SocketAddrV4) -> Vec<RedirectRule> {
    REDIRECTED_FLOWS
        .iter()
        .map(|&(protocol, dport)| RedirectRule {
            protocol,
            dport,
            exclude_dst: *target.ip(),
            target,
        })
        .collect()
}
