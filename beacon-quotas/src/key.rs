use std::fmt;
use std::net::IpAddr;

use ipnetwork::IpNetwork;

/// Identifies the client a token bucket belongs to.
///
/// Client addresses are truncated to a network prefix, so that all addresses of one IPv6
/// allocation, or of a configurable IPv4 range, share a bucket.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct ClientKey(IpNetwork);

impl ClientKey {
    /// Creates a key from a client address, truncated to the given prefix lengths.
    ///
    /// IPv4 addresses mapped into IPv6 are treated as IPv4. Prefix lengths beyond the address
    /// width keep the full address.
    pub fn new(addr: IpAddr, ipv4_prefix: u8, ipv6_prefix: u8) -> Self {
        let addr = addr.to_canonical();
        let prefix = match addr {
            IpAddr::V4(_) => ipv4_prefix.min(32),
            IpAddr::V6(_) => ipv6_prefix.min(128),
        };

        let network = IpNetwork::new(addr, prefix)
            .and_then(|network| IpNetwork::new(network.network(), prefix))
            .unwrap_or_else(|_| IpNetwork::from(addr));

        Self(network)
    }

    /// Returns the network this key covers.
    pub fn network(&self) -> IpNetwork {
        self.0
    }
}

impl From<IpAddr> for ClientKey {
    fn from(addr: IpAddr) -> Self {
        Self(IpNetwork::from(addr.to_canonical()))
    }
}

impl fmt::Display for ClientKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
