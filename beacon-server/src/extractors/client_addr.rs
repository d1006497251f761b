use std::convert::Infallible;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::HeaderMap;
use axum::http::request::Parts;

use crate::service::ServiceState;

const FORWARDED_FOR: &str = "x-forwarded-for";

/// The address of the client a request is attributed to for rate limiting.
///
/// This is the peer address of the connection. If the server is configured to trust
/// `X-Forwarded-For`, the first valid address of that header takes precedence. Requests without
/// either, which only occur in tests, are attributed to the unspecified address.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ClientAddr(pub IpAddr);

impl ClientAddr {
    fn forwarded_for(headers: &HeaderMap) -> Option<IpAddr> {
        headers
            .get(FORWARDED_FOR)?
            .to_str()
            .ok()?
            .split(',')
            .next()?
            .trim()
            .parse()
            .ok()
    }
}

impl FromRequestParts<ServiceState> for ClientAddr {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &ServiceState,
    ) -> Result<Self, Self::Rejection> {
        if state.config().rate_limits().trust_forwarded_for {
            if let Some(addr) = Self::forwarded_for(&parts.headers) {
                return Ok(Self(addr));
            }
        }

        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());

        Ok(Self(peer.unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))))
    }
}
