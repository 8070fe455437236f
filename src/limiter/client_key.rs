// src/limiter/client_key.rs

use std::fmt;
use std::net::IpAddr;

use crate::config::KeyStrategy;

/// The identity a limiter rule counts against: usually the client IP,
/// optionally the authenticated account.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientKey(String);

impl ClientKey {
    pub fn derive(strategy: KeyStrategy, ip: IpAddr, identity: Option<&str>) -> Self {
        match (strategy, identity) {
            (KeyStrategy::IdentityOrIp, Some(id)) if !id.is_empty() => {
                ClientKey(format!("id:{id}"))
            }
            _ => ClientKey(format!("ip:{ip}")),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Resolve the client IP behind `trusted_hops` reverse proxies.
///
/// With zero trusted hops the forwarding header is ignored entirely, so a
/// spoofed `X-Forwarded-For` cannot bypass limits. With N trusted hops the
/// client is the Nth entry from the right of the header; a header too short
/// for that (malformed or spoofed) falls back to the socket address.
pub fn client_ip(remote: IpAddr, forwarded_for: Option<&str>, trusted_hops: usize) -> IpAddr {
    if trusted_hops == 0 {
        return remote;
    }

    let Some(header) = forwarded_for else {
        return remote;
    };

    let entries: Vec<&str> = header.split(',').map(str::trim).collect();
    if trusted_hops > entries.len() {
        return remote;
    }

    entries[entries.len() - trusted_hops]
        .parse()
        .unwrap_or(remote)
}
