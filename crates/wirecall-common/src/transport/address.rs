// Copyright 2025 Wirecall Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::fmt;
use std::str::FromStr;

use url::Url;

use crate::protocol::error::{Result, WirecallError};

/// Scheme accepted for connection addresses.
pub const TCP_SCHEME: &str = "tcp";

/// A remote address of the form `tcp://host:port`.
///
/// # Example
///
/// ```
/// use wirecall_common::transport::Endpoint;
///
/// let endpoint: Endpoint = "tcp://127.0.0.1:9000".parse().unwrap();
/// assert_eq!(endpoint.host(), "127.0.0.1");
/// assert_eq!(endpoint.port(), 9000);
/// assert_eq!(endpoint.authority(), "127.0.0.1:9000");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    /// Parses `tcp://host:port`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidAddress` for other schemes, missing hosts or ports,
    /// and addresses that carry a path, query or credentials.
    pub fn parse(address: &str) -> Result<Self> {
        let url = Url::parse(address)?;
        if url.scheme() != TCP_SCHEME {
            return Err(WirecallError::InvalidAddress(format!(
                "unsupported scheme '{}' in {}",
                url.scheme(),
                address
            )));
        }
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| WirecallError::InvalidAddress(format!("missing host in {}", address)))?;
        let port = url
            .port()
            .ok_or_else(|| WirecallError::InvalidAddress(format!("missing port in {}", address)))?;
        if !url.username().is_empty() || url.query().is_some() || !matches!(url.path(), "" | "/") {
            return Err(WirecallError::InvalidAddress(format!(
                "unexpected components in {}",
                address
            )));
        }
        Ok(Self {
            host: host.to_string(),
            port,
        })
    }

    /// Builds an endpoint from a resolved socket address.
    pub fn from_socket_addr(addr: std::net::SocketAddr) -> Self {
        let host = match addr {
            std::net::SocketAddr::V4(v4) => v4.ip().to_string(),
            std::net::SocketAddr::V6(v6) => format!("[{}]", v6.ip()),
        };
        Self {
            host,
            port: addr.port(),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// `host:port`, suitable for `TcpStream::connect`.
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl FromStr for Endpoint {
    type Err = WirecallError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", TCP_SCHEME, self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ipv4_and_hostname() {
        let e = Endpoint::parse("tcp://localhost:7000").unwrap();
        assert_eq!(e.host(), "localhost");
        assert_eq!(e.port(), 7000);
        assert_eq!(e.to_string(), "tcp://localhost:7000");
    }

    #[test]
    fn test_parse_ipv6() {
        let e = Endpoint::parse("tcp://[::1]:7000").unwrap();
        assert_eq!(e.authority(), "[::1]:7000");
    }

    #[test]
    fn test_rejects_bad_addresses() {
        for bad in [
            "http://localhost:80",
            "tcp://localhost",
            "localhost:80",
            "tcp://:80",
            "tcp://host:80/path",
            "tcp://user@host:80",
        ] {
            assert!(
                matches!(Endpoint::parse(bad), Err(WirecallError::InvalidAddress(_))),
                "{} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_from_socket_addr_matches_parse() {
        let addr: std::net::SocketAddr = "127.0.0.1:4242".parse().unwrap();
        let e = Endpoint::from_socket_addr(addr);
        assert_eq!(e, Endpoint::parse("tcp://127.0.0.1:4242").unwrap());
    }
}
