// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Endpoint URIs: `[scheme://][host|*][:port|*]`.
//!
//! A missing or `*` host and a missing, `*` or `0` port are "unspecified";
//! a bound socket fills them in from the OS-assigned interface and port.
//!
//! | Input                 | host         | port    |
//! |-----------------------|--------------|---------|
//! | `tcp://*:0`           | unspecified  | unspec. |
//! | `tcp://10.0.0.5:7000` | `10.0.0.5`   | `7000`  |
//! | `:7000`               | unspecified  | `7000`  |
//! | `[::1]:7000`          | `::1`        | `7000`  |

use crate::config::DEFAULT_SCHEME;
use crate::error::{Error, Result};
use std::fmt;
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::str::FromStr;

/// Parsed endpoint URI.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Uri {
    scheme: String,
    host: Option<String>,
    port: Option<u16>,
}

impl Uri {
    /// `tcp://*:*`: any interface, OS-assigned port.
    pub fn any() -> Self {
        Self {
            scheme: DEFAULT_SCHEME.to_string(),
            host: None,
            port: None,
        }
    }

    /// Fully specified `tcp://host:port`.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            scheme: DEFAULT_SCHEME.to_string(),
            host: Some(host.into()),
            port: (port != 0).then_some(port),
        }
    }

    /// Parse `[scheme://][host|*][:port|*]`.
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        let (scheme, rest) = match input.split_once("://") {
            Some((scheme, rest)) => (scheme.to_ascii_lowercase(), rest),
            None => (DEFAULT_SCHEME.to_string(), input),
        };
        if scheme != DEFAULT_SCHEME {
            return Err(Error::Config(format!(
                "unsupported scheme '{}' in '{}' (only {} is supported)",
                scheme, input, DEFAULT_SCHEME
            )));
        }

        let (host, port) = split_host_port(rest)
            .ok_or_else(|| Error::Config(format!("malformed uri '{}'", input)))?;

        let host = match host {
            "" | "*" => None,
            h => Some(h.to_string()),
        };
        let port = match port {
            None | Some("") | Some("*") => None,
            Some(p) => {
                let value: u16 = p
                    .parse()
                    .map_err(|_| Error::Config(format!("invalid port '{}' in '{}'", p, input)))?;
                (value != 0).then_some(value)
            }
        };

        Ok(Self { scheme, host, port })
    }

    /// Scheme (always `tcp` today).
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Host, `None` when unspecified.
    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    /// Port, `None` when unspecified.
    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// True when both host and port are concrete.
    pub fn is_fully_qualified(&self) -> bool {
        self.host.is_some() && self.port.is_some()
    }

    /// Replace the host.
    pub fn set_host(&mut self, host: impl Into<String>) {
        self.host = Some(host.into());
    }

    /// Replace the port (`0` clears it).
    pub fn set_port(&mut self, port: u16) {
        self.port = (port != 0).then_some(port);
    }

    /// `"host:port"` with `*` for unspecified parts.
    pub fn address(&self) -> String {
        let host = match &self.host {
            Some(h) if h.contains(':') => format!("[{}]", h),
            Some(h) => h.clone(),
            None => "*".to_string(),
        };
        match self.port {
            Some(p) => format!("{}:{}", host, p),
            None => format!("{}:*", host),
        }
    }

    /// Address to bind: unspecified host means all interfaces, unspecified port means 0.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        let port = self.port.unwrap_or(0);
        match &self.host {
            None => Ok(SocketAddr::new(IpAddr::from([0, 0, 0, 0]), port)),
            Some(host) => resolve(host, port),
        }
    }

    /// Address to connect to; requires a fully qualified URI.
    pub fn connect_addr(&self) -> Result<SocketAddr> {
        match (&self.host, self.port) {
            (Some(host), Some(port)) => resolve(host, port),
            _ => Err(Error::Config(format!(
                "uri '{}' is not fully qualified",
                self
            ))),
        }
    }
}

impl Default for Uri {
    fn default() -> Self {
        Self::any()
    }
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.address())
    }
}

impl FromStr for Uri {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Split `host[:port]`, honouring `[v6]` brackets.
fn split_host_port(rest: &str) -> Option<(&str, Option<&str>)> {
    if let Some(inner) = rest.strip_prefix('[') {
        let (host, tail) = inner.split_once(']')?;
        return match tail {
            "" => Some((host, None)),
            t => t.strip_prefix(':').map(|p| (host, Some(p))),
        };
    }
    match rest.rsplit_once(':') {
        Some((host, _)) if host.contains(':') => None,
        Some((host, port)) => Some((host, Some(port))),
        None => Some((rest, None)),
    }
}

fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, port));
    }
    let addrs: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(|e| Error::Connection(format!("cannot resolve '{}': {}", host, e)))?
        .collect();
    // Endpoints are bound and announced on IPv4
    addrs
        .iter()
        .find(|a| a.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
        .ok_or_else(|| Error::Connection(format!("no address for '{}'", host)))
}
