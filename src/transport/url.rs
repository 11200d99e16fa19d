//! Broker URL parsing.
//!
//! Accepts the URL forms broker providers hand out, e.g.
//! `ssl://abc.s1.eu.hivemq.cloud:8883` or `tcp://broker.hivemq.com:1883`.

use std::fmt;

use thiserror::Error;

const DEFAULT_TCP_PORT: u16 = 1883;
const DEFAULT_TLS_PORT: u16 = 8883;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UrlError {
    #[error("broker url is empty")]
    Empty,

    #[error("unsupported scheme '{0}'")]
    UnsupportedScheme(String),

    #[error("missing host in '{0}'")]
    MissingHost(String),

    #[error("invalid port '{0}'")]
    InvalidPort(String),
}

/// Host, port and security of a broker endpoint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BrokerAddress {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

impl BrokerAddress {
    pub fn parse(url: &str) -> Result<Self, UrlError> {
        let url = url.trim();
        if url.is_empty() {
            return Err(UrlError::Empty);
        }

        let (tls, rest) = match url.split_once("://") {
            Some((scheme, rest)) => match scheme.to_ascii_lowercase().as_str() {
                "tcp" | "mqtt" => (false, rest),
                "ssl" | "tls" | "mqtts" => (true, rest),
                other => return Err(UrlError::UnsupportedScheme(other.to_string())),
            },
            None => (false, url),
        };

        // Paths carry no meaning for MQTT over TCP
        let authority = rest.split('/').next().unwrap_or_default();

        let (host, port) = match split_port(authority) {
            Some((host, port)) => {
                let port = port
                    .parse::<u16>()
                    .ok()
                    .filter(|p| *p != 0)
                    .ok_or_else(|| UrlError::InvalidPort(port.to_string()))?;
                (host, port)
            }
            None if tls => (authority, DEFAULT_TLS_PORT),
            None => (authority, DEFAULT_TCP_PORT),
        };

        if host.is_empty() {
            return Err(UrlError::MissingHost(url.to_string()));
        }

        Ok(Self {
            host: host.to_string(),
            port,
            tls,
        })
    }
}

/// Splits `host:port`, leaving the colons of a bracketed IPv6 literal alone.
fn split_port(authority: &str) -> Option<(&str, &str)> {
    let (host, port) = authority.rsplit_once(':')?;
    if !authority.starts_with('[') || host.ends_with(']') {
        Some((host, port))
    } else {
        None
    }
}

impl fmt::Display for BrokerAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let scheme = if self.tls { "ssl" } else { "tcp" };
        write!(f, "{}://{}:{}", scheme, self.host, self.port)
    }
}
