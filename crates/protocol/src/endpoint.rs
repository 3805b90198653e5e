use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
#[error("invalid endpoint {0:?}: {1}")]
pub struct EndpointParseError(pub String, pub &'static str);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
        }
    }

    pub fn default_port(self) -> u16 {
        match self {
            Self::Http => 80,
            Self::Https => 443,
        }
    }
}

/// A site's base address, `scheme://host[:port]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Endpoint {
    scheme: Scheme,
    host: String,
    port: Option<u16>,
}

impl Endpoint {
    pub fn new(scheme: Scheme, host: impl Into<String>, port: Option<u16>) -> Self {
        Self {
            scheme,
            host: host.into(),
            port,
        }
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// Value of the `Host` header: the port is omitted when it is the
    /// scheme's default.
    pub fn host_header(&self) -> String {
        match self.port {
            Some(port) if port != self.scheme.default_port() => format!("{}:{port}", self.host),
            _ => self.host.clone(),
        }
    }

    pub fn base_url(&self) -> String {
        format!("{}://{}", self.scheme.as_str(), self.host_header())
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.base_url())
    }
}

impl FromStr for Endpoint {
    type Err = EndpointParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = |reason| EndpointParseError(s.to_string(), reason);

        let (scheme, rest) = if let Some(rest) = s.strip_prefix("https://") {
            (Scheme::Https, rest)
        } else if let Some(rest) = s.strip_prefix("http://") {
            (Scheme::Http, rest)
        } else {
            return Err(err("scheme must be http or https"));
        };

        let authority = rest.trim_end_matches('/');
        if authority.is_empty() {
            return Err(err("missing host"));
        }
        if authority.contains('/') {
            return Err(err("endpoint must not carry a path"));
        }

        // Bracketed IPv6 literals keep their colons.
        let split_at = if authority.starts_with('[') {
            authority.find(']').map(|i| i + 1)
        } else {
            authority.rfind(':')
        };

        let (host, port) = match split_at {
            Some(i) if authority[i..].starts_with(':') => {
                let port = authority[i + 1..]
                    .parse::<u16>()
                    .map_err(|_| err("invalid port"))?;
                (&authority[..i], Some(port))
            }
            _ => (authority, None),
        };

        if host.is_empty() {
            return Err(err("missing host"));
        }
        Ok(Self::new(scheme, host, port))
    }
}

impl TryFrom<String> for Endpoint {
    type Error = EndpointParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Endpoint> for String {
    fn from(value: Endpoint) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_host_and_port() {
        let ep: Endpoint = "http://10.0.0.5:9020".parse().unwrap();
        assert_eq!(ep.scheme(), Scheme::Http);
        assert_eq!(ep.host(), "10.0.0.5");
        assert_eq!(ep.port(), Some(9020));
        assert_eq!(ep.host_header(), "10.0.0.5:9020");
        assert_eq!(ep.base_url(), "http://10.0.0.5:9020");
    }

    #[test]
    fn default_port_is_omitted_from_host_header() {
        let ep: Endpoint = "https://s3.site-a.example:443/".parse().unwrap();
        assert_eq!(ep.host_header(), "s3.site-a.example");
    }

    #[test]
    fn ipv6_literal() {
        let ep: Endpoint = "http://[::1]:9000".parse().unwrap();
        assert_eq!(ep.host(), "[::1]");
        assert_eq!(ep.port(), Some(9000));

        let bare: Endpoint = "http://[fe80::1]".parse().unwrap();
        assert_eq!(bare.host(), "[fe80::1]");
        assert_eq!(bare.port(), None);
    }

    #[test]
    fn rejects_bad_endpoints() {
        assert!("ftp://host".parse::<Endpoint>().is_err());
        assert!("host:9000".parse::<Endpoint>().is_err());
        assert!("http://".parse::<Endpoint>().is_err());
        assert!("http://host:notaport".parse::<Endpoint>().is_err());
        assert!("http://host/path".parse::<Endpoint>().is_err());
    }

    #[test]
    fn serde_uses_url_string() {
        let ep: Endpoint = serde_json::from_str("\"https://a.example:8443\"").unwrap();
        assert_eq!(ep.port(), Some(8443));
        assert_eq!(
            serde_json::to_string(&ep).unwrap(),
            "\"https://a.example:8443\""
        );
    }
}
