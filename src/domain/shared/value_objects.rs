//! Shared value objects used across multiple bounded contexts
//!
//! The signaling stack hands out plain integers for calls, accounts and
//! sound devices. Each gets its own newtype so a call id can never be passed
//! where a device index or codec priority is expected.

use super::error::DomainError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Call identifier assigned by the signaling stack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(i32);

impl CallId {
    pub const fn new(raw: i32) -> Self {
        Self(raw)
    }

    pub const fn raw(&self) -> i32 {
        self.0
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "call#{}", self.0)
    }
}

/// Account identifier assigned by the signaling stack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(i32);

impl AccountId {
    pub const fn new(raw: i32) -> Self {
        Self(raw)
    }

    pub const fn raw(&self) -> i32 {
        self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "acc#{}", self.0)
    }
}

/// Sound device index as enumerated by the stack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(i32);

impl DeviceId {
    pub const fn new(raw: i32) -> Self {
        Self(raw)
    }

    pub const fn raw(&self) -> i32 {
        self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dev#{}", self.0)
    }
}

/// Codec priority, 0 disables the codec
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CodecPriority(u8);

impl CodecPriority {
    pub const DISABLED: CodecPriority = CodecPriority(0);
    pub const HIGHEST: CodecPriority = CodecPriority(u8::MAX);

    pub const fn new(value: u8) -> Self {
        Self(value)
    }

    pub const fn value(&self) -> u8 {
        self.0
    }

    pub fn is_disabled(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for CodecPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// URI scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UriScheme {
    Sip,
    Sips,
}

impl UriScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            UriScheme::Sip => "sip",
            UriScheme::Sips => "sips",
        }
    }
}

/// SIP URI value object
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SipUri {
    scheme: UriScheme,
    user: Option<String>,
    host: String,
    port: Option<u16>,
    params: Vec<(String, Option<String>)>,
}

impl SipUri {
    pub fn new(user: Option<String>, host: String, port: Option<u16>) -> Self {
        Self {
            scheme: UriScheme::Sip,
            user,
            host,
            port,
            params: Vec::new(),
        }
    }

    /// Parse `sip:` / `sips:` addresses, e.g. `SIP:alice@example.com:5061;transport=tls`
    pub fn parse(uri: &str) -> Result<Self, DomainError> {
        let uri = uri.trim();
        let (scheme, rest) = match uri.split_once(':') {
            Some((s, rest)) if s.eq_ignore_ascii_case("sip") => (UriScheme::Sip, rest),
            Some((s, rest)) if s.eq_ignore_ascii_case("sips") => (UriScheme::Sips, rest),
            _ => {
                return Err(DomainError::ValidationError(format!(
                    "URI must start with 'sip:' or 'sips:': {uri:?}"
                )))
            }
        };

        if rest.is_empty() || rest.chars().any(char::is_whitespace) {
            return Err(DomainError::ValidationError(format!(
                "Invalid SIP URI format: {uri:?}"
            )));
        }

        let mut sections = rest.split(';');
        let address = sections.next().unwrap_or_default();
        let params = sections
            .filter(|p| !p.is_empty())
            .map(|p| match p.split_once('=') {
                Some((k, v)) => (k.to_string(), Some(v.to_string())),
                None => (p.to_string(), None),
            })
            .collect();

        let (user, host_port) = match address.rsplit_once('@') {
            Some((user, _)) if user.is_empty() => {
                return Err(DomainError::ValidationError(format!(
                    "Empty user part in {uri:?}"
                )))
            }
            Some((user, host_port)) => (Some(user.to_string()), host_port),
            None => (None, address),
        };

        // IPv6 references keep their brackets, the port follows the closing one
        let (host, port) = if host_port.starts_with('[') {
            match host_port.find(']') {
                Some(end) if end > 1 => {
                    let (host, tail) = host_port.split_at(end + 1);
                    match tail.strip_prefix(':') {
                        Some(port) => (host, Some(parse_port(port, uri)?)),
                        None if tail.is_empty() => (host, None),
                        None => {
                            return Err(DomainError::ValidationError(format!(
                                "Invalid IPv6 reference in {uri:?}"
                            )))
                        }
                    }
                }
                _ => {
                    return Err(DomainError::ValidationError(format!(
                        "Invalid IPv6 reference in {uri:?}"
                    )))
                }
            }
        } else {
            match host_port.split_once(':') {
                Some((host, port)) => (host, Some(parse_port(port, uri)?)),
                None => (host_port, None),
            }
        };

        if host.is_empty() {
            return Err(DomainError::ValidationError(format!(
                "Missing host in {uri:?}"
            )));
        }

        Ok(Self {
            scheme,
            user,
            host: host.to_string(),
            port,
            params,
        })
    }

    pub fn scheme(&self) -> UriScheme {
        self.scheme
    }

    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .and_then(|(_, v)| v.as_deref())
    }

    pub fn is_secure(&self) -> bool {
        self.scheme == UriScheme::Sips
    }
}

fn parse_port(port: &str, uri: &str) -> Result<u16, DomainError> {
    port.parse::<u16>()
        .map_err(|_| DomainError::ValidationError(format!("Invalid port in {uri:?}")))
}

impl fmt::Display for SipUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.scheme.as_str())?;
        if let Some(user) = &self.user {
            write!(f, "{}@", user)?;
        }
        write!(f, "{}", self.host)?;
        if let Some(port) = self.port {
            write!(f, ":{}", port)?;
        }
        for (key, value) in &self.params {
            match value {
                Some(v) => write!(f, ";{}={}", key, v)?,
                None => write!(f, ";{}", key)?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sip_uri_parse() {
        let uri = SipUri::parse("sip:alice@example.com").unwrap();
        assert_eq!(uri.user(), Some("alice"));
        assert_eq!(uri.host(), "example.com");
        assert_eq!(uri.port(), None);

        let uri_with_port = SipUri::parse("SIP:bob@example.com:5060").unwrap();
        assert_eq!(uri_with_port.user(), Some("bob"));
        assert_eq!(uri_with_port.port(), Some(5060));
        assert_eq!(uri_with_port.scheme(), UriScheme::Sip);

        let loopback = SipUri::parse("sip:[::1]").unwrap();
        assert_eq!(loopback.user(), None);
        assert_eq!(loopback.host(), "[::1]");
        assert_eq!(loopback.port(), None);

        let v6 = SipUri::parse("sip:bob@[2001:db8::1]:5060").unwrap();
        assert_eq!(v6.user(), Some("bob"));
        assert_eq!(v6.host(), "[2001:db8::1]");
        assert_eq!(v6.port(), Some(5060));
        assert_eq!(v6.to_string(), "sip:bob@[2001:db8::1]:5060");
    }

    #[test]
    fn test_malformed_ipv6_reference() {
        for uri in ["sip:bob@[2001:db8::1", "sip:bob@[]", "sip:bob@[::1]x", "sip:[::1]:port"] {
            assert!(SipUri::parse(uri).is_err(), "{uri} should be rejected");
        }
    }

    #[test]
    fn test_sips_uri_with_params() {
        let uri = SipUri::parse("sips:carol@secure.example.com:5061;transport=tls;lr").unwrap();
        assert!(uri.is_secure());
        assert_eq!(uri.param("transport"), Some("tls"));
        assert_eq!(uri.param("lr"), None);
        assert_eq!(
            uri.to_string(),
            "sips:carol@secure.example.com:5061;transport=tls;lr"
        );
    }

    #[test]
    fn test_host_only_uri() {
        let uri = SipUri::parse("sip:registrar.example.com").unwrap();
        assert_eq!(uri.user(), None);
        assert_eq!(uri.to_string(), "sip:registrar.example.com");
    }

    #[test]
    fn test_malformed_uris_rejected() {
        for bad in [
            "",
            "bob@example.com",
            "tel:+15551234",
            "sip:",
            "sip:@example.com",
            "sip:bob@",
            "sip:bob@example.com:notaport",
            "sip:bob smith@example.com",
        ] {
            assert!(SipUri::parse(bad).is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn test_identifiers_are_distinct_types() {
        let call = CallId::new(1);
        let account = AccountId::new(1);
        assert_eq!(call.raw(), account.raw());
        assert_eq!(call.to_string(), "call#1");
        assert_eq!(account.to_string(), "acc#1");
        assert!(CodecPriority::DISABLED.is_disabled());
        assert!(CodecPriority::HIGHEST > CodecPriority::new(128));
    }
}
