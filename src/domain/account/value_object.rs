//! Account value objects

use crate::domain::shared::{DomainError, Result, SipUri};
use serde::{Deserialize, Serialize};
use std::fmt;

fn default_expires() -> u32 {
    300
}

/// Registration credentials and parameters for the single phone account
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountConfig {
    /// Address of record, e.g. `sip:alice@example.com`
    pub uri: String,
    /// Registrar URI, e.g. `sip:example.com`
    pub registrar: String,
    /// Digest username
    pub username: String,
    /// Digest password
    #[serde(default)]
    pub password: String,
    /// Digest realm, `None` answers any realm
    #[serde(default)]
    pub realm: Option<String>,
    /// Requested registration lifetime in seconds
    #[serde(default = "default_expires")]
    pub expires: u32,
    /// Outbound proxy
    #[serde(default)]
    pub proxy: Option<String>,
}

impl AccountConfig {
    pub fn new(uri: impl Into<String>, registrar: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            registrar: registrar.into(),
            username: username.into(),
            password: String::new(),
            realm: None,
            expires: default_expires(),
            proxy: None,
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = password.into();
        self
    }

    pub fn with_realm(mut self, realm: impl Into<String>) -> Self {
        self.realm = Some(realm.into());
        self
    }

    pub fn with_expires(mut self, expires: u32) -> Self {
        self.expires = expires;
        self
    }

    pub fn with_proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxy = Some(proxy.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        SipUri::parse(&self.uri)?;
        SipUri::parse(&self.registrar)?;
        if let Some(proxy) = &self.proxy {
            SipUri::parse(proxy)?;
        }
        if self.username.trim().is_empty() {
            return Err(DomainError::ValidationError(
                "Account username must not be empty".to_string(),
            ));
        }
        if self.expires == 0 {
            return Err(DomainError::ValidationError(
                "Registration expiry must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl fmt::Debug for AccountConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountConfig")
            .field("uri", &self.uri)
            .field("registrar", &self.registrar)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("realm", &self.realm)
            .field("expires", &self.expires)
            .field("proxy", &self.proxy)
            .finish()
    }
}

/// Registration state of the account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistrationState {
    Unregistered,
    Registering,
    Registered,
    Failed,
}

impl RegistrationState {
    /// Check if state transition is valid
    pub fn can_transition_to(&self, new_state: RegistrationState) -> bool {
        use RegistrationState::*;

        match (self, new_state) {
            // Explicit unregister is always possible
            (_, Unregistered) => true,

            (Unregistered, Registering) => true,

            (Registering, Registered) => true,
            (Registering, Failed) => true,

            // Refresh, which may fail without passing through Registering
            (Registered, Registering) => true,
            (Registered, Failed) => true,

            // Retry
            (Failed, Registering) => true,

            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RegistrationState::Unregistered => "unregistered",
            RegistrationState::Registering => "registering",
            RegistrationState::Registered => "registered",
            RegistrationState::Failed => "failed",
        }
    }
}

impl fmt::Display for RegistrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
