//! Configuration management
//!
//! Settings come from built-in defaults, an optional TOML file and
//! `SIPPHONE__*` environment variables, in that order of precedence.

use crate::domain::account::AccountConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub phone: PhoneSettings,
    #[serde(default)]
    pub account: Option<AccountConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// SRTP usage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SrtpMode {
    /// Incoming RTP/SAVP offers are rejected with 488
    #[default]
    Disabled,
    /// Secure media when the remote supports it, plain RTP otherwise
    Optional,
    /// The call only proceeds with secure media
    Mandatory,
}

/// Signaling security required before SRTP keys are exchanged
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SrtpSignaling {
    #[default]
    NotRequired,
    /// Secure transport such as TLS
    Tls,
    /// Secure end-to-end transport (`sips:` URIs)
    EndToEnd,
}

/// Transport, NAT and media settings consumed once by `Phone::init`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhoneSettings {
    /// Local SIP port, 0 lets the stack choose
    pub port: u16,
    /// STUN server as `host[:port]`
    pub stun_server: Option<String>,
    pub sound_level: f32,
    pub micro_level: f32,
    pub srtp: SrtpMode,
    pub srtp_signaling: SrtpSignaling,
}

impl Default for PhoneSettings {
    fn default() -> Self {
        Self {
            port: 5060,
            stun_server: None,
            sound_level: 1.0,
            micro_level: 1.0,
            srtp: SrtpMode::Disabled,
            srtp_signaling: SrtpSignaling::NotRequired,
        }
    }
}

impl PhoneSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, level) in [("sound_level", self.sound_level), ("micro_level", self.micro_level)] {
            if !(0.0..=1.0).contains(&level) {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be within 0.0..=1.0, got {level}"
                )));
            }
        }

        if let Some(stun) = &self.stun_server {
            let (host, port) = match stun.rsplit_once(':') {
                Some((host, port)) => (host, Some(port)),
                None => (stun.as_str(), None),
            };
            if host.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("Invalid STUN server {stun:?}")));
            }
            if let Some(port) = port {
                port.parse::<u16>().map_err(|_| {
                    ConfigError::Invalid(format!("Invalid STUN server port in {stun:?}"))
                })?;
            }
        }

        if self.srtp == SrtpMode::Disabled && self.srtp_signaling != SrtpSignaling::NotRequired {
            return Err(ConfigError::Invalid(
                "srtp_signaling requires srtp to be optional or mandatory".to_string(),
            ));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive, overridden by `RUST_LOG`
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info,sipphone=debug".to_string(),
        }
    }
}

impl Config {
    /// Load from an optional TOML file plus `SIPPHONE__SECTION__KEY` overrides
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("SIPPHONE")
                .prefix_separator("__")
                .separator("__"),
        );

        Self::from_builder(builder)
    }

    /// Load from TOML text, used for embedded defaults and tests
    pub fn from_toml(source: &str) -> Result<Self, ConfigError> {
        let builder = config::Config::builder()
            .add_source(config::File::from_str(source, config::FileFormat::Toml));
        Self::from_builder(builder)
    }

    fn from_builder(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<Self, ConfigError> {
        let config: Config = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.phone.validate()?;
        if let Some(account) = &self.account {
            account
                .validate()
                .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        }
        Ok(())
    }
}
