//! Account aggregate root

use crate::domain::account::value_object::{AccountConfig, RegistrationState};
use crate::domain::shared::error::DomainError;
use crate::domain::shared::value_objects::AccountId;
use crate::domain::shared::Result;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

/// The phone's single account and its registration state machine
#[derive(Debug, Clone)]
pub struct Account {
    /// Identifier handed out by the stack on the first registration
    id: Option<AccountId>,
    /// Credentials from the last `begin_registration`
    config: Option<AccountConfig>,
    /// Current registration state
    state: RegistrationState,
    /// SIP status code of the last registration response
    status_code: Option<u16>,
    /// Detail of the last failure
    last_error: Option<String>,
    /// When the state last changed
    changed_at: DateTime<Utc>,
}

impl Default for Account {
    fn default() -> Self {
        Self::new()
    }
}

impl Account {
    pub fn new() -> Self {
        Self {
            id: None,
            config: None,
            state: RegistrationState::Unregistered,
            status_code: None,
            last_error: None,
            changed_at: Utc::now(),
        }
    }

    /// Start a registration attempt with the given credentials.
    ///
    /// Rejected without any change while another attempt is in flight or when
    /// the credentials do not validate.
    pub fn begin_registration(&mut self, config: AccountConfig) -> Result<()> {
        if self.state == RegistrationState::Registering {
            return Err(DomainError::InvalidOperation(
                "A registration attempt is already in progress".to_string(),
            ));
        }
        config.validate()?;

        self.transition_to(RegistrationState::Registering)?;
        self.config = Some(config);
        self.status_code = None;
        self.last_error = None;
        Ok(())
    }

    /// Remember the identifier the stack assigned to this account
    pub fn attach(&mut self, id: AccountId) {
        self.id = Some(id);
    }

    /// Apply a registration state reported by the stack; returns the
    /// previous state
    pub fn apply_state(
        &mut self,
        state: RegistrationState,
        status_code: Option<u16>,
        reason: Option<String>,
    ) -> Result<RegistrationState> {
        let previous = self.state;
        self.transition_to(state)?;
        self.status_code = status_code.or(self.status_code);

        match state {
            RegistrationState::Failed => {
                self.last_error = Some(reason.unwrap_or_else(|| match status_code {
                    Some(code) => format!("Registration failed with status {code}"),
                    None => "Registration failed".to_string(),
                }));
            }
            RegistrationState::Registered => self.last_error = None,
            _ => {}
        }

        Ok(previous)
    }

    /// The stack refused to start the registration
    pub fn fail(&mut self, reason: impl Into<String>) -> Result<RegistrationState> {
        self.apply_state(RegistrationState::Failed, None, Some(reason.into()))
    }

    /// Drop back to `Unregistered`, keeping the credentials for a later retry
    pub fn reset(&mut self) -> RegistrationState {
        let previous = self.state;
        if previous != RegistrationState::Unregistered {
            self.state = RegistrationState::Unregistered;
            self.changed_at = Utc::now();
        }
        self.id = None;
        self.status_code = None;
        previous
    }

    fn transition_to(&mut self, new_state: RegistrationState) -> Result<()> {
        if !self.state.can_transition_to(new_state) {
            return Err(DomainError::InvalidStateTransition(format!(
                "Cannot transition account from {} to {}",
                self.state, new_state
            )));
        }

        self.state = new_state;
        self.changed_at = Utc::now();
        Ok(())
    }

    /// String-keyed scalar view for presentation layers; never includes the password
    pub fn info(&self) -> Map<String, Value> {
        let mut info = Map::new();
        info.insert("state".into(), Value::from(self.state.as_str()));
        info.insert("registered".into(), Value::from(self.is_registered()));
        info.insert(
            "account_id".into(),
            self.id.map(|id| Value::from(id.raw())).unwrap_or(Value::Null),
        );
        info.insert(
            "status_code".into(),
            self.status_code.map(Value::from).unwrap_or(Value::Null),
        );
        info.insert(
            "error".into(),
            self.last_error.clone().map(Value::from).unwrap_or(Value::Null),
        );
        info.insert("changed_at".into(), Value::from(self.changed_at.to_rfc3339()));

        if let Some(config) = &self.config {
            info.insert("uri".into(), Value::from(config.uri.clone()));
            info.insert("registrar".into(), Value::from(config.registrar.clone()));
            info.insert("username".into(), Value::from(config.username.clone()));
            info.insert("expires".into(), Value::from(config.expires));
        }

        info
    }

    // Getters
    pub fn id(&self) -> Option<AccountId> {
        self.id
    }

    pub fn config(&self) -> Option<&AccountConfig> {
        self.config.as_ref()
    }

    pub fn state(&self) -> RegistrationState {
        self.state
    }

    pub fn status_code(&self) -> Option<u16> {
        self.status_code
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn changed_at(&self) -> &DateTime<Utc> {
        &self.changed_at
    }

    pub fn is_registered(&self) -> bool {
        self.state == RegistrationState::Registered
    }
}
