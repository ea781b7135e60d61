//! Call aggregate root

use crate::domain::call::dtmf;
use crate::domain::call::value_object::{CallDirection, CallState};
use crate::domain::shared::error::DomainError;
use crate::domain::shared::value_objects::{CallId, SipUri};
use crate::domain::shared::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Header names and values attached to a call at creation
pub type HeaderMap = BTreeMap<String, String>;

/// Digits kept per call and direction
const MAX_DTMF_LOG: usize = 64;

/// Call aggregate root
///
/// One call leg as seen by the phone. The registry owns every live `Call`;
/// everything handed to callers or observers is a clone or a [`CallSummary`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Call {
    /// Stack-assigned identifier
    id: CallId,
    /// Call direction
    direction: CallDirection,
    /// Current state
    state: CallState,
    /// State before the last applied transition
    previous_state: CallState,
    /// Remote party address
    remote_uri: String,
    /// Remote party display name
    display_name: Option<String>,
    /// Headers supplied at creation
    headers: HeaderMap,
    /// SIP status code that came with the last state change
    last_status: Option<u16>,
    /// When the call was created
    created_at: DateTime<Utc>,
    /// When the call first reached Confirmed
    connected_at: Option<DateTime<Utc>>,
    /// When the call reached Disconnected
    ended_at: Option<DateTime<Utc>>,
    /// Digits forwarded to the stack, in order
    dtmf_sent: String,
    /// Most recent digits received from the far end
    dtmf_received: String,
}

impl Call {
    /// Outbound call accepted by the stack
    pub fn outbound(id: CallId, remote: &SipUri, headers: HeaderMap) -> Self {
        Self::with_state(
            id,
            CallDirection::Outbound,
            CallState::Calling,
            remote.to_string(),
            None,
            headers,
        )
    }

    /// Inbound call offered by the stack; address and headers are kept verbatim
    pub fn inbound(
        id: CallId,
        remote_uri: String,
        display_name: Option<String>,
        headers: HeaderMap,
    ) -> Self {
        Self::with_state(
            id,
            CallDirection::Inbound,
            CallState::Incoming,
            remote_uri,
            display_name.filter(|name| !name.is_empty()),
            headers,
        )
    }

    fn with_state(
        id: CallId,
        direction: CallDirection,
        state: CallState,
        remote_uri: String,
        display_name: Option<String>,
        headers: HeaderMap,
    ) -> Self {
        Self {
            id,
            direction,
            state,
            previous_state: CallState::Null,
            remote_uri,
            display_name,
            headers,
            last_status: None,
            created_at: Utc::now(),
            connected_at: None,
            ended_at: None,
            dtmf_sent: String::new(),
            dtmf_received: String::new(),
        }
    }

    /// Apply a state reported by the stack.
    ///
    /// Returns the state that was replaced, or `None` when the event carried
    /// no change (a redelivered duplicate) or arrived after termination.
    pub fn apply_state(&mut self, new_state: CallState, last_status: Option<u16>) -> Option<CallState> {
        if self.state.is_terminal() || self.state == new_state {
            return None;
        }

        let previous = std::mem::replace(&mut self.state, new_state);
        self.previous_state = previous;
        if last_status.is_some() {
            self.last_status = last_status;
        }

        let now = Utc::now();
        if new_state.is_connected() && self.connected_at.is_none() {
            self.connected_at = Some(now);
        }
        if new_state.is_terminal() {
            self.ended_at = Some(now);
        }

        Some(previous)
    }

    /// Validate digits for sending; returns the normalized digit string.
    ///
    /// Only a connected call accepts DTMF. Nothing is mutated, the caller
    /// records the digits with [`Call::record_sent_dtmf`] once the stack took them.
    pub fn prepare_dtmf(&self, digits: &str) -> Result<String> {
        if !self.state.is_connected() {
            return Err(DomainError::InvalidOperation(format!(
                "{} is {}, DTMF requires a confirmed call",
                self.id, self.state
            )));
        }

        let parsed = dtmf::parse_digits(digits)?;
        Ok(dtmf::to_string(&parsed))
    }

    pub fn record_sent_dtmf(&mut self, digits: &str) {
        push_capped(&mut self.dtmf_sent, digits);
    }

    /// Keep digits reported by the stack, dropping anything unrecognised
    pub fn record_received_dtmf(&mut self, digits: &str) -> String {
        let accepted: String = digits
            .chars()
            .filter_map(dtmf::DtmfDigit::from_char)
            .map(|d| d.to_char())
            .collect();

        push_capped(&mut self.dtmf_received, &accepted);

        accepted
    }

    /// Mark the call as ended locally, used when the stack cannot be trusted
    /// to report the termination
    pub fn force_disconnect(&mut self) -> Option<CallState> {
        self.apply_state(CallState::Disconnected, None)
    }

    pub fn summary(&self) -> CallSummary {
        CallSummary {
            id: self.id,
            remote_uri: self.remote_uri.clone(),
            display_name: self.display_name.clone(),
            state: self.state,
            previous_state: self.previous_state,
            direction: self.direction,
        }
    }

    // Getters
    pub fn id(&self) -> CallId {
        self.id
    }

    pub fn direction(&self) -> CallDirection {
        self.direction
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    pub fn previous_state(&self) -> CallState {
        self.previous_state
    }

    pub fn remote_uri(&self) -> &str {
        &self.remote_uri
    }

    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn last_status(&self) -> Option<u16> {
        self.last_status
    }

    pub fn created_at(&self) -> &DateTime<Utc> {
        &self.created_at
    }

    pub fn connected_at(&self) -> Option<&DateTime<Utc>> {
        self.connected_at.as_ref()
    }

    pub fn ended_at(&self) -> Option<&DateTime<Utc>> {
        self.ended_at.as_ref()
    }

    pub fn dtmf_sent(&self) -> &str {
        &self.dtmf_sent
    }

    pub fn dtmf_received(&self) -> &str {
        &self.dtmf_received
    }

    /// Talk time, from connect to end (or now while still connected)
    pub fn duration(&self) -> Option<chrono::Duration> {
        self.connected_at
            .map(|connected| self.ended_at.unwrap_or_else(Utc::now) - connected)
    }
}

/// Append digits, keeping only the newest `MAX_DTMF_LOG`
fn push_capped(log: &mut String, digits: &str) {
    log.push_str(digits);
    let overflow = log.len().saturating_sub(MAX_DTMF_LOG);
    if overflow > 0 {
        log.drain(..overflow);
    }
}

/// Copy-out view of a call for lists and notifications
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallSummary {
    pub id: CallId,
    pub remote_uri: String,
    pub display_name: Option<String>,
    pub state: CallState,
    pub previous_state: CallState,
    pub direction: CallDirection,
}
