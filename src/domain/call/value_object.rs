//! Call value objects

use serde::{Deserialize, Serialize};
use std::fmt;

/// Call direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallDirection {
    /// Call offered to us by the stack
    Inbound,
    /// Call placed through `make_call`
    Outbound,
}

impl CallDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallDirection::Inbound => "inbound",
            CallDirection::Outbound => "outbound",
        }
    }
}

/// Invite-session state as reported by the signaling stack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallState {
    /// Before INVITE is sent or received
    Null,
    /// After INVITE is sent
    Calling,
    /// After INVITE is received
    Incoming,
    /// After a provisional response with tag
    Early,
    /// After 2xx is sent/received
    Connecting,
    /// After ACK is sent/received
    Confirmed,
    /// Session is terminated
    Disconnected,
}

impl CallState {
    /// No transition leaves this state; the call is reaped once observed
    pub fn is_terminal(&self) -> bool {
        matches!(self, CallState::Disconnected)
    }

    /// Media is flowing and in-dialog requests such as DTMF are accepted
    pub fn is_connected(&self) -> bool {
        matches!(self, CallState::Confirmed)
    }

    /// Still waiting for the far end (or for us) to answer
    pub fn is_ringing(&self) -> bool {
        matches!(
            self,
            CallState::Calling | CallState::Incoming | CallState::Early
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CallState::Null => "null",
            CallState::Calling => "calling",
            CallState::Incoming => "incoming",
            CallState::Early => "early",
            CallState::Connecting => "connecting",
            CallState::Confirmed => "confirmed",
            CallState::Disconnected => "disconnected",
        }
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
