//! Signaling stack port
//!
//! The phone talks to the SIP/media engine only through [`SignalingStack`]
//! and hears back from it only through [`StackEvent`]s. Commands are
//! fire-and-confirm: a method returns once the stack accepted or refused the
//! request, and the real outcome arrives later as an event.
//!
//! Implementations must not block and must never deliver an event
//! synchronously from inside a command call; events go through a channel or
//! another thread.

use crate::config::PhoneSettings;
use crate::domain::account::{AccountConfig, RegistrationState};
use crate::domain::call::{CallState, HeaderMap};
use crate::domain::media::{CodecInfo, SoundDevice};
use crate::domain::shared::{AccountId, CallId, CodecPriority, DeviceId, DomainError, SipUri};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StackError {
    #[error("stack is not initialized")]
    NotInitialized,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("unknown call {0}")]
    UnknownCall(CallId),

    #[error("unknown account {0}")]
    UnknownAccount(AccountId),

    #[error("unknown sound device {0}")]
    UnknownDevice(DeviceId),

    #[error("unknown codec {0}")]
    UnknownCodec(String),
}

impl From<StackError> for DomainError {
    fn from(err: StackError) -> Self {
        DomainError::Stack(err.to_string())
    }
}

/// Commands understood by the signaling/media engine
#[cfg_attr(test, mockall::automock)]
pub trait SignalingStack: Send + Sync {
    /// Start transports, STUN and media with the given settings
    fn init(&self, settings: &PhoneSettings) -> Result<(), StackError>;

    fn shutdown(&self) -> Result<(), StackError>;

    /// Create (or update) the account and send REGISTER
    fn register(&self, config: &AccountConfig) -> Result<AccountId, StackError>;

    fn unregister(&self, account: AccountId) -> Result<(), StackError>;

    /// Send INVITE; the returned id identifies the call in later events
    fn make_call(
        &self,
        account: Option<AccountId>,
        uri: &SipUri,
        headers: &HeaderMap,
    ) -> Result<CallId, StackError>;

    fn answer_call(&self, call: CallId) -> Result<(), StackError>;

    fn hangup_call(&self, call: CallId) -> Result<(), StackError>;

    fn send_dtmf(&self, call: CallId, digits: &str) -> Result<(), StackError>;

    fn set_sound_level(&self, level: f32) -> Result<(), StackError>;

    fn set_micro_level(&self, level: f32) -> Result<(), StackError>;

    fn set_codec_priority(&self, codec: &str, priority: CodecPriority) -> Result<(), StackError>;

    fn codec_priorities(&self) -> Result<Vec<CodecInfo>, StackError>;

    fn set_sound_devices(&self, input: DeviceId, output: DeviceId) -> Result<(), StackError>;

    fn sound_devices(&self) -> Result<Vec<SoundDevice>, StackError>;
}

/// Severity of a log line emitted by the stack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StackLogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl StackLogLevel {
    /// Map a numeric verbosity (1 = errors only, 5+ = everything)
    pub fn from_verbosity(level: u8) -> Self {
        match level {
            0 | 1 => StackLogLevel::Error,
            2 => StackLogLevel::Warn,
            3 => StackLogLevel::Info,
            4 => StackLogLevel::Debug,
            _ => StackLogLevel::Trace,
        }
    }
}

/// Everything the stack reports back, from any thread
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StackEvent {
    IncomingCall {
        call_id: CallId,
        remote_uri: String,
        display_name: Option<String>,
        headers: HeaderMap,
    },
    CallState {
        call_id: CallId,
        state: CallState,
        last_status: Option<u16>,
    },
    AccountState {
        account_id: AccountId,
        state: RegistrationState,
        status_code: Option<u16>,
        reason: Option<String>,
    },
    DtmfReceived {
        call_id: CallId,
        digits: String,
    },
    SoundLevel {
        level: u32,
    },
    MicroLevel {
        level: u32,
    },
    TextMessage {
        call_id: Option<CallId>,
        from: String,
        to: String,
        contact: String,
        mime_type: String,
        body: String,
    },
    Ringtone {
        playing: bool,
    },
    Log {
        level: StackLogLevel,
        message: String,
    },
}

impl StackEvent {
    /// Call the event refers to, if any
    pub fn call_id(&self) -> Option<CallId> {
        match self {
            StackEvent::IncomingCall { call_id, .. }
            | StackEvent::CallState { call_id, .. }
            | StackEvent::DtmfReceived { call_id, .. } => Some(*call_id),
            StackEvent::TextMessage { call_id, .. } => *call_id,
            _ => None,
        }
    }
}

pub type StackEventSender = mpsc::UnboundedSender<StackEvent>;
pub type StackEventReceiver = mpsc::UnboundedReceiver<StackEvent>;

/// Channel a stack implementation pushes its events into
pub fn event_channel() -> (StackEventSender, StackEventReceiver) {
    mpsc::unbounded_channel()
}
