//! Outbound notifications
//!
//! The phone pushes every observable change through a [`Notifier`]. Pushing
//! must never block: the registry lock is held while a call notification is
//! delivered so that observers see state changes in exactly the order they
//! were applied.

use crate::domain::account::RegistrationState;
use crate::domain::call::{Call, CallSummary, HeaderMap};
use crate::domain::messaging::TextMessage;
use crate::domain::shared::{CallId, EventMetadata};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Observable phone event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PhoneEvent {
    /// A call was offered to us
    IncomingCall {
        call: CallSummary,
        headers: HeaderMap,
    },
    /// A call changed state; `call.previous_state` holds where it came from
    CallState {
        call: CallSummary,
        last_status: Option<u16>,
    },
    RegistrationState {
        state: RegistrationState,
        previous: RegistrationState,
        status_code: Option<u16>,
        reason: Option<String>,
    },
    SoundLevel {
        level: u32,
    },
    MicroLevel {
        level: u32,
    },
    TextMessage {
        message: TextMessage,
    },
    DtmfReceived {
        call_id: CallId,
        digits: String,
    },
    /// The stack asks the front end to start or stop the ring sound
    Ringtone {
        playing: bool,
    },
}

impl PhoneEvent {
    pub fn incoming_call(call: &Call) -> Self {
        PhoneEvent::IncomingCall {
            call: call.summary(),
            headers: call.headers().clone(),
        }
    }

    pub fn call_state(call: &Call) -> Self {
        PhoneEvent::CallState {
            call: call.summary(),
            last_status: call.last_status(),
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            PhoneEvent::IncomingCall { .. } => "call.incoming",
            PhoneEvent::CallState { .. } => "call.state",
            PhoneEvent::RegistrationState { .. } => "account.registration",
            PhoneEvent::SoundLevel { .. } => "media.sound_level",
            PhoneEvent::MicroLevel { .. } => "media.micro_level",
            PhoneEvent::TextMessage { .. } => "message.received",
            PhoneEvent::DtmfReceived { .. } => "call.dtmf",
            PhoneEvent::Ringtone { .. } => "media.ringtone",
        }
    }
}

/// Event plus envelope metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub metadata: EventMetadata,
    pub event: PhoneEvent,
}

impl Notification {
    pub fn new(event: PhoneEvent) -> Self {
        Self {
            metadata: EventMetadata::new(event.event_type()),
            event,
        }
    }
}

/// Push interface towards the presentation layer
pub trait Notifier: Send + Sync {
    /// Deliver without blocking and without calling back into the phone
    fn notify(&self, notification: Notification);
}

/// Discards everything; installed until a real observer is attached
#[derive(Debug, Default, Clone, Copy)]
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn notify(&self, _notification: Notification) {}
}

impl Notifier for mpsc::UnboundedSender<Notification> {
    fn notify(&self, notification: Notification) {
        // A closed receiver means the observer went away
        let _ = self.send(notification);
    }
}
