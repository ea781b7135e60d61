//! In-process signaling stack
//!
//! `LoopbackStack` implements [`SignalingStack`] without any network I/O.
//! It hands out identifiers the way a real stack does (call ids from 1,
//! account ids from 0), remembers every command it was given and reports
//! back through the same event channel a real stack would use.
//!
//! With auto-progress enabled it also plays the remote side: registrations
//! succeed, outgoing calls ring and get answered, hang-ups disconnect. Inside
//! a tokio runtime those replies arrive after [`DEFAULT_REMOTE_DELAY`], so a
//! command has returned before its outcome is reported.

use crate::application::stack::{
    event_channel, SignalingStack, StackError, StackEvent, StackEventReceiver, StackEventSender,
    StackLogLevel,
};
use crate::config::PhoneSettings;
use crate::domain::account::{AccountConfig, RegistrationState};
use crate::domain::call::{CallState, HeaderMap};
use crate::domain::media::{CodecInfo, SoundDevice};
use crate::domain::shared::{AccountId, CallId, CodecPriority, DeviceId, SipUri};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, trace};

/// A command as the loopback stack received it
#[derive(Debug, Clone, PartialEq)]
pub enum StackCommand {
    Init { port: u16 },
    Shutdown,
    Register { account_id: AccountId, uri: String },
    Unregister(AccountId),
    MakeCall { call_id: CallId, uri: String, headers: HeaderMap },
    Answer(CallId),
    Hangup(CallId),
    SendDtmf { call_id: CallId, digits: String },
    SetSoundLevel(f32),
    SetMicroLevel(f32),
    SetCodecPriority { codec: String, priority: CodecPriority },
    SetSoundDevices { input: DeviceId, output: DeviceId },
}

/// Commands that can be told to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailurePoint {
    Init,
    Register,
    MakeCall,
    Hangup,
}

struct State {
    initialized: bool,
    next_call: i32,
    next_account: i32,
    account: Option<AccountId>,
    /// Live calls in creation order
    calls: Vec<CallId>,
    commands: Vec<StackCommand>,
    failures: HashSet<FailurePoint>,
    codecs: Vec<CodecInfo>,
    devices: Vec<SoundDevice>,
    selected_devices: Option<(DeviceId, DeviceId)>,
}

impl State {
    fn new() -> Self {
        Self {
            initialized: false,
            next_call: 1,
            next_account: 0,
            account: None,
            calls: Vec::new(),
            commands: Vec::new(),
            failures: HashSet::new(),
            codecs: default_codecs(),
            devices: default_devices(),
            selected_devices: None,
        }
    }

    fn ensure_initialized(&self) -> Result<(), StackError> {
        if self.initialized {
            Ok(())
        } else {
            Err(StackError::NotInitialized)
        }
    }

    fn check_failure(&self, point: FailurePoint) -> Result<(), StackError> {
        if self.failures.contains(&point) {
            Err(StackError::Rejected(format!("{point:?} failure injected")))
        } else {
            Ok(())
        }
    }

    fn release_call(&mut self, id: CallId) -> bool {
        let before = self.calls.len();
        self.calls.retain(|c| *c != id);
        self.calls.len() != before
    }

    fn allocate_call(&mut self) -> CallId {
        let id = CallId::new(self.next_call);
        self.next_call += 1;
        self.calls.push(id);
        id
    }
}

fn default_codecs() -> Vec<CodecInfo> {
    vec![
        CodecInfo::new("opus/48000/2", CodecPriority::new(130)),
        CodecInfo::new("G722/16000/1", CodecPriority::new(129)),
        CodecInfo::new("PCMU/8000/1", CodecPriority::new(128)),
        CodecInfo::new("PCMA/8000/1", CodecPriority::new(127)),
    ]
}

fn default_devices() -> Vec<SoundDevice> {
    vec![
        SoundDevice {
            id: DeviceId::new(0),
            name: "Built-in Microphone".to_string(),
            driver: "loopback".to_string(),
            input_channels: 1,
            output_channels: 0,
        },
        SoundDevice {
            id: DeviceId::new(1),
            name: "Built-in Speakers".to_string(),
            driver: "loopback".to_string(),
            input_channels: 0,
            output_channels: 2,
        },
        SoundDevice {
            id: DeviceId::new(2),
            name: "USB Headset".to_string(),
            driver: "loopback".to_string(),
            input_channels: 1,
            output_channels: 2,
        },
    ]
}

/// Latency of the simulated remote side
pub const DEFAULT_REMOTE_DELAY: Duration = Duration::from_millis(10);

pub struct LoopbackStack {
    events: StackEventSender,
    state: Mutex<State>,
    auto_progress: bool,
    remote_delay: Duration,
}

impl LoopbackStack {
    /// Create the stack together with the receiving end of its event channel
    pub fn new() -> (Self, StackEventReceiver) {
        let (events, rx) = event_channel();
        let stack = Self {
            events,
            state: Mutex::new(State::new()),
            auto_progress: false,
            remote_delay: DEFAULT_REMOTE_DELAY,
        };
        (stack, rx)
    }

    /// Let the stack answer its own commands with plausible remote behaviour
    pub fn with_auto_progress(mut self, enabled: bool) -> Self {
        self.auto_progress = enabled;
        self
    }

    pub fn with_remote_delay(mut self, delay: Duration) -> Self {
        self.remote_delay = delay;
        self
    }

    /// Handle for pushing events from elsewhere
    pub fn sender(&self) -> StackEventSender {
        self.events.clone()
    }

    /// Every command received so far, oldest first
    pub fn commands(&self) -> Vec<StackCommand> {
        self.state.lock().commands.clone()
    }

    pub fn fail_on(&self, point: FailurePoint) {
        self.state.lock().failures.insert(point);
    }

    pub fn clear_failure(&self, point: FailurePoint) {
        self.state.lock().failures.remove(&point);
    }

    pub fn selected_devices(&self) -> Option<(DeviceId, DeviceId)> {
        self.state.lock().selected_devices
    }

    /// Calls the stack still considers alive
    pub fn live_calls(&self) -> Vec<CallId> {
        self.state.lock().calls.clone()
    }

    /// Push an arbitrary event
    pub fn inject(&self, event: StackEvent) {
        trace!(?event, "Injecting stack event");
        // The phone may already be gone
        let _ = self.events.send(event);
    }

    /// Offer a new inbound call and return the id it was given
    pub fn simulate_incoming_call(
        &self,
        remote_uri: impl Into<String>,
        display_name: Option<String>,
        headers: HeaderMap,
    ) -> CallId {
        let call_id = self.state.lock().allocate_call();
        self.inject(StackEvent::IncomingCall {
            call_id,
            remote_uri: remote_uri.into(),
            display_name,
            headers,
        });
        call_id
    }

    pub fn simulate_call_state(&self, call_id: CallId, state: CallState, last_status: Option<u16>) {
        if state.is_terminal() {
            self.state.lock().release_call(call_id);
        }
        self.inject(StackEvent::CallState {
            call_id,
            state,
            last_status,
        });
    }

    pub fn simulate_registration(
        &self,
        account_id: AccountId,
        state: RegistrationState,
        status_code: Option<u16>,
    ) {
        self.inject(StackEvent::AccountState {
            account_id,
            state,
            status_code,
            reason: None,
        });
    }

    pub fn simulate_dtmf(&self, call_id: CallId, digits: impl Into<String>) {
        self.inject(StackEvent::DtmfReceived {
            call_id,
            digits: digits.into(),
        });
    }

    /// Report what the remote side answered to a command
    fn reply(&self, events: Vec<StackEvent>) {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let tx = self.events.clone();
                let delay = self.remote_delay;
                handle.spawn(async move {
                    tokio::time::sleep(delay).await;
                    for event in events {
                        let _ = tx.send(event);
                    }
                });
            }
            Err(_) => events.into_iter().for_each(|event| self.inject(event)),
        }
    }

    fn log(&self, level: StackLogLevel, message: String) {
        self.inject(StackEvent::Log { level, message });
    }
}

impl SignalingStack for LoopbackStack {
    fn init(&self, settings: &PhoneSettings) -> Result<(), StackError> {
        let mut state = self.state.lock();
        state.commands.push(StackCommand::Init {
            port: settings.port,
        });
        state.check_failure(FailurePoint::Init)?;
        state.initialized = true;
        drop(state);

        self.log(
            StackLogLevel::Info,
            format!("loopback transport bound to port {}", settings.port),
        );
        Ok(())
    }

    fn shutdown(&self) -> Result<(), StackError> {
        let mut state = self.state.lock();
        state.commands.push(StackCommand::Shutdown);
        state.initialized = false;
        state.calls.clear();
        state.account = None;
        Ok(())
    }

    fn register(&self, config: &AccountConfig) -> Result<AccountId, StackError> {
        let mut state = self.state.lock();
        state.ensure_initialized()?;
        state.check_failure(FailurePoint::Register)?;

        // One account per stack: re-registering reuses the existing id
        let account_id = match state.account {
            Some(id) => id,
            None => {
                let id = AccountId::new(state.next_account);
                state.next_account += 1;
                state.account = Some(id);
                id
            }
        };
        state.commands.push(StackCommand::Register {
            account_id,
            uri: config.uri.clone(),
        });
        drop(state);

        debug!(account = %account_id, uri = %config.uri, "Loopback REGISTER");
        if self.auto_progress {
            self.reply(vec![StackEvent::AccountState {
                account_id,
                state: RegistrationState::Registered,
                status_code: Some(200),
                reason: None,
            }]);
        }
        Ok(account_id)
    }

    fn unregister(&self, account: AccountId) -> Result<(), StackError> {
        let mut state = self.state.lock();
        state.ensure_initialized()?;
        if state.account != Some(account) {
            return Err(StackError::UnknownAccount(account));
        }
        state.account = None;
        state.commands.push(StackCommand::Unregister(account));
        Ok(())
    }

    fn make_call(
        &self,
        account: Option<AccountId>,
        uri: &SipUri,
        headers: &HeaderMap,
    ) -> Result<CallId, StackError> {
        let mut state = self.state.lock();
        state.ensure_initialized()?;
        state.check_failure(FailurePoint::MakeCall)?;
        if let Some(account) = account {
            if state.account != Some(account) {
                return Err(StackError::UnknownAccount(account));
            }
        }

        let call_id = state.allocate_call();
        state.commands.push(StackCommand::MakeCall {
            call_id,
            uri: uri.to_string(),
            headers: headers.clone(),
        });
        drop(state);

        debug!(call = %call_id, to = %uri, "Loopback INVITE");
        if self.auto_progress {
            self.reply(vec![
                StackEvent::CallState {
                    call_id,
                    state: CallState::Early,
                    last_status: Some(180),
                },
                StackEvent::CallState {
                    call_id,
                    state: CallState::Confirmed,
                    last_status: Some(200),
                },
            ]);
        }
        Ok(call_id)
    }

    fn answer_call(&self, call: CallId) -> Result<(), StackError> {
        let mut state = self.state.lock();
        state.ensure_initialized()?;
        if !state.calls.contains(&call) {
            return Err(StackError::UnknownCall(call));
        }
        state.commands.push(StackCommand::Answer(call));
        drop(state);

        if self.auto_progress {
            self.reply(vec![StackEvent::CallState {
                call_id: call,
                state: CallState::Confirmed,
                last_status: Some(200),
            }]);
        }
        Ok(())
    }

    fn hangup_call(&self, call: CallId) -> Result<(), StackError> {
        let mut state = self.state.lock();
        state.commands.push(StackCommand::Hangup(call));
        state.check_failure(FailurePoint::Hangup)?;
        if !state.release_call(call) {
            return Err(StackError::UnknownCall(call));
        }
        drop(state);

        if self.auto_progress {
            self.reply(vec![StackEvent::CallState {
                call_id: call,
                state: CallState::Disconnected,
                last_status: Some(200),
            }]);
        }
        Ok(())
    }

    fn send_dtmf(&self, call: CallId, digits: &str) -> Result<(), StackError> {
        let mut state = self.state.lock();
        state.ensure_initialized()?;
        if !state.calls.contains(&call) {
            return Err(StackError::UnknownCall(call));
        }
        state.commands.push(StackCommand::SendDtmf {
            call_id: call,
            digits: digits.to_string(),
        });
        Ok(())
    }

    fn set_sound_level(&self, level: f32) -> Result<(), StackError> {
        self.state.lock().commands.push(StackCommand::SetSoundLevel(level));
        Ok(())
    }

    fn set_micro_level(&self, level: f32) -> Result<(), StackError> {
        self.state.lock().commands.push(StackCommand::SetMicroLevel(level));
        Ok(())
    }

    fn set_codec_priority(&self, codec: &str, priority: CodecPriority) -> Result<(), StackError> {
        let mut state = self.state.lock();
        state.ensure_initialized()?;

        // Same matching rule as codec ids: case-insensitive prefix
        let needle = codec.to_ascii_lowercase();
        let matched: Vec<usize> = state
            .codecs
            .iter()
            .enumerate()
            .filter(|(_, c)| !needle.is_empty() && c.name.to_ascii_lowercase().starts_with(&needle))
            .map(|(index, _)| index)
            .collect();
        if matched.is_empty() {
            return Err(StackError::UnknownCodec(codec.to_string()));
        }
        for index in matched {
            state.codecs[index].priority = priority;
        }

        state.commands.push(StackCommand::SetCodecPriority {
            codec: codec.to_string(),
            priority,
        });
        Ok(())
    }

    fn codec_priorities(&self) -> Result<Vec<CodecInfo>, StackError> {
        let state = self.state.lock();
        state.ensure_initialized()?;
        let mut codecs = state.codecs.clone();
        codecs.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.name.cmp(&b.name)));
        Ok(codecs)
    }

    fn set_sound_devices(&self, input: DeviceId, output: DeviceId) -> Result<(), StackError> {
        let mut state = self.state.lock();
        state.ensure_initialized()?;

        let capture = state.devices.iter().any(|d| d.id == input && d.is_capture());
        if !capture {
            return Err(StackError::UnknownDevice(input));
        }
        let playback = state.devices.iter().any(|d| d.id == output && d.is_playback());
        if !playback {
            return Err(StackError::UnknownDevice(output));
        }

        state.selected_devices = Some((input, output));
        state.commands.push(StackCommand::SetSoundDevices { input, output });
        Ok(())
    }

    fn sound_devices(&self) -> Result<Vec<SoundDevice>, StackError> {
        let state = self.state.lock();
        state.ensure_initialized()?;
        Ok(state.devices.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    fn started() -> (LoopbackStack, StackEventReceiver) {
        let (stack, rx) = LoopbackStack::new();
        assert_ok!(stack.init(&PhoneSettings::default()));
        (stack, rx)
    }

    fn bob() -> SipUri {
        SipUri::parse("sip:bob@example.com").unwrap()
    }

    #[test]
    fn test_call_ids_start_at_one() {
        let (stack, _rx) = started();
        let first = stack.make_call(None, &bob(), &HeaderMap::new()).unwrap();
        let second = stack.simulate_incoming_call("sip:alice@x", None, HeaderMap::new());
        assert_eq!(first, CallId::new(1));
        assert_eq!(second, CallId::new(2));
        assert_eq!(stack.live_calls(), vec![first, second]);
    }

    #[test]
    fn test_commands_require_init() {
        let (stack, _rx) = LoopbackStack::new();
        assert_eq!(
            stack.make_call(None, &bob(), &HeaderMap::new()),
            Err(StackError::NotInitialized)
        );
        assert_err!(stack.sound_devices());
    }

    #[test]
    fn test_register_reuses_account_id() {
        let (stack, _rx) = started();
        let config = AccountConfig::new("sip:alice@example.com", "sip:example.com", "alice");
        assert_eq!(stack.register(&config), Ok(AccountId::new(0)));
        assert_eq!(stack.register(&config), Ok(AccountId::new(0)));
        assert_ok!(stack.unregister(AccountId::new(0)));
        assert_eq!(
            stack.unregister(AccountId::new(0)),
            Err(StackError::UnknownAccount(AccountId::new(0)))
        );
    }

    #[test]
    fn test_failure_injection() {
        let (stack, _rx) = started();
        stack.fail_on(FailurePoint::MakeCall);
        assert_err!(stack.make_call(None, &bob(), &HeaderMap::new()));

        stack.clear_failure(FailurePoint::MakeCall);
        assert_ok!(stack.make_call(None, &bob(), &HeaderMap::new()));
    }

    #[test]
    fn test_auto_progress_plays_remote_side() {
        let (stack, mut rx) = LoopbackStack::new();
        let stack = stack.with_auto_progress(true);
        assert_ok!(stack.init(&PhoneSettings::default()));

        let call = stack.make_call(None, &bob(), &HeaderMap::new()).unwrap();
        assert_ok!(stack.hangup_call(call));

        let mut states = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let StackEvent::CallState { state, .. } = event {
                states.push(state);
            }
        }
        assert_eq!(
            states,
            vec![CallState::Early, CallState::Confirmed, CallState::Disconnected]
        );
    }

    #[test]
    fn test_codec_priority_prefix_match() {
        let (stack, _rx) = started();
        assert_ok!(stack.set_codec_priority("pcma", CodecPriority::HIGHEST));
        assert_err!(stack.set_codec_priority("speex", CodecPriority::HIGHEST));

        let codecs = stack.codec_priorities().unwrap();
        assert_eq!(codecs[0].name, "PCMA/8000/1");
    }

    #[test]
    fn test_empty_codec_name_changes_nothing() {
        let (stack, _rx) = started();
        let before = stack.codec_priorities().unwrap();

        assert_eq!(
            stack.set_codec_priority("", CodecPriority::DISABLED),
            Err(StackError::UnknownCodec(String::new()))
        );
        assert_eq!(stack.codec_priorities().unwrap(), before);
        assert!(!stack
            .commands()
            .iter()
            .any(|c| matches!(c, StackCommand::SetCodecPriority { .. })));
    }

    #[test]
    fn test_sound_devices_must_match_direction() {
        let (stack, _rx) = started();
        assert_eq!(
            stack.set_sound_devices(DeviceId::new(1), DeviceId::new(1)),
            Err(StackError::UnknownDevice(DeviceId::new(1)))
        );
        assert_ok!(stack.set_sound_devices(DeviceId::new(2), DeviceId::new(2)));
        assert_eq!(
            stack.selected_devices(),
            Some((DeviceId::new(2), DeviceId::new(2)))
        );
    }

    #[test]
    fn test_commands_are_recorded() {
        let (stack, _rx) = started();
        let call = stack.make_call(None, &bob(), &HeaderMap::new()).unwrap();
        assert_ok!(stack.send_dtmf(call, "42"));

        let commands = stack.commands();
        assert_eq!(commands[0], StackCommand::Init { port: 5060 });
        assert_eq!(
            commands.last(),
            Some(&StackCommand::SendDtmf {
                call_id: call,
                digits: "42".to_string()
            })
        );
    }
}
