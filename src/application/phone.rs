//! Phone orchestrator
//!
//! `Phone` owns the account, the call registry and the handle to the
//! signaling stack. User commands are validated against local state before
//! they reach the stack; stack events update local state and are pushed to
//! the installed [`Notifier`].
//!
//! Every command and every event entry point may be called concurrently from
//! any thread. Call state lives behind the registry's single lock, account
//! state behind its own lock, and the two are never held together.
//!
//! Expected failures never panic or return `Err` through the public surface:
//! commands answer with `bool`/`Option` and the reason is kept in
//! [`Phone::error_message`].

use crate::application::metrics;
use crate::application::notifier::{Notification, Notifier, NullNotifier, PhoneEvent};
use crate::application::stack::{
    SignalingStack, StackError, StackEvent, StackEventReceiver, StackLogLevel,
};
use crate::config::PhoneSettings;
use crate::domain::account::{Account, AccountConfig, RegistrationState};
use crate::domain::call::{Call, CallDirection, CallRegistry, CallState, CallSummary, HeaderMap, Transition};
use crate::domain::media::{clamp_level, CodecInfo, MeterLevels, SignalLevels, SoundDevice};
use crate::domain::messaging::{MessageContentType, TextMessage};
use crate::domain::shared::{AccountId, CallId, CodecPriority, DeviceId, DomainError, Result, SipUri};
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

pub struct Phone {
    stack: Arc<dyn SignalingStack>,
    notifier: RwLock<Arc<dyn Notifier>>,
    calls: CallRegistry,
    account: Mutex<Account>,
    /// `Some` once `init` succeeded
    settings: RwLock<Option<PhoneSettings>>,
    levels: Mutex<SignalLevels>,
    meters: Mutex<MeterLevels>,
    last_error: Mutex<String>,
}

impl Phone {
    pub fn new(stack: Arc<dyn SignalingStack>) -> Self {
        Self {
            stack,
            notifier: RwLock::new(Arc::new(NullNotifier)),
            calls: CallRegistry::new(),
            account: Mutex::new(Account::new()),
            settings: RwLock::new(None),
            levels: Mutex::new(SignalLevels::default()),
            meters: Mutex::new(MeterLevels::default()),
            last_error: Mutex::new(String::new()),
        }
    }

    pub fn with_notifier(self, notifier: Arc<dyn Notifier>) -> Self {
        self.set_notifier(notifier);
        self
    }

    /// Replace the observer that receives notifications
    pub fn set_notifier(&self, notifier: Arc<dyn Notifier>) {
        *self.notifier.write() = notifier;
    }

    pub fn stack(&self) -> &Arc<dyn SignalingStack> {
        &self.stack
    }

    /// Last error message, overwritten by every failed command
    pub fn error_message(&self) -> String {
        self.last_error.lock().clone()
    }

    pub fn is_initialized(&self) -> bool {
        self.settings.read().is_some()
    }

    // ---------------------------------------------------------------------
    // Commands
    // ---------------------------------------------------------------------

    /// Start the stack; a second call while initialized is rejected
    pub fn init(&self, settings: PhoneSettings) -> bool {
        let result = self.try_init(settings);
        self.record(result).is_some()
    }

    fn try_init(&self, settings: PhoneSettings) -> Result<()> {
        let mut current = self.settings.write();
        if current.is_some() {
            return Err(DomainError::InvalidOperation(
                "Phone is already initialized".to_string(),
            ));
        }

        settings
            .validate()
            .map_err(|e| DomainError::Initialization(e.to_string()))?;
        self.stack
            .init(&settings)
            .map_err(|e| DomainError::Initialization(e.to_string()))?;

        let levels = SignalLevels::new(settings.sound_level, settings.micro_level);
        if let Err(e) = self.stack.set_sound_level(levels.sound) {
            warn!(error = %e, "Failed to apply initial sound level");
        }
        if let Err(e) = self.stack.set_micro_level(levels.micro) {
            warn!(error = %e, "Failed to apply initial microphone level");
        }
        *self.levels.lock() = levels;

        info!(
            port = settings.port,
            stun = ?settings.stun_server,
            srtp = ?settings.srtp,
            srtp_signaling = ?settings.srtp_signaling,
            "Phone initialized"
        );
        *current = Some(settings);
        Ok(())
    }

    /// Hang up everything, unregister and stop the stack
    pub fn shutdown(&self) -> bool {
        if !self.is_initialized() {
            return true;
        }

        self.hang_up_all();
        let attached = self.account.lock().id().is_some();
        if attached && !self.unregister() {
            warn!(error = %self.error_message(), "Unregister during shutdown failed");
        }

        let result = self.stack.shutdown().map_err(DomainError::from);
        *self.settings.write() = None;
        info!("Phone shut down");
        self.record(result).is_some()
    }

    /// Start registering the account
    ///
    /// Rejected while a previous attempt is still in flight. The outcome
    /// arrives later as an account-state event.
    pub fn register_user(&self, config: AccountConfig) -> bool {
        let result = self.try_register(config);
        self.record(result).is_some()
    }

    fn try_register(&self, config: AccountConfig) -> Result<()> {
        self.ensure_initialized()?;

        let mut account = self.account.lock();
        let previous = account.state();
        account.begin_registration(config.clone())?;
        self.emit(PhoneEvent::RegistrationState {
            state: RegistrationState::Registering,
            previous,
            status_code: None,
            reason: None,
        });

        match self.stack.register(&config) {
            Ok(id) => {
                account.attach(id);
                info!(account = %id, uri = %config.uri, "Registration started");
                Ok(())
            }
            Err(e) => {
                let reason = e.to_string();
                account.fail(reason.clone())?;
                metrics::record_registration(RegistrationState::Failed);
                self.emit(PhoneEvent::RegistrationState {
                    state: RegistrationState::Failed,
                    previous: RegistrationState::Registering,
                    status_code: None,
                    reason: Some(reason.clone()),
                });
                Err(DomainError::Registration(reason))
            }
        }
    }

    /// True only while the account is registered
    pub fn check_account_status(&self) -> bool {
        self.account.lock().is_registered()
    }

    pub fn get_account_info(&self) -> Map<String, Value> {
        self.account.lock().info()
    }

    pub fn account_state(&self) -> RegistrationState {
        self.account.lock().state()
    }

    /// Hang up all calls, then unregister the account
    pub fn unregister(&self) -> bool {
        let result = self.try_unregister();
        self.record(result).is_some()
    }

    fn try_unregister(&self) -> Result<()> {
        self.ensure_initialized()?;
        self.hang_up_all();

        let mut account = self.account.lock();
        if let Some(id) = account.id() {
            self.stack.unregister(id)?;
        }

        let previous = account.reset();
        if previous != RegistrationState::Unregistered {
            info!(previous = %previous, "Account unregistered");
            self.emit(PhoneEvent::RegistrationState {
                state: RegistrationState::Unregistered,
                previous,
                status_code: None,
                reason: None,
            });
        }
        Ok(())
    }

    /// Place a call; `None` when the address is malformed or the stack refuses
    pub fn make_call(&self, address: &str) -> Option<Call> {
        self.make_call_with_headers(address, HeaderMap::new())
    }

    /// Place a call carrying extra SIP headers
    pub fn make_call_with_headers(&self, address: &str, headers: HeaderMap) -> Option<Call> {
        let result = self.try_make_call(address, headers);
        self.record(result)
    }

    fn try_make_call(&self, address: &str, headers: HeaderMap) -> Result<Call> {
        self.ensure_initialized()?;

        let uri = SipUri::parse(address).map_err(|e| DomainError::CallRejected(e.to_string()))?;
        let account = self.account.lock().id();
        let id = self
            .stack
            .make_call(account, &uri, &headers)
            .map_err(|e| DomainError::CallRejected(e.to_string()))?;

        let call = Call::outbound(id, &uri, headers);
        if !self.calls.add(call.clone()) {
            // The stack placed a leg we cannot track; tear it down again
            if let Err(e) = self.stack.hangup_call(id) {
                warn!(call = %id, error = %e, "Failed to hang up untracked call");
            }
            return Err(DomainError::AlreadyExists(format!(
                "Stack returned {id}, which is still in use"
            )));
        }

        metrics::record_call_created(call.direction());
        metrics::set_active_calls(self.calls.len());
        info!(call = %id, to = %uri, "Outgoing call started");
        Ok(call)
    }

    /// Answer an inbound call that is still ringing
    pub fn answer_call(&self, id: CallId) -> bool {
        let result = self.try_answer(id);
        self.record(result).is_some()
    }

    fn try_answer(&self, id: CallId) -> Result<()> {
        self.ensure_initialized()?;

        let call = self
            .calls
            .get(id)
            .ok_or_else(|| DomainError::NotFound(id.to_string()))?;
        if call.direction() != CallDirection::Inbound
            || !matches!(call.state(), CallState::Incoming | CallState::Early)
        {
            return Err(DomainError::InvalidOperation(format!(
                "{id} is {} and cannot be answered",
                call.state()
            )));
        }

        self.stack.answer_call(id)?;
        debug!(call = %id, "Answer sent");
        Ok(())
    }

    /// Hang up one call
    ///
    /// When the stack refuses, the call is still dropped locally and a
    /// Disconnected notification is pushed.
    pub fn hang_up(&self, id: CallId) -> bool {
        let result = self.try_hang_up(id);
        self.record(result).is_some()
    }

    fn try_hang_up(&self, id: CallId) -> Result<()> {
        self.ensure_initialized()?;
        if !self.calls.contains(id) {
            return Err(DomainError::NotFound(id.to_string()));
        }

        if let Err(e) = self.stack.hangup_call(id) {
            warn!(call = %id, error = %e, "Stack failed to hang up, dropping call locally");
            let notifier = self.current_notifier();
            self.calls.reap_with(id, |call| {
                if call.force_disconnect().is_some() {
                    notifier.notify(Notification::new(PhoneEvent::call_state(call)));
                }
            });
            metrics::set_active_calls(self.calls.len());
        }
        Ok(())
    }

    /// Terminate every call and empty the registry
    ///
    /// Local bookkeeping never waits for the stack: each call is reported as
    /// Disconnected and removed, then the stack is asked to hang it up.
    pub fn hang_up_all(&self) {
        let notifier = self.current_notifier();
        let drained = self.calls.drain_with(|call| {
            if call.force_disconnect().is_some() {
                notifier.notify(Notification::new(PhoneEvent::call_state(call)));
            }
        });

        for call in &drained {
            if let Err(e) = self.stack.hangup_call(call.id()) {
                warn!(call = %call.id(), error = %e, "Stack failed to hang up call");
            }
        }

        if !drained.is_empty() {
            info!(count = drained.len(), "Hung up all calls");
        }
        metrics::set_active_calls(self.calls.len());
    }

    pub fn get_call(&self, id: CallId) -> Option<Call> {
        self.calls.get(id)
    }

    /// Insertion-ordered snapshot of the live calls
    pub fn get_active_call_list(&self) -> Vec<CallSummary> {
        self.calls.list()
    }

    /// Send DTMF digits on a confirmed call
    pub fn send_dtmf_digits(&self, id: CallId, digits: &str) -> bool {
        let result = self.try_send_dtmf(id, digits);
        self.record(result).is_some()
    }

    fn try_send_dtmf(&self, id: CallId, digits: &str) -> Result<()> {
        self.ensure_initialized()?;

        let normalized = self
            .calls
            .update(id, |call| call.prepare_dtmf(digits))
            .ok_or_else(|| DomainError::NotFound(id.to_string()))??;

        self.stack.send_dtmf(id, &normalized)?;
        self.calls.update(id, |call| call.record_sent_dtmf(&normalized));
        debug!(call = %id, digits = %normalized, "DTMF sent");
        Ok(())
    }

    /// Speaker volume, clamped to 0.0..=1.0; initial levels come from `init`
    pub fn set_sound_signal(&self, level: f32) {
        let level = clamp_level(level);
        let result = self.push_level(level, |stack, l| stack.set_sound_level(l));
        if self.record(result).is_some() {
            self.levels.lock().sound = level;
        }
    }

    /// Microphone volume, clamped to 0.0..=1.0
    pub fn set_micro_signal(&self, level: f32) {
        let level = clamp_level(level);
        let result = self.push_level(level, |stack, l| stack.set_micro_level(l));
        if self.record(result).is_some() {
            self.levels.lock().micro = level;
        }
    }

    fn push_level(
        &self,
        level: f32,
        apply: impl FnOnce(&dyn SignalingStack, f32) -> std::result::Result<(), StackError>,
    ) -> Result<()> {
        self.ensure_initialized()?;
        apply(self.stack.as_ref(), level)?;
        Ok(())
    }

    pub fn get_signal_levels(&self) -> SignalLevels {
        *self.levels.lock()
    }

    /// Last meter readings reported by the stack
    pub fn last_meter_levels(&self) -> MeterLevels {
        *self.meters.lock()
    }

    pub fn set_codec_priority(&self, codec: &str, priority: CodecPriority) -> bool {
        let result = self
            .ensure_initialized()
            .and_then(|_| self.stack.set_codec_priority(codec, priority).map_err(DomainError::from));
        self.record(result).is_some()
    }

    pub fn get_codec_priorities(&self) -> Vec<CodecInfo> {
        let result = self
            .ensure_initialized()
            .and_then(|_| self.stack.codec_priorities().map_err(DomainError::from));
        self.record(result).unwrap_or_default()
    }

    /// Select capture and playback devices
    pub fn set_sound_device(&self, input: DeviceId, output: DeviceId) -> bool {
        let result = self
            .ensure_initialized()
            .and_then(|_| self.stack.set_sound_devices(input, output).map_err(DomainError::from));
        self.record(result).is_some()
    }

    pub fn get_sound_devices(&self) -> Vec<SoundDevice> {
        let result = self
            .ensure_initialized()
            .and_then(|_| self.stack.sound_devices().map_err(DomainError::from));
        self.record(result).unwrap_or_default()
    }

    // ---------------------------------------------------------------------
    // Stack events
    // ---------------------------------------------------------------------

    /// Single entry point for everything the stack reports
    pub fn handle_event(&self, event: StackEvent) {
        trace!(?event, "Stack event");
        match event {
            StackEvent::IncomingCall {
                call_id,
                remote_uri,
                display_name,
                headers,
            } => self.on_incoming_call(call_id, remote_uri, display_name, headers),
            StackEvent::CallState {
                call_id,
                state,
                last_status,
            } => self.on_call_state(call_id, state, last_status),
            StackEvent::AccountState {
                account_id,
                state,
                status_code,
                reason,
            } => self.on_account_state(account_id, state, status_code, reason),
            StackEvent::DtmfReceived { call_id, digits } => self.on_dtmf_received(call_id, &digits),
            StackEvent::SoundLevel { level } => self.on_sound_level(level),
            StackEvent::MicroLevel { level } => self.on_micro_level(level),
            StackEvent::TextMessage {
                call_id,
                from,
                to,
                contact,
                mime_type,
                body,
            } => self.on_text_message(TextMessage {
                call_id,
                from,
                to,
                contact,
                content_type: MessageContentType::parse(&mime_type),
                body,
            }),
            StackEvent::Ringtone { playing } => self.emit(PhoneEvent::Ringtone { playing }),
            StackEvent::Log { level, message } => log_stack_line(level, &message),
        }
    }

    /// Drain a stack event channel on the tokio runtime
    pub fn spawn_event_loop(self: &Arc<Self>, mut events: StackEventReceiver) -> JoinHandle<()> {
        let phone = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                phone.handle_event(event);
            }
            debug!("Stack event channel closed");
        })
    }

    pub fn on_incoming_call(
        &self,
        id: CallId,
        remote_uri: String,
        display_name: Option<String>,
        headers: HeaderMap,
    ) {
        let call = Call::inbound(id, remote_uri, display_name, headers);
        let notifier = self.current_notifier();
        let added = self.calls.add_with(call, |call| {
            notifier.notify(Notification::new(PhoneEvent::incoming_call(call)));
        });

        if !added {
            debug!(call = %id, "Duplicate incoming call event dropped");
            return;
        }

        metrics::record_call_created(CallDirection::Inbound);
        metrics::set_active_calls(self.calls.len());
        info!(call = %id, "Incoming call");
    }

    pub fn on_call_state(&self, id: CallId, state: CallState, last_status: Option<u16>) {
        let notifier = self.current_notifier();
        let outcome = self.calls.transition(id, state, last_status, |call, _previous| {
            notifier.notify(Notification::new(PhoneEvent::call_state(call)));
        });

        match outcome {
            Transition::UnknownCall => {
                debug!(call = %id, state = %state, "State event for unknown call dropped");
            }
            Transition::Unchanged => {
                trace!(call = %id, state = %state, "Repeated state event ignored");
            }
            Transition::Changed { previous, reaped } => {
                debug!(call = %id, from = %previous, to = %state, status = ?last_status, "Call state changed");
                if reaped {
                    metrics::set_active_calls(self.calls.len());
                    info!(call = %id, status = ?last_status, "Call ended");
                }
            }
        }
    }

    pub fn on_account_state(
        &self,
        id: AccountId,
        state: RegistrationState,
        status_code: Option<u16>,
        reason: Option<String>,
    ) {
        let mut account = self.account.lock();
        if account.id() != Some(id) {
            warn!(account = %id, state = %state, "Account event for unknown account dropped");
            return;
        }
        if account.state() == state {
            // Periodic re-registration reports the state we are already in
            debug!(account = %id, state = %state, status = ?status_code, "Repeated account state ignored");
            return;
        }

        match account.apply_state(state, status_code, reason.clone()) {
            Ok(previous) => {
                metrics::record_registration(state);
                match state {
                    RegistrationState::Failed => {
                        warn!(account = %id, status = ?status_code, reason = ?account.last_error(), "Registration failed");
                    }
                    _ => info!(account = %id, state = %state, status = ?status_code, "Registration state changed"),
                }
                self.emit(PhoneEvent::RegistrationState {
                    state,
                    previous,
                    status_code,
                    reason: account.last_error().map(str::to_string).or(reason),
                });
            }
            Err(e) => warn!(account = %id, error = %e, "Account event dropped"),
        }
    }

    pub fn on_dtmf_received(&self, id: CallId, digits: &str) {
        let notifier = self.current_notifier();
        let handled = self.calls.update(id, |call| {
            let accepted = call.record_received_dtmf(digits);
            if !accepted.is_empty() {
                notifier.notify(Notification::new(PhoneEvent::DtmfReceived {
                    call_id: id,
                    digits: accepted,
                }));
            }
        });

        if handled.is_none() {
            debug!(call = %id, "DTMF for unknown call dropped");
        }
    }

    pub fn on_sound_level(&self, level: u32) {
        self.meters.lock().sound = level;
        self.emit(PhoneEvent::SoundLevel { level });
    }

    pub fn on_micro_level(&self, level: u32) {
        self.meters.lock().micro = level;
        self.emit(PhoneEvent::MicroLevel { level });
    }

    pub fn on_text_message(&self, message: TextMessage) {
        debug!(from = %message.from, content_type = %message.content_type, "Text message received");
        self.emit(PhoneEvent::TextMessage { message });
    }

    // ---------------------------------------------------------------------
    // Helpers
    // ---------------------------------------------------------------------

    fn ensure_initialized(&self) -> Result<()> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(DomainError::NotInitialized)
        }
    }

    fn current_notifier(&self) -> Arc<dyn Notifier> {
        self.notifier.read().clone()
    }

    fn emit(&self, event: PhoneEvent) {
        self.current_notifier().notify(Notification::new(event));
    }

    /// Keep the error text of a failed command and turn the result into an option
    fn record<T>(&self, result: Result<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                match &e {
                    DomainError::NotInitialized => error!("Phone used before a successful init"),
                    _ => warn!(error = %e, "Command failed"),
                }
                *self.last_error.lock() = e.to_string();
                None
            }
        }
    }
}

fn log_stack_line(level: StackLogLevel, message: &str) {
    match level {
        StackLogLevel::Error => error!(target: "sipphone::stack", "{}", message),
        StackLogLevel::Warn => warn!(target: "sipphone::stack", "{}", message),
        StackLogLevel::Info => info!(target: "sipphone::stack", "{}", message),
        StackLogLevel::Debug => debug!(target: "sipphone::stack", "{}", message),
        StackLogLevel::Trace => trace!(target: "sipphone::stack", "{}", message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::stack::MockSignalingStack;
    use tokio::sync::mpsc;

    fn initialized_mock() -> MockSignalingStack {
        let mut stack = MockSignalingStack::new();
        stack.expect_init().times(1).returning(|_| Ok(()));
        stack.expect_set_sound_level().returning(|_| Ok(()));
        stack.expect_set_micro_level().returning(|_| Ok(()));
        stack
    }

    fn phone_with(stack: MockSignalingStack) -> (Phone, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let phone = Phone::new(Arc::new(stack)).with_notifier(Arc::new(tx));
        assert!(phone.init(PhoneSettings::default()));
        (phone, rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<Notification>) -> Vec<PhoneEvent> {
        let mut events = Vec::new();
        while let Ok(notification) = rx.try_recv() {
            events.push(notification.event);
        }
        events
    }

    fn alice() -> AccountConfig {
        AccountConfig::new("sip:alice@example.com", "sip:example.com", "alice").with_password("secret")
    }

    #[test]
    fn test_second_init_is_rejected() {
        let (phone, _rx) = phone_with(initialized_mock());

        assert!(!phone.init(PhoneSettings::default()));
        assert!(phone.error_message().contains("already initialized"));
        assert!(phone.is_initialized());
    }

    #[test]
    fn test_init_failure_is_reported() {
        let mut stack = MockSignalingStack::new();
        stack
            .expect_init()
            .returning(|_| Err(StackError::Transport("port 5060 in use".to_string())));
        let phone = Phone::new(Arc::new(stack));

        assert!(!phone.init(PhoneSettings::default()));
        assert!(!phone.is_initialized());
        assert!(phone.error_message().contains("port 5060 in use"));
    }

    #[test]
    fn test_commands_before_init_fail() {
        let mut stack = MockSignalingStack::new();
        stack.expect_make_call().never();
        let phone = Phone::new(Arc::new(stack));

        assert!(phone.make_call("sip:bob@example.com").is_none());
        assert_eq!(phone.error_message(), DomainError::NotInitialized.to_string());
        assert!(!phone.register_user(alice()));
    }

    #[test]
    fn test_make_call_creates_calling_leg() {
        let mut stack = initialized_mock();
        stack
            .expect_make_call()
            .times(1)
            .returning(|account, uri, _| {
                assert!(account.is_none());
                assert_eq!(uri.to_string(), "sip:bob@example.com");
                Ok(CallId::new(1))
            });
        let (phone, _rx) = phone_with(stack);

        let call = phone.make_call("sip:bob@example.com").unwrap();
        assert_eq!(call.id(), CallId::new(1));
        assert_eq!(call.state(), CallState::Calling);
        assert_eq!(phone.get_active_call_list().len(), 1);
    }

    #[test]
    fn test_rejected_call_leaves_no_trace() {
        let mut stack = initialized_mock();
        stack
            .expect_make_call()
            .returning(|_, _, _| Err(StackError::Rejected("not registered".to_string())));
        let (phone, _rx) = phone_with(stack);

        assert!(phone.make_call("sip:bob@example.com").is_none());
        assert!(phone.error_message().contains("not registered"));
        assert!(phone.get_active_call_list().is_empty());
    }

    #[test]
    fn test_malformed_address_never_reaches_stack() {
        let mut stack = initialized_mock();
        stack.expect_make_call().never();
        let (phone, _rx) = phone_with(stack);

        assert!(phone.make_call("bob at example").is_none());
        assert!(phone.error_message().starts_with("Call rejected"));
    }

    #[test]
    fn test_dtmf_rejected_on_ringing_call() {
        let mut stack = initialized_mock();
        stack.expect_send_dtmf().never();
        let (phone, _rx) = phone_with(stack);

        phone.on_incoming_call(CallId::new(7), "sip:alice@x".to_string(), None, HeaderMap::new());
        let before = phone.get_call(CallId::new(7)).unwrap();

        assert!(!phone.send_dtmf_digits(CallId::new(7), "123"));
        let after = phone.get_call(CallId::new(7)).unwrap();
        assert_eq!(after.state(), CallState::Incoming);
        assert_eq!(after.dtmf_sent(), before.dtmf_sent());
        assert!(phone.error_message().starts_with("Invalid operation"));
    }

    #[test]
    fn test_dtmf_rejected_after_disconnect() {
        let mut stack = initialized_mock();
        stack.expect_send_dtmf().never();
        let (phone, _rx) = phone_with(stack);

        phone.on_incoming_call(CallId::new(7), "sip:alice@x".to_string(), None, HeaderMap::new());
        phone.on_call_state(CallId::new(7), CallState::Disconnected, Some(487));

        assert!(!phone.send_dtmf_digits(CallId::new(7), "1"));
        assert!(phone.get_active_call_list().is_empty());
    }

    #[test]
    fn test_dtmf_on_confirmed_call() {
        let mut stack = initialized_mock();
        stack.expect_make_call().returning(|_, _, _| Ok(CallId::new(1)));
        stack
            .expect_send_dtmf()
            .withf(|call, digits| *call == CallId::new(1) && digits == "12#")
            .times(1)
            .returning(|_, _| Ok(()));
        let (phone, _rx) = phone_with(stack);

        phone.make_call("sip:ivr@example.com").unwrap();
        phone.on_call_state(CallId::new(1), CallState::Confirmed, Some(200));

        assert!(phone.send_dtmf_digits(CallId::new(1), "12#"));
        assert_eq!(phone.get_call(CallId::new(1)).unwrap().dtmf_sent(), "12#");
    }

    #[test]
    fn test_dtmf_stack_failure_keeps_call_unchanged() {
        let mut stack = initialized_mock();
        stack.expect_make_call().returning(|_, _, _| Ok(CallId::new(1)));
        stack
            .expect_send_dtmf()
            .returning(|_, _| Err(StackError::Transport("media down".to_string())));
        let (phone, _rx) = phone_with(stack);

        phone.make_call("sip:ivr@example.com").unwrap();
        phone.on_call_state(CallId::new(1), CallState::Confirmed, Some(200));

        assert!(!phone.send_dtmf_digits(CallId::new(1), "5"));
        assert_eq!(phone.get_call(CallId::new(1)).unwrap().dtmf_sent(), "");
    }

    #[test]
    fn test_register_in_flight_is_rejected() {
        let mut stack = initialized_mock();
        stack
            .expect_register()
            .times(1)
            .returning(|_| Ok(AccountId::new(0)));
        let (phone, mut rx) = phone_with(stack);

        assert!(phone.register_user(alice()));
        assert_eq!(phone.account_state(), RegistrationState::Registering);
        drain(&mut rx);

        assert!(!phone.register_user(alice()));
        assert_eq!(phone.account_state(), RegistrationState::Registering);
        assert!(phone.error_message().contains("already in progress"));
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_registration_outcome_events() {
        let mut stack = initialized_mock();
        stack.expect_register().returning(|_| Ok(AccountId::new(0)));
        let (phone, mut rx) = phone_with(stack);

        phone.register_user(alice());
        phone.on_account_state(AccountId::new(0), RegistrationState::Registered, Some(200), None);
        assert!(phone.check_account_status());

        let info = phone.get_account_info();
        assert_eq!(info["registered"], Value::Bool(true));
        assert!(!info.contains_key("password"));

        let events = drain(&mut rx);
        assert!(matches!(
            events.last(),
            Some(PhoneEvent::RegistrationState {
                state: RegistrationState::Registered,
                previous: RegistrationState::Registering,
                ..
            })
        ));
    }

    #[test]
    fn test_registration_failure_is_queryable() {
        let mut stack = initialized_mock();
        stack.expect_register().returning(|_| Ok(AccountId::new(0)));
        let (phone, _rx) = phone_with(stack);

        phone.register_user(alice());
        phone.on_account_state(AccountId::new(0), RegistrationState::Failed, Some(403), None);

        assert!(!phone.check_account_status());
        assert_eq!(phone.account_state(), RegistrationState::Failed);
        assert_eq!(
            phone.get_account_info()["error"],
            Value::String("Registration failed with status 403".to_string())
        );
    }

    #[test]
    fn test_immediate_register_rejection_moves_to_failed() {
        let mut stack = initialized_mock();
        stack
            .expect_register()
            .returning(|_| Err(StackError::Transport("no route".to_string())));
        let (phone, _rx) = phone_with(stack);

        assert!(!phone.register_user(alice()));
        assert_eq!(phone.account_state(), RegistrationState::Failed);
        assert!(phone.error_message().contains("no route"));
    }

    #[test]
    fn test_account_event_for_other_account_is_dropped() {
        let mut stack = initialized_mock();
        stack.expect_register().returning(|_| Ok(AccountId::new(0)));
        let (phone, mut rx) = phone_with(stack);

        phone.register_user(alice());
        drain(&mut rx);
        phone.on_account_state(AccountId::new(5), RegistrationState::Registered, Some(200), None);

        assert_eq!(phone.account_state(), RegistrationState::Registering);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_unknown_call_events_are_noops() {
        let (phone, mut rx) = phone_with(initialized_mock());
        phone.on_incoming_call(CallId::new(1), "sip:alice@x".to_string(), None, HeaderMap::new());
        drain(&mut rx);

        phone.on_call_state(CallId::new(99), CallState::Confirmed, Some(200));
        phone.on_call_state(CallId::new(99), CallState::Disconnected, Some(200));
        phone.on_dtmf_received(CallId::new(99), "5");

        assert_eq!(phone.get_active_call_list().len(), 1);
        assert!(phone.get_call(CallId::new(99)).is_none());
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_duplicate_terminal_event_is_ignored() {
        let (phone, mut rx) = phone_with(initialized_mock());
        phone.on_incoming_call(CallId::new(3), "sip:alice@x".to_string(), None, HeaderMap::new());
        phone.on_call_state(CallId::new(3), CallState::Disconnected, Some(486));
        phone.on_call_state(CallId::new(3), CallState::Disconnected, Some(486));

        let states: Vec<_> = drain(&mut rx)
            .into_iter()
            .filter(|e| matches!(e, PhoneEvent::CallState { .. }))
            .collect();
        assert_eq!(states.len(), 1);
    }

    #[test]
    fn test_hang_up_all_survives_stack_failures() {
        let mut stack = initialized_mock();
        stack
            .expect_hangup_call()
            .times(3)
            .returning(|id| Err(StackError::UnknownCall(id)));
        let (phone, mut rx) = phone_with(stack);

        for id in 1..=3 {
            phone.on_incoming_call(CallId::new(id), format!("sip:peer{id}@x"), None, HeaderMap::new());
        }
        drain(&mut rx);

        phone.hang_up_all();

        assert!(phone.get_active_call_list().is_empty());
        let disconnected = drain(&mut rx)
            .into_iter()
            .filter(|e| {
                matches!(e, PhoneEvent::CallState { call, .. } if call.state == CallState::Disconnected)
            })
            .count();
        assert_eq!(disconnected, 3);
    }

    #[test]
    fn test_hang_up_falls_back_to_local_reap() {
        let mut stack = initialized_mock();
        stack
            .expect_hangup_call()
            .returning(|_| Err(StackError::Transport("gone".to_string())));
        let (phone, _rx) = phone_with(stack);

        phone.on_incoming_call(CallId::new(2), "sip:alice@x".to_string(), None, HeaderMap::new());
        assert!(phone.hang_up(CallId::new(2)));
        assert!(phone.get_call(CallId::new(2)).is_none());
        assert!(!phone.hang_up(CallId::new(2)));
    }

    #[test]
    fn test_answer_only_ringing_inbound_calls() {
        let mut stack = initialized_mock();
        stack.expect_answer_call().times(1).returning(|_| Ok(()));
        let (phone, _rx) = phone_with(stack);

        phone.on_incoming_call(CallId::new(4), "sip:alice@x".to_string(), None, HeaderMap::new());
        assert!(phone.answer_call(CallId::new(4)));

        phone.on_call_state(CallId::new(4), CallState::Confirmed, Some(200));
        assert!(!phone.answer_call(CallId::new(4)));
    }

    #[test]
    fn test_unregister_hangs_up_first() {
        let mut stack = initialized_mock();
        let mut seq = mockall::Sequence::new();
        stack.expect_register().returning(|_| Ok(AccountId::new(0)));
        stack
            .expect_hangup_call()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        stack
            .expect_unregister()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        let (phone, _rx) = phone_with(stack);

        phone.register_user(alice());
        phone.on_account_state(AccountId::new(0), RegistrationState::Registered, Some(200), None);
        phone.on_incoming_call(CallId::new(1), "sip:bob@x".to_string(), None, HeaderMap::new());

        assert!(phone.unregister());
        assert!(phone.get_active_call_list().is_empty());
        assert_eq!(phone.account_state(), RegistrationState::Unregistered);
    }

    #[test]
    fn test_colliding_call_id_is_hung_up() {
        let mut stack = initialized_mock();
        stack.expect_make_call().returning(|_, _, _| Ok(CallId::new(7)));
        stack
            .expect_hangup_call()
            .withf(|call| *call == CallId::new(7))
            .times(1)
            .returning(|_| Ok(()));
        let (phone, _rx) = phone_with(stack);

        phone.on_incoming_call(CallId::new(7), "sip:alice@x".to_string(), None, HeaderMap::new());

        assert!(phone.make_call("sip:bob@example.com").is_none());
        assert!(phone.error_message().starts_with("Entity already exists"));
        let calls = phone.get_active_call_list();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].state, CallState::Incoming);
    }

    #[test]
    fn test_level_before_init_is_rejected() {
        let mut stack = MockSignalingStack::new();
        stack.expect_init().returning(|_| Ok(()));
        stack
            .expect_set_sound_level()
            .withf(|level| *level == 0.6)
            .times(1)
            .returning(|_| Ok(()));
        stack.expect_set_micro_level().returning(|_| Ok(()));
        let phone = Phone::new(Arc::new(stack));

        phone.set_sound_signal(0.3);
        assert_eq!(phone.error_message(), DomainError::NotInitialized.to_string());
        assert_eq!(phone.get_signal_levels().sound, 1.0);

        assert!(phone.init(PhoneSettings {
            sound_level: 0.6,
            ..PhoneSettings::default()
        }));
        assert_eq!(phone.get_signal_levels().sound, 0.6);
    }

    #[test]
    fn test_repeated_registered_report_is_quiet() {
        let mut stack = initialized_mock();
        stack.expect_register().returning(|_| Ok(AccountId::new(0)));
        let (phone, mut rx) = phone_with(stack);

        phone.register_user(alice());
        phone.on_account_state(AccountId::new(0), RegistrationState::Registered, Some(200), None);
        drain(&mut rx);

        phone.on_account_state(AccountId::new(0), RegistrationState::Registered, Some(200), None);

        assert!(phone.check_account_status());
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_levels_are_clamped() {
        let (phone, _rx) = phone_with(initialized_mock());

        phone.set_sound_signal(1.7);
        phone.set_micro_signal(-0.3);

        let levels = phone.get_signal_levels();
        assert_eq!(levels.sound, 1.0);
        assert_eq!(levels.micro, 0.0);
    }

    #[test]
    fn test_meter_events_update_last_levels() {
        let (phone, mut rx) = phone_with(initialized_mock());

        phone.handle_event(StackEvent::SoundLevel { level: 40 });
        phone.handle_event(StackEvent::MicroLevel { level: 12 });

        let meters = phone.last_meter_levels();
        assert_eq!((meters.sound, meters.micro), (40, 12));
        assert_eq!(drain(&mut rx).len(), 2);
    }

    #[test]
    fn test_text_message_is_forwarded() {
        let (phone, mut rx) = phone_with(initialized_mock());

        phone.handle_event(StackEvent::TextMessage {
            call_id: None,
            from: "sip:alice@x".to_string(),
            to: "sip:me@x".to_string(),
            contact: "<sip:alice@10.0.0.1>".to_string(),
            mime_type: "text/plain; charset=utf-8".to_string(),
            body: "hi".to_string(),
        });

        match drain(&mut rx).pop() {
            Some(PhoneEvent::TextMessage { message }) => {
                assert_eq!(message.content_type, MessageContentType::TextPlain);
                assert_eq!(message.body, "hi");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
}
