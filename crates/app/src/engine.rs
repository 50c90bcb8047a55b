//! Protocol engine — the session state machine without IO.
//!
//! The engine owns connection state, the [`CommandChannel`], both register
//! pollers and the set of armed timers. It is fed inputs (operations,
//! notifications, write outcomes, fired timers, link loss) and queues
//! [`Effect`]s that the caller drains with [`ProtocolEngine::poll_effect`]
//! and executes. Every input is handled to completion before the next one,
//! so there is no interleaving to reason about.
//!
//! At most one [`Effect::Write`] is outstanding. The next write is only
//! requested once the caller reported the previous outcome, so outcomes are
//! matched to the command (or `END`) they belong to even when the command
//! was abandoned while its write was still running.
//!
//! Once torn down the engine is inert: late inputs produce no writes, no
//! timers and no publications.

use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use serde::Serialize;

use motobridge_domain::control::ControlCommand;
use motobridge_domain::frame::{self, RegisterClass, ResponseFrame};
use motobridge_domain::notification::{self, Notification, Token, WifiStatus, WIFI_PLACEHOLDER};
use motobridge_domain::register::{IDENTIFICATION, RegisterId, TELEMETRY};
use motobridge_domain::telemetry::{EngineData, EngineInfo, GeoFix, Position, Topic};
use motobridge_domain::value::{CycleValues, SensorValue};

use crate::command_channel::{CommandChannel, Expectation, QueueFull, Submitted, Ticket, WriteStep};
use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::event_bus::{ConnectionState, MissReason, SessionEvent};
use crate::poller::{Advance, CycleMode, RegisterPoller, Resolution};
use crate::ports::{Publication, Sample, TransportError};

/// Ticket reserved for the caller waiting on authorization.
pub const CONNECT_TICKET: Ticket = Ticket(0);

/// Engine settings derived from [`SessionConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub telemetry_timeout: Duration,
    pub identification_timeout: Duration,
    pub control_timeout: Duration,
    pub end_grace: Duration,
    pub max_write_attempts: u8,
    pub topic_prefix: String,
}

impl From<&SessionConfig> for EngineConfig {
    fn from(config: &SessionConfig) -> Self {
        Self {
            telemetry_timeout: config.telemetry_timeout(),
            identification_timeout: config.identification_timeout(),
            control_timeout: config.control_timeout(),
            end_grace: config.end_grace(),
            max_write_attempts: config.max_write_attempts,
            topic_prefix: config.topic_prefix.clone(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from(&SessionConfig::default())
    }
}

/// Identifies a cancellable timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKey {
    /// Link ready to first `CNT`.
    Authorization,
    /// Response deadline of one register request.
    Register(RegisterClass, RegisterId),
    /// Response deadline of the pending Wi-Fi command.
    Control,
    /// Grace period for `END` delivery.
    EndGrace,
}

/// Successful outcome of an [`Operation`].
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Done,
    Wifi(WifiStatus),
    Info(EngineInfo),
}

/// Something a session user asked for.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    SendCommand(Vec<u8>),
    StartStreaming,
    StopStreaming,
    ReadIdentification,
    SetWifi { ssid: String, password: String },
    DisableWifi,
    SetRecording(bool),
    UpdatePosition(GeoFix),
    Disconnect,
}

/// IO the caller must perform on the engine's behalf.
#[derive(Debug)]
pub enum Effect {
    /// Write these bytes, then report with [`ProtocolEngine::on_write_result`].
    /// The caller keeps serving other inputs while the write runs.
    Write(Vec<u8>),
    /// Arm a timer, replacing any timer with the same key.
    ArmTimer(TimerKey, Duration),
    CancelTimer(TimerKey),
    Publish(Publication),
    Record(Sample),
    /// Answer the caller holding `Ticket`.
    Resolve(Ticket, Result<Reply, SessionError>),
    Emit(SessionEvent),
    /// Close the link. Always the last effect of a session.
    CloseLink,
}

/// What the outstanding write carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PendingWrite {
    Command(u64),
    End,
}

/// The sans-IO session state machine.
#[derive(Debug)]
pub struct ProtocolEngine {
    config: EngineConfig,
    state: ConnectionState,
    channel: CommandChannel,
    telemetry: RegisterPoller,
    identification: RegisterPoller,
    armed: HashSet<TimerKey>,
    effects: VecDeque<Effect>,
    device_id: String,
    vin: Option<String>,
    last_rpm: Option<f64>,
    recording: bool,
    connect_waiter: Option<Ticket>,
    info_waiters: Vec<Ticket>,
    disconnect_waiters: Vec<Ticket>,
    wifi_pending: bool,
    writing: Option<PendingWrite>,
    /// In-flight command whose bytes still have to be written.
    write_due: Option<u64>,
    end_due: bool,
    closed: bool,
}

impl ProtocolEngine {
    /// Create an engine for a link whose services are being discovered.
    ///
    /// `device_id` names the device in topics until the peripheral reports
    /// its own `ID`.
    #[must_use]
    pub fn new(config: EngineConfig, device_id: impl Into<String>) -> Self {
        let channel = CommandChannel::new(config.max_write_attempts);
        let telemetry = RegisterPoller::new(&TELEMETRY, config.telemetry_timeout, CycleMode::Repeat);
        let identification =
            RegisterPoller::new(&IDENTIFICATION, config.identification_timeout, CycleMode::Once);
        Self {
            config,
            state: ConnectionState::DiscoveringServices,
            channel,
            telemetry,
            identification,
            armed: HashSet::new(),
            effects: VecDeque::new(),
            device_id: device_id.into(),
            vin: None,
            last_rpm: None,
            recording: false,
            connect_waiter: None,
            info_waiters: Vec::new(),
            disconnect_waiters: Vec::new(),
            wifi_pending: false,
            writing: None,
            write_due: None,
            end_due: false,
            closed: false,
        }
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    #[must_use]
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    #[must_use]
    pub fn vin(&self) -> Option<&str> {
        self.vin.as_deref()
    }

    /// Whether the session has been torn down.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Timers the engine considers armed.
    pub fn armed_timers(&self) -> impl Iterator<Item = &TimerKey> {
        self.armed.iter()
    }

    /// Next effect to execute, in order.
    pub fn poll_effect(&mut self) -> Option<Effect> {
        self.effects.pop_front()
    }

    /// The link is subscribed. Writes the password, if any, and waits at
    /// most `budget` for the first counter token. [`CONNECT_TICKET`] is
    /// resolved on authorization or failure.
    pub fn on_link_ready(&mut self, password: Option<&str>, budget: Duration) {
        if self.closed {
            self.effects
                .push_back(Effect::Resolve(CONNECT_TICKET, Err(SessionError::Closed)));
            return;
        }
        self.connect_waiter = Some(CONNECT_TICKET);
        self.arm(TimerKey::Authorization, budget);
        if let Some(password) = password {
            tracing::debug!(device = %self.device_id, "sending password");
            self.submit(
                ControlCommand::Password(password.to_owned()).encode(),
                Expectation::Delivery,
                None,
            );
        }
    }

    /// Handle an operation requested by a session user.
    pub fn handle(&mut self, ticket: Ticket, operation: Operation) {
        if self.closed {
            self.resolve(ticket, Err(SessionError::Closed));
            return;
        }

        match operation {
            Operation::SendCommand(bytes) => {
                if self.require_authorized(ticket) {
                    self.submit(bytes, Expectation::Delivery, Some(ticket));
                }
            }
            Operation::StartStreaming => {
                if self.require_authorized(ticket) {
                    if let Some(id) = self.telemetry.start() {
                        tracing::info!(device = %self.device_id, "telemetry streaming started");
                        self.request(RegisterClass::Telemetry, id);
                    }
                    self.resolve(ticket, Ok(Reply::Done));
                }
            }
            Operation::StopStreaming => {
                if self.stop_poller(RegisterClass::Telemetry) {
                    tracing::info!(device = %self.device_id, "telemetry streaming stopped");
                }
                self.resolve(ticket, Ok(Reply::Done));
                self.pump();
            }
            Operation::ReadIdentification => {
                if self.require_authorized(ticket) {
                    self.info_waiters.push(ticket);
                    if let Some(id) = self.identification.start() {
                        self.request(RegisterClass::Identification, id);
                    }
                }
            }
            Operation::SetWifi { ssid, password } => {
                self.wifi(ticket, ControlCommand::WifiOn { ssid, password });
            }
            Operation::DisableWifi => self.wifi(ticket, ControlCommand::WifiOff),
            Operation::SetRecording(enabled) => {
                self.recording = enabled;
                tracing::info!(enabled, "recording toggled");
                self.resolve(ticket, Ok(Reply::Done));
            }
            Operation::UpdatePosition(fix) => {
                self.publish(Topic::Position, &Position::new(fix, self.last_rpm));
                self.resolve(ticket, Ok(Reply::Done));
            }
            Operation::Disconnect => self.disconnect(Some(ticket)),
        }
    }

    /// Begin an orderly disconnect. `ticket`, if any, resolves once the link
    /// is closed.
    pub fn disconnect(&mut self, ticket: Option<Ticket>) {
        if self.closed {
            if let Some(ticket) = ticket {
                self.resolve(ticket, Ok(Reply::Done));
            }
            return;
        }
        self.disconnect_waiters.extend(ticket);

        match self.state {
            ConnectionState::Disconnecting | ConnectionState::Disconnected => {}
            ConnectionState::Authorized => {
                tracing::info!(device = %self.device_id, "ending session");
                self.stop_poller(RegisterClass::Telemetry);
                self.stop_poller(RegisterClass::Identification);
                self.fail_pending(&SessionError::Closed);
                self.cancel(TimerKey::Control);
                self.set_state(ConnectionState::Disconnecting);
                self.end_due = true;
                self.flush_writes();
                self.arm(TimerKey::EndGrace, self.config.end_grace);
            }
            ConnectionState::Connecting | ConnectionState::DiscoveringServices => {
                self.teardown(None);
            }
        }
    }

    /// Handle one message from the notify characteristic.
    pub fn on_notification(&mut self, bytes: &[u8]) {
        if self.closed {
            return;
        }

        let notification = match notification::decode(bytes) {
            Ok(notification) => notification,
            Err(err) => {
                tracing::warn!(%err, len = bytes.len(), "dropping undecodable notification");
                return;
            }
        };

        match notification {
            Notification::Attribute { token, value } => {
                if token == Token::Id && !value.is_empty() && value != self.device_id {
                    tracing::info!(device = %value, "device id reported");
                    self.device_id.clone_from(&value);
                }
                self.emit(SessionEvent::Attribute { token, value });
            }
            Notification::Counter(value) => {
                self.emit(SessionEvent::Attribute {
                    token: Token::Counter,
                    value,
                });
                if self.state == ConnectionState::DiscoveringServices {
                    self.authorize();
                }
            }
            Notification::Wifi(status) => self.on_wifi_status(status),
            Notification::SessionExpired => {
                tracing::warn!(device = %self.device_id, "session expired by peripheral");
                self.emit(SessionEvent::Error(SessionError::SessionExpired));
                self.teardown(Some(SessionError::SessionExpired));
            }
            Notification::Frame(frame) => self.on_frame(&frame),
            Notification::Unrecognized(line) => {
                tracing::debug!(%line, "ignoring unrecognized line");
            }
        }
    }

    /// Report the outcome of the last [`Effect::Write`].
    pub fn on_write_result(&mut self, result: Result<(), TransportError>) {
        if self.closed {
            return;
        }
        if let Err(err) = &result {
            tracing::warn!(%err, "transport write failed");
        }

        match self.writing.take() {
            Some(PendingWrite::End) => self.teardown(None),
            Some(PendingWrite::Command(seq)) => {
                self.on_command_written(seq, result.is_ok());
                self.flush_writes();
            }
            None => tracing::debug!("write outcome without an outstanding write"),
        }
    }

    fn on_command_written(&mut self, seq: u64, delivered: bool) {
        match self.channel.on_write(seq, delivered) {
            WriteStep::AwaitingResponse => {}
            WriteStep::Stale => tracing::trace!(seq, "outcome of an abandoned command"),
            WriteStep::Completed(command) => {
                if let Some(ticket) = command.ticket {
                    self.resolve(ticket, Ok(Reply::Done));
                }
                self.pump();
            }
            WriteStep::Retry(bytes) => {
                tracing::debug!(seq, len = bytes.len(), "retrying write");
                self.write_due = Some(seq);
            }
            WriteStep::Failed(command) => {
                tracing::warn!(attempts = command.retries, "giving up on command");
                if let Some(ticket) = command.ticket {
                    self.resolve(ticket, Err(SessionError::WriteFailed));
                }
                if command.expect == Expectation::WifiStatus {
                    self.wifi_pending = false;
                    self.cancel(TimerKey::Control);
                }
                self.emit(SessionEvent::Error(SessionError::WriteFailed));
                self.pump();
            }
        }
    }

    /// Handle a fired timer. Timers that are no longer armed are ignored.
    pub fn on_timer(&mut self, key: TimerKey) {
        if self.closed || !self.armed.remove(&key) {
            return;
        }

        match key {
            TimerKey::Authorization => {
                if self.state == ConnectionState::DiscoveringServices {
                    tracing::warn!(device = %self.device_id, "no counter token before timeout");
                    self.teardown(Some(SessionError::ConnectionTimeout));
                }
            }
            TimerKey::Register(class, id) => {
                let Some(advance) = self.poller(class).on_timeout(id) else {
                    return;
                };
                self.channel.abandon(Expectation::Register { class, id });
                self.apply(class, advance);
                self.pump();
            }
            TimerKey::Control => {
                for command in self.channel.abandon(Expectation::WifiStatus) {
                    if let Some(ticket) = command.ticket {
                        self.resolve(ticket, Err(SessionError::ResponseTimeout));
                    }
                }
                self.wifi_pending = false;
                tracing::warn!("wifi command timed out");
                self.pump();
            }
            TimerKey::EndGrace => {
                tracing::debug!("END not confirmed within grace period");
                self.teardown(None);
            }
        }
    }

    /// The transport reported the link down.
    pub fn on_link_lost(&mut self) {
        if self.closed {
            return;
        }
        tracing::warn!(device = %self.device_id, state = ?self.state, "link lost");
        self.teardown(None);
    }

    fn on_frame(&mut self, frame: &ResponseFrame) {
        if self.state != ConnectionState::Authorized {
            tracing::debug!(class = %frame.class, id = %frame.id, "frame before authorization");
            return;
        }
        let class = frame.class;
        let Some(advance) = self.poller(class).on_response(frame) else {
            tracing::debug!(%class, id = %frame.id, "unsolicited response");
            return;
        };
        let id = advance.resolution.id();
        self.cancel(TimerKey::Register(class, id));
        self.channel.resolve(Expectation::Register { class, id });
        self.apply(class, advance);
        self.pump();
    }

    fn on_wifi_status(&mut self, status: WifiStatus) {
        let value = match &status {
            WifiStatus::Off => "OFF".to_owned(),
            WifiStatus::Configured(ssid) => ssid.clone(),
            WifiStatus::Unconfigured => WIFI_PLACEHOLDER.to_owned(),
        };
        self.emit(SessionEvent::Attribute {
            token: Token::Wifi,
            value,
        });

        if !status.is_resolved() {
            return;
        }
        if let Some(command) = self.channel.resolve(Expectation::WifiStatus) {
            self.cancel(TimerKey::Control);
            self.wifi_pending = false;
            if let Some(ticket) = command.ticket {
                self.resolve(ticket, Ok(Reply::Wifi(status)));
            }
            self.pump();
        }
    }

    fn wifi(&mut self, ticket: Ticket, command: ControlCommand) {
        if !self.require_authorized(ticket) {
            return;
        }
        if self.wifi_pending {
            self.resolve(ticket, Err(SessionError::Busy));
            return;
        }
        if self.submit(command.encode(), Expectation::WifiStatus, Some(ticket)) {
            self.wifi_pending = true;
            self.arm(TimerKey::Control, self.config.control_timeout);
        }
    }

    fn authorize(&mut self) {
        tracing::info!(device = %self.device_id, "session authorized");
        self.cancel(TimerKey::Authorization);
        self.set_state(ConnectionState::Authorized);
        if let Some(ticket) = self.connect_waiter.take() {
            self.resolve(ticket, Ok(Reply::Done));
        }
    }

    fn require_authorized(&mut self, ticket: Ticket) -> bool {
        if self.state == ConnectionState::Authorized {
            return true;
        }
        self.resolve(ticket, Err(SessionError::NotAuthorized));
        false
    }

    fn poller(&mut self, class: RegisterClass) -> &mut RegisterPoller {
        match class {
            RegisterClass::Telemetry => &mut self.telemetry,
            RegisterClass::Identification => &mut self.identification,
        }
    }

    /// Stop a poller and drop its outstanding request. Returns whether it
    /// was running.
    fn stop_poller(&mut self, class: RegisterClass) -> bool {
        let Some(id) = self.poller(class).stop() else {
            return false;
        };
        self.cancel(TimerKey::Register(class, id));
        self.channel.abandon(Expectation::Register { class, id });
        if class == RegisterClass::Identification {
            for ticket in std::mem::take(&mut self.info_waiters) {
                self.resolve(ticket, Err(SessionError::Closed));
            }
        }
        true
    }

    fn request(&mut self, class: RegisterClass, id: RegisterId) {
        let timeout = self.poller(class).timeout();
        tracing::trace!(%class, %id, "requesting register");
        self.arm(TimerKey::Register(class, id), timeout);
        self.submit(frame::request(class, id).to_vec(), Expectation::Register { class, id }, None);
    }

    /// Hand a command to the channel. Returns `false` when it was refused.
    fn submit(&mut self, bytes: Vec<u8>, expect: Expectation, ticket: Option<Ticket>) -> bool {
        match self.channel.send(bytes, expect, ticket) {
            Ok(Submitted::Write(_)) => {
                self.schedule_write();
                true
            }
            Ok(Submitted::Queued) => true,
            Err(QueueFull) => {
                tracing::warn!(queued = self.channel.queued(), "command queue full");
                if let Some(ticket) = ticket {
                    self.resolve(ticket, Err(SessionError::Busy));
                }
                false
            }
        }
    }

    fn pump(&mut self) {
        if self.channel.next().is_some() {
            self.schedule_write();
        }
    }

    /// The in-flight command was just promoted: write it when the link is free.
    fn schedule_write(&mut self) {
        self.write_due = self.channel.in_flight().map(|command| command.seq);
        self.flush_writes();
    }

    /// Request the next write unless one is still outstanding. `END` goes
    /// before any command.
    fn flush_writes(&mut self) {
        if self.writing.is_some() {
            return;
        }
        if self.end_due {
            self.end_due = false;
            self.writing = Some(PendingWrite::End);
            self.effects.push_back(Effect::Write(ControlCommand::End.encode()));
            return;
        }
        let Some(seq) = self.write_due.take() else {
            return;
        };
        if let Some(command) = self.channel.in_flight().filter(|command| command.seq == seq) {
            self.writing = Some(PendingWrite::Command(seq));
            self.effects.push_back(Effect::Write(command.bytes.clone()));
        }
    }

    fn apply(&mut self, class: RegisterClass, advance: Advance) {
        let Advance {
            resolution,
            completed,
            next,
        } = advance;

        match resolution {
            Resolution::Decoded(value) => self.on_sample(value),
            Resolution::Malformed(id, err) => {
                tracing::warn!(%class, %id, %err, "malformed register response");
                self.emit(SessionEvent::Missed {
                    class,
                    id,
                    reason: MissReason::Malformed(err),
                });
            }
            Resolution::TimedOut(id) => {
                tracing::debug!(%class, %id, "register timed out");
                self.emit(SessionEvent::Missed {
                    class,
                    id,
                    reason: MissReason::Timeout,
                });
            }
        }

        if let Some(values) = completed {
            self.complete_cycle(&values);
        }
        if let Some(id) = next {
            self.request(class, id);
        }
    }

    fn on_sample(&mut self, value: SensorValue) {
        if value.class == RegisterClass::Telemetry {
            if TELEMETRY.get(value.id).is_some_and(|spec| spec.field == "rpm") {
                self.last_rpm = value.value.as_number();
            }
            if self.recording {
                self.effects.push_back(Effect::Record(Sample {
                    timestamp: value.timestamp,
                    label: value.label,
                    value: value.value.clone(),
                }));
            }
        }
        self.emit(SessionEvent::Sample(value));
    }

    fn complete_cycle(&mut self, values: &CycleValues) {
        let class = values.class();
        tracing::debug!(%class, answered = values.len(), "poll cycle complete");
        match class {
            RegisterClass::Telemetry => {
                let body = EngineData::from_cycle(values, self.vin.as_deref());
                self.publish(Topic::EngineData, &body);
            }
            RegisterClass::Identification => {
                let info = EngineInfo::from_cycle(values);
                if !info.vin.is_empty() {
                    self.vin = Some(info.vin.clone());
                }
                self.publish(Topic::EngineInfo, &info);
                for ticket in std::mem::take(&mut self.info_waiters) {
                    self.resolve(ticket, Ok(Reply::Info(info.clone())));
                }
            }
        }
        self.emit(SessionEvent::CycleComplete(class));
    }

    fn publish<T: Serialize>(&mut self, topic: Topic, body: &T) {
        match serde_json::to_value(body) {
            Ok(payload) => self.effects.push_back(Effect::Publish(Publication {
                topic: topic.path(&self.config.topic_prefix, &self.device_id),
                payload,
            })),
            Err(err) => tracing::warn!(%err, topic = topic.suffix(), "failed to serialize body"),
        }
    }

    /// Fail every command waiting in the channel.
    fn fail_pending(&mut self, reason: &SessionError) {
        for command in self.channel.clear() {
            if let Some(ticket) = command.ticket {
                self.resolve(ticket, Err(reason.clone()));
            }
        }
        self.wifi_pending = false;
    }

    fn teardown(&mut self, reason: Option<SessionError>) {
        if self.closed {
            return;
        }
        let failure = reason.unwrap_or(SessionError::Closed);

        self.stop_poller(RegisterClass::Telemetry);
        self.stop_poller(RegisterClass::Identification);
        self.fail_pending(&failure);
        for key in std::mem::take(&mut self.armed) {
            self.effects.push_back(Effect::CancelTimer(key));
        }
        self.writing = None;
        self.write_due = None;
        self.end_due = false;
        self.set_state(ConnectionState::Disconnected);
        self.closed = true;

        if let Some(ticket) = self.connect_waiter.take() {
            self.resolve(ticket, Err(failure));
        }
        for ticket in std::mem::take(&mut self.disconnect_waiters) {
            self.resolve(ticket, Ok(Reply::Done));
        }
        tracing::info!(device = %self.device_id, "session closed");
        self.effects.push_back(Effect::CloseLink);
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            self.state = state;
            self.emit(SessionEvent::StateChanged(state));
        }
    }

    fn arm(&mut self, key: TimerKey, after: Duration) {
        self.armed.insert(key);
        self.effects.push_back(Effect::ArmTimer(key, after));
    }

    fn cancel(&mut self, key: TimerKey) {
        if self.armed.remove(&key) {
            self.effects.push_back(Effect::CancelTimer(key));
        }
    }

    fn resolve(&mut self, ticket: Ticket, result: Result<Reply, SessionError>) {
        self.effects.push_back(Effect::Resolve(ticket, result));
    }

    fn emit(&mut self, event: SessionEvent) {
        self.effects.push_back(Effect::Emit(event));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(engine: &mut ProtocolEngine) -> Vec<Effect> {
        std::iter::from_fn(|| engine.poll_effect()).collect()
    }

    fn writes(effects: &[Effect]) -> Vec<Vec<u8>> {
        effects
            .iter()
            .filter_map(|effect| match effect {
                Effect::Write(bytes) => Some(bytes.clone()),
                _ => None,
            })
            .collect()
    }

    fn resolution(effects: &[Effect], ticket: Ticket) -> Option<&Result<Reply, SessionError>> {
        effects.iter().find_map(|effect| match effect {
            Effect::Resolve(t, result) if *t == ticket => Some(result),
            _ => None,
        })
    }

    fn publications(effects: &[Effect]) -> Vec<&Publication> {
        effects
            .iter()
            .filter_map(|effect| match effect {
                Effect::Publish(publication) => Some(publication),
                _ => None,
            })
            .collect()
    }

    fn response(class: RegisterClass, id: u16, payload: &[u8]) -> Vec<u8> {
        let len = u8::try_from(payload.len() + 2).unwrap();
        let [hi, lo] = id.to_be_bytes();
        let mut bytes = vec![0xB0, class.code(), 0x00, len, hi, lo];
        bytes.extend_from_slice(payload);
        bytes
    }

    fn authorized() -> ProtocolEngine {
        let mut engine = ProtocolEngine::new(EngineConfig::default(), "AA:BB:CC:DD:EE:FF");
        engine.on_link_ready(None, Duration::from_secs(10));
        engine.on_notification(b"CNT=1");
        drain(&mut engine);
        engine
    }

    fn streaming() -> ProtocolEngine {
        let mut engine = authorized();
        engine.handle(Ticket(1), Operation::StartStreaming);
        drain(&mut engine);
        engine.on_write_result(Ok(()));
        drain(&mut engine);
        engine
    }

    #[test]
    fn should_authorize_on_first_counter_token() {
        let mut engine = ProtocolEngine::new(EngineConfig::default(), "dev");
        engine.on_link_ready(Some("1234"), Duration::from_secs(10));
        let effects = drain(&mut engine);
        assert_eq!(writes(&effects), vec![b"PWD=1234".to_vec()]);
        assert!(effects
            .iter()
            .any(|effect| matches!(effect, Effect::ArmTimer(TimerKey::Authorization, _))));

        engine.on_write_result(Ok(()));
        engine.on_notification(b"CNT=7\r\n");
        let effects = drain(&mut engine);
        assert_eq!(engine.state(), ConnectionState::Authorized);
        assert!(matches!(resolution(&effects, CONNECT_TICKET), Some(Ok(Reply::Done))));
        assert!(effects
            .iter()
            .any(|effect| matches!(effect, Effect::CancelTimer(TimerKey::Authorization))));
        assert!(effects.iter().any(|effect| matches!(
            effect,
            Effect::Emit(SessionEvent::StateChanged(ConnectionState::Authorized))
        )));
    }

    #[test]
    fn should_reject_commands_before_authorization_without_writing() {
        let mut engine = ProtocolEngine::new(EngineConfig::default(), "dev");
        engine.on_link_ready(None, Duration::from_secs(10));
        drain(&mut engine);

        engine.handle(Ticket(1), Operation::SendCommand(b"X".to_vec()));
        engine.handle(Ticket(2), Operation::StartStreaming);
        let effects = drain(&mut engine);
        assert!(writes(&effects).is_empty());
        assert!(matches!(
            resolution(&effects, Ticket(1)),
            Some(Err(SessionError::NotAuthorized))
        ));
        assert!(matches!(
            resolution(&effects, Ticket(2)),
            Some(Err(SessionError::NotAuthorized))
        ));
    }

    #[test]
    fn should_time_out_without_counter_token() {
        let mut engine = ProtocolEngine::new(EngineConfig::default(), "dev");
        engine.on_link_ready(None, Duration::from_secs(10));
        drain(&mut engine);

        engine.on_timer(TimerKey::Authorization);
        let effects = drain(&mut engine);
        assert!(matches!(
            resolution(&effects, CONNECT_TICKET),
            Some(Err(SessionError::ConnectionTimeout))
        ));
        assert!(matches!(effects.last(), Some(Effect::CloseLink)));
        assert_eq!(engine.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn should_decode_response_and_request_next_register() {
        let mut engine = authorized();
        engine.handle(Ticket(1), Operation::StartStreaming);
        let effects = drain(&mut engine);
        assert_eq!(writes(&effects), vec![vec![0x22, 0x01, 0x02, 0x00, 0x01]]);
        engine.on_write_result(Ok(()));

        engine.on_notification(&response(RegisterClass::Telemetry, 0x01, &[0x00, 0x64]));
        let effects = drain(&mut engine);
        let sample = effects
            .iter()
            .find_map(|effect| match effect {
                Effect::Emit(SessionEvent::Sample(value)) => Some(value),
                _ => None,
            })
            .unwrap();
        assert_eq!(sample.value.as_number(), Some(100.0));
        assert_eq!(writes(&effects), vec![vec![0x22, 0x01, 0x02, 0x00, 0x02]]);
        assert!(effects.iter().any(|effect| matches!(
            effect,
            Effect::CancelTimer(TimerKey::Register(RegisterClass::Telemetry, id)) if id.get() == 0x01
        )));
    }

    #[test]
    fn should_advance_on_register_timeout() {
        let mut engine = streaming();
        engine.on_timer(TimerKey::Register(RegisterClass::Telemetry, RegisterId::new(0x01)));
        let effects = drain(&mut engine);
        assert_eq!(writes(&effects), vec![vec![0x22, 0x01, 0x02, 0x00, 0x02]]);
        assert!(effects.iter().any(|effect| matches!(
            effect,
            Effect::Emit(SessionEvent::Missed {
                reason: MissReason::Timeout,
                ..
            })
        )));
    }

    #[test]
    fn should_publish_enginedata_with_nulls_after_cycle() {
        let mut engine = streaming();
        let mut published = Vec::new();
        for id in 0x01..=0x08u16 {
            if id == 0x01 {
                engine.on_notification(&response(RegisterClass::Telemetry, id, &[0x0B, 0xB8]));
            } else {
                engine.on_timer(TimerKey::Register(RegisterClass::Telemetry, RegisterId::new(id)));
            }
            let effects = drain(&mut engine);
            published.extend(publications(&effects).into_iter().cloned());
            engine.on_write_result(Ok(()));
        }

        assert_eq!(published.len(), 1);
        assert_eq!(published[0].topic, "Beta/AA:BB:CC:DD:EE:FF/enginedata");
        assert_eq!(published[0].payload["rpm"], serde_json::json!(3000.0));
        assert!(published[0].payload["batteryVoltage"].is_null());
        assert!(published[0].payload["vin"].is_null());
    }

    #[test]
    fn should_read_identification_and_cache_vin() {
        let mut engine = authorized();
        engine.handle(Ticket(5), Operation::ReadIdentification);
        drain(&mut engine);
        engine.on_write_result(Ok(()));

        let mut effects = Vec::new();
        for id in 0x90..=0x95u16 {
            if id == 0x90 {
                engine.on_notification(&response(
                    RegisterClass::Identification,
                    id,
                    b"ZDM1234567890ABCD",
                ));
            } else {
                engine.on_timer(TimerKey::Register(RegisterClass::Identification, RegisterId::new(id)));
            }
            effects.extend(drain(&mut engine));
            engine.on_write_result(Ok(()));
        }

        let Some(Ok(Reply::Info(info))) = resolution(&effects, Ticket(5)) else {
            panic!("identification should resolve with engine info");
        };
        assert_eq!(info.vin, "ZDM1234567890ABCD");
        assert_eq!(info.ecu_hw, "");
        assert_eq!(engine.vin(), Some("ZDM1234567890ABCD"));
        let published = publications(&effects);
        assert_eq!(published[0].topic, "Beta/AA:BB:CC:DD:EE:FF/engineinfo");
    }

    #[test]
    fn should_use_reported_device_id_in_topics() {
        let mut engine = authorized();
        engine.on_notification(b"ID=bridge-42");
        engine.handle(
            Ticket(3),
            Operation::UpdatePosition(GeoFix {
                latitude: 45.0,
                longitude: 9.0,
                speed: Some(30.0),
                altitude: None,
            }),
        );
        let effects = drain(&mut engine);
        let published = publications(&effects);
        assert_eq!(published[0].topic, "Beta/bridge-42/position");
        assert!(published[0].payload["rpm"].is_null());
    }

    #[test]
    fn should_record_samples_only_while_recording() {
        let mut engine = streaming();
        engine.on_notification(&response(RegisterClass::Telemetry, 0x01, &[0x00, 0x64]));
        let effects = drain(&mut engine);
        assert!(!effects.iter().any(|effect| matches!(effect, Effect::Record(_))));
        engine.on_write_result(Ok(()));

        engine.handle(Ticket(9), Operation::SetRecording(true));
        engine.on_notification(&response(RegisterClass::Telemetry, 0x02, &[0x10]));
        let effects = drain(&mut engine);
        let sample = effects
            .iter()
            .find_map(|effect| match effect {
                Effect::Record(sample) => Some(sample),
                _ => None,
            })
            .unwrap();
        assert_eq!(sample.value.as_number(), Some(2.0));
    }

    #[test]
    fn should_resolve_wifi_command_on_status_token() {
        let mut engine = authorized();
        engine.handle(
            Ticket(4),
            Operation::SetWifi {
                ssid: "garage".into(),
                password: "secret".into(),
            },
        );
        let effects = drain(&mut engine);
        assert_eq!(writes(&effects), vec![b"WiFi=garage,secret".to_vec()]);
        engine.on_write_result(Ok(()));

        engine.on_notification(b"WIFI=-");
        assert!(resolution(&drain(&mut engine), Ticket(4)).is_none());

        engine.on_notification(b"WIFI=garage");
        let effects = drain(&mut engine);
        assert!(matches!(
            resolution(&effects, Ticket(4)),
            Some(Ok(Reply::Wifi(WifiStatus::Configured(ssid)))) if ssid == "garage"
        ));
        assert!(effects
            .iter()
            .any(|effect| matches!(effect, Effect::CancelTimer(TimerKey::Control))));
    }

    #[test]
    fn should_fail_wifi_command_with_response_timeout() {
        let mut engine = authorized();
        engine.handle(Ticket(4), Operation::DisableWifi);
        drain(&mut engine);
        engine.on_write_result(Ok(()));

        engine.on_timer(TimerKey::Control);
        let effects = drain(&mut engine);
        assert!(matches!(
            resolution(&effects, Ticket(4)),
            Some(Err(SessionError::ResponseTimeout))
        ));
    }

    #[test]
    fn should_report_write_failed_after_three_attempts() {
        let mut engine = authorized();
        engine.handle(Ticket(2), Operation::SendCommand(b"PING".to_vec()));
        let mut attempts = writes(&drain(&mut engine)).len();
        let mut effects = Vec::new();
        for _ in 0..3 {
            engine.on_write_result(Err(TransportError::NotConnected));
            effects = drain(&mut engine);
            attempts += writes(&effects).len();
        }
        assert_eq!(attempts, 3);
        assert!(matches!(
            resolution(&effects, Ticket(2)),
            Some(Err(SessionError::WriteFailed))
        ));
    }

    #[test]
    fn should_write_end_and_close_after_delivery() {
        let mut engine = streaming();
        engine.handle(Ticket(8), Operation::Disconnect);
        let effects = drain(&mut engine);
        assert_eq!(writes(&effects), vec![b"END".to_vec()]);
        assert_eq!(engine.state(), ConnectionState::Disconnecting);

        engine.on_write_result(Ok(()));
        let effects = drain(&mut engine);
        assert!(matches!(resolution(&effects, Ticket(8)), Some(Ok(Reply::Done))));
        assert!(matches!(effects.last(), Some(Effect::CloseLink)));
        assert!(engine.armed_timers().next().is_none());
    }

    #[test]
    fn should_close_after_grace_when_end_is_not_confirmed() {
        let mut engine = streaming();
        engine.handle(Ticket(8), Operation::Disconnect);
        drain(&mut engine);
        engine.on_timer(TimerKey::EndGrace);
        let effects = drain(&mut engine);
        assert!(matches!(effects.last(), Some(Effect::CloseLink)));
        assert!(engine.is_closed());
    }

    #[test]
    fn should_hold_next_write_until_outstanding_write_completes() {
        let mut engine = authorized();
        engine.handle(Ticket(1), Operation::StartStreaming);
        assert_eq!(writes(&drain(&mut engine)), vec![vec![0x22, 0x01, 0x02, 0x00, 0x01]]);

        // the request times out while its write is still running
        engine.on_timer(TimerKey::Register(RegisterClass::Telemetry, RegisterId::new(0x01)));
        assert!(writes(&drain(&mut engine)).is_empty());

        // the late failure belongs to the abandoned request and is not retried
        engine.on_write_result(Err(TransportError::WriteTimeout));
        let effects = drain(&mut engine);
        assert_eq!(writes(&effects), vec![vec![0x22, 0x01, 0x02, 0x00, 0x02]]);
        assert!(!effects
            .iter()
            .any(|effect| matches!(effect, Effect::Emit(SessionEvent::Error(_)))));
    }

    #[test]
    fn should_write_end_once_outstanding_write_completes() {
        let mut engine = authorized();
        engine.handle(Ticket(1), Operation::StartStreaming);
        drain(&mut engine);

        engine.handle(Ticket(8), Operation::Disconnect);
        let effects = drain(&mut engine);
        assert!(writes(&effects).is_empty());
        assert!(effects
            .iter()
            .any(|effect| matches!(effect, Effect::ArmTimer(TimerKey::EndGrace, _))));

        engine.on_write_result(Ok(()));
        assert_eq!(writes(&drain(&mut engine)), vec![b"END".to_vec()]);
        engine.on_write_result(Ok(()));
        let effects = drain(&mut engine);
        assert!(matches!(resolution(&effects, Ticket(8)), Some(Ok(Reply::Done))));
        assert!(matches!(effects.last(), Some(Effect::CloseLink)));
    }

    #[test]
    fn should_stay_silent_after_teardown() {
        let mut engine = streaming();
        engine.handle(Ticket(4), Operation::DisableWifi);
        engine.on_link_lost();
        let effects = drain(&mut engine);
        assert!(matches!(resolution(&effects, Ticket(4)), Some(Err(SessionError::Closed))));

        engine.on_timer(TimerKey::Register(RegisterClass::Telemetry, RegisterId::new(0x01)));
        engine.on_notification(&response(RegisterClass::Telemetry, 0x01, &[0x00, 0x64]));
        engine.on_write_result(Ok(()));
        engine.handle(Ticket(6), Operation::StartStreaming);
        let effects = drain(&mut engine);
        assert_eq!(effects.len(), 1);
        assert!(matches!(resolution(&effects, Ticket(6)), Some(Err(SessionError::Closed))));
    }

    #[test]
    fn should_tear_down_immediately_on_session_expired() {
        let mut engine = streaming();
        engine.on_notification(b"SESSION EXPIRED");
        let effects = drain(&mut engine);
        assert!(writes(&effects).is_empty());
        assert!(effects
            .iter()
            .any(|effect| matches!(effect, Effect::Emit(SessionEvent::Error(SessionError::SessionExpired)))));
        assert!(matches!(effects.last(), Some(Effect::CloseLink)));
    }

    #[test]
    fn should_queue_commands_behind_register_request() {
        let mut engine = streaming();
        engine.handle(Ticket(2), Operation::SendCommand(b"PING".to_vec()));
        assert!(writes(&drain(&mut engine)).is_empty());

        engine.on_notification(&response(RegisterClass::Telemetry, 0x01, &[0x00, 0x64]));
        let effects = drain(&mut engine);
        // the queued command goes first, the next register waits behind it
        assert_eq!(writes(&effects), vec![b"PING".to_vec()]);
        engine.on_write_result(Ok(()));
        let effects = drain(&mut engine);
        assert!(matches!(resolution(&effects, Ticket(2)), Some(Ok(Reply::Done))));
        assert_eq!(writes(&effects), vec![vec![0x22, 0x01, 0x02, 0x00, 0x02]]);
    }
}
