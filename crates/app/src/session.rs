//! Session event loop and the handle callers hold.
//!
//! One task per connected peripheral runs [`SessionLoop::run`]. It waits on
//! caller requests, link events, fired timers and the outcome of the current
//! write, feeds each input to the [`ProtocolEngine`], then executes the
//! queued effects before waiting again. All state mutation happens on this
//! task.
//!
//! Nothing the loop executes may block it: writes run on their own task
//! under a timeout, and publications and samples are handed to a forwarding
//! task through a bounded queue that drops when full.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use motobridge_domain::notification::WifiStatus;
use motobridge_domain::telemetry::{EngineInfo, GeoFix};

use crate::command_channel::Ticket;
use crate::engine::{CONNECT_TICKET, Effect, Operation, ProtocolEngine, Reply};
use crate::error::SessionError;
use crate::event_bus::{ConnectionState, SessionEvent, SessionEventBus};
use crate::ports::{
    Link, LinkEvent, Publication, Sample, SampleRecorder, TelemetryPublisher, TransportError,
};
use crate::timer::{Fired, Timers};

const REQUEST_BUFFER: usize = 32;
const SINK_BUFFER: usize = 64;

type Responder = oneshot::Sender<Result<Reply, SessionError>>;

#[derive(Debug)]
struct Request {
    operation: Operation,
    reply: Responder,
}

/// Handle to a running session.
///
/// Cheap to clone. Every method is answered by the session task; once the
/// session is closed they fail with [`SessionError::Closed`].
#[derive(Debug, Clone)]
pub struct SessionHandle {
    requests: mpsc::Sender<Request>,
    state: watch::Receiver<ConnectionState>,
    bus: SessionEventBus,
}

impl SessionHandle {
    /// Write an arbitrary frame through the command channel.
    ///
    /// # Errors
    ///
    /// [`SessionError::NotAuthorized`] before authorization,
    /// [`SessionError::WriteFailed`] after the last retry and
    /// [`SessionError::Busy`] when the queue is full.
    pub async fn send_command(&self, bytes: Vec<u8>) -> Result<(), SessionError> {
        self.call(Operation::SendCommand(bytes)).await.map(drop)
    }

    /// Start the repeating telemetry cycle.
    ///
    /// # Errors
    ///
    /// [`SessionError::NotAuthorized`] before authorization.
    pub async fn start_streaming(&self) -> Result<(), SessionError> {
        self.call(Operation::StartStreaming).await.map(drop)
    }

    /// Stop the telemetry cycle. Stopping an idle cycle succeeds.
    ///
    /// # Errors
    ///
    /// [`SessionError::Closed`] if the session is gone.
    pub async fn stop_streaming(&self) -> Result<(), SessionError> {
        self.call(Operation::StopStreaming).await.map(drop)
    }

    /// Run one identification cycle and return its values.
    ///
    /// # Errors
    ///
    /// [`SessionError::NotAuthorized`] before authorization,
    /// [`SessionError::Closed`] if the session ends mid-cycle.
    pub async fn read_identification(&self) -> Result<EngineInfo, SessionError> {
        match self.call(Operation::ReadIdentification).await? {
            Reply::Info(info) => Ok(info),
            other => Err(unexpected(&other)),
        }
    }

    /// Configure the bridge's Wi-Fi and wait for it to report the network.
    ///
    /// # Errors
    ///
    /// [`SessionError::ResponseTimeout`] if no status arrives in time,
    /// [`SessionError::Busy`] while another Wi-Fi command is pending.
    pub async fn set_wifi(&self, ssid: &str, password: &str) -> Result<WifiStatus, SessionError> {
        let operation = Operation::SetWifi {
            ssid: ssid.to_owned(),
            password: password.to_owned(),
        };
        match self.call(operation).await? {
            Reply::Wifi(status) => Ok(status),
            other => Err(unexpected(&other)),
        }
    }

    /// Switch the bridge's Wi-Fi off.
    ///
    /// # Errors
    ///
    /// Same as [`set_wifi`](Self::set_wifi).
    pub async fn disable_wifi(&self) -> Result<WifiStatus, SessionError> {
        match self.call(Operation::DisableWifi).await? {
            Reply::Wifi(status) => Ok(status),
            other => Err(unexpected(&other)),
        }
    }

    /// Toggle the recording sink.
    ///
    /// # Errors
    ///
    /// [`SessionError::Closed`] if the session is gone.
    pub async fn set_recording(&self, enabled: bool) -> Result<(), SessionError> {
        self.call(Operation::SetRecording(enabled)).await.map(drop)
    }

    /// Publish a position fix together with the latest engine speed.
    ///
    /// # Errors
    ///
    /// [`SessionError::Closed`] if the session is gone.
    pub async fn update_position(&self, fix: GeoFix) -> Result<(), SessionError> {
        self.call(Operation::UpdatePosition(fix)).await.map(drop)
    }

    /// End the session. Resolves once `END` was delivered or its grace
    /// period elapsed; succeeds if the session is already closed.
    ///
    /// # Errors
    ///
    /// Never fails in practice; the signature matches the other operations.
    pub async fn disconnect(&self) -> Result<(), SessionError> {
        match self.call(Operation::Disconnect).await {
            Ok(_) | Err(SessionError::Closed) => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Subscribe to session events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.bus.subscribe()
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Wait until the session is closed.
    pub async fn closed(&self) {
        let mut state = self.state.clone();
        let _ = state
            .wait_for(|state| *state == ConnectionState::Disconnected)
            .await;
    }

    async fn call(&self, operation: Operation) -> Result<Reply, SessionError> {
        let (reply, receiver) = oneshot::channel();
        self.requests
            .send(Request { operation, reply })
            .await
            .map_err(|_| SessionError::Closed)?;
        receiver.await.unwrap_or(Err(SessionError::Closed))
    }
}

fn unexpected(reply: &Reply) -> SessionError {
    tracing::error!(?reply, "session answered with unexpected reply");
    SessionError::Closed
}

/// What a session needs to authorize and talk to the peripheral.
#[derive(Debug)]
pub(crate) struct Startup {
    pub password: Option<String>,
    /// Time left of the connection budget for authorization.
    pub budget: Duration,
    pub write_timeout: Duration,
}

#[derive(Debug)]
enum SinkItem {
    Publish(Publication),
    Record(Sample),
}

type WriteTask = JoinHandle<Result<(), TransportError>>;

/// Event loop of one session.
pub(crate) struct SessionLoop<L> {
    engine: ProtocolEngine,
    link: Arc<L>,
    link_events: mpsc::Receiver<LinkEvent>,
    requests: mpsc::Receiver<Request>,
    requests_open: bool,
    timers: Timers,
    fired: mpsc::UnboundedReceiver<Fired>,
    writes: VecDeque<Vec<u8>>,
    writing: Option<WriteTask>,
    write_timeout: Duration,
    sinks: mpsc::Sender<SinkItem>,
    bus: SessionEventBus,
    state: watch::Sender<ConnectionState>,
    pending: HashMap<Ticket, Responder>,
    next_ticket: u64,
    closed: bool,
}

/// Start a session on an open, subscribed link.
///
/// Returns the handle and a receiver that resolves once the peripheral
/// authorized the session, or with the reason it did not.
pub(crate) fn spawn<L, P, R>(
    mut engine: ProtocolEngine,
    link: L,
    link_events: mpsc::Receiver<LinkEvent>,
    sinks: (P, R),
    bus: SessionEventBus,
    startup: Startup,
) -> (SessionHandle, oneshot::Receiver<Result<Reply, SessionError>>)
where
    L: Link + 'static,
    P: TelemetryPublisher + 'static,
    R: SampleRecorder + 'static,
{
    let (request_tx, requests) = mpsc::channel(REQUEST_BUFFER);
    let (state_tx, state_rx) = watch::channel(engine.state());
    let (timers, fired) = Timers::new();
    let (authorized_tx, authorized_rx) = oneshot::channel();
    let (sink_tx, sink_rx) = mpsc::channel(SINK_BUFFER);

    let Startup {
        password,
        budget,
        write_timeout,
    } = startup;
    engine.on_link_ready(password.as_deref(), budget);

    let (publisher, recorder) = sinks;
    tokio::spawn(forward_sinks(sink_rx, publisher, recorder));

    let session = SessionLoop {
        engine,
        link: Arc::new(link),
        link_events,
        requests,
        requests_open: true,
        timers,
        fired,
        writes: VecDeque::new(),
        writing: None,
        write_timeout,
        sinks: sink_tx,
        bus: bus.clone(),
        state: state_tx,
        pending: HashMap::from([(CONNECT_TICKET, authorized_tx)]),
        next_ticket: CONNECT_TICKET.0 + 1,
        closed: false,
    };
    tokio::spawn(session.run());

    let handle = SessionHandle {
        requests: request_tx,
        state: state_rx,
        bus,
    };
    (handle, authorized_rx)
}

/// Drain publications and samples into the sinks, one at a time.
async fn forward_sinks<P, R>(mut items: mpsc::Receiver<SinkItem>, publisher: P, recorder: R)
where
    P: TelemetryPublisher,
    R: SampleRecorder,
{
    while let Some(item) = items.recv().await {
        match item {
            SinkItem::Publish(publication) => {
                let topic = publication.topic.clone();
                if let Err(err) = publisher.publish(publication).await {
                    tracing::warn!(%err, %topic, "failed to publish telemetry");
                }
            }
            SinkItem::Record(sample) => {
                if let Err(err) = recorder.record(sample).await {
                    tracing::warn!(%err, "failed to record sample");
                }
            }
        }
    }
}

/// Outcome of the running write. Never resolves while no write runs.
async fn write_done(slot: &mut Option<WriteTask>) -> Result<(), TransportError> {
    let Some(task) = slot else {
        return std::future::pending().await;
    };
    match task.await {
        Ok(result) => result,
        Err(err) => Err(TransportError::Other(Box::new(err))),
    }
}

impl<L> SessionLoop<L>
where
    L: Link + 'static,
{
    async fn run(mut self) {
        tracing::debug!(device = self.engine.device_id(), "session loop started");
        loop {
            self.execute().await;
            if self.closed {
                break;
            }

            tokio::select! {
                request = self.requests.recv(), if self.requests_open => match request {
                    Some(Request { operation, reply }) => {
                        let ticket = Ticket(self.next_ticket);
                        self.next_ticket += 1;
                        self.pending.insert(ticket, reply);
                        self.engine.handle(ticket, operation);
                    }
                    None => {
                        tracing::debug!("every session handle dropped, disconnecting");
                        self.requests_open = false;
                        self.engine.disconnect(None);
                    }
                },
                event = self.link_events.recv() => match event {
                    Some(LinkEvent::Notification(bytes)) => self.engine.on_notification(&bytes),
                    Some(LinkEvent::Disconnected) | None => self.engine.on_link_lost(),
                },
                Some(fired) = self.fired.recv() => {
                    if let Some(key) = self.timers.take_fired(fired) {
                        self.engine.on_timer(key);
                    }
                }
                result = write_done(&mut self.writing) => {
                    self.writing = None;
                    self.engine.on_write_result(result);
                    self.start_write();
                }
            }
        }

        self.stop_writes();
        self.timers.cancel_all();
        for (_, reply) in self.pending.drain() {
            let _ = reply.send(Err(SessionError::Closed));
        }
        tracing::debug!(device = self.engine.device_id(), "session loop finished");
    }

    async fn execute(&mut self) {
        while let Some(effect) = self.engine.poll_effect() {
            match effect {
                Effect::Write(bytes) => {
                    self.writes.push_back(bytes);
                    self.start_write();
                }
                Effect::ArmTimer(key, after) => self.timers.arm(key, after),
                Effect::CancelTimer(key) => self.timers.cancel(key),
                Effect::Publish(publication) => self.forward(SinkItem::Publish(publication)),
                Effect::Record(sample) => self.forward(SinkItem::Record(sample)),
                Effect::Resolve(ticket, result) => {
                    if let Some(reply) = self.pending.remove(&ticket) {
                        let _ = reply.send(result);
                    }
                }
                Effect::Emit(event) => {
                    if let SessionEvent::StateChanged(state) = &event {
                        self.state.send_replace(*state);
                    }
                    self.bus.publish(event);
                }
                Effect::CloseLink => {
                    self.stop_writes();
                    self.timers.cancel_all();
                    match tokio::time::timeout(self.write_timeout, self.link.disconnect()).await {
                        Ok(Ok(())) => {}
                        Ok(Err(err)) => tracing::warn!(%err, "failed to close link"),
                        Err(_) => tracing::warn!("closing the link timed out"),
                    }
                    self.closed = true;
                }
            }
        }
    }

    /// Spawn the next queued write unless one is running.
    fn start_write(&mut self) {
        if self.writing.is_some() {
            return;
        }
        let Some(bytes) = self.writes.pop_front() else {
            return;
        };
        let link = Arc::clone(&self.link);
        let limit = self.write_timeout;
        self.writing = Some(tokio::spawn(async move {
            tokio::time::timeout(limit, link.write(&bytes))
                .await
                .unwrap_or(Err(TransportError::WriteTimeout))
        }));
    }

    fn stop_writes(&mut self) {
        self.writes.clear();
        if let Some(task) = self.writing.take() {
            task.abort();
        }
    }

    fn forward(&self, item: SinkItem) {
        match self.sinks.try_send(item) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => tracing::warn!("sink backlog full, dropping telemetry"),
            Err(TrySendError::Closed(_)) => tracing::debug!("sinks gone, dropping telemetry"),
        }
    }
}
