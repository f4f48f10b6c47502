//! Live duplex transport - WebSocket channel to a remote pseudo-terminal
//!
//! One background task owns the socket. It connects, reconnects with bounded
//! exponential backoff, and turns server frames into [`TransportEvent`]s for
//! the run currently in progress. Frames that arrive between `start` and
//! `terminal_ready` belong to the process that was just replaced and are
//! dropped.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{Sink, SinkExt, StreamExt};
use rand::Rng;
use shared_types::{ClientEvent, ServerEvent};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use uuid::Uuid;

use super::{
    http_to_ws_url, OutputStream, RunId, RunRequest, Transport, TransportError, TransportEvent,
    TransportEventKind, TransportMode,
};

type TerminalSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
}

/// Bounded reconnect attempts with exponential delay.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Scale each delay by a random factor in 0.8..1.2
    pub jitter: bool,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 6,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_millis(8000),
            jitter: true,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnect attempt `attempt` (1-based), without jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(2u32.saturating_pow(exponent))
            .min(self.max_delay)
    }

    fn jittered_delay(&self, attempt: u32) -> Duration {
        let delay = self.delay_for(attempt);
        if !self.jitter {
            return delay;
        }
        delay.mul_f64(rand::rng().random_range(0.8..1.2))
    }
}

/// `terminal_exit` frames the server sends for one killed live process: one
/// from the kill itself, one when the process's output reader hits EOF
const EXITS_PER_KILL: u32 = 2;

/// Which run the socket is currently serving
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum RunSlot {
    #[default]
    Idle,
    /// Start sent, waiting for `terminal_ready`
    Starting(RunId),
    Live(RunId),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct SlotState {
    run: RunSlot,
    /// Exits still due from killed processes; they may land after the next
    /// run is already live and must not end it
    owed_exits: u32,
}

impl SlotState {
    fn serving(run: RunSlot) -> Self {
        Self { run, owed_exits: 0 }
    }

    /// Detach the current run for a kill and return it.
    fn release_for_kill(&mut self) -> RunSlot {
        let previous = std::mem::replace(&mut self.run, RunSlot::Idle);
        if let RunSlot::Live(_) = previous {
            self.owed_exits += EXITS_PER_KILL;
        }
        previous
    }
}

enum PumpOutcome {
    /// The transport was dropped
    OutboundClosed,
    Lost(String),
}

pub struct DuplexTransport {
    outbound: mpsc::UnboundedSender<ClientEvent>,
    slot: Arc<Mutex<SlotState>>,
    state_rx: watch::Receiver<ConnectionState>,
    task: JoinHandle<()>,
}

impl DuplexTransport {
    /// Spawn the connection task for `url`. Must be called inside a tokio runtime.
    pub fn connect(
        url: impl Into<String>,
        policy: ReconnectPolicy,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Self {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let slot = Arc::new(Mutex::new(SlotState::default()));

        let task = tokio::spawn(run_connection(
            url.into(),
            policy,
            outbound_rx,
            slot.clone(),
            events,
            state_tx,
        ));

        Self {
            outbound,
            slot,
            state_rx,
            task,
        }
    }

    /// WebSocket endpoint for a terminal session under `api_base`.
    pub fn terminal_url(api_base: &str, session_id: Uuid) -> String {
        format!(
            "{}/ws/terminal?session_id={}",
            http_to_ws_url(api_base.trim_end_matches('/')),
            session_id
        )
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    pub fn subscribe_connection(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    fn send(&self, event: ClientEvent) -> Result<(), TransportError> {
        self.outbound
            .send(event)
            .map_err(|_| TransportError::ChannelClosed)
    }
}

impl Drop for DuplexTransport {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[async_trait]
impl Transport for DuplexTransport {
    fn mode(&self) -> TransportMode {
        TransportMode::Streaming
    }

    async fn start(&self, request: RunRequest) -> Result<(), TransportError> {
        if !request.language.eq_ignore_ascii_case("python") {
            return Err(TransportError::UnsupportedLanguage(request.language));
        }
        self.slot.lock().await.run = RunSlot::Starting(request.run_id);
        tracing::info!(run_id = %request.run_id, "Starting live run");
        self.send(ClientEvent::RunPythonCode { code: request.code })
    }

    async fn start_shell(&self, run_id: RunId) -> Result<(), TransportError> {
        self.slot.lock().await.run = RunSlot::Starting(run_id);
        tracing::info!(%run_id, "Starting live shell");
        self.send(ClientEvent::TerminalInit { shell: None })
    }

    async fn send_input(&self, chunk: &str) -> Result<(), TransportError> {
        if !matches!(self.slot.lock().await.run, RunSlot::Live(_)) {
            tracing::debug!("Dropping input outside a live run");
            return Ok(());
        }
        self.send(ClientEvent::TerminalInput {
            input: chunk.to_string(),
        })
    }

    async fn resize(&self, cols: u16, rows: u16) -> Result<(), TransportError> {
        self.send(ClientEvent::TerminalResize { cols, rows })
    }

    async fn kill(&self) -> Result<(), TransportError> {
        let previous = self.slot.lock().await.release_for_kill();
        if previous == RunSlot::Idle {
            return Ok(());
        }
        tracing::info!(?previous, "Killing live run");
        self.send(ClientEvent::TerminalKill {})
    }
}

async fn run_connection(
    url: String,
    policy: ReconnectPolicy,
    mut outbound_rx: mpsc::UnboundedReceiver<ClientEvent>,
    slot: Arc<Mutex<SlotState>>,
    events: mpsc::UnboundedSender<TransportEvent>,
    state_tx: watch::Sender<ConnectionState>,
) {
    let mut attempt = 0u32;
    let mut pending: Option<ClientEvent> = None;

    loop {
        state_tx.send_replace(ConnectionState::Connecting);
        match connect_async(url.as_str()).await {
            Ok((socket, _)) => {
                attempt = 0;
                state_tx.send_replace(ConnectionState::Connected);
                tracing::info!(%url, "Terminal channel connected");

                match pump(socket, &mut outbound_rx, pending.take(), &slot, &events).await {
                    PumpOutcome::OutboundClosed => {
                        state_tx.send_replace(ConnectionState::Disconnected);
                        return;
                    }
                    PumpOutcome::Lost(reason) => {
                        tracing::warn!(%url, %reason, "Terminal channel lost");
                        fail_active_run(&slot, &events, TransportError::Disconnected(reason))
                            .await;
                    }
                }
            }
            Err(e) => {
                tracing::warn!(%url, attempt, error = %e, "Terminal channel connect failed");
            }
        }

        state_tx.send_replace(ConnectionState::Disconnected);
        attempt += 1;
        if attempt > policy.max_attempts {
            tracing::warn!(%url, attempts = policy.max_attempts, "Giving up on terminal channel");
            fail_active_run(
                &slot,
                &events,
                TransportError::Unreachable(policy.max_attempts),
            )
            .await;

            // Frames queued while down belong to the run that just failed.
            let mut dropped = 0usize;
            while outbound_rx.try_recv().is_ok() {
                dropped += 1;
            }
            if dropped > 0 {
                tracing::debug!(dropped, "Discarded frames queued while disconnected");
            }

            // Stay down until someone needs the channel again.
            match outbound_rx.recv().await {
                Some(event) => {
                    pending = Some(event);
                    attempt = 0;
                    continue;
                }
                None => return,
            }
        }

        let delay = policy.jittered_delay(attempt);
        tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, "Reconnecting terminal channel");
        tokio::time::sleep(delay).await;
    }
}

async fn pump(
    socket: TerminalSocket,
    outbound_rx: &mut mpsc::UnboundedReceiver<ClientEvent>,
    pending: Option<ClientEvent>,
    slot: &Mutex<SlotState>,
    events: &mpsc::UnboundedSender<TransportEvent>,
) -> PumpOutcome {
    let (mut sink, mut source) = socket.split();

    if let Some(event) = pending {
        if let Err(e) = send_frame(&mut sink, &event).await {
            return PumpOutcome::Lost(e.to_string());
        }
    }

    loop {
        tokio::select! {
            outgoing = outbound_rx.recv() => match outgoing {
                Some(event) => {
                    if let Err(e) = send_frame(&mut sink, &event).await {
                        return PumpOutcome::Lost(e.to_string());
                    }
                }
                None => {
                    let _ = sink.close().await;
                    return PumpOutcome::OutboundClosed;
                }
            },
            incoming = source.next() => match incoming {
                Some(Ok(Message::Text(text))) => route_frame(&text, slot, events).await,
                Some(Ok(Message::Close(_))) | None => {
                    return PumpOutcome::Lost("closed by server".to_string());
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return PumpOutcome::Lost(e.to_string()),
            },
        }
    }
}

async fn send_frame<S>(sink: &mut S, event: &ClientEvent) -> Result<(), S::Error>
where
    S: Sink<Message> + Unpin,
{
    match serde_json::to_string(event) {
        Ok(text) => sink.send(Message::Text(text)).await,
        Err(e) => {
            tracing::error!("Failed to serialize terminal frame: {}", e);
            Ok(())
        }
    }
}

async fn route_frame(
    text: &str,
    slot: &Mutex<SlotState>,
    events: &mpsc::UnboundedSender<TransportEvent>,
) {
    let event = match serde_json::from_str::<ServerEvent>(text) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!(error = %e, "Ignoring malformed terminal frame");
            return;
        }
    };

    let mut slot = slot.lock().await;
    if matches!(event, ServerEvent::TerminalExit { .. }) && slot.owed_exits > 0 {
        slot.owed_exits -= 1;
        tracing::debug!(owed = slot.owed_exits, "Swallowed exit from a killed process");
        return;
    }

    let emitted = match (event, slot.run) {
        (ServerEvent::TerminalReady {}, RunSlot::Starting(run_id)) => {
            slot.run = RunSlot::Live(run_id);
            TransportEvent::new(run_id, TransportEventKind::Ready)
        }
        (ServerEvent::TerminalOutput { output }, RunSlot::Live(run_id)) => TransportEvent::new(
            run_id,
            TransportEventKind::Output {
                stream: OutputStream::Stdout,
                chunk: output,
            },
        ),
        (ServerEvent::TerminalExit { exit_code }, RunSlot::Live(run_id)) => {
            slot.run = RunSlot::Idle;
            TransportEvent::new(run_id, TransportEventKind::Exited { exit_code })
        }
        (
            ServerEvent::TerminalError { message },
            RunSlot::Starting(run_id) | RunSlot::Live(run_id),
        ) => {
            slot.run = RunSlot::Idle;
            TransportEvent::new(run_id, TransportEventKind::Error { message })
        }
        (event, current) => {
            tracing::debug!(?event, ?current, "Dropping frame outside the active run");
            return;
        }
    };

    let _ = events.send(emitted);
}

async fn fail_active_run(
    slot: &Mutex<SlotState>,
    events: &mpsc::UnboundedSender<TransportEvent>,
    error: TransportError,
) {
    // A new socket is a new server session; nothing it sends is owed to old kills.
    let previous = std::mem::take(&mut *slot.lock().await);
    if let RunSlot::Starting(run_id) | RunSlot::Live(run_id) = previous.run {
        let _ = events.send(TransportEvent::new(
            run_id,
            TransportEventKind::failure(&error),
        ));
    }
}
