//! Reconnecting market-data stream.
//!
//! [`StreamSession`] is the connection state machine: it consumes discrete
//! [`TransportEvent`]s and answers with the [`TransportAction`]s the driver must perform, so
//! its behavior can be exercised without a socket. [`run_stream_transport`] owns the socket,
//! the heartbeat interval and the reconnect timer, and forwards decoded prices and status
//! transitions to a single consumer channel.

use crate::error::AppError;
use crate::market::polymarket::{
    connect_market_stream, handshake_message, subscribe_message, unsubscribe_message,
    MarketWsStream, HEARTBEAT_FRAME,
};
use crate::market::now_unix_ms;
use crate::market::subscriptions::SubscriptionSink;
use crate::market::types::{is_heartbeat_ack, parse_stream_payload, ConnectionStatus, PriceEvent};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use std::collections::BTreeSet;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const BACKOFF_FLOOR: Duration = Duration::from_secs(1);
pub const BACKOFF_CEILING: Duration = Duration::from_secs(30);
pub const MAX_RECONNECT_JITTER_MS: u64 = 1_000;
const OUTPUT_CHANNEL_CAPACITY: usize = 4_096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Reconnecting,
    Open,
    Destroyed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    current: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            current: BACKOFF_FLOOR,
        }
    }
}

impl Backoff {
    pub fn current(&self) -> Duration {
        self.current
    }

    pub fn reset(&mut self) {
        self.current = BACKOFF_FLOOR;
    }

    /// Delay for the next attempt, then doubles the base up to the ceiling.
    pub fn next_delay(&mut self, jitter: Duration) -> Duration {
        let delay = self.current + jitter;
        self.current = self.current.saturating_mul(2).min(BACKOFF_CEILING);
        delay
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportOutput {
    Status(ConnectionStatus),
    Price(PriceEvent),
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    ConnectAttempt,
    Opened,
    Frame { payload: Vec<u8>, received_at_ms: i64 },
    Closed { jitter: Duration },
    Failed { reason: String, jitter: Duration },
    Subscribe(Vec<String>),
    Unsubscribe(Vec<String>),
    Shutdown,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportAction {
    Send(String),
    StartHeartbeat,
    StopHeartbeat,
    ScheduleReconnect(Duration),
    Emit(TransportOutput),
}

#[derive(Debug)]
pub struct StreamSession {
    state: TransportState,
    backoff: Backoff,
    subscriptions: BTreeSet<String>,
}

impl Default for StreamSession {
    fn default() -> Self {
        Self {
            state: TransportState::Reconnecting,
            backoff: Backoff::default(),
            subscriptions: BTreeSet::new(),
        }
    }
}

impl StreamSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> TransportState {
        self.state
    }

    pub fn backoff(&self) -> Backoff {
        self.backoff
    }

    pub fn subscriptions(&self) -> &BTreeSet<String> {
        &self.subscriptions
    }

    pub fn handle(&mut self, event: TransportEvent) -> Vec<TransportAction> {
        if self.state == TransportState::Destroyed {
            return Vec::new();
        }

        match event {
            TransportEvent::ConnectAttempt => {
                self.state = TransportState::Reconnecting;
                vec![TransportAction::Emit(TransportOutput::Status(
                    ConnectionStatus::Reconnecting,
                ))]
            }
            TransportEvent::Opened => self.on_open(),
            TransportEvent::Frame {
                mut payload,
                received_at_ms,
            } => {
                if self.state != TransportState::Open {
                    return Vec::new();
                }
                decode_frame(&mut payload, received_at_ms)
                    .into_iter()
                    .map(|event| TransportAction::Emit(TransportOutput::Price(event)))
                    .collect()
            }
            TransportEvent::Closed { jitter } => self.on_close(jitter),
            TransportEvent::Failed { reason, jitter } => {
                debug!(%reason, "stream transport failure");
                self.on_close(jitter)
            }
            TransportEvent::Subscribe(instrument_ids) => {
                let added: Vec<String> = instrument_ids
                    .into_iter()
                    .filter(|id| self.subscriptions.insert(id.clone()))
                    .collect();
                self.send_op(&added, subscribe_message)
            }
            TransportEvent::Unsubscribe(instrument_ids) => {
                let removed: Vec<String> = instrument_ids
                    .into_iter()
                    .filter(|id| self.subscriptions.remove(id))
                    .collect();
                self.send_op(&removed, unsubscribe_message)
            }
            TransportEvent::Shutdown => {
                let was_open = self.state == TransportState::Open;
                self.state = TransportState::Destroyed;
                let mut actions = Vec::new();
                if was_open {
                    actions.push(TransportAction::StopHeartbeat);
                }
                actions.push(TransportAction::Emit(TransportOutput::Status(
                    ConnectionStatus::Disconnected,
                )));
                actions
            }
        }
    }

    fn on_open(&mut self) -> Vec<TransportAction> {
        self.state = TransportState::Open;
        self.backoff.reset();

        let mut actions = Vec::with_capacity(4);
        match handshake_message() {
            Ok(message) => actions.push(TransportAction::Send(message)),
            Err(error) => warn!(%error, "failed to encode stream handshake"),
        }
        if !self.subscriptions.is_empty() {
            let all: Vec<String> = self.subscriptions.iter().cloned().collect();
            match subscribe_message(&all) {
                Ok(message) => actions.push(TransportAction::Send(message)),
                Err(error) => warn!(%error, "failed to encode resubscribe"),
            }
        }
        actions.push(TransportAction::StartHeartbeat);
        actions.push(TransportAction::Emit(TransportOutput::Status(
            ConnectionStatus::Connected,
        )));
        actions
    }

    fn on_close(&mut self, jitter: Duration) -> Vec<TransportAction> {
        let was_open = self.state == TransportState::Open;
        self.state = TransportState::Reconnecting;

        let mut actions = Vec::with_capacity(3);
        if was_open {
            actions.push(TransportAction::StopHeartbeat);
        }
        actions.push(TransportAction::Emit(TransportOutput::Status(
            ConnectionStatus::Disconnected,
        )));
        actions.push(TransportAction::ScheduleReconnect(
            self.backoff.next_delay(jitter),
        ));
        actions
    }

    fn send_op(
        &self,
        instrument_ids: &[String],
        encode: fn(&[String]) -> Result<String, AppError>,
    ) -> Vec<TransportAction> {
        if instrument_ids.is_empty() || self.state != TransportState::Open {
            return Vec::new();
        }
        match encode(instrument_ids) {
            Ok(message) => vec![TransportAction::Send(message)],
            Err(error) => {
                warn!(%error, "failed to encode subscription operation");
                Vec::new()
            }
        }
    }
}

fn decode_frame(payload: &mut [u8], received_at_ms: i64) -> Vec<PriceEvent> {
    if std::str::from_utf8(payload).is_ok_and(is_heartbeat_ack) {
        return Vec::new();
    }
    parse_stream_payload(payload, received_at_ms).unwrap_or_default()
}

fn reconnect_jitter() -> Duration {
    Duration::from_millis(rand::thread_rng().gen_range(0..=MAX_RECONNECT_JITTER_MS))
}

#[derive(Debug)]
pub enum TransportCommand {
    Subscribe(Vec<String>),
    Unsubscribe(Vec<String>),
}

impl From<TransportCommand> for TransportEvent {
    fn from(value: TransportCommand) -> Self {
        match value {
            TransportCommand::Subscribe(ids) => Self::Subscribe(ids),
            TransportCommand::Unsubscribe(ids) => Self::Unsubscribe(ids),
        }
    }
}

/// Owner-side handle; dropping it without [`TransportHandle::shutdown`] leaves the task
/// running until the cancellation token fires.
pub struct TransportHandle {
    commands: mpsc::UnboundedSender<TransportCommand>,
    cancel_token: CancellationToken,
    join_handle: JoinHandle<()>,
}

impl TransportHandle {
    pub fn spawn(
        stream_url: String,
        heartbeat_interval: Duration,
        cancel_token: CancellationToken,
    ) -> (Self, mpsc::Receiver<TransportOutput>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (output_tx, output_rx) = mpsc::channel(OUTPUT_CHANNEL_CAPACITY);
        let join_handle = tokio::spawn(run_stream_transport(
            stream_url,
            heartbeat_interval,
            command_rx,
            output_tx,
            cancel_token.clone(),
        ));

        (
            Self {
                commands: command_tx,
                cancel_token,
                join_handle,
            },
            output_rx,
        )
    }

    pub async fn shutdown(self) {
        self.cancel_token.cancel();
        if let Err(error) = self.join_handle.await {
            warn!(%error, "stream transport task ended abnormally");
        }
    }
}

impl SubscriptionSink for TransportHandle {
    fn subscribe(&self, instrument_ids: Vec<String>) -> Result<(), AppError> {
        self.commands
            .send(TransportCommand::Subscribe(instrument_ids))
            .map_err(|_| AppError::ChannelClosed("transport commands"))
    }

    fn unsubscribe(&self, instrument_ids: Vec<String>) -> Result<(), AppError> {
        self.commands
            .send(TransportCommand::Unsubscribe(instrument_ids))
            .map_err(|_| AppError::ChannelClosed("transport commands"))
    }
}

type MarketWsSink = SplitSink<MarketWsStream, Message>;

enum StreamDirective {
    Continue,
    /// Writing to the socket failed; the session has not seen the close yet.
    Broken(String),
    Reconnect(Duration),
    Stop,
}

struct TransportIo<'a> {
    heartbeat_interval: Duration,
    output: &'a mpsc::Sender<TransportOutput>,
}

async fn perform(
    actions: Vec<TransportAction>,
    io: &TransportIo<'_>,
    mut sink: Option<&mut MarketWsSink>,
    heartbeat: &mut Option<Interval>,
) -> StreamDirective {
    let mut directive = StreamDirective::Continue;
    for action in actions {
        match action {
            TransportAction::Send(message) => {
                let Some(sink) = sink.as_deref_mut() else {
                    continue;
                };
                if let Err(error) = sink.send(Message::Text(message)).await {
                    return StreamDirective::Broken(format!("send failed: {error}"));
                }
            }
            TransportAction::StartHeartbeat => {
                let mut interval = tokio::time::interval_at(
                    Instant::now() + io.heartbeat_interval,
                    io.heartbeat_interval,
                );
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                *heartbeat = Some(interval);
            }
            TransportAction::StopHeartbeat => {
                *heartbeat = None;
            }
            TransportAction::ScheduleReconnect(delay) => {
                directive = StreamDirective::Reconnect(delay);
            }
            TransportAction::Emit(output) => {
                if io.output.send(output).await.is_err() {
                    return StreamDirective::Stop;
                }
            }
        }
    }
    directive
}

async fn next_heartbeat(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

/// Feeds one event through the session; a broken socket is folded into a close so the
/// session schedules the reconnect itself.
async fn step(
    session: &mut StreamSession,
    event: TransportEvent,
    io: &TransportIo<'_>,
    sink: Option<&mut MarketWsSink>,
    heartbeat: &mut Option<Interval>,
) -> StreamDirective {
    match perform(session.handle(event), io, sink, heartbeat).await {
        StreamDirective::Broken(reason) => {
            let failed = TransportEvent::Failed {
                reason,
                jitter: reconnect_jitter(),
            };
            match perform(session.handle(failed), io, None, heartbeat).await {
                StreamDirective::Broken(_) => StreamDirective::Stop,
                directive => directive,
            }
        }
        directive => directive,
    }
}

async fn shutdown_session(
    session: &mut StreamSession,
    io: &TransportIo<'_>,
    sink: Option<&mut MarketWsSink>,
) {
    let mut heartbeat = None;
    perform(session.handle(TransportEvent::Shutdown), io, None, &mut heartbeat).await;
    if let Some(sink) = sink {
        let _ = sink.close().await;
    }
}

/// Runs until `cancel_token` fires, every command sender is dropped, or the output receiver
/// is dropped. Connection failures are retried indefinitely.
pub async fn run_stream_transport(
    stream_url: String,
    heartbeat_interval: Duration,
    mut commands: mpsc::UnboundedReceiver<TransportCommand>,
    output: mpsc::Sender<TransportOutput>,
    cancel_token: CancellationToken,
) {
    let io = TransportIo {
        heartbeat_interval,
        output: &output,
    };
    let mut session = StreamSession::new();
    let mut attempt = 0_u32;

    'session: loop {
        let mut heartbeat: Option<Interval> = None;
        if let StreamDirective::Stop =
            step(&mut session, TransportEvent::ConnectAttempt, &io, None, &mut heartbeat).await
        {
            break;
        }

        let connected = tokio::select! {
            _ = cancel_token.cancelled() => {
                shutdown_session(&mut session, &io, None).await;
                break;
            }
            result = connect_market_stream(&stream_url) => result,
        };

        let directive = match connected {
            Ok(websocket_stream) => {
                info!(url = %stream_url, attempt, "market stream connected");
                attempt = 0;
                let (mut sink, mut frames) = websocket_stream.split();
                let mut directive = step(
                    &mut session,
                    TransportEvent::Opened,
                    &io,
                    Some(&mut sink),
                    &mut heartbeat,
                )
                .await;

                while let StreamDirective::Continue = directive {
                    let event = tokio::select! {
                        _ = cancel_token.cancelled() => {
                            shutdown_session(&mut session, &io, Some(&mut sink)).await;
                            break 'session;
                        }
                        command = commands.recv() => match command {
                            Some(command) => TransportEvent::from(command),
                            None => {
                                shutdown_session(&mut session, &io, Some(&mut sink)).await;
                                break 'session;
                            }
                        },
                        _ = next_heartbeat(&mut heartbeat) => {
                            match sink.send(Message::Text(HEARTBEAT_FRAME.to_string())).await {
                                Ok(()) => continue,
                                Err(error) => TransportEvent::Failed {
                                    reason: format!("heartbeat send failed: {error}"),
                                    jitter: reconnect_jitter(),
                                },
                            }
                        }
                        frame = frames.next() => match frame {
                            Some(Ok(Message::Text(text))) => TransportEvent::Frame {
                                payload: text.into_bytes(),
                                received_at_ms: now_unix_ms(),
                            },
                            Some(Ok(Message::Binary(payload))) => TransportEvent::Frame {
                                payload,
                                received_at_ms: now_unix_ms(),
                            },
                            Some(Ok(Message::Close(_))) | None => TransportEvent::Closed {
                                jitter: reconnect_jitter(),
                            },
                            Some(Ok(_)) => continue,
                            Some(Err(error)) => TransportEvent::Failed {
                                reason: error.to_string(),
                                jitter: reconnect_jitter(),
                            },
                        },
                    };

                    directive =
                        step(&mut session, event, &io, Some(&mut sink), &mut heartbeat).await;
                }
                directive
            }
            Err(error) => {
                warn!(url = %stream_url, attempt, %error, "market stream connect failed");
                let failed = TransportEvent::Failed {
                    reason: error.to_string(),
                    jitter: reconnect_jitter(),
                };
                step(&mut session, failed, &io, None, &mut heartbeat).await
            }
        };

        let StreamDirective::Reconnect(delay) = directive else {
            break;
        };
        attempt = attempt.saturating_add(1);
        debug!(attempt, delay_ms = delay.as_millis() as u64, "scheduling stream reconnect");

        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => {
                    shutdown_session(&mut session, &io, None).await;
                    break 'session;
                }
                command = commands.recv() => match command {
                    // Buffered into the subscription set; replayed on the next open.
                    Some(command) => {
                        session.handle(command.into());
                    }
                    None => {
                        shutdown_session(&mut session, &io, None).await;
                        break 'session;
                    }
                },
                _ = &mut sleep => break,
            }
        }
    }

    info!("market stream transport stopped");
}
