//! Tokio runtime for the channel manager.
//!
//! A single task owns the socket, the pending connect, the liveness timer and
//! the simulator interval, and multiplexes them with operator requests in one
//! `select!` loop. Front-ends talk to it through a [`LinkHandle`].

use std::future::{pending, Future};
use std::pin::Pin;

use anyhow::{anyhow, Result};
use futures_util::{SinkExt, StreamExt};
use pilot_core::DroneCommand;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, Instant, Interval, MissedTickBehavior, Sleep};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::config::LinkConfig;
use crate::manager::{ChannelManager, Effect, LinkEvent, Snapshot};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type PendingOpen = Pin<Box<dyn Future<Output = Result<Socket, WsError>> + Send>>;

const REQUEST_QUEUE: usize = 64;
/// Close code reported when the stream ends without a close frame.
const ABNORMAL_CLOSURE: u16 = 1006;

#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Connect,
    Disconnect,
    Send(DroneCommand),
    SetFallback(bool),
    Shutdown,
}

/// Cloneable handle to a running link.
#[derive(Clone)]
pub struct LinkHandle {
    requests: mpsc::Sender<Request>,
    snapshots: watch::Receiver<Snapshot>,
}

impl LinkHandle {
    pub async fn connect(&self) -> Result<()> {
        self.request(Request::Connect).await
    }

    pub async fn disconnect(&self) -> Result<()> {
        self.request(Request::Disconnect).await
    }

    pub async fn send_command(&self, command: DroneCommand) -> Result<()> {
        self.request(Request::Send(command)).await
    }

    pub async fn set_fallback_mode(&self, enabled: bool) -> Result<()> {
        self.request(Request::SetFallback(enabled)).await
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.request(Request::Shutdown).await
    }

    async fn request(&self, request: Request) -> Result<()> {
        self.requests
            .send(request)
            .await
            .map_err(|_| anyhow!("link runtime has stopped"))
    }

    /// Latest published state.
    pub fn snapshot(&self) -> Snapshot {
        self.snapshots.borrow().clone()
    }

    /// Receiver that wakes on every published state change.
    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.snapshots.clone()
    }

    /// Wait until a published snapshot satisfies `predicate`.
    pub async fn wait_for<F>(&self, predicate: F) -> Result<Snapshot>
    where
        F: FnMut(&Snapshot) -> bool,
    {
        let mut rx = self.snapshots.clone();
        let snapshot = rx
            .wait_for(predicate)
            .await
            .map_err(|_| anyhow!("link runtime has stopped"))?
            .clone();
        Ok(snapshot)
    }
}

/// Start the link runtime on the current tokio runtime.
pub fn spawn(config: LinkConfig) -> (LinkHandle, JoinHandle<()>) {
    let manager = ChannelManager::new(config.use_tello, Instant::now().into_std());
    let (request_tx, request_rx) = mpsc::channel(REQUEST_QUEUE);
    let (snapshot_tx, snapshot_rx) = watch::channel(manager.snapshot());

    let runtime = LinkRuntime {
        config,
        manager,
        socket: None,
        pending_open: None,
        timeout: None,
        ticker: None,
        requests: request_rx,
        snapshots: snapshot_tx,
    };
    let task = tokio::spawn(runtime.run());

    (
        LinkHandle {
            requests: request_tx,
            snapshots: snapshot_rx,
        },
        task,
    )
}

enum Wake {
    Request(Option<Request>),
    Opened(Result<Socket, WsError>),
    Inbound(Option<Result<Message, WsError>>),
    TimeoutFired,
    Tick,
}

struct LinkRuntime {
    config: LinkConfig,
    manager: ChannelManager,
    socket: Option<Socket>,
    pending_open: Option<PendingOpen>,
    timeout: Option<Pin<Box<Sleep>>>,
    ticker: Option<Interval>,
    requests: mpsc::Receiver<Request>,
    snapshots: watch::Sender<Snapshot>,
}

impl LinkRuntime {
    async fn run(mut self) {
        tracing::info!("Link runtime started, backend at {}", self.config.ws_url());

        if self.config.starts_in_fallback() {
            tracing::info!("Non-local deployment detected, starting in fallback mode");
            let effects = self.manager.set_fallback_mode(true, now());
            self.apply(effects).await;
        }

        loop {
            let wake = tokio::select! {
                request = self.requests.recv() => Wake::Request(request),
                opened = poll_open(&mut self.pending_open) => Wake::Opened(opened),
                inbound = next_inbound(&mut self.socket) => Wake::Inbound(inbound),
                _ = expire(&mut self.timeout) => Wake::TimeoutFired,
                _ = next_tick(&mut self.ticker) => Wake::Tick,
            };

            let effects = match wake {
                Wake::Request(None) | Wake::Request(Some(Request::Shutdown)) => break,
                Wake::Request(Some(request)) => self.on_request(request),
                Wake::Opened(result) => {
                    self.pending_open = None;
                    match result {
                        Ok(socket) => {
                            self.socket = Some(socket);
                            self.manager.handle(LinkEvent::Opened, now())
                        }
                        Err(e) => self.manager.handle(
                            LinkEvent::Errored {
                                cause: e.to_string(),
                            },
                            now(),
                        ),
                    }
                }
                Wake::Inbound(inbound) => match self.on_inbound(inbound).await {
                    Some(event) => self.manager.handle(event, now()),
                    None => Vec::new(),
                },
                Wake::TimeoutFired => {
                    self.timeout = None;
                    self.manager.handle(LinkEvent::TimeoutFired, now())
                }
                Wake::Tick => self.manager.handle(LinkEvent::Tick, now()),
            };
            self.apply(effects).await;
        }

        let effects = self.manager.disconnect();
        self.apply(effects).await;
        tracing::info!("Link runtime stopped");
    }

    fn on_request(&mut self, request: Request) -> Vec<Effect> {
        match request {
            Request::Connect => self.manager.connect(),
            Request::Disconnect => self.manager.disconnect(),
            Request::Send(command) => self.manager.send_command(command, now()),
            Request::SetFallback(enabled) => self.manager.set_fallback_mode(enabled, now()),
            Request::Shutdown => Vec::new(),
        }
    }

    /// Translate a socket read into a manager event. Drops the socket when
    /// the stream is finished; a backend close is answered first.
    async fn on_inbound(&mut self, inbound: Option<Result<Message, WsError>>) -> Option<LinkEvent> {
        match inbound {
            Some(Ok(Message::Text(payload))) => Some(LinkEvent::MessageReceived { payload }),
            Some(Ok(Message::Binary(data))) => match String::from_utf8(data) {
                Ok(payload) => Some(LinkEvent::MessageReceived { payload }),
                Err(_) => {
                    tracing::warn!("Dropping non-UTF-8 binary message from backend");
                    None
                }
            },
            Some(Ok(Message::Close(frame))) => {
                if let Some(mut socket) = self.socket.take() {
                    if let Err(e) = socket.close(None).await {
                        tracing::debug!("Error answering backend close: {}", e);
                    }
                }
                let (code, reason) = match frame {
                    Some(frame) => (u16::from(frame.code), frame.reason.into_owned()),
                    None => (ABNORMAL_CLOSURE, String::new()),
                };
                Some(LinkEvent::Closed { code, reason })
            }
            Some(Ok(_)) => None,
            Some(Err(e)) => {
                self.socket = None;
                Some(LinkEvent::Errored {
                    cause: e.to_string(),
                })
            }
            None => {
                self.socket = None;
                Some(LinkEvent::Closed {
                    code: ABNORMAL_CLOSURE,
                    reason: "Stream ended".to_string(),
                })
            }
        }
    }

    /// Carry out effects in order; effects produced while doing so (a failed
    /// write) are appended and run too.
    async fn apply(&mut self, effects: Vec<Effect>) {
        let mut queue = std::collections::VecDeque::from(effects);

        while let Some(effect) = queue.pop_front() {
            match effect {
                Effect::Open => {
                    let url = self.config.ws_url();
                    tracing::debug!("Opening {}", url);
                    self.pending_open = Some(Box::pin(async move {
                        connect_async(url).await.map(|(socket, _)| socket)
                    }));
                }
                Effect::ArmTimeout => {
                    self.timeout = Some(Box::pin(sleep(self.config.connect_timeout)));
                }
                Effect::CancelTimeout => {
                    self.timeout = None;
                }
                Effect::Transmit(message) => {
                    let Some(socket) = self.socket.as_mut() else {
                        tracing::warn!("No socket to transmit on, dropping message");
                        continue;
                    };
                    let result = match message.to_json() {
                        Ok(json) => socket.send(Message::Text(json)).await.map_err(|e| e.to_string()),
                        Err(e) => Err(e.to_string()),
                    };
                    if let Err(cause) = result {
                        queue.extend(self.manager.handle(LinkEvent::SendFailed { cause }, now()));
                    }
                }
                Effect::Close { code, reason } => {
                    self.pending_open = None;
                    if let Some(mut socket) = self.socket.take() {
                        let frame = CloseFrame {
                            code: CloseCode::from(code),
                            reason: reason.into(),
                        };
                        if let Err(e) = socket.close(Some(frame)).await {
                            tracing::debug!("Error closing backend socket: {}", e);
                        }
                    }
                }
                Effect::StartTicker => {
                    if self.ticker.is_none() {
                        let mut ticker = interval(self.config.tick_interval);
                        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                        self.ticker = Some(ticker);
                    }
                }
                Effect::StopTicker => {
                    self.ticker = None;
                }
            }
        }

        self.snapshots.send_replace(self.manager.snapshot());
    }
}

fn now() -> std::time::Instant {
    Instant::now().into_std()
}

async fn poll_open(pending_open: &mut Option<PendingOpen>) -> Result<Socket, WsError> {
    match pending_open {
        Some(open) => open.as_mut().await,
        None => pending().await,
    }
}

async fn next_inbound(socket: &mut Option<Socket>) -> Option<Result<Message, WsError>> {
    match socket {
        Some(socket) => socket.next().await,
        None => pending().await,
    }
}

async fn expire(timeout: &mut Option<Pin<Box<Sleep>>>) {
    match timeout {
        Some(timeout) => timeout.as_mut().await,
        None => pending().await,
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => pending().await,
    }
}
