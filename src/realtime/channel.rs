//! One duplex WebSocket connection and its read loop

use super::frame::InboundEvent;
use async_trait::async_trait;
use futures::{Sink, SinkExt, Stream, StreamExt};
use serde::Serialize;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    #[error("WebSocket connection failed: {0}")]
    Connect(String),
    #[error("WebSocket is not open")]
    NotOpen,
    #[error("Failed to encode frame: {0}")]
    Encode(String),
    #[error("Failed to send frame: {0}")]
    Send(String),
    #[error("WebSocket receive failed: {0}")]
    Receive(String),
    #[error("Connection attempt abandoned by disconnect")]
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelState {
    #[default]
    Idle,
    Connecting,
    Open,
    Closed,
}

/// What the channel reports to its owner, in order
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Connecting,
    Opened,
    Inbound(InboundEvent),
    Error { message: String },
    /// `locally_initiated` is true only when `disconnect()` ended the socket
    Closed { locally_initiated: bool },
}

/// Transport-level frame, independent of the WebSocket library
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireFrame {
    Text(String),
    Close,
    /// Binary, ping and pong frames
    Other,
}

pub type FrameSink = Pin<Box<dyn Sink<String, Error = ChannelError> + Send>>;
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<WireFrame, ChannelError>> + Send>>;

/// Opens sockets; swapped for an in-memory pair in tests
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<(FrameSink, FrameStream), ChannelError>;
}

#[async_trait]
impl<T: Connector + ?Sized> Connector for Arc<T> {
    async fn connect(&self, url: &str) -> Result<(FrameSink, FrameStream), ChannelError> {
        (**self).connect(url).await
    }
}

pub struct TungsteniteConnector;

#[async_trait]
impl Connector for TungsteniteConnector {
    async fn connect(&self, url: &str) -> Result<(FrameSink, FrameStream), ChannelError> {
        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| ChannelError::Connect(e.to_string()))?;
        let (ws_writer, ws_reader) = ws_stream.split();

        let sink = ws_writer
            .sink_map_err(|e| ChannelError::Send(e.to_string()))
            .with(|text: String| futures::future::ready(Ok::<_, ChannelError>(WsMessage::Text(text))));
        let stream = ws_reader.map(|msg| match msg {
            Ok(WsMessage::Text(text)) => Ok(WireFrame::Text(text)),
            Ok(WsMessage::Close(_)) => Ok(WireFrame::Close),
            Ok(_) => Ok(WireFrame::Other),
            Err(e) => Err(ChannelError::Receive(e.to_string())),
        });

        Ok((Box::pin(sink), Box::pin(stream)))
    }
}

struct Reader {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct Inner {
    state: ChannelState,
    /// Bumped by every connect and disconnect so stale tasks can tell
    generation: u64,
    sink: Option<FrameSink>,
    reader: Option<Reader>,
}

struct Shared {
    connector: Arc<dyn Connector>,
    events: mpsc::UnboundedSender<ChannelEvent>,
    inner: Mutex<Inner>,
}

impl Shared {
    fn emit(&self, event: ChannelEvent) {
        let _ = self.events.send(event);
    }
}

/// Handle to the realtime socket; clones share the same connection
#[derive(Clone)]
pub struct RealtimeChannel {
    shared: Arc<Shared>,
}

impl RealtimeChannel {
    pub fn new(connector: Arc<dyn Connector>, events: mpsc::UnboundedSender<ChannelEvent>) -> Self {
        Self {
            shared: Arc::new(Shared {
                connector,
                events,
                inner: Mutex::new(Inner::default()),
            }),
        }
    }

    pub async fn state(&self) -> ChannelState {
        self.shared.inner.lock().await.state
    }

    /// Open the socket. A failed handshake is reported as an error event
    /// followed by a close, and returned to the caller.
    pub async fn connect(&self, url: &str) -> Result<(), ChannelError> {
        let generation = {
            let mut inner = self.shared.inner.lock().await;
            if matches!(inner.state, ChannelState::Connecting | ChannelState::Open) {
                tracing::debug!(state = ?inner.state, "Realtime channel already active");
                return Ok(());
            }
            inner.state = ChannelState::Connecting;
            inner.generation += 1;
            inner.generation
        };
        self.shared.emit(ChannelEvent::Connecting);
        tracing::info!(url, "Opening realtime channel");

        match self.shared.connector.connect(url).await {
            Ok((sink, stream)) => {
                let mut inner = self.shared.inner.lock().await;
                if inner.generation != generation {
                    drop(inner);
                    let mut sink = sink;
                    let _ = sink.close().await;
                    tracing::debug!(url, "Handshake finished after disconnect; dropping socket");
                    return Err(ChannelError::Aborted);
                }

                // Opened goes out before the reader can emit any frame
                self.shared.emit(ChannelEvent::Opened);
                let cancel = CancellationToken::new();
                let task = tokio::spawn(read_loop(
                    self.shared.clone(),
                    stream,
                    cancel.clone(),
                    generation,
                ));
                inner.state = ChannelState::Open;
                inner.sink = Some(sink);
                inner.reader = Some(Reader { cancel, task });
                tracing::info!(url, "Realtime channel open");
                Ok(())
            }
            Err(e) => {
                let current = {
                    let mut inner = self.shared.inner.lock().await;
                    let current = inner.generation == generation;
                    if current {
                        inner.state = ChannelState::Closed;
                    }
                    current
                };
                tracing::warn!(url, error = %e, "Realtime channel failed to open");
                self.shared.emit(ChannelEvent::Error {
                    message: e.to_string(),
                });
                if current {
                    self.shared.emit(ChannelEvent::Closed {
                        locally_initiated: false,
                    });
                }
                Err(e)
            }
        }
    }

    /// Close the socket without triggering a reconnect. Returns once the
    /// close has been reported.
    pub async fn disconnect(&self) {
        let (sink, reader) = {
            let mut inner = self.shared.inner.lock().await;
            if matches!(inner.state, ChannelState::Idle | ChannelState::Closed) {
                return;
            }
            inner.state = ChannelState::Closed;
            inner.generation += 1;
            (inner.sink.take(), inner.reader.take())
        };
        tracing::info!("Closing realtime channel");

        if let Some(reader) = &reader {
            reader.cancel.cancel();
        }
        if let Some(mut sink) = sink {
            if let Err(e) = sink.close().await {
                tracing::debug!(error = %e, "Close frame not delivered");
            }
        }
        match reader {
            Some(reader) => {
                if let Err(e) = reader.task.await {
                    tracing::warn!(error = %e, "Realtime read loop panicked");
                }
            }
            // Still handshaking: nothing else will report the close
            None => self.shared.emit(ChannelEvent::Closed {
                locally_initiated: true,
            }),
        }
    }

    /// Send one JSON text frame
    pub async fn send<T: Serialize + ?Sized>(&self, frame: &T) -> Result<(), ChannelError> {
        let text = serde_json::to_string(frame).map_err(|e| ChannelError::Encode(e.to_string()))?;
        let mut inner = self.shared.inner.lock().await;
        if inner.state != ChannelState::Open {
            return Err(ChannelError::NotOpen);
        }
        let sink = inner.sink.as_mut().ok_or(ChannelError::NotOpen)?;
        sink.send(text).await
    }
}

async fn read_loop(
    shared: Arc<Shared>,
    mut stream: FrameStream,
    cancel: CancellationToken,
    generation: u64,
) {
    let locally_initiated = loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => break true,
            next = stream.next() => next,
        };

        match next {
            Some(Ok(WireFrame::Text(text))) => match InboundEvent::parse(&text) {
                Ok(InboundEvent::Unknown { kind }) => {
                    tracing::debug!(kind, "Ignoring realtime frame of unknown type");
                    shared.emit(ChannelEvent::Inbound(InboundEvent::Unknown { kind }));
                }
                Ok(event) => shared.emit(ChannelEvent::Inbound(event)),
                Err(e) => {
                    tracing::warn!(error = %e, "Dropping malformed realtime frame");
                }
            },
            Some(Ok(WireFrame::Other)) => {}
            Some(Ok(WireFrame::Close)) | None => break false,
            Some(Err(e)) => {
                tracing::warn!(error = %e, "Realtime channel read failed");
                shared.emit(ChannelEvent::Error {
                    message: e.to_string(),
                });
                break false;
            }
        }
    };

    {
        let mut inner = shared.inner.lock().await;
        if inner.generation == generation && inner.state == ChannelState::Open {
            inner.state = ChannelState::Closed;
            inner.sink = None;
            inner.reader = None;
        }
    }
    tracing::info!(locally_initiated, "Realtime channel closed");
    shared.emit(ChannelEvent::Closed { locally_initiated });
}
