//! TCP client helper for talking to the vest daemon.
//!
//! Wraps a `Framed` line stream: outgoing commands are tagged with a fresh
//! `req_id` and matched to their response by a background reader task, while
//! events and uncorrelated responses are queued for [`VestClient::recv`].

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tracing::{debug, warn};

use crate::protocol::{Command, ErrorCode, Event, Frame, Request, RequestId, Response};
use crate::transport::{CodecError, LineCodec};

/// Default daemon port
pub const DEFAULT_PORT: u16 = 5050;

/// Default daemon host
pub const DEFAULT_HOST: &str = "127.0.0.1";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors that can occur with the vest client
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Command rejected ({code}): {message}")]
    Rejected { code: ErrorCode, message: String },

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Request timeout")]
    Timeout,
}

type PendingRequest = oneshot::Sender<Response>;
/// `None` once the reader has stopped; no new request may wait on it.
type PendingMap = Arc<Mutex<Option<HashMap<RequestId, PendingRequest>>>>;
type LineSink = SplitSink<Framed<TcpStream, LineCodec>, String>;

/// Client connection to the vest daemon
pub struct VestClient {
    sink: Mutex<LineSink>,
    incoming_rx: mpsc::UnboundedReceiver<Frame>,
    pending: PendingMap,
    next_id: AtomicU64,
    reader: JoinHandle<()>,
    peer: SocketAddr,
}

impl VestClient {
    /// Connect to the daemon at `addr`.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Io` if the TCP connection fails.
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr).await?;
        let peer = stream.peer_addr()?;
        let framed = Framed::new(stream, LineCodec::new());
        let (sink, mut stream) = framed.split();

        let pending: PendingMap = Arc::new(Mutex::new(Some(HashMap::new())));
        let pending_clone = pending.clone();

        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();

        let reader = tokio::spawn(async move {
            while let Some(result) = stream.next().await {
                let line = match result {
                    Ok(Ok(line)) => line,
                    Ok(Err(e)) => {
                        warn!("Skipping unreadable frame from daemon: {e}");
                        continue;
                    }
                    Err(e) => {
                        debug!("Daemon connection failed: {e}");
                        break;
                    }
                };

                let frame = match Frame::parse(&line) {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!("Skipping malformed frame from daemon: {e}");
                        continue;
                    }
                };

                if let Frame::Response(response) = &frame
                    && let Some(id) = &response.req_id
                    && let Some(tx) = pending_clone
                        .lock()
                        .await
                        .as_mut()
                        .and_then(|waiting| waiting.remove(id))
                {
                    let _ = tx.send(response.clone());
                    continue;
                }

                if incoming_tx.send(frame).is_err() {
                    break;
                }
            }

            // Dropping the senders wakes every waiter with ConnectionClosed.
            pending_clone.lock().await.take();
        });

        Ok(Self {
            sink: Mutex::new(sink),
            incoming_rx,
            pending,
            next_id: AtomicU64::new(1),
            reader,
            peer,
        })
    }

    #[must_use]
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Send a command and wait for its response, successful or not.
    ///
    /// # Errors
    ///
    /// Returns an error if sending fails, the connection closes, or no
    /// response arrives in time.
    pub async fn request(&self, command: Command) -> Result<Response, ClientError> {
        let id = RequestId::Number(self.next_id.fetch_add(1, Ordering::SeqCst));
        let line = serde_json::to_string(&Request::new(command, Some(id.clone())))?;

        let (tx, rx) = oneshot::channel();
        match self.pending.lock().await.as_mut() {
            Some(waiting) => waiting.insert(id.clone(), tx),
            None => return Err(ClientError::ConnectionClosed),
        };

        if let Err(e) = self.send_line(line).await {
            if let Some(waiting) = self.pending.lock().await.as_mut() {
                waiting.remove(&id);
            }
            return Err(e);
        }

        tokio::time::timeout(REQUEST_TIMEOUT, rx)
            .await
            .map_err(|_| ClientError::Timeout)?
            .map_err(|_| ClientError::ConnectionClosed)
    }

    /// Like [`request`](Self::request) but turns a failed response into an error.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Rejected` when the daemon answers `success: false`.
    pub async fn call(&self, command: Command) -> Result<Response, ClientError> {
        let response = self.request(command).await?;
        if response.success {
            return Ok(response);
        }
        Err(ClientError::Rejected {
            code: response.code.unwrap_or(ErrorCode::ProtocolError),
            message: response.message.unwrap_or_default(),
        })
    }

    /// Write one raw line, bypassing request correlation.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Codec` if the write fails.
    pub async fn send_line(&self, line: impl Into<String>) -> Result<(), ClientError> {
        let mut sink = self.sink.lock().await;
        sink.send(line.into()).await?;
        Ok(())
    }

    /// Next event or uncorrelated response, in arrival order.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.incoming_rx.recv().await
    }

    /// Next event, skipping any uncorrelated responses.
    pub async fn next_event(&mut self) -> Option<Event> {
        loop {
            match self.recv().await? {
                Frame::Event(event) => return Some(event),
                Frame::Response(response) => {
                    debug!("Ignoring uncorrelated response: {}", response.response);
                }
            }
        }
    }

    /// Frames already received, without waiting.
    pub fn try_recv(&mut self) -> Option<Frame> {
        self.incoming_rx.try_recv().ok()
    }

    /// Close the write half and stop the reader.
    pub async fn close(self) {
        let _ = self.sink.lock().await.close().await;
    }
}

impl Drop for VestClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}
