//! TCP server for the vest daemon.
//!
//! Accepts connections, frames them with [`LineCodec`] and gives each one a
//! reader loop and a writer task. Readers parse lines into requests and hand
//! them to the router; writers drain the client's outbound queue. Neither
//! touches session state.

use std::future::Future;
use std::net::SocketAddr;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tracing::{debug, error, info, trace, warn};
use vest_core::{DaemonConfig, MockBackend};
use vest_rpc::protocol::{Request, RequestError};
use vest_rpc::transport::LineCodec;

use crate::error::Result;
use crate::registry::{ClientId, Outbound};
use crate::router::{INBOX_CAPACITY, Input, Router};

/// Per-connection limits taken from config.
#[derive(Debug, Clone, Copy)]
struct ConnectionLimits {
    queue_capacity: usize,
    max_frame_bytes: usize,
}

impl From<&DaemonConfig> for ConnectionLimits {
    fn from(config: &DaemonConfig) -> Self {
        Self {
            queue_capacity: config.outbound_queue_capacity,
            max_frame_bytes: config.max_frame_bytes,
        }
    }
}

/// Bind the configured address. Failure here is fatal to startup.
///
/// # Errors
///
/// Returns an error if the address cannot be bound.
pub async fn bind(config: &DaemonConfig) -> Result<TcpListener> {
    let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
    Ok(listener)
}

/// Run the daemon with the mock backend until Ctrl-C or a `shutdown` command.
///
/// # Errors
///
/// Returns an error if the listener cannot be bound or the config is invalid.
pub async fn run(config: DaemonConfig) -> Result<()> {
    let listener = bind(&config).await?;
    let backend = MockBackend::simulated(config.mock_devices);
    let router = Router::new(Box::new(backend), &config)?;

    serve(listener, router, &config, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    })
    .await
}

/// Serve connections on `listener` until `shutdown` resolves or a client
/// sends `shutdown`.
///
/// # Errors
///
/// Returns an error if the listener's local address cannot be read.
pub async fn serve(
    listener: TcpListener,
    router: Router,
    config: &DaemonConfig,
    shutdown: impl Future<Output = ()>,
) -> Result<()> {
    let limits = ConnectionLimits::from(config);
    let (inbox, inbox_rx) = mpsc::channel(INBOX_CAPACITY);
    let mut router_task = tokio::spawn(router.run(inbox_rx));
    tokio::pin!(shutdown);

    info!("Daemon listening on {}", listener.local_addr()?);
    let router_finished = loop {
        tokio::select! {
            result = &mut router_task => {
                if let Err(e) = result {
                    error!("Router task failed: {e}");
                }
                break true;
            }
            () = &mut shutdown => {
                info!("Shutdown requested, stopping server");
                break false;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!("Accepted connection from {peer}");
                    tokio::spawn(handle_connection(stream, peer, inbox.clone(), limits));
                }
                Err(e) => error!("Accept error: {e}"),
            },
        }
    };

    if !router_finished {
        if inbox.send(Input::Shutdown).await.is_err() {
            warn!("Router already gone");
        }
        if let Err(e) = router_task.await {
            error!("Router task failed: {e}");
        }
    }

    info!("Daemon stopped");
    Ok(())
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    inbox: mpsc::Sender<Input>,
    limits: ConnectionLimits,
) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!("Failed to set TCP_NODELAY for {peer}: {e}");
    }

    let framed = Framed::new(stream, LineCodec::with_max_length(limits.max_frame_bytes));
    let (mut sink, mut lines) = framed.split();

    let id = ClientId::new();
    let (tx, mut rx) = mpsc::channel::<Outbound>(limits.queue_capacity);
    let connected = Input::Connected {
        id: id.clone(),
        peer: Some(peer),
        sender: tx,
    };
    if inbox.send(connected).await.is_err() {
        return;
    }

    let writer_id = id.clone();
    let mut send_task = tokio::spawn(async move {
        trace!("[{writer_id}] send_task started");
        while let Some(line) = rx.recv().await {
            if let Err(e) = sink.send(line).await {
                warn!("Failed to send to {writer_id}: {e}");
                break;
            }
        }
        if let Err(e) = sink.close().await {
            trace!("[{writer_id}] close failed: {e}");
        }
        trace!("[{writer_id}] send_task ended");
    });

    loop {
        tokio::select! {
            _ = &mut send_task => {
                debug!("Writer for {id} finished, closing connection");
                break;
            }
            frame = lines.next() => {
                let input = match frame {
                    Some(Ok(Ok(line))) => match Request::parse(&line) {
                        Ok(request) => Input::Request { id: id.clone(), request },
                        Err(error) => Input::Rejected { id: id.clone(), error },
                    },
                    Some(Ok(Err(e))) => Input::Rejected {
                        id: id.clone(),
                        error: RequestError::protocol(None, e.to_string()),
                    },
                    Some(Err(e)) => {
                        debug!("Read error from {id}: {e}");
                        break;
                    }
                    None => {
                        debug!("Connection closed by {id}");
                        break;
                    }
                };
                if inbox.send(input).await.is_err() {
                    break;
                }
            }
        }
    }

    // The writer keeps draining until the router drops this client's queue.
    let _ = inbox.send(Input::Disconnected { id }).await;
}
