//! Command/event router.
//!
//! A single task owns the session, the sequencer and the client registry.
//! Connection tasks hand it parsed requests through one channel, so every
//! command runs to completion, its response queued and its events broadcast,
//! before the next one starts. The same loop fires playback steps and device
//! discovery. A device open is awaited in place: the next input waits for it,
//! while connection tasks keep reading and writing.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use vest_core::{
    DaemonConfig, DeviceBackend, EffectLibrary, Sequencer, SessionManager, TickOutcome,
};
use vest_rpc::protocol::{Event, EventKind, Request, RequestError, Response};

use crate::error::{DaemonError, Result};
use crate::handlers::{self, HandlerContext};
use crate::registry::{ClientId, ClientInfo, ClientRegistry, Delivery, Outbound};

/// Capacity of the router's inbox.
pub const INBOX_CAPACITY: usize = 256;

/// Messages from connection tasks and the server.
#[derive(Debug)]
pub enum Input {
    Connected {
        id: ClientId,
        peer: Option<SocketAddr>,
        sender: mpsc::Sender<Outbound>,
    },
    Request {
        id: ClientId,
        request: Request,
    },
    /// A line that could not be parsed into a request.
    Rejected {
        id: ClientId,
        error: RequestError,
    },
    Disconnected {
        id: ClientId,
    },
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

pub struct Router {
    session: SessionManager,
    sequencer: Sequencer,
    registry: ClientRegistry,
    library: EffectLibrary,
    discovery_interval: Option<Duration>,
}

impl Router {
    /// Build a router from config.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured effects do not form a valid library.
    pub fn new(backend: Box<dyn DeviceBackend>, config: &DaemonConfig) -> Result<Self> {
        let library = config.effect_library()?;
        Ok(Self::with_library(
            backend,
            library,
            config.discovery_interval(),
        ))
    }

    #[must_use]
    pub fn with_library(
        backend: Box<dyn DeviceBackend>,
        library: EffectLibrary,
        discovery_interval: Option<Duration>,
    ) -> Self {
        let mut session = SessionManager::new(backend);
        let scan = session.list_devices();
        info!("Found {} device(s) at startup", scan.devices.len());

        Self {
            session,
            sequencer: Sequencer::new(),
            registry: ClientRegistry::new(),
            library,
            discovery_interval,
        }
    }

    /// Run until a shutdown is requested or every input sender is gone.
    pub async fn run(mut self, mut inbox: mpsc::Receiver<Input>) {
        let mut discovery = self.discovery_interval.map(|period| {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });

        debug!("Router started");
        loop {
            let deadline = self.sequencer.deadline();
            tokio::select! {
                biased;

                () = playback_due(deadline) => self.advance_playback(),
                () = discovery_due(discovery.as_mut()) => self.poll_devices(),
                input = inbox.recv() => {
                    let Some(input) = input else {
                        debug!("Router inbox closed");
                        break;
                    };
                    if self.handle_input(input).await == Flow::Stop {
                        break;
                    }
                }
            }
        }

        self.shutdown();
        debug!("Router stopped");
    }

    async fn handle_input(&mut self, input: Input) -> Flow {
        match input {
            Input::Connected { id, peer, sender } => {
                info!("Client connected: {id}");
                self.registry.register(id.clone(), sender, peer);
                self.broadcast([EventKind::ClientConnected {
                    client_id: id.to_string(),
                    client_name: None,
                }]);
            }
            Input::Request { id, request } => return self.dispatch(&id, request).await,
            Input::Rejected { id, error } => {
                debug!("Rejected frame from {id}: {error}");
                let evicted = self.reply(&id, &error.into_response());
                self.broadcast(evicted.map(client_disconnected));
            }
            Input::Disconnected { id } => {
                if let Some(client) = self.registry.unregister(&id) {
                    info!("Client disconnected: {id}");
                    self.broadcast([client_disconnected(client)]);
                }
            }
            Input::Shutdown => {
                info!("Shutdown signal received");
                return Flow::Stop;
            }
        }
        Flow::Continue
    }

    async fn dispatch(&mut self, id: &ClientId, request: Request) -> Flow {
        if !self.registry.contains(id) {
            debug!("Ignoring {} from departed client {id}", request.command.verb());
            return Flow::Continue;
        }

        let mut ctx = HandlerContext {
            session: &mut self.session,
            sequencer: &mut self.sequencer,
            registry: &mut self.registry,
            library: &self.library,
            client_id: id,
            events: Vec::new(),
            shutdown_requested: false,
        };
        let response = handlers::handle_request(&mut ctx, request).await;
        let HandlerContext {
            events,
            shutdown_requested,
            ..
        } = ctx;

        let evicted = self.reply(id, &response);
        self.broadcast(events.into_iter().chain(evicted.map(client_disconnected)));

        if shutdown_requested {
            Flow::Stop
        } else {
            Flow::Continue
        }
    }

    fn advance_playback(&mut self) {
        let Some(outcome) = self.sequencer.tick(&mut self.session, Instant::now()) else {
            return;
        };

        let mut events = Vec::new();
        match outcome {
            TickOutcome::Step {
                effect_name,
                triggered,
                intensity,
                ..
            } => {
                events.extend(triggered.into_iter().map(|cell| EventKind::EffectTriggered {
                    cell,
                    speed: intensity,
                    effect_name: Some(effect_name.clone()),
                }));
            }
            TickOutcome::Completed { effect_name } => {
                events.push(EventKind::EffectCompleted { effect_name });
            }
            TickOutcome::Failed {
                effect_name,
                step,
                triggered,
                intensity,
                error,
            } => {
                events.extend(triggered.into_iter().map(|cell| EventKind::EffectTriggered {
                    cell,
                    speed: intensity,
                    effect_name: Some(effect_name.clone()),
                }));
                let error = DaemonError::from(error);
                events.push(EventKind::Error {
                    message: format!("Effect {effect_name} aborted at step {}: {error}", step + 1),
                    code: Some(error.code()),
                });
                if !self.session.is_connected() {
                    events.push(EventKind::Disconnected {
                        device: self.session.selected().cloned(),
                        reason: Some("device unavailable".to_string()),
                    });
                }
            }
        }
        self.broadcast(events);
    }

    fn poll_devices(&mut self) {
        let scan = self.session.list_devices();
        let events = handlers::scan_events(&mut self.sequencer, &scan);
        if !events.is_empty() {
            debug!("Device poll produced {} event(s)", events.len());
        }
        self.broadcast(events);
    }

    /// Queue a response for one client. Returns the client if this evicted it;
    /// the caller announces that after the events of the same command.
    fn reply(&mut self, id: &ClientId, response: &Response) -> Option<ClientInfo> {
        let line = encode(response)?;
        match self.registry.send(id, line) {
            Delivery::Evicted(client) => Some(client),
            Delivery::Queued | Delivery::Dropped => None,
        }
    }

    /// Broadcast in order. Clients evicted along the way are announced after
    /// the events already queued.
    fn broadcast(&mut self, events: impl IntoIterator<Item = EventKind>) {
        let mut queue: VecDeque<EventKind> = events.into_iter().collect();
        while let Some(kind) = queue.pop_front() {
            let event = Event::new(kind);
            let Some(line) = encode(&event) else {
                continue;
            };
            for client in self.registry.broadcast(&line) {
                queue.push_back(client_disconnected(client));
            }
        }
    }

    fn shutdown(&mut self) {
        if let Some(name) = self.sequencer.cancel() {
            info!("Cancelled effect {name} for shutdown");
        }
        let report = self.session.stop_all();
        if !report.is_clean() {
            warn!("{} cells failed to stop on shutdown", report.failed.len());
        }
        if let Some(device) = self.session.disconnect() {
            self.broadcast([EventKind::Disconnected {
                device: Some(device),
                reason: Some("daemon shutting down".to_string()),
            }]);
        }
    }
}

fn client_disconnected(client: ClientInfo) -> EventKind {
    EventKind::ClientDisconnected {
        client_id: client.client_id.to_string(),
        client_name: client.name,
    }
}

fn encode<T: Serialize>(frame: &T) -> Option<Outbound> {
    match serde_json::to_string(frame) {
        Ok(line) => Some(line.into()),
        Err(e) => {
            error!("Failed to encode frame: {e}");
            None
        }
    }
}

async fn playback_due(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn discovery_due(interval: Option<&mut Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
