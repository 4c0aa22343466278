//! Vest daemon library providing the TCP server, client registry and router.
//!
//! This crate owns the single device session on behalf of every connected
//! client (UI, game mods, scripts) and broadcasts what happens to all of them.

pub mod error;
pub(crate) mod handlers;
pub mod registry;
pub mod router;
pub mod server;

pub use error::{DaemonError, Result};
pub use registry::{ClientId, ClientInfo, ClientRegistry, Delivery, Outbound};
pub use router::{Input, Router};
pub use server::{bind, run, serve};
