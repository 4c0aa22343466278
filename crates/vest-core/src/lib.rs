//! Device session, effect sequencing and configuration for the vest daemon.
//!
//! Everything here is owned by a single task. Only opening a device awaits,
//! on the blocking pool; the rest is synchronous. Timing is
//! expressed through [`tokio::time::Instant`] so callers can drive it with a
//! paused clock.

pub mod config;
pub mod device;
pub mod effects;
pub mod mock;
pub mod sequencer;
pub mod session;

mod error;

pub use config::{DaemonConfig, Directories};
pub use device::{DeviceBackend, DeviceHandle};
pub use effects::{EffectLibrary, builtin_effects};
pub use error::{DeviceError, Error, Result, SessionError};
pub use mock::{MockBackend, WriteRecord};
pub use sequencer::{Playback, Sequencer, StopOutcome, TickOutcome};
pub use session::{ConnectOutcome, DeviceScan, Selection, SessionManager, StopReport};

pub use vest_types::*;
