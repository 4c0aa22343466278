//! Line-delimited JSON protocol definitions for the vest daemon.
//!
//! This crate provides the protocol types, transport codec, and client helper
//! for communication between the daemon and its clients over TCP.
//!
//! # Architecture
//!
//! - [`protocol`]: commands, responses, events, and error codes
//! - [`transport`]: newline-delimited codec for message framing
//! - [`client`]: TCP client helper for connecting to the daemon
//! - [`error`]: Result type alias
//!
//! # Example
//!
//! ```no_run
//! use vest_rpc::{Command, VestClient};
//!
//! # async fn example() -> Result<(), vest_rpc::ClientError> {
//! let client = VestClient::connect(("127.0.0.1", vest_rpc::DEFAULT_PORT)).await?;
//! let status = client.call(Command::Status).await?;
//! println!("connected: {:?}", status.get("connected"));
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod protocol;
pub mod transport;

// Re-export main client types
pub use client::{ClientError, DEFAULT_HOST, DEFAULT_PORT, VestClient};

// Re-export error types
pub use error::Result;

// Re-export protocol types
pub use protocol::{
    Command, ERROR_RESPONSE, EffectSource, ErrorCode, Event, EventKind, Frame, PlayEffectParams,
    Request, RequestError, RequestId, Response, unix_timestamp,
};

// Re-export transport types
pub use transport::{CodecError, DEFAULT_MAX_FRAME_BYTES, FrameError, LineCodec};

// Re-export commonly used data types from vest-types
pub use vest_types::{
    CellId, ConnectionState, DeviceDescriptor, EffectCategory, EffectInfo, EffectPattern,
    EffectStep, Intensity, PlaybackInfo,
};
