//! Result alias for vest-rpc client operations.

pub use crate::client::ClientError as Error;

pub type Result<T> = std::result::Result<T, Error>;
