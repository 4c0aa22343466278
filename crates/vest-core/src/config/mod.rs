mod dirs;
mod settings;
mod validation;

pub use dirs::Directories;
pub use settings::{DaemonConfig, MIN_FRAME_BYTES};
pub use validation::warn_unknown_fields;
