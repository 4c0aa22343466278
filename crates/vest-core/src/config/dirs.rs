use directories::ProjectDirs;
use std::path::PathBuf;

/// Platform config locations for the daemon
#[derive(Debug, Clone)]
pub struct Directories {
    /// Config directory (~/.config/vest on Linux)
    pub config: PathBuf,

    /// Config file path
    pub config_file: PathBuf,
}

impl Directories {
    /// Standard platform paths, or `None` when no home directory is known.
    #[must_use]
    pub fn new() -> Option<Self> {
        let project = ProjectDirs::from("", "", "vest")?;
        Some(Self::with_base(project.config_dir().to_path_buf()))
    }

    #[must_use]
    pub fn with_base(base: PathBuf) -> Self {
        Self {
            config_file: base.join("config.json"),
            config: base,
        }
    }
}
