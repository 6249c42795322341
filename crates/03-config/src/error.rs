use thiserror::Error;

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors surfaced by the shared-config dictionary.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("shared-config arena exhausted: {0}")]
    Arena(#[from] shmc_arena::ArenaError),

    #[error("dictionary has no empty or matching slot after a full probe of {probed} entries")]
    TableFull { probed: usize },

    #[error("record codec failed: {0}")]
    Codec(String),
}

impl ConfigError {
    pub fn codec(msg: impl Into<String>) -> Self {
        ConfigError::Codec(msg.into())
    }
}
