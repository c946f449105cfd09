use dash_player::{Algorithm, ConfigError, ManifestError, SessionError};
use thiserror::Error;

/// Fatal outcomes of a client run. Each one names the stage that failed.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("manifest load failed: {0}")]
    Manifest(#[from] ManifestError),
    #[error("{algorithm} playback failed: {source}")]
    Session {
        algorithm: Algorithm,
        #[source]
        source: SessionError,
    },
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
