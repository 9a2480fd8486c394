use std::path::PathBuf;

use thiserror::Error;

use crate::bcode::DecodeError;
use crate::config::ConfigError;

/// Failures that stop a run before the machine starts.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
