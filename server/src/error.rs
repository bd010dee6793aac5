use std::io;
use thiserror::Error;

/// Failures that stop the server from starting or running at all.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to build async runtime: {0}")]
    Runtime(#[source] io::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
