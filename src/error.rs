//! Errors raised while setting up or running the reactor.

use std::io;

use thiserror::Error;

use crate::config::ConfigError;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("cannot bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("multiplexer setup failed: {0}")]
    Multiplexer(#[source] io::Error),

    #[error("cannot start worker pool: {0}")]
    WorkerPool(#[source] io::Error),

    #[error("cannot start reactor thread: {0}")]
    Spawn(#[source] io::Error),

    #[error("reactor i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("reactor thread panicked")]
    Panicked,
}
