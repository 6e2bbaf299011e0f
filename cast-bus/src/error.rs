use std::net::SocketAddr;

use thiserror::Error;

use crate::encoder::EncoderError;

#[derive(Error, Debug)]
pub enum CastError {
    #[error("invalid audio source: {0}")]
    InvalidSource(String),

    #[error(transparent)]
    Encoder(#[from] EncoderError),

    #[error("failed to bind {addr}: {source}")]
    ServerStart {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("server already running on port {0}")]
    AlreadyRunning(u16),

    #[error("broadcast bus stopped")]
    Stopped,
}

pub type Result<T> = std::result::Result<T, CastError>;
