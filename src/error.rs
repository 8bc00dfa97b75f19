//! Error taxonomy for the worker
//!
//! Nothing in here is allowed to kill the process: intake loops drop the
//! offending frame and continue, dispatch tasks release their slot, and only
//! the lifecycle path decides the exit code.

use thiserror::Error;

/// Frame decode failures. The frame is dropped and a counter advances.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("frame decode failed: {0}")]
    Decode(#[from] bincode::Error),

    #[error("argument with empty name")]
    UnnamedArgument,

    #[error("argument {0:?} carries no value, reference, or selection")]
    EmptyArgument(String),

    #[error("frame encode failed: {0}")]
    Encode(#[source] bincode::Error),
}

/// Key-material and frame-authentication failures.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("failed to read key file {path}: {source}")]
    KeyFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("key file {path} holds {len} bytes, need at least {expected}")]
    ShortKey {
        path: String,
        len: usize,
        expected: usize,
    },

    #[error("frame too short to carry a nonce")]
    Truncated,

    #[error("frame authentication failed")]
    Open,

    #[error("frame seal failed")]
    Seal,

    #[error("sealed envelope decode failed: {0}")]
    Envelope(#[from] bincode::Error),
}

/// Socket send/recv failures on the control and results channels.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("socket error: {0}")]
    Socket(#[from] zeromq::ZmqError),

    #[error("transport closed")]
    Closed,
}

/// Admission failures in the workflow registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("registry is at capacity")]
    Full,

    #[error("execution {0} is already live on this worker")]
    DuplicateExecution(String),
}

/// Aggregate error type for worker plumbing.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("workflow {0} not found")]
    WorkflowNotFound(String),

    #[error("no saved state for execution {0}")]
    SavedStateMissing(String),

    #[error("interpreter failure: {0}")]
    Interpreter(#[source] anyhow::Error),

    #[error("queue backend error: {0}")]
    Queue(#[source] anyhow::Error),
}
