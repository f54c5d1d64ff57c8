use std::{error::Error, fmt, io};

use model::ModelError;

/// The client module's result type.
pub type Result<T> = std::result::Result<T, ClientErr>;

/// Client engine failures.
#[derive(Debug)]
pub enum ClientErr {
    Io(io::Error),
    Model(ModelError),
    UnexpectedMessage {
        got: &'static str,
    },
    /// The writer task is gone, so updates can no longer reach the server.
    Disconnected,
}

impl fmt::Display for ClientErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientErr::Io(e) => write!(f, "io error: {e}"),
            ClientErr::Model(e) => write!(f, "model error: {e}"),
            ClientErr::UnexpectedMessage { got } => {
                write!(f, "unexpected message: got {got}")
            }
            ClientErr::Disconnected => write!(f, "engine transport is disconnected"),
        }
    }
}

impl Error for ClientErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ClientErr::Io(e) => Some(e),
            ClientErr::Model(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for ClientErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<ModelError> for ClientErr {
    fn from(value: ModelError) -> Self {
        Self::Model(value)
    }
}

/// Boundary conversion for binaries / I/O APIs.
impl From<ClientErr> for io::Error {
    fn from(value: ClientErr) -> Self {
        match value {
            ClientErr::Io(e) => e,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}
