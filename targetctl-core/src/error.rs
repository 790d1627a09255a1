use crate::bus::BusError;
use crate::model::UnitAction;
use crate::wire::{DecodeError, EncodeError};

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Everything that can go wrong between the UI and the service manager.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The reply payload did not match what the call promises.
    #[error("malformed reply: {0}")]
    Decode(#[from] DecodeError),
    /// Well-formed reply carrying a value we do not understand.
    #[error("unexpected reply: {0}")]
    Protocol(String),
    /// The manager has no such unit loaded.
    #[error("unit {unit} not found: {message}")]
    NotFound { unit: String, message: String },
    /// The manager refused a lifecycle action.
    #[error("failed to {action} {unit}: {message}")]
    Action {
        unit: String,
        action: UnitAction,
        message: String,
    },
    /// The bus itself failed.
    #[error("connection error: {0}")]
    Connection(String),
}

impl Error {
    /// Errors after which the UI may keep running.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Error::Connection(_))
    }
}

impl From<EncodeError> for Error {
    fn from(e: EncodeError) -> Self {
        Error::Protocol(format!("cannot encode call arguments: {}", e))
    }
}

impl From<BusError> for Error {
    fn from(e: BusError) -> Self {
        match e {
            BusError::Transport(message) => Error::Connection(message),
            BusError::MethodError { name, message } => {
                Error::Protocol(format!("{}: {}", name, message))
            }
        }
    }
}
