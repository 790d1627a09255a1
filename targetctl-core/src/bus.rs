//! Transport seam between the unit client and whatever carries messages to
//! the service manager.

use async_trait::async_trait;
use std::fmt;

use crate::wire::Payload;

pub const SERVICE_NAME: &str = "org.freedesktop.systemd1";
pub const MANAGER_PATH: &str = "/org/freedesktop/systemd1";
pub const MANAGER_INTERFACE: &str = "org.freedesktop.systemd1.Manager";
pub const UNIT_INTERFACE: &str = "org.freedesktop.systemd1.Unit";
pub const PROPERTIES_INTERFACE: &str = "org.freedesktop.DBus.Properties";

/// Error names the manager replies with that we map specially.
pub mod error_names {
    pub const NO_SUCH_UNIT: &str = "org.freedesktop.systemd1.NoSuchUnit";
    pub const UNKNOWN_OBJECT: &str = "org.freedesktop.DBus.Error.UnknownObject";
    pub const UNKNOWN_PROPERTY: &str = "org.freedesktop.DBus.Error.UnknownProperty";
    pub const ACCESS_DENIED: &str = "org.freedesktop.DBus.Error.AccessDenied";
    pub const JOB_TYPE_NOT_APPLICABLE: &str = "org.freedesktop.systemd1.JobTypeNotApplicable";
}

/// One method call addressed to the manager.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MethodCall {
    pub destination: String,
    pub path: String,
    pub interface: String,
    pub member: String,
    pub args: Payload,
}

impl MethodCall {
    pub fn new(path: impl Into<String>, interface: &str, member: &str, args: Payload) -> Self {
        Self {
            destination: SERVICE_NAME.to_string(),
            path: path.into(),
            interface: interface.to_string(),
            member: member.to_string(),
            args,
        }
    }
}

impl fmt::Display for MethodCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}({}) on {}",
            self.interface, self.member, self.args.signature, self.path
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum BusError {
    /// The peer answered with an error reply.
    #[error("{message}")]
    MethodError { name: String, message: String },
    /// The call never got an answer: the connection is broken or unusable.
    #[error("bus transport error: {0}")]
    Transport(String),
}

impl BusError {
    pub fn method(name: &str, message: impl Into<String>) -> Self {
        BusError::MethodError {
            name: name.to_string(),
            message: message.into(),
        }
    }

    pub fn is_named(&self, wanted: &str) -> bool {
        matches!(self, BusError::MethodError { name, .. } if name == wanted)
    }
}

/// A request/reply connection to the service manager.
///
/// Calls are synchronous exchanges: the future resolves when the reply (or an
/// error) arrives. There is no timeout layer.
#[async_trait]
pub trait Bus: Send + Sync {
    /// Human-readable name of this transport
    fn name(&self) -> &'static str;

    async fn call(&self, call: MethodCall) -> Result<Payload, BusError>;
}
