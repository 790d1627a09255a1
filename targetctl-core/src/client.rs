//! Unit-level operations mapped onto manager calls.
//!
//! Every query re-resolves the unit name to its object path first; nothing is
//! cached, so a unit that was unloaded and loaded again is always found fresh.

use std::sync::Arc;

use tracing::debug;

use crate::bus::{
    Bus, BusError, MANAGER_INTERFACE, MANAGER_PATH, MethodCall, PROPERTIES_INTERFACE,
    UNIT_INTERFACE, error_names,
};
use crate::error::{Error, Result};
use crate::model::{ActiveState, MonotonicTime, RelationKind, UnitAction, UnitPath};
use crate::wire::{self, DecodeError, MessageWriter, Payload, Type, Value};

/// Job mode passed with every lifecycle call.
pub const JOB_MODE: &str = "replace";

const ACTIVE_STATE: &str = "ActiveState";
const STATE_CHANGE_TIMESTAMP: &str = "StateChangeTimestampMonotonic";

#[derive(Clone)]
pub struct UnitClient {
    bus: Arc<dyn Bus>,
}

impl std::fmt::Debug for UnitClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitClient")
            .field("bus", &self.bus.name())
            .finish()
    }
}

fn string_args(args: &[&str]) -> Result<Payload> {
    let mut writer = MessageWriter::new();
    for arg in args {
        writer.write(&Type::String, &Value::from(*arg))?;
    }
    Ok(writer.finish())
}

impl UnitClient {
    pub fn new(bus: Arc<dyn Bus>) -> Self {
        Self { bus }
    }

    /// Look up the object path of a loaded unit.
    pub async fn resolve(&self, unit: &str) -> Result<UnitPath> {
        let call = MethodCall::new(
            MANAGER_PATH,
            MANAGER_INTERFACE,
            "GetUnit",
            string_args(&[unit])?,
        );
        let reply = self.bus.call(call).await.map_err(|e| match e {
            BusError::MethodError { message, .. } => Error::NotFound {
                unit: unit.to_string(),
                message,
            },
            BusError::Transport(message) => Error::Connection(message),
        })?;

        let mut reader = reply.reader()?;
        let path = wire::decode(&Type::ObjectPath, &mut reader)?
            .into_string()
            .ok_or_else(|| Error::Protocol("GetUnit returned no object path".to_string()))?;
        Ok(UnitPath(path))
    }

    async fn property(&self, unit: &str, property: &str, ty: &Type) -> Result<Value> {
        let path = self.resolve(unit).await?;
        let call = MethodCall::new(
            path.as_str(),
            PROPERTIES_INTERFACE,
            "Get",
            string_args(&[UNIT_INTERFACE, property])?,
        );
        let reply = self.bus.call(call).await.map_err(|e| match e {
            BusError::MethodError { name, message }
                if name == error_names::UNKNOWN_OBJECT || name == error_names::NO_SUCH_UNIT =>
            {
                Error::NotFound {
                    unit: unit.to_string(),
                    message,
                }
            }
            BusError::MethodError { message, .. } => {
                Error::Protocol(format!("reading {} of {}: {}", property, unit, message))
            }
            BusError::Transport(message) => Error::Connection(message),
        })?;

        let mut reader = reply.reader()?;
        let mut scope = reader
            .enter_variant(ty)?
            .ok_or_else(|| DecodeError::Exhausted("v".to_string()))?;
        let value = wire::decode(ty, &mut scope)?;
        scope.exit()?;
        Ok(value)
    }

    /// Names of the units on the other end of `relation`, in manager order.
    pub async fn list_related(&self, unit: &str, relation: RelationKind) -> Result<Vec<String>> {
        self.property(unit, relation.property(), &Type::array(Type::String))
            .await?
            .into_strings()
            .ok_or_else(|| Error::Protocol(format!("{} is not a list of names", relation)))
    }

    pub async fn active_state(&self, unit: &str) -> Result<ActiveState> {
        let value = self.property(unit, ACTIVE_STATE, &Type::String).await?;
        let name = value.as_str().unwrap_or_default();
        ActiveState::from_bus_name(name).ok_or_else(|| {
            Error::Protocol(format!("unknown active state '{}' for {}", name, unit))
        })
    }

    pub async fn state_change_time(&self, unit: &str) -> Result<MonotonicTime> {
        self.property(unit, STATE_CHANGE_TIMESTAMP, &Type::Uint64)
            .await?
            .as_u64()
            .map(MonotonicTime::from_micros)
            .ok_or_else(|| Error::Protocol(format!("{} is not a timestamp", STATE_CHANGE_TIMESTAMP)))
    }

    /// Queue `action` for `unit`. The name goes straight to the manager
    /// without resolving it first. Failures are returned as-is, never retried.
    pub async fn perform(&self, action: UnitAction, unit: &str) -> Result<()> {
        let call = MethodCall::new(
            MANAGER_PATH,
            MANAGER_INTERFACE,
            action.method(),
            string_args(&[unit, JOB_MODE])?,
        );
        let reply = self.bus.call(call).await.map_err(|e| match e {
            BusError::MethodError { message, .. } => Error::Action {
                unit: unit.to_string(),
                action,
                message,
            },
            BusError::Transport(message) => Error::Connection(message),
        })?;

        let job = wire::decode(&Type::ObjectPath, &mut reply.reader()?)?
            .into_string()
            .ok_or_else(|| Error::Protocol(format!("{} did not return a job path", action.method())))?;
        debug!(unit, %action, job = %job, "job queued");
        Ok(())
    }

    pub async fn start(&self, unit: &str) -> Result<()> {
        self.perform(UnitAction::Start, unit).await
    }

    pub async fn stop(&self, unit: &str) -> Result<()> {
        self.perform(UnitAction::Stop, unit).await
    }

    pub async fn restart(&self, unit: &str) -> Result<()> {
        self.perform(UnitAction::Restart, unit).await
    }

    pub async fn reload(&self, unit: &str) -> Result<()> {
        self.perform(UnitAction::Reload, unit).await
    }
}
