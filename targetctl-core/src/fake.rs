//! In-memory service manager speaking the bus protocol.
//!
//! Backs `--demo` mode and the tests: replies are marshalled with the same
//! codec the client decodes with, so every exchange crosses the wire format.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::bus::{
    Bus, BusError, MANAGER_INTERFACE, MethodCall, PROPERTIES_INTERFACE, UNIT_INTERFACE,
    error_names,
};
use crate::model::{ActiveState, MonotonicTime, RelationKind, UnitAction};
use crate::wire::{self, MessageWriter, Payload, Type, Value};

const UNIT_PATH_PREFIX: &str = "/org/freedesktop/systemd1/unit/";
const INVALID_ARGS: &str = "org.freedesktop.DBus.Error.InvalidArgs";
const UNKNOWN_METHOD: &str = "org.freedesktop.DBus.Error.UnknownMethod";
const UNKNOWN_INTERFACE: &str = "org.freedesktop.DBus.Error.UnknownInterface";

#[derive(Clone, Debug)]
pub struct FakeUnit {
    /// Raw state string, so tests can serve values the client must reject.
    pub active_state: String,
    pub state_change_usec: u64,
    pub relations: BTreeMap<RelationKind, Vec<String>>,
    pub can_reload: bool,
}

impl FakeUnit {
    fn new(state: &str, at_usec: u64) -> Self {
        Self {
            active_state: state.to_string(),
            state_change_usec: at_usec,
            relations: BTreeMap::new(),
            can_reload: false,
        }
    }
}

#[derive(Debug, Default)]
struct FakeState {
    units: BTreeMap<String, FakeUnit>,
    denied: BTreeMap<String, String>,
    calls: Vec<String>,
    next_job: u32,
    disconnected: bool,
}

#[derive(Debug, Default)]
pub struct FakeManager {
    state: Mutex<FakeState>,
}

/// Escape a unit name into its object path label the way the manager does:
/// ASCII alphanumerics pass through (except a leading digit), everything else
/// becomes `_xx`.
pub fn unit_object_path(name: &str) -> String {
    let mut path = String::from(UNIT_PATH_PREFIX);
    if name.is_empty() {
        path.push('_');
        return path;
    }
    for (i, b) in name.bytes().enumerate() {
        if b.is_ascii_alphabetic() || (b.is_ascii_digit() && i > 0) {
            path.push(b as char);
        } else {
            path.push_str(&format!("_{:02x}", b));
        }
    }
    path
}

impl FakeManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add (or replace) a unit in `state`, changed at `at_usec`.
    pub fn add_unit(&self, name: &str, state: &str, at_usec: u64) {
        self.lock()
            .units
            .insert(name.to_string(), FakeUnit::new(state, at_usec));
    }

    /// Record `from --relation--> to`, and the inverse edge on each target.
    pub fn link(&self, from: &str, relation: RelationKind, to: &[&str]) {
        let mut state = self.lock();
        for target in to {
            if let Some(unit) = state.units.get_mut(from) {
                unit.relations
                    .entry(relation)
                    .or_default()
                    .push(target.to_string());
            }
            if let Some(unit) = state.units.get_mut(*target) {
                unit.relations
                    .entry(relation.inverse())
                    .or_default()
                    .push(from.to_string());
            }
        }
    }

    /// Overwrite a relation list verbatim (no inverse edges, order kept).
    pub fn set_related(&self, from: &str, relation: RelationKind, to: &[&str]) {
        if let Some(unit) = self.lock().units.get_mut(from) {
            unit.relations
                .insert(relation, to.iter().map(|s| s.to_string()).collect());
        }
    }

    pub fn set_state(&self, name: &str, state: &str, at_usec: u64) {
        if let Some(unit) = self.lock().units.get_mut(name) {
            unit.active_state = state.to_string();
            unit.state_change_usec = at_usec;
        }
    }

    pub fn set_can_reload(&self, name: &str, can_reload: bool) {
        if let Some(unit) = self.lock().units.get_mut(name) {
            unit.can_reload = can_reload;
        }
    }

    pub fn remove_unit(&self, name: &str) {
        self.lock().units.remove(name);
    }

    /// Refuse every lifecycle action on `name` with `message`.
    pub fn deny(&self, name: &str, message: &str) {
        self.lock()
            .denied
            .insert(name.to_string(), message.to_string());
    }

    pub fn unit(&self, name: &str) -> Option<FakeUnit> {
        self.lock().units.get(name).cloned()
    }

    /// Calls received so far, as `Member argument`.
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Fail every later call as if the bus went away.
    pub fn disconnect(&self) {
        self.lock().disconnected = true;
    }

    /// A small machine: slices, a few services and the usual targets.
    pub fn demo() -> Self {
        let manager = Self::new();
        let now = MonotonicTime::now().as_micros();
        let units = [
            ("-.slice", "active"),
            ("system.slice", "active"),
            ("user.slice", "active"),
            ("user-1000.slice", "active"),
            ("user@1000.service", "active"),
            ("init.scope", "active"),
            ("sshd.service", "active"),
            ("cron.service", "inactive"),
            ("nginx.service", "active"),
            ("postgresql.service", "failed"),
            ("dbus.service", "active"),
            ("dbus.socket", "active"),
            ("multi-user.target", "active"),
            ("basic.target", "active"),
            ("sockets.target", "active"),
        ];
        for (i, (name, state)) in units.iter().enumerate() {
            let age = (i as u64 + 1) * 2_345_678_901;
            manager.add_unit(name, state, now.saturating_sub(age));
        }

        let system = [
            "sshd.service",
            "cron.service",
            "nginx.service",
            "postgresql.service",
            "dbus.service",
            "dbus.socket",
        ];
        for relation in [RelationKind::RequiredBy, RelationKind::ConsistsOf] {
            manager.link("-.slice", relation, &["system.slice", "user.slice", "init.scope"]);
            manager.link("system.slice", relation, &system);
            manager.link("user.slice", relation, &["user-1000.slice"]);
            manager.link("user-1000.slice", relation, &["user@1000.service"]);
        }
        manager.link(
            "multi-user.target",
            RelationKind::Wants,
            &["sshd.service", "cron.service", "nginx.service", "postgresql.service"],
        );
        manager.link("multi-user.target", RelationKind::Requires, &["basic.target"]);
        manager.link("basic.target", RelationKind::Requires, &["sockets.target"]);
        manager.link("sockets.target", RelationKind::Wants, &["dbus.socket"]);
        manager.link("dbus.service", RelationKind::Requires, &["dbus.socket"]);
        manager.link("nginx.service", RelationKind::Wants, &["postgresql.service"]);

        manager.set_can_reload("nginx.service", true);
        manager.set_can_reload("dbus.service", true);
        manager.deny(
            "dbus.service",
            "Operation refused, unit dbus.service may be requested by dependency only \
             (it is configured to refuse manual start/stop).",
        );
        manager
    }

    fn get_unit(state: &FakeState, call: &MethodCall) -> Result<Payload, BusError> {
        let [name] = string_args::<1>(call)?;
        if !state.units.contains_key(&name) {
            return Err(BusError::method(
                error_names::NO_SUCH_UNIT,
                format!("Unit {} not loaded.", name),
            ));
        }
        reply(&Type::ObjectPath, Value::ObjectPath(unit_object_path(&name)))
    }

    fn get_property(state: &FakeState, call: &MethodCall) -> Result<Payload, BusError> {
        let [interface, property] = string_args::<2>(call)?;
        let unit = state
            .units
            .iter()
            .find(|(name, _)| unit_object_path(name) == call.path)
            .map(|(_, unit)| unit)
            .ok_or_else(|| {
                BusError::method(
                    error_names::UNKNOWN_OBJECT,
                    format!("Unknown object '{}'.", call.path),
                )
            })?;
        if interface != UNIT_INTERFACE {
            return Err(BusError::method(
                UNKNOWN_INTERFACE,
                format!("Unknown interface '{}'.", interface),
            ));
        }

        if property == "ActiveState" {
            return property_reply(&Type::String, Value::String(unit.active_state.clone()));
        }
        if property == "StateChangeTimestampMonotonic" {
            return property_reply(&Type::Uint64, Value::Uint64(unit.state_change_usec));
        }
        let relation = [
            RelationKind::RequiredBy,
            RelationKind::Requires,
            RelationKind::WantedBy,
            RelationKind::Wants,
            RelationKind::ConsistsOf,
            RelationKind::PartOf,
        ]
        .into_iter()
        .find(|relation| relation.property() == property)
        .ok_or_else(|| {
            BusError::method(
                error_names::UNKNOWN_PROPERTY,
                format!("Unknown property '{}'.", property),
            )
        })?;
        let names = unit
            .relations
            .get(&relation)
            .map(|names| names.iter().cloned().map(Value::String).collect())
            .unwrap_or_default();
        property_reply(&Type::array(Type::String), Value::Array(names))
    }

    fn run_job(
        state: &mut FakeState,
        action: UnitAction,
        call: &MethodCall,
    ) -> Result<Payload, BusError> {
        let [name, mode] = string_args::<2>(call)?;
        if mode != "replace" {
            return Err(BusError::method(
                INVALID_ARGS,
                format!("Job mode {} invalid.", mode),
            ));
        }
        if let Some(message) = state.denied.get(&name) {
            return Err(BusError::method(error_names::ACCESS_DENIED, message.clone()));
        }
        let unit = state.units.get_mut(&name).ok_or_else(|| {
            BusError::method(
                error_names::NO_SUCH_UNIT,
                format!("Unit {} not found.", name),
            )
        })?;
        if action == UnitAction::Reload && !unit.can_reload {
            return Err(BusError::method(
                error_names::JOB_TYPE_NOT_APPLICABLE,
                format!("Job type reload is not applicable for unit {}.", name),
            ));
        }

        let next_state = match action {
            UnitAction::Start | UnitAction::Restart | UnitAction::Reload => ActiveState::Active,
            UnitAction::Stop => ActiveState::Inactive,
        };
        let now = MonotonicTime::now()
            .as_micros()
            .max(unit.state_change_usec.saturating_add(1));
        unit.active_state = next_state.as_str().to_string();
        unit.state_change_usec = now;

        state.next_job += 1;
        reply(
            &Type::ObjectPath,
            Value::ObjectPath(format!("/org/freedesktop/systemd1/job/{}", state.next_job)),
        )
    }
}

fn string_args<const N: usize>(call: &MethodCall) -> Result<[String; N], BusError> {
    let invalid = |e: &dyn std::fmt::Display| BusError::method(INVALID_ARGS, e.to_string());
    let mut reader = call.args.reader().map_err(|e| invalid(&e))?;
    let mut out: [String; N] = std::array::from_fn(|_| String::new());
    for slot in out.iter_mut() {
        *slot = wire::decode(&Type::String, &mut reader)
            .map_err(|e| invalid(&e))?
            .into_string()
            .unwrap_or_default();
    }
    if !reader.is_finished() {
        return Err(invalid(&"too many arguments"));
    }
    Ok(out)
}

fn reply(ty: &Type, value: Value) -> Result<Payload, BusError> {
    let mut writer = MessageWriter::new();
    writer
        .write(ty, &value)
        .map_err(|e| BusError::Transport(e.to_string()))?;
    Ok(writer.finish())
}

fn property_reply(ty: &Type, value: Value) -> Result<Payload, BusError> {
    let mut writer = MessageWriter::new();
    writer
        .write_variant(ty, &value)
        .map_err(|e| BusError::Transport(e.to_string()))?;
    Ok(writer.finish())
}

#[async_trait]
impl Bus for FakeManager {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn call(&self, call: MethodCall) -> Result<Payload, BusError> {
        let mut state = self.lock();
        if state.disconnected {
            return Err(BusError::Transport("connection closed".to_string()));
        }
        let detail = string_args::<1>(&call)
            .map(|[first]| first)
            .or_else(|_| string_args::<2>(&call).map(|[first, second]| {
                if call.interface == PROPERTIES_INTERFACE {
                    second
                } else {
                    first
                }
            }))
            .unwrap_or_default();
        state.calls.push(format!("{} {}", call.member, detail));

        let action = match call.member.as_str() {
            "StartUnit" => Some(UnitAction::Start),
            "StopUnit" => Some(UnitAction::Stop),
            "RestartUnit" => Some(UnitAction::Restart),
            "ReloadUnit" => Some(UnitAction::Reload),
            _ => None,
        };
        match (call.interface.as_str(), call.member.as_str(), action) {
            (MANAGER_INTERFACE, "GetUnit", _) => Self::get_unit(&state, &call),
            (PROPERTIES_INTERFACE, "Get", _) => Self::get_property(&state, &call),
            (MANAGER_INTERFACE, _, Some(action)) => Self::run_job(&mut state, action, &call),
            _ => Err(BusError::method(
                UNKNOWN_METHOD,
                format!("Unknown method {}.{}", call.interface, call.member),
            )),
        }
    }
}
