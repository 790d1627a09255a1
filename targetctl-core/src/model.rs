use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub type UnitName = String;

/// Object path the manager assigned to a loaded unit.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct UnitPath(pub String);

impl UnitPath {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UnitPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Run state of a unit as reported by the manager.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActiveState {
    Active,
    Reloading,
    Inactive,
    Failed,
    Activating,
    Deactivating,
}

impl ActiveState {
    pub const ALL: [ActiveState; 6] = [
        ActiveState::Active,
        ActiveState::Reloading,
        ActiveState::Inactive,
        ActiveState::Failed,
        ActiveState::Activating,
        ActiveState::Deactivating,
    ];

    /// Exact, case-sensitive lookup of the manager's state name.
    pub fn from_bus_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|state| state.as_str() == name)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ActiveState::Active => "active",
            ActiveState::Reloading => "reloading",
            ActiveState::Inactive => "inactive",
            ActiveState::Failed => "failed",
            ActiveState::Activating => "activating",
            ActiveState::Deactivating => "deactivating",
        }
    }
}

impl fmt::Display for ActiveState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Dependency edge followed when expanding a tree.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum RelationKind {
    #[default]
    RequiredBy,
    Requires,
    WantedBy,
    Wants,
    ConsistsOf,
    PartOf,
}

impl RelationKind {
    /// Unit property holding the related unit names.
    pub fn property(self) -> &'static str {
        match self {
            RelationKind::RequiredBy => "RequiredBy",
            RelationKind::Requires => "Requires",
            RelationKind::WantedBy => "WantedBy",
            RelationKind::Wants => "Wants",
            RelationKind::ConsistsOf => "ConsistsOf",
            RelationKind::PartOf => "PartOf",
        }
    }

    /// The same edge seen from the other end.
    pub fn inverse(self) -> RelationKind {
        match self {
            RelationKind::RequiredBy => RelationKind::Requires,
            RelationKind::Requires => RelationKind::RequiredBy,
            RelationKind::WantedBy => RelationKind::Wants,
            RelationKind::Wants => RelationKind::WantedBy,
            RelationKind::ConsistsOf => RelationKind::PartOf,
            RelationKind::PartOf => RelationKind::ConsistsOf,
        }
    }
}

impl fmt::Display for RelationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.property())
    }
}

/// Lifecycle operations offered on a unit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UnitAction {
    Start,
    Stop,
    Restart,
    Reload,
}

impl UnitAction {
    /// Manager method implementing this action.
    pub fn method(self) -> &'static str {
        match self {
            UnitAction::Start => "StartUnit",
            UnitAction::Stop => "StopUnit",
            UnitAction::Restart => "RestartUnit",
            UnitAction::Reload => "ReloadUnit",
        }
    }

    pub fn verb(self) -> &'static str {
        match self {
            UnitAction::Start => "start",
            UnitAction::Stop => "stop",
            UnitAction::Restart => "restart",
            UnitAction::Reload => "reload",
        }
    }
}

impl fmt::Display for UnitAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.verb())
    }
}

/// A point on the host's `CLOCK_MONOTONIC`, microsecond resolution.
///
/// The manager stamps `StateChangeTimestampMonotonic` on the same clock, so
/// values read from the bus compare directly against [`MonotonicTime::now`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct MonotonicTime(u64);

impl MonotonicTime {
    pub const ZERO: MonotonicTime = MonotonicTime(0);

    pub fn from_micros(micros: u64) -> Self {
        MonotonicTime(micros)
    }

    pub fn as_micros(self) -> u64 {
        self.0
    }

    pub fn now() -> Self {
        let mut ts = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        // SAFETY: `ts` is a valid, writable timespec for the duration of the call.
        let rc = unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) };
        if rc != 0 {
            return MonotonicTime::ZERO;
        }
        MonotonicTime(ts.tv_sec as u64 * 1_000_000 + ts.tv_nsec as u64 / 1_000)
    }

    /// Time elapsed between `self` and `later`, zero if `later` is earlier.
    pub fn elapsed_until(self, later: MonotonicTime) -> Duration {
        Duration::from_micros(later.0.saturating_sub(self.0))
    }
}
