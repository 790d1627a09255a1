//! Core of targetctl: the bus wire codec, a client for the unit manager, the
//! dependency tree built from it and the engine that keeps that tree fresh.

pub mod bus;
pub mod client;
pub mod config;
pub mod error;
pub mod model;
pub mod refresh;
pub mod tree;
pub mod wire;

// In-memory manager for tests and `--demo`
pub mod fake;

pub use bus::{Bus, BusError, MethodCall};
pub use client::UnitClient;
pub use config::{TargetctlConfig, ViewOptions};
pub use error::{Error, Result};
pub use model::{ActiveState, MonotonicTime, RelationKind, UnitAction};
pub use refresh::{RefreshEngine, RefreshEvent, RefreshSettings};
pub use tree::{ServiceNode, ServiceTree, TreeSummary};
