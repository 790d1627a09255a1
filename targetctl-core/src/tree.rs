//! Dependency tree of units rooted at one unit.
//!
//! The tree is expanded once along a single relation and afterwards only
//! refreshed in place. The manager's dependency graph may contain cycles and
//! shared dependencies; the tree keeps the first occurrence of each unit in
//! sorted depth-first order and drops later ones.

use std::collections::BTreeSet;
use std::future::Future;
use std::pin::Pin;

use serde::Serialize;
use tracing::{debug, warn};

use crate::client::UnitClient;
use crate::error::{Error, Result};
use crate::model::{ActiveState, MonotonicTime, RelationKind, UnitAction, UnitName};

/// Direct children only.
pub const DEFAULT_MAX_DEPTH: usize = 1;
/// Bound used for full recursive scans.
pub const RECURSIVE_MAX_DEPTH: usize = 100;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ServiceNode {
    pub name: UnitName,
    pub state: ActiveState,
    #[serde(rename = "state_changed_usec")]
    pub state_changed: MonotonicTime,
    pub depth: usize,
    pub children: Vec<ServiceNode>,
}

impl ServiceNode {
    /// This node and all descendants, depth-first pre-order.
    pub fn iter(&self) -> Iter<'_> {
        Iter { stack: vec![self] }
    }
}

pub struct Iter<'a> {
    stack: Vec<&'a ServiceNode>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = &'a ServiceNode;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        self.stack.extend(node.children.iter().rev());
        Some(node)
    }
}

/// A relation edge dropped during the build because its target was already
/// placed elsewhere in the tree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IgnoredDuplicate {
    pub parent: UnitName,
    pub unit: UnitName,
}

/// Counts shown in the status bar.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TreeSummary {
    pub total: usize,
    pub active: usize,
    pub failed: usize,
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

struct Builder<'c> {
    client: &'c UnitClient,
    relation: RelationKind,
    seen: BTreeSet<UnitName>,
    ignored: Vec<IgnoredDuplicate>,
}

impl Builder<'_> {
    fn expand(&mut self, name: UnitName, depth: usize, remaining: usize) -> BoxFuture<'_, Result<ServiceNode>> {
        Box::pin(async move {
            let state = self.client.active_state(&name).await?;
            let state_changed = self.client.state_change_time(&name).await?;
            let mut node = ServiceNode {
                name,
                state,
                state_changed,
                depth,
                children: Vec::new(),
            };
            if remaining == 0 {
                return Ok(node);
            }

            let mut related = self.client.list_related(&node.name, self.relation).await?;
            related.sort();
            for candidate in related {
                if !self.seen.insert(candidate.clone()) {
                    warn!(parent = %node.name, unit = %candidate, "ignored duplicate in dependency chain");
                    self.ignored.push(IgnoredDuplicate {
                        parent: node.name.clone(),
                        unit: candidate,
                    });
                    continue;
                }
                let child = self.expand(candidate, depth + 1, remaining - 1).await?;
                node.children.push(child);
            }
            Ok(node)
        })
    }
}

#[derive(Debug)]
pub struct ServiceTree {
    client: UnitClient,
    relation: RelationKind,
    max_depth: usize,
    root: ServiceNode,
    ignored: Vec<IgnoredDuplicate>,
}

impl ServiceTree {
    /// Expand `root` along `relation` down to `max_depth` levels.
    ///
    /// Any failure while expanding, including a related unit the manager
    /// cannot resolve, aborts the whole build.
    pub async fn build(
        client: UnitClient,
        root: &str,
        relation: RelationKind,
        max_depth: usize,
    ) -> Result<Self> {
        let mut builder = Builder {
            client: &client,
            relation,
            seen: BTreeSet::from([root.to_string()]),
            ignored: Vec::new(),
        };
        let root = builder.expand(root.to_string(), 0, max_depth).await?;
        let ignored = builder.ignored;
        debug!(
            root = %root.name,
            %relation,
            max_depth,
            units = root.iter().count(),
            ignored = ignored.len(),
            "dependency tree built"
        );

        Ok(Self {
            client,
            relation,
            max_depth,
            root,
            ignored,
        })
    }

    /// Re-read state and change timestamp of every unit below the root.
    ///
    /// Returns true when some unit's timestamp moved. States are overwritten
    /// regardless, but a new state without a new timestamp does not count as a
    /// change. The first failing unit aborts the pass.
    pub async fn refresh(&mut self) -> Result<bool> {
        let client = &self.client;
        let mut changed = false;
        let mut stack: Vec<&mut ServiceNode> = self.root.children.iter_mut().rev().collect();
        while let Some(node) = stack.pop() {
            node.state = client.active_state(&node.name).await?;
            let state_changed = client.state_change_time(&node.name).await?;
            if state_changed != node.state_changed {
                node.state_changed = state_changed;
                changed = true;
            }
            stack.extend(node.children.iter_mut().rev());
        }
        Ok(changed)
    }

    /// Run `action` on a unit shown in this tree. The tree itself is not
    /// touched; the next refresh picks up the result.
    pub async fn perform(&self, action: UnitAction, unit: &str) -> Result<()> {
        if !self.contains(unit) {
            return Err(Error::NotFound {
                unit: unit.to_string(),
                message: format!("{} is not part of the tree rooted at {}", unit, self.root.name),
            });
        }
        self.client.perform(action, unit).await
    }

    pub fn root(&self) -> &ServiceNode {
        &self.root
    }

    /// All nodes, depth-first pre-order, root first.
    pub fn iter(&self) -> Iter<'_> {
        self.root.iter()
    }

    pub fn find(&self, unit: &str) -> Option<&ServiceNode> {
        self.iter().find(|node| node.name == unit)
    }

    pub fn contains(&self, unit: &str) -> bool {
        self.find(unit).is_some()
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    /// Always false: a tree holds at least its root.
    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn relation(&self) -> RelationKind {
        self.relation
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    pub fn ignored(&self) -> &[IgnoredDuplicate] {
        &self.ignored
    }

    pub fn client(&self) -> &UnitClient {
        &self.client
    }

    /// Owned copy of the whole tree, detached from the client.
    pub fn snapshot(&self) -> ServiceNode {
        self.root.clone()
    }

    /// Counts over the units below the root.
    pub fn summary(&self) -> TreeSummary {
        self.iter()
            .skip(1)
            .fold(TreeSummary::default(), |mut summary, node| {
                summary.total += 1;
                match node.state {
                    ActiveState::Active => summary.active += 1,
                    ActiveState::Failed => summary.failed += 1,
                    _ => {}
                }
                summary
            })
    }
}
