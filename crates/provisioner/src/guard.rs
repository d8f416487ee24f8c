//! Scheduling Guard
//!
//! Keeps two builds from running emulators with the same configuration on one
//! node at the same time. The host asks before starting a task; the answer is
//! admission control, not a lock: two decisions taken concurrently may both
//! allow.

use std::collections::BTreeMap;
use std::fmt;
use serde::{Deserialize, Serialize};
use tracing::debug;

use ci_droid_core::env::{has_unresolved, EnvVars};
use ci_droid_emulator_bridge::EmulatorDefinition;

/// Identity of an expanded emulator configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigFingerprint {
    value: String,
    resolved: bool,
}

impl ConfigFingerprint {
    pub fn value(&self) -> &str {
        &self.value
    }

    /// False while a variable reference is left in the configuration
    pub fn is_resolved(&self) -> bool {
        self.resolved
    }

    /// Equal and fully resolved on both sides
    pub fn matches(&self, other: &ConfigFingerprint) -> bool {
        self.resolved && other.resolved && self.value == other.value
    }
}

impl fmt::Display for ConfigFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

/// Fingerprint of `definition` as it would expand on a node.
/// `None` when the task has no emulator or the node environment is unknown.
pub fn fingerprint(
    definition: Option<&EmulatorDefinition>,
    node_env: Option<&EnvVars>,
    axes: Option<&BTreeMap<String, String>>,
) -> Option<ConfigFingerprint> {
    let device = definition?.expand(node_env?, axes);
    let value = device.fingerprint_source();
    Some(ConfigFingerprint {
        resolved: !has_unresolved(&value),
        value,
    })
}

/// What the host knows about a task
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub id: String,
    pub emulator: Option<EmulatorDefinition>,
    #[serde(default)]
    pub axes: BTreeMap<String, String>,
}

impl TaskSnapshot {
    fn fingerprint(&self, node_env: Option<&EnvVars>) -> Option<ConfigFingerprint> {
        let axes = (!self.axes.is_empty()).then_some(&self.axes);
        fingerprint(self.emulator.as_ref(), node_env, axes)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedTask {
    pub task: TaskSnapshot,
    /// Waiting to start, as opposed to blocked or buildable
    pub pending: bool,
}

/// Node introspection provided by the host
pub trait BuildNode {
    fn name(&self) -> &str;

    /// Current node environment; `None` while the node is offline
    fn environment(&self) -> Option<EnvVars>;

    fn executor_count(&self) -> usize;

    /// Tasks currently occupying an executor on this node
    fn running_tasks(&self) -> Vec<TaskSnapshot>;
}

/// Queue introspection provided by the host
pub trait BuildQueue {
    fn items(&self) -> Vec<QueuedTask>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockReason {
    WaitingForEmulator { blocking_task: String },
    NoExecutorsOnNode { node: String },
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockReason::WaitingForEmulator { blocking_task } => {
                write!(f, "Waiting for {} to free an identical emulator", blocking_task)
            }
            BlockReason::NoExecutorsOnNode { node } => write!(f, "No executors on node {}", node),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Block(BlockReason),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SchedulingGuard {
    /// Emulators live in each build's workspace, so identical ones never collide
    pub keep_in_workspace: bool,
}

impl SchedulingGuard {
    pub fn new(keep_in_workspace: bool) -> Self {
        Self { keep_in_workspace }
    }

    /// Decide whether `candidate` may start on `node` now
    pub fn can_schedule(&self, node: &impl BuildNode, queue: &impl BuildQueue, candidate: &TaskSnapshot) -> Decision {
        let node_env = node.environment();
        let Some(wanted) = candidate.fingerprint(node_env.as_ref()) else {
            return Decision::Allow;
        };
        if !wanted.is_resolved() || self.keep_in_workspace {
            return Decision::Allow;
        }

        let matching = |task: &TaskSnapshot| {
            task.id != candidate.id
                && task
                    .fingerprint(node_env.as_ref())
                    .is_some_and(|other| wanted.matches(&other))
        };
        let blocked_by = |task: TaskSnapshot| {
            debug!("Task {} blocked by {} on {}", candidate.id, task.id, node.name());
            Decision::Block(BlockReason::WaitingForEmulator { blocking_task: task.id })
        };

        let queued = queue
            .items()
            .into_iter()
            .filter(|item| item.pending)
            .map(|item| item.task)
            .find(|task| matching(task));
        if let Some(task) = queued {
            return blocked_by(task);
        }

        if node.executor_count() == 0 {
            return Decision::Block(BlockReason::NoExecutorsOnNode {
                node: node.name().to_string(),
            });
        }

        match node.running_tasks().into_iter().find(|task| matching(task)) {
            Some(task) => blocked_by(task),
            None => Decision::Allow,
        }
    }
}
