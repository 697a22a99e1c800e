//! Failpoints and process start options.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Pause point checked by the initial syncer before every sync-source command.
pub const INITIAL_SYNC_SYNC_POINT_1: &str = "initialSyncFuzzerSynchronizationPoint1";

/// Second pause point, checked right after the first one.
pub const INITIAL_SYNC_SYNC_POINT_2: &str = "initialSyncFuzzerSynchronizationPoint2";

/// Startup parameter bounding how many initial-sync attempts a node makes.
pub const PARAM_INITIAL_SYNC_ATTEMPTS: &str = "numInitialSyncAttempts";

/// Startup parameter bounding how many oplog entries are applied per batch.
pub const PARAM_BATCH_LIMIT_OPERATIONS: &str = "replBatchLimitOperations";

/// Log line a node emits when it starts pausing at an armed failpoint.
pub fn paused_message(name: &str) -> String {
    format!("{name} fail point enabled")
}

/// Failpoint mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FailPointMode {
    /// Disarmed.
    #[default]
    Off,
    /// Armed until explicitly disarmed.
    AlwaysOn,
}

impl FailPointMode {
    /// Whether the failpoint is armed.
    pub fn is_active(self) -> bool {
        matches!(self, Self::AlwaysOn)
    }
}

/// A request to change a failpoint on one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailPointCommand {
    /// Failpoint name.
    pub name: String,
    /// New mode.
    pub mode: FailPointMode,
}

impl FailPointCommand {
    /// Arm a failpoint.
    pub fn arm(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mode: FailPointMode::AlwaysOn,
        }
    }

    /// Disarm a failpoint.
    pub fn disarm(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mode: FailPointMode::Off,
        }
    }
}

/// Options overlaid on a node's configuration when its process starts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartOptions {
    /// Failpoint forced to `alwaysOn` at process start, before any
    /// replication work begins.
    pub forced_failpoint: Option<String>,
    /// Election priority for this process lifetime.
    pub priority: Option<u32>,
    /// Startup parameters, by name.
    pub extra_set_parameters: BTreeMap<String, String>,
}

impl StartOptions {
    /// Force a failpoint on at startup.
    pub fn with_forced_failpoint(mut self, name: impl Into<String>) -> Self {
        self.forced_failpoint = Some(name.into());
        self
    }

    /// Override the member's election priority.
    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Set a startup parameter.
    pub fn with_parameter(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.extra_set_parameters
            .insert(name.into(), value.to_string());
        self
    }

    /// Read a startup parameter as an unsigned integer.
    ///
    /// Missing or unparsable values yield `None`.
    pub fn parameter_u64(&self, name: &str) -> Option<u64> {
        self.extra_set_parameters
            .get(name)
            .and_then(|value| value.parse().ok())
    }
}
