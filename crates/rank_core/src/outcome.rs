//! Results of administrative operations.
//!
//! Each operation reports a closed set of outcomes. Only `Failed` means the
//! backing store was involved and did not succeed.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CreateOutcome {
    Created,
    AlreadyExists,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteOutcome {
    Deleted,
    NotFound,
    IsDefault,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PrefixOutcome {
    Updated,
    NotFound,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignOutcome {
    Ok,
    GroupNotFound,
    Failed,
}

/// How a connecting player's assignment was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectResolution {
    /// The persisted assignment was valid and is now live.
    Loaded,
    /// No persisted assignment existed, or it could not be read.
    DefaultAssigned,
    /// The persisted assignment named a group that no longer exists.
    DanglingReplaced,
    /// The persisted assignment had expired.
    ExpiredReplaced,
    /// The player left (or reconnected) before the load finished.
    Discarded,
    /// No default group is available to fall back on.
    Unresolved,
}

impl ConnectResolution {
    pub fn assigned_default(&self) -> bool {
        matches!(
            self,
            Self::DefaultAssigned | Self::DanglingReplaced | Self::ExpiredReplaced
        )
    }
}
