//! # Core Type Definitions
//!
//! The building blocks shared by every rank component: player identifiers,
//! group definitions, assignments and the identifiers of world-placed info
//! signs.
//!
//! ## Key Types
//!
//! - [`PlayerId`] - Unique identifier for a player
//! - [`GroupKey`] - Case-insensitive lookup key for a group name
//! - [`GroupDefinition`] - A named group with its raw `&`-coded prefix
//! - [`Assignment`] - A connected player's group membership and optional expiry
//! - [`StoredAssignment`] - The persisted form, whose group may have been nulled
//! - [`SurfaceId`] / [`SurfaceBinding`] - An info sign and the player it tracks
//!
//! ## Design Principles
//!
//! - **Type Safety**: Wrapper types keep player ids and group keys apart
//! - **Case Insensitivity**: Group names compare and hash by their lowercase form
//! - **Serialization**: All types support serde for the host bridge and storage

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::time::Duration;
use uuid::Uuid;

use crate::error::TermOutOfRange;
use crate::markup;

// ============================================================================
// Players
// ============================================================================

/// Unique identifier for a player.
///
/// A wrapper around UUID so player ids cannot be confused with other string
/// or UUID values flowing through the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlayerId(pub Uuid);

impl PlayerId {
    /// Creates a new random player ID using UUID v4.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parses a player ID from its hyphenated UUID representation.
    ///
    /// # Arguments
    ///
    /// * `s` - A string slice containing a valid UUID
    ///
    /// # Returns
    ///
    /// Returns `Ok(PlayerId)` if the string is a valid UUID, otherwise
    /// `Err(uuid::Error)` with details about the parsing failure.
    pub fn from_str(s: &str) -> Result<Self, uuid::Error> {
        Uuid::parse_str(s).map(Self)
    }
}

impl std::str::FromStr for PlayerId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_str(s)
    }
}

impl Default for PlayerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Groups
// ============================================================================

/// Case-insensitive map key for a group name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupKey(String);

impl GroupKey {
    pub fn new(name: &str) -> Self {
        Self(name.to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A named group and its display prefix.
///
/// Equality and hashing ignore the case of `name`, so `"Admin"` and
/// `"admin"` are the same group. The prefix is kept exactly as configured
/// (with `&` colour codes); [`GroupDefinition::prefix`] renders it on read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupDefinition {
    /// Display name, as first created.
    pub name: String,
    /// Markup prefix with `&` colour codes.
    pub raw_prefix: String,
}

impl GroupDefinition {
    pub fn new(name: impl Into<String>, raw_prefix: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            raw_prefix: raw_prefix.into(),
        }
    }

    pub fn key(&self) -> GroupKey {
        GroupKey::new(&self.name)
    }

    /// Returns true when `other` names this group, ignoring case.
    pub fn is_named(&self, other: &str) -> bool {
        self.key() == GroupKey::new(other)
    }

    /// The prefix with `&` codes translated to section-sign codes.
    pub fn prefix(&self) -> String {
        markup::render(&self.raw_prefix)
    }

    /// The prefix with every colour code removed.
    pub fn plain_prefix(&self) -> String {
        markup::strip(&self.raw_prefix)
    }
}

impl PartialEq for GroupDefinition {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for GroupDefinition {}

impl Hash for GroupDefinition {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

// ============================================================================
// Assignments
// ============================================================================

/// How long an assignment lasts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignmentTerm {
    Permanent,
    Temporary(Duration),
}

impl AssignmentTerm {
    /// Absolute expiry for a term starting at `now`.
    ///
    /// A zero-length temporary term counts as permanent. A term that ends
    /// beyond the calendar is refused rather than widened to permanent.
    pub fn expiry_from(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, TermOutOfRange> {
        match self {
            AssignmentTerm::Permanent => Ok(None),
            AssignmentTerm::Temporary(d) if d.is_zero() => Ok(None),
            AssignmentTerm::Temporary(d) => chrono::TimeDelta::from_std(*d)
                .ok()
                .and_then(|delta| now.checked_add_signed(delta))
                .map(Some)
                .ok_or(TermOutOfRange(*d)),
        }
    }
}

/// The live group membership of a connected player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub player: PlayerId,
    pub group_name: String,
    /// `None` means permanent.
    pub expires_at: Option<DateTime<Utc>>,
}

impl Assignment {
    pub fn permanent(player: PlayerId, group_name: impl Into<String>) -> Self {
        Self {
            player,
            group_name: group_name.into(),
            expires_at: None,
        }
    }

    /// An assignment is expired once `now` reaches its expiry instant.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }

    /// Time left before expiry, `None` for permanent or already expired.
    pub fn remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.expires_at
            .and_then(|at| (at - now).to_std().ok())
            .filter(|d| !d.is_zero())
    }
}

/// An assignment as the persistence gateway stores it.
///
/// `group_name` is `None` when the referenced group was deleted and the
/// store nulled the reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredAssignment {
    pub player: PlayerId,
    pub group_name: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl From<&Assignment> for StoredAssignment {
    fn from(assignment: &Assignment) -> Self {
        Self {
            player: assignment.player,
            group_name: Some(assignment.group_name.clone()),
            expires_at: assignment.expires_at,
        }
    }
}

// ============================================================================
// Info signs
// ============================================================================

/// A block position in a named world.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SurfaceId {
    pub world: String,
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl SurfaceId {
    pub fn new(world: impl Into<String>, x: i32, y: i32, z: i32) -> Self {
        Self {
            world: world.into(),
            x,
            y,
            z,
        }
    }
}

impl fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{},{},{}", self.world, self.x, self.y, self.z)
    }
}

/// An info sign bound to the player it displays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurfaceBinding {
    pub surface: SurfaceId,
    pub tracked_player: PlayerId,
}
