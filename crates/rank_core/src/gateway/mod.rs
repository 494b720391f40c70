//! # Persistence Gateway
//!
//! The asynchronous record store behind the rank caches. Three record kinds
//! live here: group definitions, player assignments and info-sign bindings.
//!
//! Every operation returns a future and never blocks the caller. Backends
//! are interchangeable; dialect details such as upsert syntax and name
//! collation stay inside each implementation. Group names are matched
//! case-insensitively, and deleting a group nulls (rather than deletes) the
//! assignments that referenced it.
//!
//! [`MemoryGateway`] is the in-process implementation used by tests and by
//! the `memory` backend. SQL backends live in the `rank_storage` crate.

mod memory;

pub use memory::{GatewayOp, MemoryGateway};

use async_trait::async_trait;

use crate::error::GatewayError;
use crate::types::{GroupDefinition, PlayerId, StoredAssignment, SurfaceBinding, SurfaceId};

#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    /// Short backend name for logs.
    fn backend_name(&self) -> &'static str;

    /// Creates tables if they do not exist.
    async fn init_schema(&self) -> Result<(), GatewayError>;

    /// Inserts a group or replaces the prefix of an existing one.
    ///
    /// Updating must not disturb assignments referencing the group.
    async fn save_group(&self, group: &GroupDefinition) -> Result<(), GatewayError>;

    async fn delete_group(&self, name: &str) -> Result<(), GatewayError>;

    async fn get_group(&self, name: &str) -> Result<Option<GroupDefinition>, GatewayError>;

    async fn list_groups(&self) -> Result<Vec<GroupDefinition>, GatewayError>;

    /// Inserts or replaces the assignment for `record.player`.
    ///
    /// A group that has been deleted in the meantime does not fail the
    /// write; the reference is stored as null, as a later delete would.
    async fn set_assignment(&self, record: &StoredAssignment) -> Result<(), GatewayError>;

    async fn get_assignment(
        &self,
        player: PlayerId,
    ) -> Result<Option<StoredAssignment>, GatewayError>;

    async fn delete_assignment(&self, player: PlayerId) -> Result<(), GatewayError>;

    /// Inserts or replaces the binding for `binding.surface`.
    async fn save_surface(&self, binding: &SurfaceBinding) -> Result<(), GatewayError>;

    async fn delete_surface(&self, surface: &SurfaceId) -> Result<(), GatewayError>;

    async fn list_surfaces(&self) -> Result<Vec<SurfaceBinding>, GatewayError>;

    /// Releases connections. Later calls may fail with `Unavailable`.
    async fn close(&self);
}

/// Rejects records no backend can store.
pub fn validate_group_name(name: &str) -> Result<(), GatewayError> {
    if name.trim().is_empty() {
        return Err(GatewayError::Malformed("group name is empty".to_string()));
    }
    Ok(())
}

pub fn validate_surface(surface: &SurfaceId) -> Result<(), GatewayError> {
    if surface.world.trim().is_empty() {
        return Err(GatewayError::Malformed(format!(
            "surface {surface} has no world name"
        )));
    }
    Ok(())
}
