use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use super::{validate_group_name, validate_surface, PersistenceGateway};
use crate::error::GatewayError;
use crate::types::{
    GroupDefinition, GroupKey, PlayerId, StoredAssignment, SurfaceBinding, SurfaceId,
};

/// Gateway operations, used to inject failures and count calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GatewayOp {
    SaveGroup,
    DeleteGroup,
    GetGroup,
    ListGroups,
    SetAssignment,
    GetAssignment,
    DeleteAssignment,
    SaveSurface,
    DeleteSurface,
    ListSurfaces,
}

impl GatewayOp {
    fn name(&self) -> &'static str {
        match self {
            GatewayOp::SaveGroup => "save_group",
            GatewayOp::DeleteGroup => "delete_group",
            GatewayOp::GetGroup => "get_group",
            GatewayOp::ListGroups => "list_groups",
            GatewayOp::SetAssignment => "set_assignment",
            GatewayOp::GetAssignment => "get_assignment",
            GatewayOp::DeleteAssignment => "delete_assignment",
            GatewayOp::SaveSurface => "save_surface",
            GatewayOp::DeleteSurface => "delete_surface",
            GatewayOp::ListSurfaces => "list_surfaces",
        }
    }
}

/// In-process gateway with the same semantics as the SQL backends.
///
/// Group names are unique ignoring case, and an assignment naming a group
/// that does not exist (or is later deleted) keeps a null reference.
/// Individual operations can be made to fail or to take a fixed time.
#[derive(Debug, Default)]
pub struct MemoryGateway {
    groups: DashMap<GroupKey, GroupDefinition>,
    assignments: DashMap<PlayerId, StoredAssignment>,
    surfaces: DashMap<SurfaceId, PlayerId>,
    failing: DashMap<GatewayOp, ()>,
    calls: DashMap<GatewayOp, usize>,
    latency_ms: AtomicU64,
    closed: AtomicBool,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every future call of `op` fail until [`MemoryGateway::recover`].
    pub fn fail(&self, op: GatewayOp) {
        self.failing.insert(op, ());
    }

    pub fn recover(&self, op: GatewayOp) {
        self.failing.remove(&op);
    }

    /// Delays every operation by `latency` before it takes effect.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::Relaxed);
    }

    /// Number of times `op` has been invoked.
    pub fn calls(&self, op: GatewayOp) -> usize {
        self.calls.get(&op).map(|count| *count).unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.iter().map(|entry| *entry.value()).sum()
    }

    /// Snapshot of the stored assignment, bypassing failure injection.
    pub fn stored_assignment(&self, player: PlayerId) -> Option<StoredAssignment> {
        self.assignments.get(&player).map(|record| record.clone())
    }

    /// Snapshot of the stored group, bypassing failure injection.
    pub fn stored_group(&self, name: &str) -> Option<GroupDefinition> {
        self.groups.get(&GroupKey::new(name)).map(|group| group.clone())
    }

    pub fn stored_surface(&self, surface: &SurfaceId) -> Option<PlayerId> {
        self.surfaces.get(surface).map(|player| *player)
    }

    async fn enter(&self, op: GatewayOp) -> Result<(), GatewayError> {
        *self.calls.entry(op).or_insert(0) += 1;

        let latency = self.latency_ms.load(Ordering::Relaxed);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        if self.closed.load(Ordering::Acquire) {
            return Err(GatewayError::Unavailable("memory gateway closed".to_string()));
        }
        if self.failing.contains_key(&op) {
            debug!("Injected failure for {}", op.name());
            return Err(GatewayError::database(op.name(), "injected failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl PersistenceGateway for MemoryGateway {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn init_schema(&self) -> Result<(), GatewayError> {
        Ok(())
    }

    async fn save_group(&self, group: &GroupDefinition) -> Result<(), GatewayError> {
        validate_group_name(&group.name)?;
        self.enter(GatewayOp::SaveGroup).await?;
        self.groups
            .entry(group.key())
            .and_modify(|existing| existing.raw_prefix = group.raw_prefix.clone())
            .or_insert_with(|| group.clone());
        Ok(())
    }

    async fn delete_group(&self, name: &str) -> Result<(), GatewayError> {
        validate_group_name(name)?;
        self.enter(GatewayOp::DeleteGroup).await?;
        let key = GroupKey::new(name);
        if self.groups.remove(&key).is_some() {
            for mut record in self.assignments.iter_mut() {
                if record
                    .group_name
                    .as_deref()
                    .is_some_and(|group| GroupKey::new(group) == key)
                {
                    record.group_name = None;
                }
            }
        }
        Ok(())
    }

    async fn get_group(&self, name: &str) -> Result<Option<GroupDefinition>, GatewayError> {
        self.enter(GatewayOp::GetGroup).await?;
        Ok(self.stored_group(name))
    }

    async fn list_groups(&self) -> Result<Vec<GroupDefinition>, GatewayError> {
        self.enter(GatewayOp::ListGroups).await?;
        Ok(self.groups.iter().map(|g| g.value().clone()).collect())
    }

    async fn set_assignment(&self, record: &StoredAssignment) -> Result<(), GatewayError> {
        self.enter(GatewayOp::SetAssignment).await?;
        let mut record = record.clone();
        if let Some(group) = &record.group_name {
            if !self.groups.contains_key(&GroupKey::new(group)) {
                debug!("Group '{}' is gone, storing a null reference", group);
                record.group_name = None;
            }
        }
        self.assignments.insert(record.player, record);
        Ok(())
    }

    async fn get_assignment(
        &self,
        player: PlayerId,
    ) -> Result<Option<StoredAssignment>, GatewayError> {
        self.enter(GatewayOp::GetAssignment).await?;
        Ok(self.stored_assignment(player))
    }

    async fn delete_assignment(&self, player: PlayerId) -> Result<(), GatewayError> {
        self.enter(GatewayOp::DeleteAssignment).await?;
        self.assignments.remove(&player);
        Ok(())
    }

    async fn save_surface(&self, binding: &SurfaceBinding) -> Result<(), GatewayError> {
        validate_surface(&binding.surface)?;
        self.enter(GatewayOp::SaveSurface).await?;
        self.surfaces
            .insert(binding.surface.clone(), binding.tracked_player);
        Ok(())
    }

    async fn delete_surface(&self, surface: &SurfaceId) -> Result<(), GatewayError> {
        self.enter(GatewayOp::DeleteSurface).await?;
        self.surfaces.remove(surface);
        Ok(())
    }

    async fn list_surfaces(&self) -> Result<Vec<SurfaceBinding>, GatewayError> {
        self.enter(GatewayOp::ListSurfaces).await?;
        Ok(self
            .surfaces
            .iter()
            .map(|entry| SurfaceBinding {
                surface: entry.key().clone(),
                tracked_player: *entry.value(),
            })
            .collect())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn group_upsert_keeps_original_name() {
        let gateway = MemoryGateway::new();
        gateway
            .save_group(&GroupDefinition::new("Admin", "&c"))
            .await
            .unwrap();
        gateway
            .save_group(&GroupDefinition::new("admin", "&4"))
            .await
            .unwrap();

        let groups = gateway.list_groups().await.unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].name, "Admin");
        assert_eq!(groups[0].raw_prefix, "&4");
    }

    #[tokio::test]
    async fn deleting_a_group_nulls_its_assignments() {
        let gateway = MemoryGateway::new();
        let player = PlayerId::new();
        gateway
            .save_group(&GroupDefinition::new("Vip", "&6"))
            .await
            .unwrap();
        gateway
            .set_assignment(&StoredAssignment {
                player,
                group_name: Some("vip".into()),
                expires_at: None,
            })
            .await
            .unwrap();

        gateway.delete_group("VIP").await.unwrap();

        let record = gateway.get_assignment(player).await.unwrap().unwrap();
        assert_eq!(record.group_name, None);
    }

    #[tokio::test]
    async fn assignment_to_missing_group_is_stored_nulled() {
        let gateway = MemoryGateway::new();
        let player = PlayerId::new();
        gateway
            .set_assignment(&StoredAssignment {
                player,
                group_name: Some("ghost".into()),
                expires_at: None,
            })
            .await
            .unwrap();
        assert_eq!(gateway.stored_assignment(player).unwrap().group_name, None);
    }

    #[tokio::test]
    async fn injected_failures_and_close() {
        let gateway = MemoryGateway::new();
        gateway.fail(GatewayOp::ListGroups);
        assert!(gateway.list_groups().await.is_err());
        gateway.recover(GatewayOp::ListGroups);
        assert!(gateway.list_groups().await.is_ok());
        assert_eq!(gateway.calls(GatewayOp::ListGroups), 2);

        assert!(matches!(
            gateway.save_group(&GroupDefinition::new("  ", "")).await,
            Err(GatewayError::Malformed(_))
        ));

        gateway.close().await;
        assert!(matches!(
            gateway.list_surfaces().await,
            Err(GatewayError::Unavailable(_))
        ));
    }
}
