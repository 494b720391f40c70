//! SQLite gateway.

use std::str::FromStr;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use tracing::{debug, info, warn};

use rank_core::gateway::{validate_group_name, validate_surface};
use rank_core::{
    GatewayError, GroupDefinition, PersistenceGateway, PlayerId, StoredAssignment,
    SurfaceBinding, SurfaceId,
};

use crate::{db_error, from_millis, parse_player, to_millis};

const SCHEMA: [&str; 3] = [
    r#"
    CREATE TABLE IF NOT EXISTS rank_groups (
        name TEXT NOT NULL PRIMARY KEY COLLATE NOCASE,
        prefix TEXT NOT NULL DEFAULT ''
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS rank_assignments (
        player_id TEXT NOT NULL PRIMARY KEY,
        group_name TEXT COLLATE NOCASE
            REFERENCES rank_groups(name) ON DELETE SET NULL,
        expires_at INTEGER
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS rank_surfaces (
        world TEXT NOT NULL,
        x INTEGER NOT NULL,
        y INTEGER NOT NULL,
        z INTEGER NOT NULL,
        tracked_player TEXT NOT NULL,
        PRIMARY KEY (world, x, y, z)
    )
    "#,
];

const UPSERT_ASSIGNMENT: &str =
    "INSERT INTO rank_assignments (player_id, group_name, expires_at) VALUES (?, ?, ?) \
     ON CONFLICT(player_id) DO UPDATE SET \
     group_name = excluded.group_name, expires_at = excluded.expires_at";

#[derive(Clone)]
pub struct SqliteGateway {
    pool: SqlitePool,
}

impl SqliteGateway {
    /// Opens (creating if needed) the database file at `path`.
    pub async fn open(path: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await?;
        info!("💾 Opened SQLite database at {}", path);
        Ok(Self { pool })
    }

    /// A private in-memory database, kept alive by a single pooled connection.
    pub async fn in_memory() -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn upsert_assignment(
        &self,
        record: &StoredAssignment,
        group_name: Option<&str>,
    ) -> Result<(), GatewayError> {
        sqlx::query(UPSERT_ASSIGNMENT)
            .bind(record.player.to_string())
            .bind(group_name)
            .bind(to_millis(record.expires_at))
            .execute(&self.pool)
            .await
            .map_err(db_error("set_assignment"))?;
        Ok(())
    }
}

#[async_trait]
impl PersistenceGateway for SqliteGateway {
    fn backend_name(&self) -> &'static str {
        "sqlite"
    }

    async fn init_schema(&self) -> Result<(), GatewayError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(db_error("init_schema"))?;
        }
        debug!("SQLite schema ready");
        Ok(())
    }

    async fn save_group(&self, group: &GroupDefinition) -> Result<(), GatewayError> {
        validate_group_name(&group.name)?;
        sqlx::query(
            "INSERT INTO rank_groups (name, prefix) VALUES (?, ?) \
             ON CONFLICT(name) DO UPDATE SET prefix = excluded.prefix",
        )
        .bind(&group.name)
        .bind(&group.raw_prefix)
        .execute(&self.pool)
        .await
        .map_err(db_error("save_group"))?;
        Ok(())
    }

    async fn delete_group(&self, name: &str) -> Result<(), GatewayError> {
        validate_group_name(name)?;
        sqlx::query("DELETE FROM rank_groups WHERE name = ?")
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(db_error("delete_group"))?;
        Ok(())
    }

    async fn get_group(&self, name: &str) -> Result<Option<GroupDefinition>, GatewayError> {
        let row = sqlx::query("SELECT name, prefix FROM rank_groups WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("get_group"))?;
        row.map(|row| -> Result<GroupDefinition, GatewayError> {
            Ok(GroupDefinition::new(
                row.try_get::<String, _>("name").map_err(db_error("get_group"))?,
                row.try_get::<String, _>("prefix").map_err(db_error("get_group"))?,
            ))
        })
        .transpose()
    }

    async fn list_groups(&self) -> Result<Vec<GroupDefinition>, GatewayError> {
        let rows = sqlx::query("SELECT name, prefix FROM rank_groups ORDER BY name")
            .fetch_all(&self.pool)
            .await
            .map_err(db_error("list_groups"))?;
        rows.iter()
            .map(|row| -> Result<GroupDefinition, GatewayError> {
                Ok(GroupDefinition::new(
                    row.try_get::<String, _>("name").map_err(db_error("list_groups"))?,
                    row.try_get::<String, _>("prefix").map_err(db_error("list_groups"))?,
                ))
            })
            .collect()
    }

    async fn set_assignment(&self, record: &StoredAssignment) -> Result<(), GatewayError> {
        match self.upsert_assignment(record, record.group_name.as_deref()).await {
            Err(GatewayError::Constraint { .. }) if record.group_name.is_some() => {
                warn!(
                    "⚠️ Group {:?} of {} is gone, storing a null reference",
                    record.group_name, record.player
                );
                self.upsert_assignment(record, None).await
            }
            other => other,
        }
    }

    async fn get_assignment(
        &self,
        player: PlayerId,
    ) -> Result<Option<StoredAssignment>, GatewayError> {
        let row = sqlx::query(
            "SELECT group_name, expires_at FROM rank_assignments WHERE player_id = ?",
        )
        .bind(player.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("get_assignment"))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let group_name: Option<String> =
            row.try_get("group_name").map_err(db_error("get_assignment"))?;
        let expires_at: Option<i64> =
            row.try_get("expires_at").map_err(db_error("get_assignment"))?;

        Ok(Some(StoredAssignment {
            player,
            group_name,
            expires_at: from_millis("get_assignment", expires_at)?,
        }))
    }

    async fn delete_assignment(&self, player: PlayerId) -> Result<(), GatewayError> {
        sqlx::query("DELETE FROM rank_assignments WHERE player_id = ?")
            .bind(player.to_string())
            .execute(&self.pool)
            .await
            .map_err(db_error("delete_assignment"))?;
        Ok(())
    }

    async fn save_surface(&self, binding: &SurfaceBinding) -> Result<(), GatewayError> {
        validate_surface(&binding.surface)?;
        let surface = &binding.surface;
        sqlx::query(
            "INSERT INTO rank_surfaces (world, x, y, z, tracked_player) VALUES (?, ?, ?, ?, ?) \
             ON CONFLICT(world, x, y, z) DO UPDATE SET tracked_player = excluded.tracked_player",
        )
        .bind(&surface.world)
        .bind(surface.x)
        .bind(surface.y)
        .bind(surface.z)
        .bind(binding.tracked_player.to_string())
        .execute(&self.pool)
        .await
        .map_err(db_error("save_surface"))?;
        Ok(())
    }

    async fn delete_surface(&self, surface: &SurfaceId) -> Result<(), GatewayError> {
        sqlx::query("DELETE FROM rank_surfaces WHERE world = ? AND x = ? AND y = ? AND z = ?")
            .bind(&surface.world)
            .bind(surface.x)
            .bind(surface.y)
            .bind(surface.z)
            .execute(&self.pool)
            .await
            .map_err(db_error("delete_surface"))?;
        Ok(())
    }

    async fn list_surfaces(&self) -> Result<Vec<SurfaceBinding>, GatewayError> {
        let rows = sqlx::query("SELECT world, x, y, z, tracked_player FROM rank_surfaces")
            .fetch_all(&self.pool)
            .await
            .map_err(db_error("list_surfaces"))?;

        rows.iter()
            .map(|row| -> Result<SurfaceBinding, GatewayError> {
                let tracked: String = row
                    .try_get("tracked_player")
                    .map_err(db_error("list_surfaces"))?;
                Ok(SurfaceBinding {
                    surface: SurfaceId::new(
                        row.try_get::<String, _>("world").map_err(db_error("list_surfaces"))?,
                        row.try_get::<i32, _>("x").map_err(db_error("list_surfaces"))?,
                        row.try_get::<i32, _>("y").map_err(db_error("list_surfaces"))?,
                        row.try_get::<i32, _>("z").map_err(db_error("list_surfaces"))?,
                    ),
                    tracked_player: parse_player("list_surfaces", &tracked)?,
                })
            })
            .collect()
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;

    async fn gateway() -> SqliteGateway {
        let gateway = SqliteGateway::in_memory().await.unwrap();
        gateway.init_schema().await.unwrap();
        gateway
    }

    #[tokio::test]
    async fn schema_is_idempotent() {
        let gateway = gateway().await;
        gateway.init_schema().await.unwrap();
    }

    #[tokio::test]
    async fn group_names_are_case_insensitive() {
        let gateway = gateway().await;
        gateway
            .save_group(&GroupDefinition::new("Admin", "&c[Admin]"))
            .await
            .unwrap();
        gateway
            .save_group(&GroupDefinition::new("ADMIN", "&4[Admin]"))
            .await
            .unwrap();

        let groups = gateway.list_groups().await.unwrap();
        assert_eq!(groups.len(), 1);
        let admin = gateway.get_group("admin").await.unwrap().unwrap();
        assert_eq!(admin.name, "Admin");
        assert_eq!(admin.raw_prefix, "&4[Admin]");
    }

    #[tokio::test]
    async fn prefix_update_keeps_assignments() {
        let gateway = gateway().await;
        let player = PlayerId::new();
        gateway
            .save_group(&GroupDefinition::new("Vip", "&6"))
            .await
            .unwrap();
        gateway
            .set_assignment(&StoredAssignment {
                player,
                group_name: Some("Vip".into()),
                expires_at: None,
            })
            .await
            .unwrap();

        gateway
            .save_group(&GroupDefinition::new("Vip", "&e"))
            .await
            .unwrap();
        let record = gateway.get_assignment(player).await.unwrap().unwrap();
        assert_eq!(record.group_name.as_deref(), Some("Vip"));
    }

    #[tokio::test]
    async fn deleting_group_nulls_assignment_and_keeps_expiry() {
        let gateway = gateway().await;
        let player = PlayerId::new();
        let expires_at = DateTime::from_timestamp_millis(1_704_110_400_123);
        gateway
            .save_group(&GroupDefinition::new("Vip", "&6"))
            .await
            .unwrap();
        gateway
            .set_assignment(&StoredAssignment {
                player,
                group_name: Some("vip".into()),
                expires_at,
            })
            .await
            .unwrap();

        let record = gateway.get_assignment(player).await.unwrap().unwrap();
        assert_eq!(record.expires_at, expires_at);

        gateway.delete_group("VIP").await.unwrap();
        let record = gateway.get_assignment(player).await.unwrap().unwrap();
        assert_eq!(record.group_name, None);
        assert_eq!(record.expires_at, expires_at);

        gateway.delete_assignment(player).await.unwrap();
        assert!(gateway.get_assignment(player).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn missing_group_reference_is_stored_nulled() {
        let gateway = gateway().await;
        let player = PlayerId::new();
        gateway
            .set_assignment(&StoredAssignment {
                player,
                group_name: Some("ghost".into()),
                expires_at: None,
            })
            .await
            .unwrap();

        let record = gateway.get_assignment(player).await.unwrap().unwrap();
        assert_eq!(record.group_name, None);
    }

    #[tokio::test]
    async fn surfaces_upsert_and_delete() {
        let gateway = gateway().await;
        let first = PlayerId::new();
        let second = PlayerId::new();
        let surface = SurfaceId::new("world", -12, 70, 305);

        gateway
            .save_surface(&SurfaceBinding {
                surface: surface.clone(),
                tracked_player: first,
            })
            .await
            .unwrap();
        gateway
            .save_surface(&SurfaceBinding {
                surface: surface.clone(),
                tracked_player: second,
            })
            .await
            .unwrap();

        let bindings = gateway.list_surfaces().await.unwrap();
        assert_eq!(
            bindings,
            vec![SurfaceBinding {
                surface: surface.clone(),
                tracked_player: second,
            }]
        );

        gateway.delete_surface(&surface).await.unwrap();
        assert!(gateway.list_surfaces().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn closed_pool_reports_unavailable() {
        let gateway = gateway().await;
        gateway.close().await;
        assert!(matches!(
            gateway.list_groups().await,
            Err(GatewayError::Unavailable(_))
        ));
    }
}
