//! MySQL / MariaDB gateway.
//!
//! Tables are InnoDB so the assignment foreign key can null references to a
//! deleted group. The `utf8mb4_general_ci` collation makes group names
//! case-insensitive, matching the SQLite backend.

use async_trait::async_trait;
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions};
use sqlx::Row;
use std::time::Duration;
use tracing::{debug, info, warn};

use rank_core::gateway::{validate_group_name, validate_surface};
use rank_core::{
    GatewayError, GroupDefinition, PersistenceGateway, PlayerId, StoredAssignment,
    SurfaceBinding, SurfaceId,
};

use crate::{db_error, from_millis, parse_player, to_millis, MySqlSettings};

const SCHEMA: [&str; 3] = [
    r#"
    CREATE TABLE IF NOT EXISTS rank_groups (
        name VARCHAR(64) NOT NULL PRIMARY KEY,
        prefix VARCHAR(255) NOT NULL DEFAULT ''
    ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_general_ci
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS rank_assignments (
        player_id CHAR(36) NOT NULL PRIMARY KEY,
        group_name VARCHAR(64) NULL,
        expires_at BIGINT NULL,
        CONSTRAINT fk_rank_assignment_group FOREIGN KEY (group_name)
            REFERENCES rank_groups(name) ON DELETE SET NULL
    ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_general_ci
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS rank_surfaces (
        world VARCHAR(64) NOT NULL,
        x INT NOT NULL,
        y INT NOT NULL,
        z INT NOT NULL,
        tracked_player CHAR(36) NOT NULL,
        PRIMARY KEY (world, x, y, z)
    ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_general_ci
    "#,
];

const UPSERT_GROUP: &str = "INSERT INTO rank_groups (name, prefix) VALUES (?, ?) \
     ON DUPLICATE KEY UPDATE prefix = VALUES(prefix)";

const UPSERT_ASSIGNMENT: &str =
    "INSERT INTO rank_assignments (player_id, group_name, expires_at) VALUES (?, ?, ?) \
     ON DUPLICATE KEY UPDATE group_name = VALUES(group_name), expires_at = VALUES(expires_at)";

const UPSERT_SURFACE: &str =
    "INSERT INTO rank_surfaces (world, x, y, z, tracked_player) VALUES (?, ?, ?, ?, ?) \
     ON DUPLICATE KEY UPDATE tracked_player = VALUES(tracked_player)";

#[derive(Clone)]
pub struct MySqlGateway {
    pool: MySqlPool,
}

impl MySqlGateway {
    pub async fn connect(settings: &MySqlSettings, max_connections: u32) -> Result<Self, sqlx::Error> {
        let options = MySqlConnectOptions::new()
            .host(&settings.host)
            .port(settings.port)
            .database(&settings.database)
            .username(&settings.username)
            .password(&settings.password);
        let pool = MySqlPoolOptions::new()
            .max_connections(max_connections.max(1))
            .acquire_timeout(Duration::from_secs(5))
            .connect_with(options)
            .await?;
        info!(
            "💾 Connected to MySQL at {}:{}/{}",
            settings.host, settings.port, settings.database
        );
        Ok(Self { pool })
    }

    pub fn from_pool(pool: MySqlPool) -> Self {
        Self { pool }
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
impl PersistenceGateway for MySqlGateway {
    fn backend_name(&self) -> &'static str {
        "mysql"
    }

    async fn init_schema(&self) -> Result<(), GatewayError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(db_error("init_schema"))?;
        }
        debug!("MySQL schema ready");
        Ok(())
    }

    async fn save_group(&self, group: &GroupDefinition) -> Result<(), GatewayError> {
        validate_group_name(&group.name)?;
        sqlx::query(UPSERT_GROUP)
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
        sqlx::query(UPSERT_SURFACE)
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
