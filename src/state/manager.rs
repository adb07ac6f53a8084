//! PostgreSQL state manager

use super::PersistenceGateway;
use crate::config::DatabaseConfig;
use crate::error::{RelayerError, RelayerResult};
use crate::relationship::{
    ActorId, EventKind, FamilyTreeMember, Marriage, MemberStore, PartnerRecord,
};

use async_trait::async_trait;
use serde::Serialize;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use tracing::{debug, info};
use uuid::Uuid;

/// State manager for PostgreSQL persistence
pub struct StateManager {
    pool: PgPool,
}

impl StateManager {
    /// Create a new state manager
    pub async fn new(config: &DatabaseConfig) -> RelayerResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .connect(&config.url)
            .await?;

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Shared pool, also used by the LISTEN/NOTIFY transport
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> RelayerResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS marriages (
                marriage_id UUID NOT NULL,
                user_id BIGINT NOT NULL,
                partner_id BIGINT NOT NULL,
                valid BOOLEAN NOT NULL DEFAULT TRUE,
                married_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                divorced_at TIMESTAMPTZ,
                PRIMARY KEY (marriage_id, user_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // The authoritative one-active-marriage-per-actor rule, shared by all shards
        sqlx::query(
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS idx_marriages_active_user
            ON marriages (user_id) WHERE valid
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS events (
                id BIGSERIAL PRIMARY KEY,
                instigator BIGINT NOT NULL,
                target BIGINT NOT NULL,
                event VARCHAR(20) NOT NULL,
                time TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_events_instigator
            ON events (instigator, time)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS parents (
                child_id BIGINT PRIMARY KEY,
                parent_id BIGINT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_parents_parent
            ON parents (parent_id)
            "#,
        )
        .execute(&self.pool)
        .await?;

        info!("Database migrations complete");
        Ok(())
    }

    /// Health check
    pub async fn health_check(&self) -> RelayerResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Get relationship statistics
    pub async fn get_stats(&self) -> RelayerResult<RelationshipStats> {
        let row = sqlx::query(
            r#"
            SELECT
                (SELECT COUNT(DISTINCT marriage_id) FROM marriages WHERE valid) as active_marriages,
                (SELECT COUNT(DISTINCT marriage_id) FROM marriages WHERE NOT valid) as divorces,
                (SELECT COUNT(*) FROM events WHERE event = 'PROPOSAL') as proposals,
                (SELECT COUNT(*) FROM events) as events
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(RelationshipStats {
            active_marriages: row.get::<i64, _>("active_marriages") as u64,
            divorces: row.get::<i64, _>("divorces") as u64,
            proposals: row.get::<i64, _>("proposals") as u64,
            events: row.get::<i64, _>("events") as u64,
        })
    }
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db) => db.code().as_deref() == Some("23505"),
        _ => false,
    }
}

#[async_trait]
impl PersistenceGateway for StateManager {
    async fn get_marriage(&self, actor: ActorId) -> RelayerResult<Vec<PartnerRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT marriage_id, user_id, partner_id
            FROM marriages
            WHERE user_id = $1 AND valid
            "#,
        )
        .bind(actor as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| PartnerRecord {
                marriage_id: row.get("marriage_id"),
                user_id: row.get::<i64, _>("user_id") as u64,
                partner_id: row.get::<i64, _>("partner_id") as u64,
            })
            .collect())
    }

    async fn add_event(
        &self,
        instigator: ActorId,
        target: ActorId,
        kind: EventKind,
    ) -> RelayerResult<()> {
        sqlx::query(
            r#"
            INSERT INTO events (instigator, target, event)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(instigator as i64)
        .bind(target as i64)
        .bind(kind.as_str())
        .execute(&self.pool)
        .await?;

        debug!("Recorded {} event {} -> {}", kind.as_str(), instigator, target);
        Ok(())
    }

    async fn marry(&self, a: ActorId, b: ActorId) -> RelayerResult<Marriage> {
        let marriage_id = Uuid::new_v4();
        let mut tx = self.pool.begin().await?;

        for (user, partner) in [(a, b), (b, a)] {
            sqlx::query(
                r#"
                INSERT INTO marriages (marriage_id, user_id, partner_id)
                VALUES ($1, $2, $3)
                "#,
            )
            .bind(marriage_id)
            .bind(user as i64)
            .bind(partner as i64)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    RelayerError::MarriageConflict { actor_id: user }
                } else {
                    RelayerError::Database(e)
                }
            })?;
        }

        tx.commit().await?;

        info!("Committed marriage {} between {} and {}", marriage_id, a, b);
        Ok(Marriage {
            marriage_id,
            partner_a: a,
            partner_b: b,
        })
    }

    async fn divorce(
        &self,
        instigator: ActorId,
        target: ActorId,
        marriage_id: Uuid,
    ) -> RelayerResult<bool> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE marriages
            SET valid = FALSE, divorced_at = NOW()
            WHERE marriage_id = $1 AND valid
            "#,
        )
        .bind(marriage_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        info!(
            "Committed divorce {} between {} and {} ({} rows)",
            marriage_id,
            instigator,
            target,
            result.rows_affected()
        );
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl MemberStore for StateManager {
    async fn tree_member(&self, actor: ActorId) -> RelayerResult<Option<FamilyTreeMember>> {
        let row = sqlx::query(
            r#"
            SELECT
                (SELECT partner_id FROM marriages WHERE user_id = $1 AND valid) as partner_id,
                (SELECT parent_id FROM parents WHERE child_id = $1) as parent_id,
                ARRAY(SELECT child_id FROM parents WHERE parent_id = $1) as children
            "#,
        )
        .bind(actor as i64)
        .fetch_one(&self.pool)
        .await?;

        let partner_id: Option<i64> = row.get("partner_id");
        let parent_id: Option<i64> = row.get("parent_id");
        let children: Vec<i64> = row.get("children");

        if partner_id.is_none() && parent_id.is_none() && children.is_empty() {
            return Ok(None);
        }

        Ok(Some(FamilyTreeMember {
            discord_id: actor,
            children: children.into_iter().map(|c| c as u64).collect(),
            parent_id: parent_id.map(|p| p as u64),
            partner_id: partner_id.map(|p| p as u64),
        }))
    }
}

/// Relationship statistics
#[derive(Debug, Clone, Serialize)]
pub struct RelationshipStats {
    pub active_marriages: u64,
    pub divorces: u64,
    pub proposals: u64,
    pub events: u64,
}
