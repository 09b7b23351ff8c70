//! PostgreSQL tracker store for production use.
//!
//! ## Configuration
//!
//! All settings can be configured via environment variables:
//! - `DATABASE_URL`: PostgreSQL connection string (required)
//! - `DB_MAX_CONNECTIONS`: Maximum pool size (default: 10)
//! - `DB_MIN_CONNECTIONS`: Minimum idle connections (default: 2)
//! - `DB_CONNECT_TIMEOUT_SECS`: Connection timeout (default: 10)
//! - `DB_IDLE_TIMEOUT_SECS`: Idle connection timeout (default: 300)
//! - `DB_MAX_LIFETIME_SECS`: Max connection lifetime (default: 1800)

use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{QueryBuilder, Row};

use crate::types::{
    ChangeAction, ComposeChange, ComposeId, ComposeInfo, ComposeRecord, NewTag, Tag, TagUpdate,
};

use super::{ComposeFilter, ComposeOrder, InsertOutcome, OrderKey, TagFilter, TagTerm, TrackerStore};

/// Bootstrap schema for the tracker tables.
///
/// Production deployments manage migrations externally; this is enough for
/// development databases and tests.
pub const TRACKER_TABLE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS composes (
    id          TEXT PRIMARY KEY,
    builder     TEXT NOT NULL,
    info        JSONB NOT NULL,
    created_at  TIMESTAMPTZ NOT NULL,
    respin_of   TEXT REFERENCES composes(id),
    compose_url TEXT,
    release_key TEXT NOT NULL UNIQUE
);
CREATE TABLE IF NOT EXISTS compose_parents (
    parent_id TEXT NOT NULL REFERENCES composes(id),
    child_id  TEXT NOT NULL REFERENCES composes(id),
    ord       INT  NOT NULL,
    UNIQUE (parent_id, child_id)
);
CREATE TABLE IF NOT EXISTS tags (
    id            BIGSERIAL PRIMARY KEY,
    name          TEXT NOT NULL UNIQUE,
    description   TEXT NOT NULL DEFAULT '',
    documentation TEXT NOT NULL DEFAULT ''
);
CREATE TABLE IF NOT EXISTS tag_taggers (
    tag_id    BIGINT NOT NULL REFERENCES tags(id),
    principal TEXT   NOT NULL,
    UNIQUE (tag_id, principal)
);
CREATE TABLE IF NOT EXISTS tag_untaggers (
    tag_id    BIGINT NOT NULL REFERENCES tags(id),
    principal TEXT   NOT NULL,
    UNIQUE (tag_id, principal)
);
CREATE TABLE IF NOT EXISTS compose_tags (
    compose_id TEXT   NOT NULL REFERENCES composes(id),
    tag_id     BIGINT NOT NULL REFERENCES tags(id),
    UNIQUE (compose_id, tag_id)
);
CREATE TABLE IF NOT EXISTS compose_changes (
    id         BIGSERIAL PRIMARY KEY,
    compose_id TEXT NOT NULL REFERENCES composes(id),
    time       TIMESTAMPTZ NOT NULL,
    action     TEXT NOT NULL,
    agent      TEXT NOT NULL,
    message    TEXT
);
"#;

/// Configuration for the PostgreSQL connection pool.
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    /// Database connection URL.
    pub database_url: String,
    /// Maximum connections in pool (default: 10).
    pub max_connections: u32,
    /// Minimum idle connections to keep warm (default: 2).
    pub min_connections: u32,
    /// Connection acquire timeout in seconds (default: 10).
    pub connect_timeout_secs: u64,
    /// Idle connection timeout in seconds (default: 300 = 5 min).
    pub idle_timeout_secs: u64,
    /// Maximum connection lifetime in seconds (default: 1800 = 30 min).
    pub max_lifetime_secs: u64,
}

impl PostgresConfig {
    /// Load configuration from environment variables with production defaults.
    pub fn from_env() -> Self {
        Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgresql://localhost/compose_tracker".to_string()),
            max_connections: std::env::var("DB_MAX_CONNECTIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),
            min_connections: std::env::var("DB_MIN_CONNECTIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(2),
            connect_timeout_secs: std::env::var("DB_CONNECT_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),
            idle_timeout_secs: std::env::var("DB_IDLE_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(300),
            max_lifetime_secs: std::env::var("DB_MAX_LIFETIME_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(1800),
        }
    }
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

/// Error type for the PostgreSQL store.
#[derive(Debug, thiserror::Error)]
pub enum PostgresError {
    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    /// Stored metadata does not deserialize.
    #[error("metadata decode error for {id}: {source}")]
    Decode {
        /// Compose the bad metadata belongs to.
        id: String,
        /// Underlying serde error.
        source: serde_json::Error,
    },
}

/// PostgreSQL tracker store.
///
/// Each mutating method runs in a single transaction; uniqueness and
/// `ON CONFLICT DO NOTHING` carry the idempotency checks so concurrent
/// apply/remove against the same (compose, tag) pair cannot lose updates.
pub struct PostgresTrackerStore {
    pool: PgPool,
}

impl PostgresTrackerStore {
    /// Create a new store with the given configuration.
    pub async fn new(config: PostgresConfig) -> Result<Self, sqlx::Error> {
        tracing::info!(
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            connect_timeout_secs = config.connect_timeout_secs,
            "Initializing PostgreSQL connection pool"
        );

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
            .max_lifetime(Duration::from_secs(config.max_lifetime_secs))
            .test_before_acquire(true)
            .connect(&config.database_url)
            .await?;

        Ok(Self { pool })
    }

    /// Create a store from environment variables.
    pub async fn from_env() -> Result<Self, sqlx::Error> {
        Self::new(PostgresConfig::from_env()).await
    }

    /// Get the connection pool for health checks.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the tracker tables if they do not exist.
    pub async fn ensure_schema(&self) -> Result<(), sqlx::Error> {
        use sqlx::Executor;
        self.pool.execute(TRACKER_TABLE_SCHEMA).await?;
        Ok(())
    }

    /// Check if the database is reachable.
    pub async fn is_healthy(&self) -> bool {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await.is_ok()
    }

    /// Get pool statistics for monitoring.
    pub fn pool_stats(&self) -> PoolStats {
        PoolStats {
            size: self.pool.size(),
            idle: self.pool.num_idle(),
            max: self.pool.options().get_max_connections(),
        }
    }

    fn parse_compose_row(row: &PgRow, parents: Vec<ComposeId>) -> Result<ComposeRecord, PostgresError> {
        let id: String = row.try_get("id")?;
        let info_value: serde_json::Value = row.try_get("info")?;
        let info: ComposeInfo =
            serde_json::from_value(info_value).map_err(|source| PostgresError::Decode {
                id: id.clone(),
                source,
            })?;
        let respin_of: Option<String> = row.try_get("respin_of")?;
        Ok(ComposeRecord {
            id: ComposeId::new(id),
            builder: row.try_get("builder")?,
            info,
            created_at: row.try_get("created_at")?,
            parents,
            respin_of: respin_of.map(ComposeId::new),
            compose_url: row.try_get("compose_url")?,
        })
    }

    async fn parents_of(&self, id: &str) -> Result<Vec<ComposeId>, PostgresError> {
        let rows = sqlx::query(
            r#"
            SELECT parent_id
            FROM compose_parents
            WHERE child_id = $1
            ORDER BY ord
            "#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|row| ComposeId::new(row.get::<String, _>("parent_id")))
            .collect())
    }

    async fn load_tag(&self, name: &str) -> Result<Option<Tag>, PostgresError> {
        let row = sqlx::query(
            r#"
            SELECT id, name, description, documentation
            FROM tags
            WHERE name = $1
            "#,
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => Ok(Some(self.fill_tag_sets(row).await?)),
            None => Ok(None),
        }
    }

    async fn fill_tag_sets(&self, row: PgRow) -> Result<Tag, PostgresError> {
        let id: i64 = row.try_get("id")?;
        let taggers = sqlx::query(
            "SELECT principal FROM tag_taggers WHERE tag_id = $1 ORDER BY principal",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(|r| r.get::<String, _>("principal"))
        .collect();
        let untaggers = sqlx::query(
            "SELECT principal FROM tag_untaggers WHERE tag_id = $1 ORDER BY principal",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(|r| r.get::<String, _>("principal"))
        .collect();
        Ok(Tag {
            id: id as u64,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            documentation: row.try_get("documentation")?,
            taggers,
            untaggers,
        })
    }

    fn order_expr(key: OrderKey) -> &'static str {
        match key {
            OrderKey::Id => "id",
            OrderKey::Date => "info->>'date'",
            OrderKey::Respin => "(info->>'respin')::int",
            OrderKey::Builder => "builder",
            OrderKey::CreatedAt => "created_at",
        }
    }
}

/// Pool statistics for monitoring.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PoolStats {
    /// Current pool size.
    pub size: u32,
    /// Number of idle connections.
    pub idle: usize,
    /// Maximum pool size.
    pub max: u32,
}

#[async_trait]
impl TrackerStore for PostgresTrackerStore {
    type Error = PostgresError;

    async fn insert_compose(&self, record: ComposeRecord) -> Result<InsertOutcome, Self::Error> {
        let mut tx = self.pool.begin().await?;

        let info = serde_json::to_value(&record.info).map_err(|source| PostgresError::Decode {
            id: record.id.to_string(),
            source,
        })?;
        let inserted = sqlx::query(
            r#"
            INSERT INTO composes (id, builder, info, created_at, respin_of, compose_url, release_key)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(record.id.as_str())
        .bind(&record.builder)
        .bind(&info)
        .bind(record.created_at)
        .bind(record.respin_of.as_ref().map(|id| id.as_str()))
        .bind(&record.compose_url)
        .bind(record.info.release_date_respin())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if inserted == 0 {
            tx.rollback().await?;
            return Ok(InsertOutcome::IdExists);
        }

        for (ord, parent) in record.parents.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO compose_parents (parent_id, child_id, ord)
                VALUES ($1, $2, $3)
                "#,
            )
            .bind(parent.as_str())
            .bind(record.id.as_str())
            .bind(ord as i32)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(InsertOutcome::Inserted)
    }

    async fn get_compose(&self, id: &ComposeId) -> Result<Option<ComposeRecord>, Self::Error> {
        let row = sqlx::query(
            r#"
            SELECT id, builder, info, created_at, respin_of, compose_url
            FROM composes
            WHERE id = $1
            "#,
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref row) => {
                let parents = self.parents_of(id.as_str()).await?;
                Ok(Some(Self::parse_compose_row(row, parents)?))
            }
            None => Ok(None),
        }
    }

    async fn list_composes(
        &self,
        filter: &ComposeFilter,
        order: &[ComposeOrder],
    ) -> Result<Vec<ComposeRecord>, Self::Error> {
        let mut query: QueryBuilder<sqlx::Postgres> = QueryBuilder::new(
            "SELECT id, builder, info, created_at, respin_of, compose_url FROM composes WHERE TRUE",
        );

        if let Some(ref id) = filter.id {
            query.push(" AND id = ").push_bind(id);
        }
        if let Some(ref date) = filter.date {
            query.push(" AND info->>'date' = ").push_bind(date);
        }
        if let Some(ref before) = filter.date_before {
            query.push(" AND info->>'date' < ").push_bind(before);
        }
        if let Some(ref after) = filter.date_after {
            query.push(" AND info->>'date' > ").push_bind(after);
        }
        if let Some(respin) = filter.respin {
            query
                .push(" AND (info->>'respin')::int = ")
                .push_bind(respin as i32);
        }
        if let Some(compose_type) = filter.compose_type {
            query
                .push(" AND info->>'type' = ")
                .push_bind(compose_type.to_string());
        }
        if let Some(ref label) = filter.label {
            query.push(" AND info->>'label' = ").push_bind(label);
        }
        if let Some(ref short) = filter.release_short {
            query.push(" AND info->>'release_short' = ").push_bind(short);
        }
        if let Some(ref version) = filter.release_version {
            query
                .push(" AND info->>'release_version' = ")
                .push_bind(version);
        }
        if let Some(ref builder) = filter.builder {
            query.push(" AND builder = ").push_bind(builder);
        }
        for term in &filter.tags {
            match term {
                TagTerm::Has(name) => {
                    query
                        .push(
                            " AND EXISTS (SELECT 1 FROM compose_tags ct JOIN tags t ON t.id = ct.tag_id \
                             WHERE ct.compose_id = composes.id AND t.name = ",
                        )
                        .push_bind(name)
                        .push(")");
                }
                TagTerm::Not(name) => {
                    query
                        .push(
                            " AND NOT EXISTS (SELECT 1 FROM compose_tags ct JOIN tags t ON t.id = ct.tag_id \
                             WHERE ct.compose_id = composes.id AND t.name = ",
                        )
                        .push_bind(name)
                        .push(")");
                }
                TagTerm::Untagged => {
                    query.push(
                        " AND NOT EXISTS (SELECT 1 FROM compose_tags ct \
                         WHERE ct.compose_id = composes.id)",
                    );
                }
            }
        }

        query.push(" ORDER BY ");
        let order = if order.is_empty() {
            ComposeOrder::default_order()
        } else {
            order.to_vec()
        };
        for (i, term) in order.iter().enumerate() {
            if i > 0 {
                query.push(", ");
            }
            query.push(Self::order_expr(term.key));
            if term.descending {
                query.push(" DESC");
            }
        }
        // Stable tie-break on commit order.
        query.push(", created_at, id");

        let rows = query.build().fetch_all(&self.pool).await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            let id: String = row.try_get("id")?;
            let parents = self.parents_of(&id).await?;
            records.push(Self::parse_compose_row(row, parents)?);
        }
        Ok(records)
    }

    async fn children(&self, id: &ComposeId) -> Result<Vec<ComposeId>, Self::Error> {
        let rows = sqlx::query(
            r#"
            SELECT child_id
            FROM compose_parents
            WHERE parent_id = $1
            ORDER BY child_id
            "#,
        )
        .bind(id.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|row| ComposeId::new(row.get::<String, _>("child_id")))
            .collect())
    }

    async fn respun_by(&self, id: &ComposeId) -> Result<Vec<ComposeId>, Self::Error> {
        let rows = sqlx::query(
            r#"
            SELECT id
            FROM composes
            WHERE respin_of = $1
            ORDER BY id
            "#,
        )
        .bind(id.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|row| ComposeId::new(row.get::<String, _>("id")))
            .collect())
    }

    async fn insert_tag(&self, tag: NewTag) -> Result<Option<Tag>, Self::Error> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(
            r#"
            INSERT INTO tags (name, description, documentation)
            VALUES ($1, $2, $3)
            ON CONFLICT (name) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(&tag.name)
        .bind(&tag.description)
        .bind(&tag.documentation)
        .fetch_optional(&mut *tx)
        .await?;

        let id: i64 = match row {
            Some(row) => row.try_get("id")?,
            None => {
                tx.rollback().await?;
                return Ok(None);
            }
        };

        for principal in &tag.taggers {
            sqlx::query("INSERT INTO tag_taggers (tag_id, principal) VALUES ($1, $2)")
                .bind(id)
                .bind(principal)
                .execute(&mut *tx)
                .await?;
        }
        for principal in &tag.untaggers {
            sqlx::query("INSERT INTO tag_untaggers (tag_id, principal) VALUES ($1, $2)")
                .bind(id)
                .bind(principal)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        Ok(Some(Tag {
            id: id as u64,
            name: tag.name,
            description: tag.description,
            documentation: tag.documentation,
            taggers: tag.taggers,
            untaggers: tag.untaggers,
        }))
    }

    async fn get_tag(&self, name: &str) -> Result<Option<Tag>, Self::Error> {
        self.load_tag(name).await
    }

    async fn update_tag(
        &self,
        name: &str,
        update: &TagUpdate,
    ) -> Result<Option<Tag>, Self::Error> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(
            r#"
            UPDATE tags
            SET description = COALESCE($2, description),
                documentation = COALESCE($3, documentation)
            WHERE name = $1
            RETURNING id
            "#,
        )
        .bind(name)
        .bind(update.description.as_ref())
        .bind(update.documentation.as_ref())
        .fetch_optional(&mut *tx)
        .await?;

        let id: i64 = match row {
            Some(row) => row.try_get("id")?,
            None => {
                tx.rollback().await?;
                return Ok(None);
            }
        };

        if let Some(ref taggers) = update.taggers {
            sqlx::query("DELETE FROM tag_taggers WHERE tag_id = $1")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            for principal in taggers {
                sqlx::query("INSERT INTO tag_taggers (tag_id, principal) VALUES ($1, $2)")
                    .bind(id)
                    .bind(principal)
                    .execute(&mut *tx)
                    .await?;
            }
        }
        if let Some(ref untaggers) = update.untaggers {
            sqlx::query("DELETE FROM tag_untaggers WHERE tag_id = $1")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            for principal in untaggers {
                sqlx::query("INSERT INTO tag_untaggers (tag_id, principal) VALUES ($1, $2)")
                    .bind(id)
                    .bind(principal)
                    .execute(&mut *tx)
                    .await?;
            }
        }
        tx.commit().await?;
        self.load_tag(name).await
    }

    async fn list_tags(&self, filter: &TagFilter) -> Result<Vec<Tag>, Self::Error> {
        let rows = match filter.name {
            Some(ref name) => {
                sqlx::query(
                    "SELECT id, name, description, documentation FROM tags WHERE name = $1 ORDER BY id",
                )
                .bind(name)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query("SELECT id, name, description, documentation FROM tags ORDER BY id")
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        let mut tags = Vec::with_capacity(rows.len());
        for row in rows {
            tags.push(self.fill_tag_sets(row).await?);
        }
        Ok(tags)
    }

    async fn compose_tags(&self, id: &ComposeId) -> Result<Vec<String>, Self::Error> {
        let rows = sqlx::query(
            r#"
            SELECT t.name
            FROM compose_tags ct
            JOIN tags t ON t.id = ct.tag_id
            WHERE ct.compose_id = $1
            ORDER BY t.name
            "#,
        )
        .bind(id.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(|row| row.get::<String, _>("name")).collect())
    }

    async fn add_tag_to_compose(&self, id: &ComposeId, tag: &str) -> Result<bool, Self::Error> {
        let changed = sqlx::query(
            r#"
            INSERT INTO compose_tags (compose_id, tag_id)
            SELECT $1, t.id FROM tags t WHERE t.name = $2
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(id.as_str())
        .bind(tag)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(changed > 0)
    }

    async fn remove_tag_from_compose(
        &self,
        id: &ComposeId,
        tag: &str,
    ) -> Result<bool, Self::Error> {
        let changed = sqlx::query(
            r#"
            DELETE FROM compose_tags ct
            USING tags t
            WHERE ct.tag_id = t.id AND ct.compose_id = $1 AND t.name = $2
            "#,
        )
        .bind(id.as_str())
        .bind(tag)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(changed > 0)
    }

    async fn record_compose_change(
        &self,
        id: &ComposeId,
        change: ComposeChange,
    ) -> Result<(), Self::Error> {
        sqlx::query(
            r#"
            INSERT INTO compose_changes (compose_id, time, action, agent, message)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(id.as_str())
        .bind(change.time)
        .bind(change.action.to_string())
        .bind(&change.agent)
        .bind(&change.message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn compose_changes(&self, id: &ComposeId) -> Result<Vec<ComposeChange>, Self::Error> {
        let rows = sqlx::query(
            r#"
            SELECT time, action, agent, message
            FROM compose_changes
            WHERE compose_id = $1
            ORDER BY id
            "#,
        )
        .bind(id.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| {
                let action: String = row.try_get("action")?;
                Ok(ComposeChange {
                    time: row.try_get("time")?,
                    action: match action.as_str() {
                        "created" => ChangeAction::Created,
                        "tagged" => ChangeAction::Tagged,
                        _ => ChangeAction::Untagged,
                    },
                    agent: row.try_get("agent")?,
                    message: row.try_get("message")?,
                })
            })
            .collect()
    }
}
