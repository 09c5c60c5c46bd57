// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! PostgreSQL persistence: a pooled database handle, batched transactional
//! writes driven by model descriptors, and the schema migration runner.

pub mod migrations;
pub mod sql;

use async_trait::async_trait;
use once_cell::sync::OnceCell;
use sqlx::postgres::{PgConnection, PgPool, PgPoolOptions};
use sqlx::{Executor, Row};
use thiserror::Error;
use tracing::info;

use crate::model::{ModelSpec, Persistable, StorageBatch, Value, Version};
use self::migrations::{check_migration_sequence, latest_schema_version, migrations};

/// PostgreSQL truncates identifiers beyond this many bytes.
pub const MAX_POSTGRES_NAME_LENGTH: usize = 63;

/// Serializes concurrent migration runs across instances.
const ADVISORY_LOCK_KEY: i64 = 0x636e7079;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("configuration: {0}")]
    Config(String),
    #[error("name {0:?} exceeds maximum postgres name length ({MAX_POSTGRES_NAME_LENGTH})")]
    NameTooLong(String),
    #[error("database: {0}")]
    Database(#[from] sqlx::Error),
    #[error("duplicate primary key in table {table}")]
    Conflict { table: String },
    #[error("migration: {0}")]
    Migration(String),
    #[error("database schema is at {db}, binary wants {binary}: run migrate")]
    SchemaMismatch { db: Version, binary: Version },
    #[error("database schema not initialized: run migrate")]
    SchemaMissing,
    #[error("not connected")]
    NotConnected,
}

/// Rejects identifiers postgres would silently truncate.
pub fn verify_name(name: &str) -> Result<(), StorageError> {
    if name.len() > MAX_POSTGRES_NAME_LENGTH {
        return Err(StorageError::NameTooLong(name.to_string()));
    }
    Ok(())
}

/// Expands `$VAR` and `${VAR}` references from the environment, repeatedly,
/// so a variable may itself reference another. Unset variables expand to
/// the empty string.
pub fn expand_env(input: &str) -> String {
    let mut out = input.to_string();
    for _ in 0..8 {
        let next = expand_env_once(&out);
        if next == out {
            break;
        }
        out = next;
    }
    out
}

fn expand_env_once(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.char_indices().peekable();
    while let Some((_, c)) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        match chars.peek() {
            Some((_, '{')) => {
                chars.next();
                let mut name = String::new();
                for (_, c) in chars.by_ref() {
                    if c == '}' {
                        break;
                    }
                    name.push(c);
                }
                out.push_str(&std::env::var(&name).unwrap_or_default());
            }
            Some((_, c)) if c.is_ascii_alphanumeric() || *c == '_' => {
                let mut name = String::new();
                while let Some((_, c)) = chars.peek() {
                    if c.is_ascii_alphanumeric() || *c == '_' {
                        name.push(*c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                out.push_str(&std::env::var(&name).unwrap_or_default());
            }
            _ => out.push('$'),
        }
    }
    out
}

/// A processing-report summary row, consumed by the gap tracker.
#[derive(Clone, Debug, PartialEq)]
pub struct ReportStatus {
    pub height: i64,
    pub task: String,
    pub status: String,
}

/// An unfilled gap row.
#[derive(Clone, Debug, PartialEq)]
pub struct GapSummary {
    pub height: i64,
    pub task: String,
}

/// The sink the indexer persists into. The production implementation is
/// [`Database`]; tests substitute an in-memory store with the same upsert
/// semantics.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Persists a set of models in one transaction.
    async fn persist_batch(&self, models: &[&dyn Persistable]) -> Result<(), StorageError>;

    /// Processing-report statuses over a closed height range.
    async fn report_statuses(&self, min: i64, max: i64) -> Result<Vec<ReportStatus>, StorageError>;

    /// Gap rows still waiting to be filled over a closed height range.
    async fn unfilled_gaps(&self, min: i64, max: i64) -> Result<Vec<GapSummary>, StorageError>;
}

/// A pooled PostgreSQL database.
pub struct Database {
    url: String,
    pool_size: u32,
    schema: String,
    pub upsert: bool,
    version: Version,
    pool: OnceCell<PgPool>,
}

impl Database {
    /// Validates configuration without touching the network. The URL may
    /// reference environment variables; they are expanded here, once.
    pub fn new(
        url: &str,
        pool_size: u32,
        name: &str,
        schema: &str,
        upsert: bool,
    ) -> Result<Self, StorageError> {
        verify_name(name)?;
        verify_name(schema)?;
        Ok(Self {
            url: expand_env(url),
            pool_size,
            schema: schema.to_string(),
            upsert,
            version: latest_schema_version(),
            pool: OnceCell::new(),
        })
    }

    /// Pins the schema version rows are written at. Columns newer than this
    /// version are elided from generated SQL.
    pub fn with_schema_version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    async fn raw_pool(&self) -> Result<&PgPool, StorageError> {
        if let Some(pool) = self.pool.get() {
            return Ok(pool);
        }
        let pool = PgPoolOptions::new()
            .max_connections(self.pool_size)
            .connect(&self.url)
            .await?;
        Ok(self.pool.get_or_init(|| pool))
    }

    fn pool(&self) -> Result<&PgPool, StorageError> {
        self.pool.get().ok_or(StorageError::NotConnected)
    }

    /// Connects and verifies the database schema matches this binary.
    pub async fn connect(&self) -> Result<(), StorageError> {
        let pool = self.raw_pool().await?;
        let mut conn = pool.acquire().await?;
        match self.read_schema_version(&mut conn).await? {
            None => Err(StorageError::SchemaMissing),
            Some(db) if db != latest_schema_version() => Err(StorageError::SchemaMismatch {
                db,
                binary: latest_schema_version(),
            }),
            Some(_) => Ok(()),
        }
    }

    /// The schema version recorded in the database, or `None` before the
    /// first migration.
    async fn read_schema_version(
        &self,
        conn: &mut PgConnection,
    ) -> Result<Option<Version>, StorageError> {
        let q = format!(
            "SELECT \"major\", \"patch\" FROM \"{}\".\"visor_version\" LIMIT 1",
            self.schema
        );
        match sqlx::query(&q).fetch_optional(&mut *conn).await {
            Ok(Some(row)) => Ok(Some(Version::new(
                row.get::<i64, _>(0) as u64,
                row.get::<i64, _>(1) as u64,
            ))),
            Ok(None) => Ok(None),
            Err(sqlx::Error::Database(e)) if e.code().as_deref() == Some("42P01") => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn migrate_to_latest(&self) -> Result<(), StorageError> {
        self.migrate_to_version(latest_schema_version()).await
    }

    /// Migrates up or down to `target` under an advisory lock so concurrent
    /// instances serialize.
    pub async fn migrate_to_version(&self, target: Version) -> Result<(), StorageError> {
        check_migration_sequence(Version::new(0, 0), target)?;

        let pool = self.raw_pool().await?;
        let mut conn = pool.acquire().await?;

        sqlx::query("SELECT pg_advisory_lock($1)")
            .bind(ADVISORY_LOCK_KEY)
            .execute(&mut *conn)
            .await?;
        let result = self.run_migrations(&mut conn, target).await;
        let _ = sqlx::query("SELECT pg_advisory_unlock($1)")
            .bind(ADVISORY_LOCK_KEY)
            .execute(&mut *conn)
            .await;
        result
    }

    async fn run_migrations(
        &self,
        conn: &mut PgConnection,
        target: Version,
    ) -> Result<(), StorageError> {
        let current = self
            .read_schema_version(conn)
            .await?
            .unwrap_or(Version::new(0, 0));

        if current == target {
            info!(version = %current, "schema already at target version");
            return Ok(());
        }

        if current < target {
            for m in migrations() {
                if m.version <= current || m.version > target {
                    continue;
                }
                info!(version = %m.version, "applying migration");
                self.apply(conn, m.up, m.transactional).await?;
                self.write_schema_version(conn, m.version).await?;
            }
        } else {
            for m in migrations().iter().rev() {
                if m.version > current || m.version <= target {
                    continue;
                }
                info!(version = %m.version, "reverting migration");
                self.apply(conn, m.down, m.transactional).await?;
                let prev = migrations()
                    .iter()
                    .rev()
                    .map(|p| p.version)
                    .find(|v| *v < m.version);
                if let Some(prev) = prev {
                    self.write_schema_version(conn, prev).await?;
                }
            }
        }
        Ok(())
    }

    async fn apply(
        &self,
        conn: &mut PgConnection,
        ddl: &str,
        transactional: bool,
    ) -> Result<(), StorageError> {
        let ddl = ddl.replace("{schema}", &self.schema);
        if transactional {
            let mut tx = sqlx::Connection::begin(&mut *conn).await?;
            (&mut *tx).execute(ddl.as_str()).await?;
            tx.commit().await?;
        } else {
            conn.execute(ddl.as_str()).await?;
        }
        Ok(())
    }

    async fn write_schema_version(
        &self,
        conn: &mut PgConnection,
        version: Version,
    ) -> Result<(), StorageError> {
        let ddl = format!(
            "DELETE FROM \"{schema}\".\"visor_version\"; \
             INSERT INTO \"{schema}\".\"visor_version\" (\"major\", \"patch\") VALUES ({}, {});",
            version.major,
            version.patch,
            schema = self.schema
        );
        conn.execute(ddl.as_str()).await?;
        Ok(())
    }
}

#[async_trait]
impl Storage for Database {
    async fn persist_batch(&self, models: &[&dyn Persistable]) -> Result<(), StorageError> {
        let pool = self.pool()?;
        let tx = pool.begin().await?;
        let mut batch = SqlBatch {
            tx,
            version: self.version,
            upsert: self.upsert,
            schema: self.schema.clone(),
        };
        for model in models {
            // An error rolls the whole batch back when the transaction drops.
            model.persist(&mut batch).await?;
        }
        batch.tx.commit().await?;
        Ok(())
    }

    async fn report_statuses(&self, min: i64, max: i64) -> Result<Vec<ReportStatus>, StorageError> {
        let pool = self.pool()?;
        let q = format!(
            "SELECT \"height\", \"task\", \"status\" FROM \"{}\".\"visor_processing_reports\" \
             WHERE \"height\" BETWEEN $1 AND $2",
            self.schema
        );
        let rows = sqlx::query(&q).bind(min).bind(max).fetch_all(pool).await?;
        Ok(rows
            .into_iter()
            .map(|row| ReportStatus {
                height: row.get(0),
                task: row.get(1),
                status: row.get(2),
            })
            .collect())
    }

    async fn unfilled_gaps(&self, min: i64, max: i64) -> Result<Vec<GapSummary>, StorageError> {
        let pool = self.pool()?;
        let q = format!(
            "SELECT \"height\", \"task\" FROM \"{}\".\"visor_gap_reports\" \
             WHERE \"status\" = $1 AND \"height\" BETWEEN $2 AND $3",
            self.schema
        );
        let rows = sqlx::query(&q)
            .bind(crate::model::reports::GAP_STATUS_GAP)
            .bind(min)
            .bind(max)
            .fetch_all(pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| GapSummary {
                height: row.get(0),
                task: row.get(1),
            })
            .collect())
    }
}

/// One open transaction receiving rows from a batch of persistables.
struct SqlBatch {
    tx: sqlx::Transaction<'static, sqlx::Postgres>,
    version: Version,
    upsert: bool,
    schema: String,
}

#[async_trait]
impl StorageBatch for SqlBatch {
    fn version(&self) -> Version {
        self.version
    }

    async fn persist_row(
        &mut self,
        spec: &'static ModelSpec,
        values: Vec<Value>,
    ) -> Result<(), StorageError> {
        // Models from after this schema version silently skip.
        if !spec.supported_at(self.version.major) {
            return Ok(());
        }

        let (query, binds) = sql::insert_sql(
            &self.schema,
            spec,
            self.version.major,
            self.upsert,
            &values,
        );

        let mut q = sqlx::query(&query);
        for &i in &binds {
            q = bind_value(q, values[i].clone());
        }
        q.execute(&mut *self.tx).await.map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.code().as_deref() == Some("23505") => {
                StorageError::Conflict {
                    table: spec.table.to_string(),
                }
            }
            other => other.into(),
        })?;
        Ok(())
    }
}

type PgQuery<'q> = sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>;

fn bind_value(q: PgQuery<'_>, value: Value) -> PgQuery<'_> {
    match value {
        Value::Int(v) => q.bind(v),
        Value::OptInt(v) => q.bind(v),
        Value::Float(v) => q.bind(v),
        Value::Text(v) => q.bind(v),
        Value::OptText(v) => q.bind(v),
        Value::Bool(v) => q.bind(v),
        Value::Bytes(v) => q.bind(v),
        Value::Numeric(v) => q.bind(v),
        Value::TextArray(v) => q.bind(v),
        Value::Json(v) => q.bind(v),
        Value::Timestamp(v) => q.bind(v),
        Value::OptTimestamp(v) => q.bind(v),
    }
}
