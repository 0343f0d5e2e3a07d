//! Persistent registry of object-storage batches.
//!
//! Batch IDs used to live in process memory and were lost on every restart.
//! They are now rows in SQLite, keyed by the batch's timestamp ID.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::storage::Pool;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("batch not found: {0}")]
    NotFound(String),

    #[error("invalid batch id '{0}'")]
    InvalidId(String),

    #[error("database pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("database error: {0}")]
    Sql(#[from] rusqlite::Error),

    #[error("corrupt task list: {0}")]
    Json(#[from] serde_json::Error),
}

/// Where a batch was executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Local,
    Docker,
    Ec2,
    Ecs,
    Modal,
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Backend::Local => write!(f, "local"),
            Backend::Docker => write!(f, "docker"),
            Backend::Ec2 => write!(f, "ec2"),
            Backend::Ecs => write!(f, "ecs"),
            Backend::Modal => write!(f, "modal"),
        }
    }
}

impl std::str::FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "local" => Ok(Backend::Local),
            "docker" => Ok(Backend::Docker),
            "ec2" => Ok(Backend::Ec2),
            "ecs" => Ok(Backend::Ecs),
            "modal" => Ok(Backend::Modal),
            other => Err(format!("unknown backend '{}'", other)),
        }
    }
}

/// A registered batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    pub id: String,
    pub backend: Backend,
    /// Tasks launched in the batch. Tasks with no objects yet show as queued.
    #[serde(default)]
    pub tasks: Vec<String>,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Batch {
    pub fn new(id: impl Into<String>, backend: Backend, tasks: Vec<String>) -> Self {
        Self {
            id: id.into(),
            backend,
            tasks,
            note: None,
            created_at: Utc::now(),
        }
    }
}

#[derive(Clone)]
pub struct Registry {
    pool: Pool,
}

impl Registry {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Insert a batch, or replace its backend, tasks and note if already known.
    /// The original `created_at` is kept on update.
    pub fn register(&self, batch: &Batch) -> Result<(), RegistryError> {
        if !crate::artifacts::is_safe_key(&batch.id) {
            return Err(RegistryError::InvalidId(batch.id.clone()));
        }
        let conn = self.pool.get()?;
        let tasks_json = serde_json::to_string(&batch.tasks)?;
        let now = Utc::now().to_rfc3339();

        conn.execute(
            "INSERT INTO batches (id, backend, tasks_json, note, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET
                backend = excluded.backend,
                tasks_json = excluded.tasks_json,
                note = excluded.note,
                updated_at = excluded.updated_at",
            params![
                batch.id,
                batch.backend.to_string(),
                tasks_json,
                batch.note,
                batch.created_at.to_rfc3339(),
                now
            ],
        )?;

        tracing::info!(batch = %batch.id, backend = %batch.backend, tasks = batch.tasks.len(), "batch registered");
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<Batch, RegistryError> {
        let conn = self.pool.get()?;
        let row = conn
            .query_row(
                "SELECT id, backend, tasks_json, note, created_at FROM batches WHERE id = ?1",
                params![id],
                read_row,
            )
            .optional()?;

        match row {
            Some(raw) => raw.into_batch(),
            None => Err(RegistryError::NotFound(id.to_string())),
        }
    }

    /// All batches, newest first.
    pub fn list(&self) -> Result<Vec<Batch>, RegistryError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT id, backend, tasks_json, note, created_at FROM batches
             ORDER BY created_at DESC, id DESC",
        )?;

        let rows = stmt.query_map([], read_row)?;

        let mut batches = Vec::new();
        for r in rows {
            match r?.into_batch() {
                Ok(b) => batches.push(b),
                Err(e) => tracing::warn!(error = %e, "skipping unreadable batch row"),
            }
        }
        Ok(batches)
    }

    pub fn remove(&self, id: &str) -> Result<(), RegistryError> {
        let conn = self.pool.get()?;
        let changed = conn.execute("DELETE FROM batches WHERE id = ?1", params![id])?;
        if changed == 0 {
            return Err(RegistryError::NotFound(id.to_string()));
        }
        tracing::info!(batch = %id, "batch removed");
        Ok(())
    }
}

struct RawBatch {
    id: String,
    backend: String,
    tasks_json: String,
    note: Option<String>,
    created_at: String,
}

fn read_row(row: &Row<'_>) -> rusqlite::Result<RawBatch> {
    Ok(RawBatch {
        id: row.get(0)?,
        backend: row.get(1)?,
        tasks_json: row.get(2)?,
        note: row.get(3)?,
        created_at: row.get(4)?,
    })
}

impl RawBatch {
    fn into_batch(self) -> Result<Batch, RegistryError> {
        let tasks: Vec<String> = serde_json::from_str(&self.tasks_json)?;
        Ok(Batch {
            backend: self.backend.parse().unwrap_or(Backend::Local),
            created_at: DateTime::parse_from_rfc3339(&self.created_at)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_default(),
            id: self.id,
            tasks,
            note: self.note,
        })
    }
}
