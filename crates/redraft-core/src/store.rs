//! Job persistence boundary.
//!
//! The orchestrator needs three things from durable storage: append a
//! completed chunk, list a job's chunks ordered by index, and read/write
//! the job's global state snapshot. Chunk writes are idempotent with
//! last-write-wins per `(job_id, chunk_index)` so a crash-and-resume race
//! cannot corrupt state.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use tokio::sync::RwLock;

use crate::session::JobStatus;

/// Durable record of a reconstruction job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: String,
    pub status: JobStatus,
    pub chunks_processed: usize,
    pub total_chunks: usize,
    /// Original input, kept so a resumed run can re-derive the chunking.
    pub input_text: String,
    pub custom_instructions: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl JobRecord {
    pub fn new(id: &str, input_text: &str, custom_instructions: Option<&str>) -> Self {
        let now = Utc::now().to_rfc3339();
        Self {
            id: id.to_string(),
            status: JobStatus::Processing,
            chunks_processed: 0,
            total_chunks: 0,
            input_text: input_text.to_string(),
            custom_instructions: custom_instructions.map(|s| s.to_string()),
            created_at: now.clone(),
            updated_at: now,
        }
    }
}

/// A persisted chunk output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredChunk {
    pub job_id: String,
    pub chunk_index: usize,
    pub text: String,
}

/// Storage interface required by the orchestrator.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn upsert_job(&self, job: &JobRecord) -> Result<()>;
    async fn get_job(&self, job_id: &str) -> Result<Option<JobRecord>>;

    /// Idempotent: writing the same chunk index twice replaces the first
    /// write.
    async fn append_chunk(&self, job_id: &str, chunk_index: usize, text: &str) -> Result<()>;

    /// All chunks for a job, ordered by index.
    async fn list_chunks(&self, job_id: &str) -> Result<Vec<StoredChunk>>;

    async fn write_global_state(&self, job_id: &str, state: &serde_json::Value) -> Result<()>;
    async fn read_global_state(&self, job_id: &str) -> Result<Option<serde_json::Value>>;
}

// ============================================================================
// SQLite implementation
// ============================================================================

/// SQLite-backed job store.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if missing) the database at `path`.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("Failed to open job database")?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                chunks_processed INTEGER NOT NULL,
                total_chunks INTEGER NOT NULL,
                input_text TEXT NOT NULL,
                custom_instructions TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS chunks (
                job_id TEXT NOT NULL,
                chunk_index INTEGER NOT NULL,
                text TEXT NOT NULL,
                PRIMARY KEY (job_id, chunk_index)
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS global_state (
                job_id TEXT PRIMARY KEY,
                state TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn status_to_str(status: JobStatus) -> &'static str {
    match status {
        JobStatus::Processing => "processing",
        JobStatus::Completed => "completed",
        JobStatus::Failed => "failed",
        JobStatus::Aborted => "aborted",
    }
}

fn status_from_str(s: &str) -> JobStatus {
    match s {
        "completed" => JobStatus::Completed,
        "failed" => JobStatus::Failed,
        "aborted" => JobStatus::Aborted,
        _ => JobStatus::Processing,
    }
}

#[async_trait]
impl JobStore for SqliteStore {
    async fn upsert_job(&self, job: &JobRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO jobs (id, status, chunks_processed, total_chunks, input_text,
                custom_instructions, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                chunks_processed = excluded.chunks_processed,
                total_chunks = excluded.total_chunks,
                updated_at = excluded.updated_at",
        )
        .bind(&job.id)
        .bind(status_to_str(job.status))
        .bind(job.chunks_processed as i64)
        .bind(job.total_chunks as i64)
        .bind(&job.input_text)
        .bind(&job.custom_instructions)
        .bind(&job.created_at)
        .bind(&job.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_job(&self, job_id: &str) -> Result<Option<JobRecord>> {
        let row = sqlx::query("SELECT * FROM jobs WHERE id = ?")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|row| JobRecord {
            id: row.get("id"),
            status: status_from_str(&row.get::<String, _>("status")),
            chunks_processed: row.get::<i64, _>("chunks_processed") as usize,
            total_chunks: row.get::<i64, _>("total_chunks") as usize,
            input_text: row.get("input_text"),
            custom_instructions: row.get("custom_instructions"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }))
    }

    async fn append_chunk(&self, job_id: &str, chunk_index: usize, text: &str) -> Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO chunks (job_id, chunk_index, text) VALUES (?, ?, ?)",
        )
        .bind(job_id)
        .bind(chunk_index as i64)
        .bind(text)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_chunks(&self, job_id: &str) -> Result<Vec<StoredChunk>> {
        let rows =
            sqlx::query("SELECT chunk_index, text FROM chunks WHERE job_id = ? ORDER BY chunk_index")
                .bind(job_id)
                .fetch_all(&self.pool)
                .await?;

        Ok(rows
            .into_iter()
            .map(|row| StoredChunk {
                job_id: job_id.to_string(),
                chunk_index: row.get::<i64, _>("chunk_index") as usize,
                text: row.get("text"),
            })
            .collect())
    }

    async fn write_global_state(&self, job_id: &str, state: &serde_json::Value) -> Result<()> {
        sqlx::query("INSERT OR REPLACE INTO global_state (job_id, state) VALUES (?, ?)")
            .bind(job_id)
            .bind(state.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn read_global_state(&self, job_id: &str) -> Result<Option<serde_json::Value>> {
        let row = sqlx::query("SELECT state FROM global_state WHERE job_id = ?")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let raw: String = row.get("state");
                let state = serde_json::from_str(&raw)
                    .context("Corrupt global state record")?;
                Ok(Some(state))
            }
            None => Ok(None),
        }
    }
}

// ============================================================================
// In-memory implementation
// ============================================================================

/// In-memory job store for tests and ephemeral deployments.
#[derive(Default)]
pub struct MemoryStore {
    jobs: Arc<RwLock<HashMap<String, JobRecord>>>,
    chunks: Arc<RwLock<HashMap<String, BTreeMap<usize, String>>>>,
    states: Arc<RwLock<HashMap<String, serde_json::Value>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn upsert_job(&self, job: &JobRecord) -> Result<()> {
        self.jobs.write().await.insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn get_job(&self, job_id: &str) -> Result<Option<JobRecord>> {
        Ok(self.jobs.read().await.get(job_id).cloned())
    }

    async fn append_chunk(&self, job_id: &str, chunk_index: usize, text: &str) -> Result<()> {
        self.chunks
            .write()
            .await
            .entry(job_id.to_string())
            .or_default()
            .insert(chunk_index, text.to_string());
        Ok(())
    }

    async fn list_chunks(&self, job_id: &str) -> Result<Vec<StoredChunk>> {
        Ok(self
            .chunks
            .read()
            .await
            .get(job_id)
            .map(|by_index| {
                by_index
                    .iter()
                    .map(|(index, text)| StoredChunk {
                        job_id: job_id.to_string(),
                        chunk_index: *index,
                        text: text.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn write_global_state(&self, job_id: &str, state: &serde_json::Value) -> Result<()> {
        self.states
            .write()
            .await
            .insert(job_id.to_string(), state.clone());
        Ok(())
    }

    async fn read_global_state(&self, job_id: &str) -> Result<Option<serde_json::Value>> {
        Ok(self.states.read().await.get(job_id).cloned())
    }
}
