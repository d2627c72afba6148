// Copyright (c) 2026 flowctl contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `PersistentStorePort` implementation backed by `sqlx::Any`, grounded on
//! the teacher's `DatabaseAuditStorage` (pool construction, raw query
//! strings, manual `.bind()` chains, `row.get()` extraction). Using the
//! `Any` driver instead of a Postgres-only pool lets one implementation
//! serve both backends the manifest declares, selected by the connection
//! URL's scheme (`postgres://` or `sqlite://`).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flowctl_core::error::OrchestratorError;
use flowctl_core::ports::PersistentStorePort;
use flowctl_core::retry::{retry_with_backoff, RetryPolicy};
use flowctl_core::run::{Run, RunStatus};
use flowctl_core::value::JsonValue;
use sqlx::any::{AnyPoolOptions, AnyRow};
use sqlx::{AnyPool, Row};
use uuid::Uuid;

use crate::encryption::SecretCipher;

fn persistence_err(context: &str, err: impl std::fmt::Display) -> OrchestratorError {
    OrchestratorError::Persistence(format!("{context}: {err}"))
}

fn is_busy(err: &OrchestratorError) -> bool {
    matches!(err, OrchestratorError::Persistence(message) if message.to_lowercase().contains("busy") || message.to_lowercase().contains("lock"))
}

fn status_str(status: RunStatus) -> &'static str {
    match status {
        RunStatus::Pending => "pending",
        RunStatus::Running => "running",
        RunStatus::Suspended => "suspended",
        RunStatus::Completed => "completed",
        RunStatus::Failed => "failed",
        RunStatus::Cancelled => "cancelled",
    }
}

fn status_from_str(value: &str) -> Result<RunStatus, OrchestratorError> {
    match value {
        "pending" => Ok(RunStatus::Pending),
        "running" => Ok(RunStatus::Running),
        "suspended" => Ok(RunStatus::Suspended),
        "completed" => Ok(RunStatus::Completed),
        "failed" => Ok(RunStatus::Failed),
        "cancelled" => Ok(RunStatus::Cancelled),
        other => Err(persistence_err("decoding run row", format!("unknown run status '{other}'"))),
    }
}

/// A `sqlx`-backed store. Construct with [`SqlStore::connect`] and call
/// [`PersistentStorePort::init`] before use.
pub struct SqlStore {
    pool: AnyPool,
    cipher: Option<Arc<SecretCipher>>,
    retry_policy: RetryPolicy,
}

impl SqlStore {
    /// Opens a pool against `database_url` (`postgres://...` or
    /// `sqlite://path/to/file.db` / `sqlite::memory:`).
    pub async fn connect(database_url: &str) -> Result<Self, OrchestratorError> {
        sqlx::any::install_default_drivers();
        let pool = AnyPoolOptions::new()
            .min_connections(1)
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| persistence_err("connecting to store", e))?;
        Ok(Self {
            pool,
            cipher: None,
            retry_policy: RetryPolicy::persistence_busy(),
        })
    }

    pub fn with_pool(pool: AnyPool) -> Self {
        Self {
            pool,
            cipher: None,
            retry_policy: RetryPolicy::persistence_busy(),
        }
    }

    /// Enables secret-input encryption (spec §6.2). Key material shorter
    /// than 16 bytes is rejected by [`SecretCipher::new`].
    pub fn with_encryption_key(mut self, key_material: &[u8]) -> Result<Self, OrchestratorError> {
        self.cipher = Some(Arc::new(SecretCipher::new(key_material)?));
        Ok(self)
    }

    async fn run_with_retry<T, F, Fut>(&self, operation: F) -> Result<T, OrchestratorError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, OrchestratorError>>,
    {
        retry_with_backoff(&self.retry_policy, is_busy, operation).await
    }

    async fn secret_names_for(&self, workflow_id: &str) -> Result<HashSet<String>, OrchestratorError> {
        let row = sqlx::query("SELECT secret_names FROM workflow_secrets WHERE workflow_id = ?")
            .bind(workflow_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| persistence_err("loading workflow secret names", e))?;
        match row {
            Some(row) => {
                let raw: String = row.try_get("secret_names").map_err(|e| persistence_err("decoding secret names", e))?;
                let names: Vec<String> = serde_json::from_str(&raw)?;
                Ok(names.into_iter().collect())
            }
            None => Ok(HashSet::new()),
        }
    }

    async fn seal_inputs(&self, workflow_id: &str, inputs: &HashMap<String, JsonValue>) -> Result<HashMap<String, JsonValue>, OrchestratorError> {
        match &self.cipher {
            Some(cipher) => {
                let secret_names = self.secret_names_for(workflow_id).await?;
                cipher.seal_inputs(inputs, &secret_names)
            }
            None => Ok(inputs.clone()),
        }
    }

    fn unseal_inputs(&self, inputs: &HashMap<String, JsonValue>) -> Result<HashMap<String, JsonValue>, OrchestratorError> {
        match &self.cipher {
            Some(cipher) => cipher.unseal_inputs(inputs),
            None => Ok(inputs.clone()),
        }
    }

    async fn row_to_run(&self, row: AnyRow) -> Result<Run, OrchestratorError> {
        let run_id: String = row.try_get("run_id").map_err(|e| persistence_err("decoding run_id", e))?;
        let workflow_id: String = row.try_get("workflow_id").map_err(|e| persistence_err("decoding workflow_id", e))?;
        let status: String = row.try_get("status").map_err(|e| persistence_err("decoding status", e))?;
        let inputs_raw: String = row.try_get("inputs").map_err(|e| persistence_err("decoding inputs", e))?;
        let step_results_raw: String = row.try_get("step_results").map_err(|e| persistence_err("decoding step_results", e))?;
        let current_step_id: Option<String> = row.try_get("current_step_id").map_err(|e| persistence_err("decoding current_step_id", e))?;
        let suspended_data_raw: Option<String> = row.try_get("suspended_data").map_err(|e| persistence_err("decoding suspended_data", e))?;
        let started_at_raw: String = row.try_get("started_at").map_err(|e| persistence_err("decoding started_at", e))?;
        let completed_at_raw: Option<String> = row.try_get("completed_at").map_err(|e| persistence_err("decoding completed_at", e))?;
        let error: Option<String> = row.try_get("error").map_err(|e| persistence_err("decoding error", e))?;
        let parent_run_id_raw: Option<String> = row.try_get("parent_run_id").map_err(|e| persistence_err("decoding parent_run_id", e))?;

        let inputs: HashMap<String, JsonValue> = serde_json::from_str(&inputs_raw)?;
        let inputs = self.unseal_inputs(&inputs)?;

        Ok(Run {
            run_id: Uuid::parse_str(&run_id).map_err(|e| persistence_err("parsing run_id", e))?,
            workflow_id,
            status: status_from_str(&status)?,
            inputs,
            step_results: serde_json::from_str(&step_results_raw)?,
            current_step_id,
            suspended_data: suspended_data_raw.map(|raw| serde_json::from_str(&raw)).transpose()?,
            started_at: DateTime::parse_from_rfc3339(&started_at_raw).map_err(|e| persistence_err("parsing started_at", e))?.with_timezone(&Utc),
            completed_at: completed_at_raw
                .map(|raw| DateTime::parse_from_rfc3339(&raw).map(|d| d.with_timezone(&Utc)))
                .transpose()
                .map_err(|e| persistence_err("parsing completed_at", e))?,
            error,
            parent_run_id: parent_run_id_raw.map(|raw| Uuid::parse_str(&raw)).transpose().map_err(|e| persistence_err("parsing parent_run_id", e))?,
        })
    }

    async fn write_run(&self, run: &Run, insert: bool) -> Result<(), OrchestratorError> {
        let sealed_inputs = self.seal_inputs(&run.workflow_id, &run.inputs).await?;
        let inputs_raw = serde_json::to_string(&sealed_inputs)?;
        let step_results_raw = serde_json::to_string(&run.step_results)?;
        let suspended_data_raw = run.suspended_data.as_ref().map(serde_json::to_string).transpose()?;
        let started_at_raw = run.started_at.to_rfc3339();
        let completed_at_raw = run.completed_at.map(|d| d.to_rfc3339());
        let run_id_str = run.run_id.to_string();
        let parent_run_id_raw = run.parent_run_id.map(|id| id.to_string());

        let sql = if insert {
            "INSERT INTO runs (run_id, workflow_id, status, inputs, step_results, current_step_id, suspended_data, started_at, completed_at, error, parent_run_id) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        } else {
            "UPDATE runs SET workflow_id = ?, status = ?, inputs = ?, step_results = ?, current_step_id = ?, suspended_data = ?, started_at = ?, completed_at = ?, error = ?, parent_run_id = ? \
             WHERE run_id = ?"
        };

        self.run_with_retry(|| async {
            let mut query = sqlx::query(sql);
            if insert {
                query = query.bind(run_id_str.clone());
            }
            query = query
                .bind(run.workflow_id.clone())
                .bind(status_str(run.status))
                .bind(inputs_raw.clone())
                .bind(step_results_raw.clone())
                .bind(run.current_step_id.clone())
                .bind(suspended_data_raw.clone())
                .bind(started_at_raw.clone())
                .bind(completed_at_raw.clone())
                .bind(run.error.clone())
                .bind(parent_run_id_raw.clone());
            if !insert {
                query = query.bind(run_id_str.clone());
            }
            query
                .execute(&self.pool)
                .await
                .map(|_| ())
                .map_err(|e| persistence_err("writing run row", e))
        })
        .await
    }
}

#[async_trait]
impl PersistentStorePort for SqlStore {
    async fn init(&self) -> Result<(), OrchestratorError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS runs (
                run_id TEXT PRIMARY KEY,
                workflow_id TEXT NOT NULL,
                status TEXT NOT NULL,
                inputs TEXT NOT NULL,
                step_results TEXT NOT NULL,
                current_step_id TEXT,
                suspended_data TEXT,
                started_at TEXT NOT NULL,
                completed_at TEXT,
                error TEXT,
                parent_run_id TEXT
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| persistence_err("creating runs table", e))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_runs_workflow_id ON runs (workflow_id)")
            .execute(&self.pool)
            .await
            .map_err(|e| persistence_err("creating workflow_id index", e))?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_runs_status ON runs (status)")
            .execute(&self.pool)
            .await
            .map_err(|e| persistence_err("creating status index", e))?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_runs_started_at ON runs (started_at)")
            .execute(&self.pool)
            .await
            .map_err(|e| persistence_err("creating started_at index", e))?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS workflow_secrets (
                workflow_id TEXT PRIMARY KEY,
                secret_names TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| persistence_err("creating workflow_secrets table", e))?;

        Ok(())
    }

    async fn close(&self) -> Result<(), OrchestratorError> {
        self.pool.close().await;
        Ok(())
    }

    async fn save_run(&self, run: &Run) -> Result<(), OrchestratorError> {
        self.write_run(run, true).await
    }

    async fn load_run(&self, run_id: Uuid) -> Result<Option<Run>, OrchestratorError> {
        let row = self
            .run_with_retry(|| async {
                sqlx::query("SELECT * FROM runs WHERE run_id = ?")
                    .bind(run_id.to_string())
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(|e| persistence_err("loading run", e))
            })
            .await?;
        match row {
            Some(row) => Ok(Some(self.row_to_run(row).await?)),
            None => Ok(None),
        }
    }

    async fn load_all_runs(&self, workflow_id: Option<&str>) -> Result<Vec<Run>, OrchestratorError> {
        let rows = match workflow_id {
            Some(id) => {
                self.run_with_retry(|| async {
                    sqlx::query("SELECT * FROM runs WHERE workflow_id = ? ORDER BY started_at DESC")
                        .bind(id)
                        .fetch_all(&self.pool)
                        .await
                        .map_err(|e| persistence_err("loading runs by workflow", e))
                })
                .await?
            }
            None => {
                self.run_with_retry(|| async {
                    sqlx::query("SELECT * FROM runs ORDER BY started_at DESC")
                        .fetch_all(&self.pool)
                        .await
                        .map_err(|e| persistence_err("loading all runs", e))
                })
                .await?
            }
        };
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(self.row_to_run(row).await?);
        }
        Ok(out)
    }

    async fn load_active_runs(&self) -> Result<Vec<Run>, OrchestratorError> {
        let rows = self
            .run_with_retry(|| async {
                sqlx::query("SELECT * FROM runs WHERE status IN (?, ?, ?) ORDER BY started_at ASC")
                    .bind(status_str(RunStatus::Pending))
                    .bind(status_str(RunStatus::Running))
                    .bind(status_str(RunStatus::Suspended))
                    .fetch_all(&self.pool)
                    .await
                    .map_err(|e| persistence_err("loading active runs", e))
            })
            .await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(self.row_to_run(row).await?);
        }
        Ok(out)
    }

    async fn update_run(&self, run: &Run) -> Result<(), OrchestratorError> {
        self.write_run(run, false).await
    }

    async fn delete_run(&self, run_id: Uuid) -> Result<(), OrchestratorError> {
        self.run_with_retry(|| async {
            sqlx::query("DELETE FROM runs WHERE run_id = ?")
                .bind(run_id.to_string())
                .execute(&self.pool)
                .await
                .map(|_| ())
                .map_err(|e| persistence_err("deleting run", e))
        })
        .await
    }

    async fn set_workflow_secrets(&self, workflow_id: &str, names: HashSet<String>) -> Result<(), OrchestratorError> {
        let names_raw = serde_json::to_string(&names.into_iter().collect::<Vec<_>>())?;
        self.run_with_retry(|| async {
            sqlx::query(
                "INSERT INTO workflow_secrets (workflow_id, secret_names) VALUES (?, ?) \
                 ON CONFLICT (workflow_id) DO UPDATE SET secret_names = excluded.secret_names",
            )
            .bind(workflow_id)
            .bind(names_raw.clone())
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(|e| persistence_err("writing workflow secrets", e))
        })
        .await
    }
}
