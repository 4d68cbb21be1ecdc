//! PostgreSQL storage backend
//!
//! Key columns carry the lookup dimensions; full records are stored as
//! JSONB payloads and decoded with serde. Queue ordering rides on
//! `created_at`, and the advisory instance lock is a conditional upsert on
//! the `instance_locks` row.

use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::{PgPool, Row};

use weft_domain::{
    ActionSpec, EventId, InstanceId, PendingStep, PendingStepId, Pipeline, Status,
    StepChangeEvent, StepState, Workflow, WorkflowState,
};

use crate::{Storage, StorageError};

/// DDL for all engine tables; idempotent.
pub const SCHEMA: &str = include_str!("../schema.sql");

/// PostgreSQL-backed storage.
pub struct PgStorage {
    pool: PgPool,
}

impl PgStorage {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect and make sure the schema exists.
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let pool = PgPool::connect(database_url).await?;
        let storage = Self::new(pool);
        storage.ensure_schema().await?;
        Ok(storage)
    }

    /// Create all tables if missing.
    pub async fn ensure_schema(&self) -> Result<(), StorageError> {
        tracing::debug!("ensuring storage schema");
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl Storage for PgStorage {
    async fn save_action(&self, action: &ActionSpec) -> Result<(), StorageError> {
        let spec = serde_json::to_value(action)?;
        sqlx::query(
            r"
            INSERT INTO actions (id, spec, deleted)
            VALUES ($1, $2, FALSE)
            ON CONFLICT (id) DO UPDATE SET spec = EXCLUDED.spec, deleted = FALSE
            ",
        )
        .bind(&action.id)
        .bind(&spec)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_action(&self, id: &str) -> Result<(), StorageError> {
        let result = sqlx::query("UPDATE actions SET deleted = TRUE WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::ActionNotFound(id.to_string()));
        }
        Ok(())
    }

    async fn action_spec(&self, id: &str) -> Result<ActionSpec, StorageError> {
        let row = sqlx::query("SELECT spec FROM actions WHERE id = $1 AND NOT deleted")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StorageError::ActionNotFound(id.to_string()))?;
        Ok(serde_json::from_value(row.try_get("spec")?)?)
    }

    async fn action_specs(&self) -> Result<Vec<ActionSpec>, StorageError> {
        let rows = sqlx::query("SELECT spec FROM actions WHERE NOT deleted ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter()
            .map(|row| Ok(serde_json::from_value(row.try_get("spec")?)?))
            .collect()
    }

    async fn save_workflow(&self, workflow: &Workflow) -> Result<(), StorageError> {
        let definition = serde_json::to_value(workflow)?;
        sqlx::query(
            r"
            INSERT INTO workflows (id, version, definition, deleted)
            VALUES ($1, $2, $3, FALSE)
            ON CONFLICT (id, version) DO UPDATE
            SET definition = EXCLUDED.definition, deleted = FALSE
            ",
        )
        .bind(&workflow.id)
        .bind(workflow.version)
        .bind(&definition)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_workflow(&self, id: &str, version: i32) -> Result<(), StorageError> {
        let result =
            sqlx::query("UPDATE workflows SET deleted = TRUE WHERE id = $1 AND version = $2")
                .bind(id)
                .bind(version)
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::WorkflowNotFound {
                id: id.to_string(),
                version,
            });
        }
        Ok(())
    }

    async fn workflow(&self, id: &str, version: i32) -> Result<Workflow, StorageError> {
        let row = sqlx::query(
            "SELECT definition FROM workflows WHERE id = $1 AND version = $2 AND NOT deleted",
        )
        .bind(id)
        .bind(version)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StorageError::WorkflowNotFound {
            id: id.to_string(),
            version,
        })?;
        Ok(serde_json::from_value(row.try_get("definition")?)?)
    }

    async fn workflow_by_instance(
        &self,
        instance_id: InstanceId,
    ) -> Result<Workflow, StorageError> {
        // Tombstoned versions still resolve for their running instances.
        let row = sqlx::query(
            r"
            SELECT w.definition
            FROM workflow_states s
            JOIN workflows w ON w.id = s.workflow_id AND w.version = s.workflow_version
            WHERE s.instance_id = $1
            ",
        )
        .bind(instance_id.to_string())
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StorageError::WorkflowStateNotFound(instance_id))?;
        Ok(serde_json::from_value(row.try_get("definition")?)?)
    }

    async fn list_workflows(&self) -> Result<Vec<Workflow>, StorageError> {
        let rows =
            sqlx::query("SELECT definition FROM workflows WHERE NOT deleted ORDER BY id, version")
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter()
            .map(|row| Ok(serde_json::from_value(row.try_get("definition")?)?))
            .collect()
    }

    async fn list_workflow_versions(&self, id: &str) -> Result<Vec<Workflow>, StorageError> {
        let rows = sqlx::query(
            "SELECT definition FROM workflows WHERE id = $1 AND NOT deleted ORDER BY version",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|row| Ok(serde_json::from_value(row.try_get("definition")?)?))
            .collect()
    }

    async fn create_new_instance(
        &self,
        workflow_id: &str,
        instance_id: InstanceId,
        pipeline: Pipeline,
    ) -> Result<(), StorageError> {
        let data = serde_json::to_value(&pipeline)?;
        sqlx::query(
            r"
            INSERT INTO instances (instance_id, workflow_id, pipeline)
            VALUES ($1, $2, $3)
            ",
        )
        .bind(instance_id.to_string())
        .bind(workflow_id)
        .bind(&data)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn archive_instance(
        &self,
        instance_id: InstanceId,
        purge: bool,
    ) -> Result<(), StorageError> {
        let instance = instance_id.to_string();
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM step_change_events WHERE instance_id = $1")
            .bind(&instance)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM pending_steps WHERE instance_id = $1")
            .bind(&instance)
            .execute(&mut *tx)
            .await?;
        if purge {
            sqlx::query("DELETE FROM step_states WHERE instance_id = $1")
                .bind(&instance)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM workflow_states WHERE instance_id = $1")
                .bind(&instance)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM instances WHERE instance_id = $1")
                .bind(&instance)
                .execute(&mut *tx)
                .await?;
        } else {
            sqlx::query("UPDATE instances SET archived = TRUE WHERE instance_id = $1")
                .bind(&instance)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn lock_instance(&self, instance_id: InstanceId) -> Result<bool, StorageError> {
        let result = sqlx::query(
            r"
            INSERT INTO instance_locks (instance_id, locked, locked_at)
            VALUES ($1, TRUE, NOW())
            ON CONFLICT (instance_id) DO UPDATE SET locked = TRUE, locked_at = NOW()
            WHERE instance_locks.locked = FALSE
            ",
        )
        .bind(instance_id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn unlock_instance(&self, instance_id: InstanceId) -> Result<(), StorageError> {
        let result = sqlx::query(
            "UPDATE instance_locks SET locked = FALSE WHERE instance_id = $1 AND locked",
        )
        .bind(instance_id.to_string())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::InstanceNotLocked(instance_id));
        }
        Ok(())
    }

    async fn pipeline(&self, instance_id: InstanceId) -> Result<Pipeline, StorageError> {
        let row = sqlx::query("SELECT pipeline FROM instances WHERE instance_id = $1")
            .bind(instance_id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StorageError::NoPipelineFound(instance_id))?;
        Ok(serde_json::from_value(row.try_get("pipeline")?)?)
    }

    async fn save_pipeline(&self, pipeline: &Pipeline) -> Result<(), StorageError> {
        let instance_id = pipeline
            .instance_id()
            .ok_or_else(|| StorageError::Backend("pipeline carries no instance id".to_string()))?;
        let data = serde_json::to_value(pipeline)?;
        let result = sqlx::query("UPDATE instances SET pipeline = $2 WHERE instance_id = $1")
            .bind(instance_id.to_string())
            .bind(&data)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NoPipelineFound(instance_id));
        }
        Ok(())
    }

    async fn state(&self, instance_id: InstanceId) -> Result<WorkflowState, StorageError> {
        let row = sqlx::query(
            r"
            SELECT instance_version, workflow_id, workflow_version, status, error
            FROM workflow_states WHERE instance_id = $1
            ",
        )
        .bind(instance_id.to_string())
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StorageError::WorkflowStateNotFound(instance_id))?;

        let status: String = row.try_get("status")?;
        Ok(WorkflowState {
            instance_id,
            instance_version: row.try_get("instance_version")?,
            workflow_id: row.try_get("workflow_id")?,
            workflow_version: row.try_get("workflow_version")?,
            status: Status::from_name(&status),
            error: row.try_get("error")?,
        })
    }

    async fn save_state(&self, state: &WorkflowState) -> Result<(), StorageError> {
        sqlx::query(
            r"
            INSERT INTO workflow_states
                (instance_id, instance_version, workflow_id, workflow_version, status, error, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, NOW())
            ON CONFLICT (instance_id) DO UPDATE
            SET instance_version = workflow_states.instance_version + 1,
                status = EXCLUDED.status,
                error = EXCLUDED.error,
                updated_at = NOW()
            ",
        )
        .bind(state.instance_id.to_string())
        .bind(state.instance_version)
        .bind(&state.workflow_id)
        .bind(state.workflow_version)
        .bind(state.status.as_str())
        .bind(&state.error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn step_state(
        &self,
        instance_id: InstanceId,
        step_id: &str,
        iteration: i32,
    ) -> Result<StepState, StorageError> {
        let row = sqlx::query(
            r"
            SELECT record FROM step_states
            WHERE instance_id = $1 AND step_id = $2 AND iteration = $3
            ",
        )
        .bind(instance_id.to_string())
        .bind(step_id)
        .bind(iteration)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StorageError::StepStateNotFound {
            instance_id,
            step_id: step_id.to_string(),
            iteration,
        })?;
        Ok(serde_json::from_value(row.try_get("record")?)?)
    }

    async fn step_states(
        &self,
        instance_id: InstanceId,
    ) -> Result<HashMap<String, Vec<StepState>>, StorageError> {
        let rows = sqlx::query(
            r"
            SELECT record FROM step_states
            WHERE instance_id = $1
            ORDER BY step_id, iteration
            ",
        )
        .bind(instance_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        let mut grouped: HashMap<String, Vec<StepState>> = HashMap::new();
        for row in rows {
            let state: StepState = serde_json::from_value(row.try_get("record")?)?;
            grouped.entry(state.step_id.clone()).or_default().push(state);
        }
        Ok(grouped)
    }

    async fn save_step_state(&self, state: &StepState) -> Result<(), StorageError> {
        let record = serde_json::to_value(state)?;
        sqlx::query(
            r"
            INSERT INTO step_states (instance_id, step_id, iteration, record, updated_at)
            VALUES ($1, $2, $3, $4, NOW())
            ON CONFLICT (instance_id, step_id, iteration) DO UPDATE
            SET record = EXCLUDED.record, updated_at = NOW()
            ",
        )
        .bind(state.instance_id.to_string())
        .bind(&state.step_id)
        .bind(state.iteration)
        .bind(&record)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn save_step_change_event(&self, event: &StepChangeEvent) -> Result<(), StorageError> {
        let record = serde_json::to_value(event)?;
        sqlx::query(
            r"
            INSERT INTO step_change_events (event_id, instance_id, record)
            VALUES ($1, $2, $3)
            ON CONFLICT (event_id) DO NOTHING
            ",
        )
        .bind(event.event_id.to_string())
        .bind(event.instance_id.to_string())
        .bind(&record)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn step_change_events(
        &self,
        instance_id: InstanceId,
    ) -> Result<Vec<StepChangeEvent>, StorageError> {
        let rows = sqlx::query(
            r"
            SELECT record FROM step_change_events
            WHERE instance_id = $1
            ORDER BY created_at, event_id
            ",
        )
        .bind(instance_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|row| Ok(serde_json::from_value(row.try_get("record")?)?))
            .collect()
    }

    async fn delete_step_change_event(
        &self,
        instance_id: InstanceId,
        event_id: EventId,
    ) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM step_change_events WHERE instance_id = $1 AND event_id = $2")
            .bind(instance_id.to_string())
            .bind(event_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn add_pending_steps(
        &self,
        instance_id: InstanceId,
        steps: Vec<PendingStep>,
    ) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await?;
        for step in steps {
            let record = serde_json::to_value(&step)?;
            sqlx::query(
                r"
                INSERT INTO pending_steps (id, instance_id, record)
                VALUES ($1, $2, $3)
                ",
            )
            .bind(step.id.to_string())
            .bind(instance_id.to_string())
            .bind(&record)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn next_pending_step(
        &self,
        instance_id: InstanceId,
    ) -> Result<Option<PendingStep>, StorageError> {
        let row = sqlx::query(
            r"
            DELETE FROM pending_steps
            WHERE id = (
                SELECT id FROM pending_steps
                WHERE instance_id = $1
                ORDER BY created_at, id
                LIMIT 1
            )
            RETURNING record
            ",
        )
        .bind(instance_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(serde_json::from_value(row.try_get("record")?)?)),
            None => Ok(None),
        }
    }

    async fn pending_steps(
        &self,
        instance_id: InstanceId,
    ) -> Result<Vec<PendingStep>, StorageError> {
        let rows = sqlx::query(
            r"
            SELECT record FROM pending_steps
            WHERE instance_id = $1
            ORDER BY created_at, id
            ",
        )
        .bind(instance_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|row| Ok(serde_json::from_value(row.try_get("record")?)?))
            .collect()
    }

    async fn delete_pending_step(
        &self,
        instance_id: InstanceId,
        pending_id: PendingStepId,
    ) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM pending_steps WHERE instance_id = $1 AND id = $2")
            .bind(instance_id.to_string())
            .bind(pending_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_covers_all_tables() {
        for table in [
            "actions",
            "workflows",
            "instances",
            "workflow_states",
            "step_states",
            "step_change_events",
            "pending_steps",
            "instance_locks",
        ] {
            assert!(
                SCHEMA.contains(&format!("CREATE TABLE IF NOT EXISTS {table}")),
                "schema.sql is missing table {table}"
            );
        }
    }

    #[test]
    fn test_step_state_record_roundtrip() {
        let state = StepState::running(InstanceId::new(), "a", Some("parent".to_string()), 2);
        let record = serde_json::to_value(&state).unwrap();
        let back: StepState = serde_json::from_value(record).unwrap();
        assert_eq!(back.step_id, "a");
        assert_eq!(back.iteration, 2);
        assert_eq!(back.parent_step.as_deref(), Some("parent"));
    }
}
