use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{ExecutionId, SagaId};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    CompensationOutcome, Result, SagaInstance, SagaStatus, StepExecution, StepStatus, StoreError,
    store::{SagaInstanceStore, StepExecutionLog},
};

/// PostgreSQL-backed saga store implementing both the instance store and
/// the step execution log.
#[derive(Clone)]
pub struct PostgresSagaStore {
    pool: PgPool,
}

impl PostgresSagaStore {
    /// Creates a new PostgreSQL saga store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    fn row_to_instance(row: PgRow) -> Result<SagaInstance> {
        let status_str: String = row.try_get("status")?;
        let status = SagaStatus::parse(&status_str)
            .ok_or_else(|| StoreError::InvalidStatus(status_str.clone()))?;
        let context = serde_json::from_value(row.try_get("context")?)?;

        Ok(SagaInstance {
            id: SagaId::new(row.try_get::<String, _>("id")?),
            saga_type: row.try_get("saga_type")?,
            status,
            context,
            current_step: row.try_get("current_step")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            completed_at: row.try_get("completed_at")?,
            failure_reason: row.try_get("failure_reason")?,
        })
    }

    fn row_to_execution(row: PgRow) -> Result<StepExecution> {
        let status_str: String = row.try_get("status")?;
        let status = StepStatus::parse(&status_str)
            .ok_or_else(|| StoreError::InvalidStatus(status_str.clone()))?;
        let compensation_result = row
            .try_get::<Option<serde_json::Value>, _>("compensation_result")?
            .map(serde_json::from_value)
            .transpose()?;

        Ok(StepExecution {
            id: ExecutionId::from_uuid(row.try_get::<Uuid, _>("id")?),
            saga_id: SagaId::new(row.try_get::<String, _>("saga_id")?),
            step_name: row.try_get("step_name")?,
            status,
            output: row.try_get("output")?,
            error: row.try_get("error")?,
            executed_at: row.try_get("executed_at")?,
            compensated_at: row.try_get("compensated_at")?,
            compensation_result,
        })
    }
}

#[async_trait]
impl SagaInstanceStore for PostgresSagaStore {
    async fn create(&self, instance: &SagaInstance) -> Result<()> {
        let context_json = serde_json::to_value(&instance.context)?;

        sqlx::query(
            r#"
            INSERT INTO saga_instances
                (id, saga_type, status, context, current_step, created_at, updated_at, completed_at, failure_reason)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(instance.id.as_str())
        .bind(&instance.saga_type)
        .bind(instance.status.as_str())
        .bind(context_json)
        .bind(&instance.current_step)
        .bind(instance.created_at)
        .bind(instance.updated_at)
        .bind(instance.completed_at)
        .bind(&instance.failure_reason)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            // Primary-key violation means the saga ID is already taken.
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.constraint() == Some("saga_instances_pkey")
            {
                return StoreError::DuplicateSaga(instance.id.clone());
            }
            StoreError::Database(e)
        })?;

        Ok(())
    }

    async fn update(&self, instance: &SagaInstance) -> Result<()> {
        let context_json = serde_json::to_value(&instance.context)?;

        let result = sqlx::query(
            r#"
            UPDATE saga_instances
            SET saga_type = $2, status = $3, context = $4, current_step = $5,
                created_at = $6, updated_at = $7, completed_at = $8, failure_reason = $9
            WHERE id = $1
            "#,
        )
        .bind(instance.id.as_str())
        .bind(&instance.saga_type)
        .bind(instance.status.as_str())
        .bind(context_json)
        .bind(&instance.current_step)
        .bind(instance.created_at)
        .bind(instance.updated_at)
        .bind(instance.completed_at)
        .bind(&instance.failure_reason)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::InstanceNotFound(instance.id.clone()));
        }
        Ok(())
    }

    async fn get(&self, id: &SagaId) -> Result<Option<SagaInstance>> {
        let row = sqlx::query(
            r#"
            SELECT id, saga_type, status, context, current_step, created_at, updated_at, completed_at, failure_reason
            FROM saga_instances
            WHERE id = $1
            "#,
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_instance).transpose()
    }

    async fn find_by_status(&self, status: SagaStatus) -> Result<Vec<SagaInstance>> {
        let rows = sqlx::query(
            r#"
            SELECT id, saga_type, status, context, current_step, created_at, updated_at, completed_at, failure_reason
            FROM saga_instances
            WHERE status = $1
            ORDER BY updated_at ASC
            "#,
        )
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_instance).collect()
    }

    async fn find_stale(&self, older_than: DateTime<Utc>) -> Result<Vec<SagaInstance>> {
        let rows = sqlx::query(
            r#"
            SELECT id, saga_type, status, context, current_step, created_at, updated_at, completed_at, failure_reason
            FROM saga_instances
            WHERE status IN ('Started', 'InProgress', 'Compensating')
              AND updated_at < $1
            ORDER BY updated_at ASC
            "#,
        )
        .bind(older_than)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_instance).collect()
    }
}

#[async_trait]
impl StepExecutionLog for PostgresSagaStore {
    async fn append(&self, execution: &StepExecution) -> Result<()> {
        let compensation_json = execution
            .compensation_result
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;

        sqlx::query(
            r#"
            INSERT INTO step_executions
                (id, saga_id, step_name, status, output, error, executed_at, compensated_at, compensation_result)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(execution.id.as_uuid())
        .bind(execution.saga_id.as_str())
        .bind(&execution.step_name)
        .bind(execution.status.as_str())
        .bind(&execution.output)
        .bind(&execution.error)
        .bind(execution.executed_at)
        .bind(execution.compensated_at)
        .bind(compensation_json)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_by_saga(&self, saga_id: &SagaId) -> Result<Vec<StepExecution>> {
        let rows = sqlx::query(
            r#"
            SELECT id, saga_id, step_name, status, output, error, executed_at, compensated_at, compensation_result
            FROM step_executions
            WHERE saga_id = $1
            ORDER BY executed_at ASC
            "#,
        )
        .bind(saga_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_execution).collect()
    }

    async fn record_compensation(
        &self,
        id: ExecutionId,
        outcome: &CompensationOutcome,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let outcome_json = serde_json::to_value(outcome)?;

        let result = sqlx::query(
            r#"
            UPDATE step_executions
            SET compensated_at = $2, compensation_result = $3
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .bind(at)
        .bind(outcome_json)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::ExecutionNotFound(id));
        }
        Ok(())
    }

    async fn find_needing_compensation(&self) -> Result<Vec<StepExecution>> {
        let rows = sqlx::query(
            r#"
            SELECT e.id, e.saga_id, e.step_name, e.status, e.output, e.error,
                   e.executed_at, e.compensated_at, e.compensation_result
            FROM step_executions e
            JOIN saga_instances s ON s.id = e.saga_id
            WHERE e.status = 'Completed'
              AND e.compensated_at IS NULL
              AND s.status IN ('Compensating', 'CompensationFailed')
            ORDER BY e.executed_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_execution).collect()
    }
}
