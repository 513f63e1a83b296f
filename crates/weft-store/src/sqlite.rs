use async_trait::async_trait;
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;

use crate::types::{
  ExecutionLogRow, NodeExecutionRow, RunCounters, RunStatus, WorkflowExecutionRow,
};
use crate::{Error, Store};

/// SQLite-based store implementation.
pub struct SqliteStore {
  pool: SqlitePool,
}

impl SqliteStore {
  /// Create a store over an existing connection pool.
  pub fn new(pool: SqlitePool) -> Self {
    Self { pool }
  }

  /// Connect to a SQLite database by URL and run migrations.
  pub async fn connect(url: &str) -> Result<Self, Error> {
    let pool = SqlitePoolOptions::new().connect(url).await?;
    let store = Self::new(pool);
    store.migrate().await?;
    Ok(store)
  }

  /// In-memory store for tests and one-shot runs.
  ///
  /// A single connection keeps every query on the same in-memory database.
  pub async fn connect_in_memory() -> Result<Self, Error> {
    let pool = SqlitePoolOptions::new()
      .max_connections(1)
      .connect("sqlite::memory:")
      .await?;
    let store = Self::new(pool);
    store.migrate().await?;
    Ok(store)
  }

  /// Run database migrations.
  pub async fn migrate(&self) -> Result<(), Error> {
    sqlx::migrate!("../../migrations")
      .run(&self.pool)
      .await
      .map_err(|e| Error::Database(sqlx::Error::Migrate(Box::new(e))))
  }
}

#[async_trait]
impl Store for SqliteStore {
  async fn create_execution(&self, row: &WorkflowExecutionRow) -> Result<(), Error> {
    sqlx::query(
      r#"
            INSERT INTO workflow_executions (
              execution_id, workflow_id, workflow_name, status, start_time, end_time,
              total_nodes, completed_nodes, successful_nodes, failed_nodes,
              total_records, total_execution_time_ms, execution_mode, parameters,
              error_message
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
    )
    .bind(&row.execution_id)
    .bind(&row.workflow_id)
    .bind(&row.workflow_name)
    .bind(row.status)
    .bind(row.start_time)
    .bind(row.end_time)
    .bind(row.total_nodes)
    .bind(row.completed_nodes)
    .bind(row.successful_nodes)
    .bind(row.failed_nodes)
    .bind(row.total_records)
    .bind(row.total_execution_time_ms)
    .bind(&row.execution_mode)
    .bind(&row.parameters)
    .bind(&row.error_message)
    .execute(&self.pool)
    .await?;

    Ok(())
  }

  async fn get_execution(&self, execution_id: &str) -> Result<WorkflowExecutionRow, Error> {
    sqlx::query_as(
      r#"
            SELECT execution_id, workflow_id, workflow_name, status, start_time, end_time,
                   total_nodes, completed_nodes, successful_nodes, failed_nodes,
                   total_records, total_execution_time_ms, execution_mode, parameters,
                   error_message
            FROM workflow_executions
            WHERE execution_id = ?
            "#,
    )
    .bind(execution_id)
    .fetch_optional(&self.pool)
    .await?
    .ok_or_else(|| Error::NotFound(format!("execution '{execution_id}'")))
  }

  async fn list_executions(&self, workflow_id: &str) -> Result<Vec<WorkflowExecutionRow>, Error> {
    let rows = sqlx::query_as(
      r#"
            SELECT execution_id, workflow_id, workflow_name, status, start_time, end_time,
                   total_nodes, completed_nodes, successful_nodes, failed_nodes,
                   total_records, total_execution_time_ms, execution_mode, parameters,
                   error_message
            FROM workflow_executions
            WHERE workflow_id = ?
            ORDER BY start_time DESC
            "#,
    )
    .bind(workflow_id)
    .fetch_all(&self.pool)
    .await?;
    Ok(rows)
  }

  async fn mark_cancel_requested(&self, execution_id: &str) -> Result<bool, Error> {
    let result = sqlx::query(
      r#"
            UPDATE workflow_executions
            SET status = ?
            WHERE execution_id = ? AND status = ?
            "#,
    )
    .bind(RunStatus::CancelRequested)
    .bind(execution_id)
    .bind(RunStatus::Running)
    .execute(&self.pool)
    .await?;

    Ok(result.rows_affected() == 1)
  }

  async fn finalize_execution(
    &self,
    execution_id: &str,
    status: RunStatus,
    end_time: i64,
    error_message: Option<&str>,
  ) -> Result<(), Error> {
    let result = sqlx::query(
      r#"
            UPDATE workflow_executions
            SET status = ?, end_time = ?, error_message = ?
            WHERE execution_id = ?
            "#,
    )
    .bind(status)
    .bind(end_time)
    .bind(error_message)
    .bind(execution_id)
    .execute(&self.pool)
    .await?;

    if result.rows_affected() == 0 {
      return Err(Error::NotFound(format!("execution '{execution_id}'")));
    }
    Ok(())
  }

  async fn update_execution_counters(
    &self,
    execution_id: &str,
    counters: &RunCounters,
  ) -> Result<(), Error> {
    sqlx::query(
      r#"
            UPDATE workflow_executions
            SET completed_nodes = ?, successful_nodes = ?, failed_nodes = ?,
                total_records = ?, total_execution_time_ms = ?
            WHERE execution_id = ?
            "#,
    )
    .bind(counters.completed_nodes)
    .bind(counters.successful_nodes)
    .bind(counters.failed_nodes)
    .bind(counters.total_records)
    .bind(counters.total_execution_time_ms)
    .bind(execution_id)
    .execute(&self.pool)
    .await?;

    Ok(())
  }

  async fn upsert_node_execution(&self, row: &NodeExecutionRow) -> Result<(), Error> {
    let existing: Option<(i64,)> = sqlx::query_as(
      r#"
            SELECT id FROM node_executions
            WHERE execution_id = ? AND node_id = ?
            "#,
    )
    .bind(&row.execution_id)
    .bind(&row.node_id)
    .fetch_optional(&self.pool)
    .await?;

    match existing {
      Some((id,)) => {
        sqlx::query(
          r#"
                UPDATE node_executions
                SET node_label = ?, node_type = ?, status = ?, start_time = ?,
                    end_time = ?, execution_time_ms = ?, records_processed = ?,
                    retry_count = ?, error_message = ?
                WHERE id = ?
                "#,
        )
        .bind(&row.node_label)
        .bind(&row.node_type)
        .bind(row.status)
        .bind(row.start_time)
        .bind(row.end_time)
        .bind(row.execution_time_ms)
        .bind(row.records_processed)
        .bind(row.retry_count)
        .bind(&row.error_message)
        .bind(id)
        .execute(&self.pool)
        .await?;
      }
      None => {
        sqlx::query(
          r#"
                INSERT INTO node_executions (
                  execution_id, node_id, node_label, node_type, status, start_time,
                  end_time, execution_time_ms, records_processed, retry_count,
                  error_message
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
        )
        .bind(&row.execution_id)
        .bind(&row.node_id)
        .bind(&row.node_label)
        .bind(&row.node_type)
        .bind(row.status)
        .bind(row.start_time)
        .bind(row.end_time)
        .bind(row.execution_time_ms)
        .bind(row.records_processed)
        .bind(row.retry_count)
        .bind(&row.error_message)
        .execute(&self.pool)
        .await?;
      }
    }

    Ok(())
  }

  async fn list_node_executions(&self, execution_id: &str) -> Result<Vec<NodeExecutionRow>, Error> {
    let rows = sqlx::query_as(
      r#"
            SELECT execution_id, node_id, node_label, node_type, status, start_time,
                   end_time, execution_time_ms, records_processed, retry_count,
                   error_message
            FROM node_executions
            WHERE execution_id = ?
            ORDER BY start_time ASC, id ASC
            "#,
    )
    .bind(execution_id)
    .fetch_all(&self.pool)
    .await?;
    Ok(rows)
  }

  async fn append_log(&self, row: &ExecutionLogRow) -> Result<(), Error> {
    sqlx::query(
      r#"
            INSERT INTO execution_logs (
              timestamp, datetime, level, execution_id, workflow_id, node_id,
              message, stack_trace
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
    )
    .bind(row.timestamp)
    .bind(&row.datetime)
    .bind(row.level)
    .bind(&row.execution_id)
    .bind(&row.workflow_id)
    .bind(&row.node_id)
    .bind(&row.message)
    .bind(&row.stack_trace)
    .execute(&self.pool)
    .await?;

    Ok(())
  }

  async fn list_logs(&self, execution_id: &str) -> Result<Vec<ExecutionLogRow>, Error> {
    let rows = sqlx::query_as(
      r#"
            SELECT timestamp, datetime, level, execution_id, workflow_id, node_id,
                   message, stack_trace
            FROM execution_logs
            WHERE execution_id = ?
            ORDER BY timestamp ASC, id ASC
            "#,
    )
    .bind(execution_id)
    .fetch_all(&self.pool)
    .await?;
    Ok(rows)
  }
}
