use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    ExecutionId, HistoryError, HistoryQuery, HistoryRecord, RecordId, Result, Sequence,
    store::{AppendOptions, HistoryStore, validate_records_for_append},
};

const SELECT_COLUMNS: &str = "SELECT id, execution_id, workflow_type, sequence, event_type, timestamp, payload, metadata FROM history";

/// PostgreSQL-backed history store.
#[derive(Clone)]
pub struct PostgresHistoryStore {
    pool: PgPool,
}

impl PostgresHistoryStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects to the database at `url`.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = PgPool::connect(url).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_record(row: PgRow) -> Result<HistoryRecord> {
        let metadata_json: serde_json::Value = row.try_get("metadata")?;
        let metadata: HashMap<String, serde_json::Value> = serde_json::from_value(metadata_json)?;

        Ok(HistoryRecord {
            record_id: RecordId::from_uuid(row.try_get::<Uuid, _>("id")?),
            execution_id: ExecutionId::new(row.try_get::<String, _>("execution_id")?),
            workflow_type: row.try_get("workflow_type")?,
            sequence: Sequence::new(row.try_get("sequence")?),
            event_type: row.try_get("event_type")?,
            timestamp: row.try_get("timestamp")?,
            payload: row.try_get("payload")?,
            metadata,
        })
    }
}

#[async_trait]
impl HistoryStore for PostgresHistoryStore {
    async fn append(
        &self,
        records: Vec<HistoryRecord>,
        options: AppendOptions,
    ) -> Result<Sequence> {
        validate_records_for_append(&records)?;

        let execution_id = records[0].execution_id.clone();
        let mut tx = self.pool.begin().await?;

        if let Some(expected) = options.expected_sequence {
            let current: Option<i64> =
                sqlx::query_scalar("SELECT MAX(sequence) FROM history WHERE execution_id = $1")
                    .bind(execution_id.as_str())
                    .fetch_one(&mut *tx)
                    .await?;

            let actual = Sequence::new(current.unwrap_or(0));
            if actual != expected {
                return Err(HistoryError::ConcurrencyConflict {
                    execution_id,
                    expected,
                    actual,
                });
            }
        }

        let mut last = Sequence::initial();
        for record in &records {
            let metadata_json = serde_json::to_value(&record.metadata)?;

            sqlx::query(
                r#"
                INSERT INTO history (id, execution_id, workflow_type, sequence, event_type, timestamp, payload, metadata)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(record.record_id.as_uuid())
            .bind(record.execution_id.as_str())
            .bind(&record.workflow_type)
            .bind(record.sequence.as_i64())
            .bind(&record.event_type)
            .bind(record.timestamp)
            .bind(&record.payload)
            .bind(metadata_json)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                if let sqlx::Error::Database(ref db_err) = e
                    && db_err.constraint() == Some("unique_execution_sequence")
                {
                    return HistoryError::ConcurrencyConflict {
                        execution_id: execution_id.clone(),
                        expected: options.expected_sequence.unwrap_or(Sequence::initial()),
                        actual: record.sequence,
                    };
                }
                HistoryError::Database(e)
            })?;

            last = record.sequence;
        }

        tx.commit().await?;
        tracing::trace!(%execution_id, sequence = %last, "history appended");
        Ok(last)
    }

    async fn load(&self, execution_id: &ExecutionId) -> Result<Vec<HistoryRecord>> {
        self.load_from(execution_id, Sequence::first()).await
    }

    async fn load_from(
        &self,
        execution_id: &ExecutionId,
        from: Sequence,
    ) -> Result<Vec<HistoryRecord>> {
        let sql = format!(
            "{SELECT_COLUMNS} WHERE execution_id = $1 AND sequence >= $2 ORDER BY sequence ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(execution_id.as_str())
            .bind(from.as_i64())
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(Self::row_to_record).collect()
    }

    async fn current_sequence(&self, execution_id: &ExecutionId) -> Result<Option<Sequence>> {
        let sequence: Option<i64> =
            sqlx::query_scalar("SELECT MAX(sequence) FROM history WHERE execution_id = $1")
                .bind(execution_id.as_str())
                .fetch_one(&self.pool)
                .await?;

        Ok(sequence.map(Sequence::new))
    }

    async fn query(&self, query: HistoryQuery) -> Result<Vec<HistoryRecord>> {
        let mut sql = format!("{SELECT_COLUMNS} WHERE 1=1");
        let mut param_count = 0;

        if query.execution_id.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND execution_id = ${param_count}"));
        }
        if query.workflow_type.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND workflow_type = ${param_count}"));
        }
        if query.event_types.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND event_type = ANY(${param_count})"));
        }
        if query.from_sequence.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND sequence >= ${param_count}"));
        }
        if query.open_only.is_some() {
            param_count += 1;
            sql.push_str(&format!(
                " AND NOT EXISTS (SELECT 1 FROM history closing \
                 WHERE closing.execution_id = history.execution_id \
                 AND closing.event_type = ANY(${param_count}))"
            ));
        }

        sql.push_str(" ORDER BY timestamp ASC, sequence ASC");

        if query.limit.is_some() {
            param_count += 1;
            sql.push_str(&format!(" LIMIT ${param_count}"));
        }

        let mut sqlx_query = sqlx::query(&sql);

        if let Some(id) = query.execution_id {
            sqlx_query = sqlx_query.bind(String::from(id));
        }
        if let Some(workflow_type) = query.workflow_type {
            sqlx_query = sqlx_query.bind(workflow_type);
        }
        if let Some(event_types) = query.event_types {
            sqlx_query = sqlx_query.bind(event_types);
        }
        if let Some(from) = query.from_sequence {
            sqlx_query = sqlx_query.bind(from.as_i64());
        }
        if let Some(closing_types) = query.open_only {
            sqlx_query = sqlx_query.bind(closing_types);
        }
        if let Some(limit) = query.limit {
            sqlx_query = sqlx_query.bind(limit as i64);
        }

        let rows = sqlx_query.fetch_all(&self.pool).await?;
        rows.into_iter().map(Self::row_to_record).collect()
    }
}
