//! `PostgreSQL` implementation of the `TransactionBackend` trait.

use async_trait::async_trait;
use chronicle_core::database::StreamKey;
use chronicle_core::error::DomainError;
use chronicle_core::event::StoredEvent;
use chronicle_core::version::AggregateVersion;
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use crate::schema::{CREATE_STREAM_HEADERS_TABLE, CREATE_STREAM_RECORDS_TABLE};
use crate::transaction::{
    EventPacket, HeaderOperation, RecordOperation, StreamTransaction, SubmitOutcome,
    TransactionBackend,
};

const KIND_EVENT: &str = "event";
const KIND_PACKET: &str = "packet";

fn infrastructure(err: sqlx::Error) -> DomainError {
    DomainError::Infrastructure(err.to_string())
}

/// PostgreSQL-backed stream storage.
#[derive(Debug, Clone)]
pub struct PgBackend {
    pool: PgPool,
}

impl PgBackend {
    /// Creates a new `PgBackend`.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Creates the tables if they do not exist.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if the statements fail.
    pub async fn ensure_schema(&self) -> Result<(), DomainError> {
        for statement in [CREATE_STREAM_HEADERS_TABLE, CREATE_STREAM_RECORDS_TABLE] {
            sqlx::raw_sql(statement)
                .execute(&self.pool)
                .await
                .map_err(infrastructure)?;
        }
        Ok(())
    }

    async fn apply_header(
        tx: &mut Transaction<'_, Postgres>,
        stream_key: &StreamKey,
        header: HeaderOperation,
    ) -> Result<bool, DomainError> {
        let result = match header {
            HeaderOperation::Create { version } => {
                sqlx::query(
                    "INSERT INTO stream_headers (stream_key, version) VALUES ($1, $2) \
                     ON CONFLICT (stream_key) DO NOTHING",
                )
                .bind(stream_key.as_str())
                .bind(version.value())
                .execute(&mut **tx)
                .await
            }
            HeaderOperation::Advance { expected, new } => {
                sqlx::query(
                    "UPDATE stream_headers SET version = $3, updated_at = NOW() \
                     WHERE stream_key = $1 AND version = $2",
                )
                .bind(stream_key.as_str())
                .bind(expected.value())
                .bind(new.value())
                .execute(&mut **tx)
                .await
            }
        };
        Ok(result.map_err(infrastructure)?.rows_affected() == 1)
    }

    /// Inserts one record. `Ok(false)` means the key was already taken.
    async fn insert_record(
        tx: &mut Transaction<'_, Postgres>,
        stream_key: &StreamKey,
        record: &RecordOperation,
    ) -> Result<bool, DomainError> {
        let events = record.events();
        let last_position = events.last().map_or(record.first_position(), |e| e.position);
        let kind = match record {
            RecordOperation::Event(_) => KIND_EVENT,
            RecordOperation::Packet(_) => KIND_PACKET,
        };
        let body = serde_json::to_value(events)
            .map_err(|e| DomainError::Serialization(format!("failed to encode record: {e}")))?;

        let result = sqlx::query(
            "INSERT INTO stream_records \
             (record_id, stream_key, first_position, last_position, kind, initiator_id, body) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(record.record_id())
        .bind(stream_key.as_str())
        .bind(record.first_position())
        .bind(last_position)
        .bind(kind)
        .bind(record.initiator_id())
        .bind(body)
        .execute(&mut **tx)
        .await;

        match result {
            Ok(_) => Ok(true),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => Ok(false),
            Err(err) => Err(infrastructure(err)),
        }
    }
}

fn decode_record(kind: &str, body: serde_json::Value) -> Result<RecordOperation, DomainError> {
    let mut events: Vec<StoredEvent> = serde_json::from_value(body)
        .map_err(|e| DomainError::Serialization(format!("failed to decode record: {e}")))?;
    match kind {
        KIND_EVENT if events.len() == 1 => Ok(RecordOperation::Event(events.remove(0))),
        KIND_PACKET => EventPacket::new(events)
            .map(RecordOperation::Packet)
            .ok_or_else(|| DomainError::Serialization("empty packet record".to_owned())),
        other => Err(DomainError::Serialization(format!(
            "malformed {other} record with {} events",
            events.len()
        ))),
    }
}

#[async_trait]
impl TransactionBackend for PgBackend {
    async fn read_records(
        &self,
        stream_key: &StreamKey,
    ) -> Result<Vec<RecordOperation>, DomainError> {
        let rows = sqlx::query(
            "SELECT kind, body FROM stream_records WHERE stream_key = $1 ORDER BY first_position",
        )
        .bind(stream_key.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(infrastructure)?;

        rows.into_iter()
            .map(|row| {
                let kind: String = row.try_get("kind").map_err(infrastructure)?;
                let body: serde_json::Value = row.try_get("body").map_err(infrastructure)?;
                decode_record(&kind, body)
            })
            .collect()
    }

    async fn read_header(
        &self,
        stream_key: &StreamKey,
    ) -> Result<Option<AggregateVersion>, DomainError> {
        let version: Option<i64> =
            sqlx::query_scalar("SELECT version FROM stream_headers WHERE stream_key = $1")
                .bind(stream_key.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_err(infrastructure)?;
        version.map(AggregateVersion::new).transpose()
    }

    async fn contains_initiator(
        &self,
        stream_key: &StreamKey,
        initiator_id: Uuid,
    ) -> Result<bool, DomainError> {
        sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM stream_records WHERE stream_key = $1 AND initiator_id = $2)",
        )
        .bind(stream_key.as_str())
        .bind(initiator_id)
        .fetch_one(&self.pool)
        .await
        .map_err(infrastructure)
    }

    async fn submit(&self, transaction: &StreamTransaction) -> Result<SubmitOutcome, DomainError> {
        let mut tx = self.pool.begin().await.map_err(infrastructure)?;

        if !Self::apply_header(&mut tx, &transaction.stream_key, transaction.header).await? {
            tx.rollback().await.map_err(infrastructure)?;
            return Ok(SubmitOutcome::Conflict);
        }
        for record in &transaction.records {
            if !Self::insert_record(&mut tx, &transaction.stream_key, record).await? {
                tx.rollback().await.map_err(infrastructure)?;
                return Ok(SubmitOutcome::Conflict);
            }
        }

        tx.commit().await.map_err(infrastructure)?;
        Ok(SubmitOutcome::Committed)
    }
}
