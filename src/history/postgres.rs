//! PostgreSQL result store.
//!
//! One row per prediction in `prediction_history`. The request and the
//! outcome are JSONB; `endpoint_type` says which request shape the
//! `request` column holds.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx_core::pool::PoolOptions;
use sqlx_core::query::query;
use sqlx_core::query_as::query_as;
use sqlx_postgres::{PgPool, Postgres};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use super::store::ResultStore;
use crate::model::{
    EndpointKind, MinimalPredictionRequest, PredictionOutcome, PredictionRecord,
    PredictionRequest, RequestPayload,
};
use crate::{Error, Result};

const CREATE_TABLE: &str = r"
    CREATE TABLE IF NOT EXISTS prediction_history (
        id UUID PRIMARY KEY,
        user_id UUID NOT NULL,
        request JSONB NOT NULL,
        result JSONB NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        endpoint_type VARCHAR(50) NOT NULL,
        minimal BOOLEAN NOT NULL
    )
";

const CREATE_OWNER_INDEX: &str = r"
    CREATE INDEX IF NOT EXISTS prediction_history_user_created
    ON prediction_history (user_id, created_at DESC)
";

const MEANINGFUL: &str = "((result->>'predicted_price')::float8 <> 0 \
                          OR (result->>'predicted_sales')::float8 <> 0)";

type HistoryRow = (
    Uuid,
    Uuid,
    serde_json::Value,
    serde_json::Value,
    DateTime<Utc>,
    String,
);

/// Connection settings for [`PgResultStore::connect`]
#[derive(Debug, Clone)]
pub struct PgSettings {
    /// `postgres://` connection URL
    pub url: String,
    /// Pool size
    pub max_connections: u32,
    /// How long to wait for a free connection
    pub acquire_timeout: Duration,
}

/// [`ResultStore`] backed by a Postgres pool
#[derive(Debug, Clone)]
pub struct PgResultStore {
    pool: PgPool,
}

impl PgResultStore {
    /// Open a pool and make sure the table exists.
    #[instrument(skip(settings), fields(max_connections = settings.max_connections))]
    pub async fn connect(settings: &PgSettings) -> Result<Self> {
        let pool = PoolOptions::<Postgres>::new()
            .max_connections(settings.max_connections)
            .acquire_timeout(settings.acquire_timeout)
            .connect(&settings.url)
            .await?;
        let store = Self { pool };
        store.ensure_schema().await?;
        info!("Connected to result store");
        Ok(store)
    }

    /// Create `prediction_history` and its owner index if absent.
    pub async fn ensure_schema(&self) -> Result<()> {
        query(CREATE_TABLE).execute(&self.pool).await?;
        query(CREATE_OWNER_INDEX).execute(&self.pool).await?;
        debug!("Result store schema ready");
        Ok(())
    }
}

fn request_json(request: &RequestPayload) -> Result<serde_json::Value> {
    let value = match request {
        RequestPayload::Full(r) => serde_json::to_value(r)?,
        RequestPayload::Minimal(r) => serde_json::to_value(r)?,
    };
    Ok(value)
}

/// A stored column that no longer decodes is a storage fault, not a bad request.
fn decode_column<T: serde::de::DeserializeOwned>(
    id: Uuid,
    column: &str,
    value: serde_json::Value,
) -> Result<T> {
    serde_json::from_value(value)
        .map_err(|e| Error::Internal(format!("corrupt {column} column in row {id}: {e}")))
}

fn from_row(row: HistoryRow) -> Result<PredictionRecord> {
    let (id, owner_id, request, result, created_at, endpoint_type) = row;
    let endpoint = EndpointKind::parse(&endpoint_type).ok_or_else(|| {
        Error::Internal(format!("unknown endpoint_type {endpoint_type:?} in row {id}"))
    })?;
    let request = match endpoint {
        EndpointKind::Full => RequestPayload::Full(decode_column::<PredictionRequest>(
            id, "request", request,
        )?),
        EndpointKind::Minimal => RequestPayload::Minimal(
            decode_column::<MinimalPredictionRequest>(id, "request", request)?,
        ),
    };
    let outcome: PredictionOutcome = decode_column(id, "result", result)?;

    Ok(PredictionRecord {
        id,
        owner_id,
        request,
        outcome,
        created_at,
        endpoint,
    })
}

#[async_trait]
impl ResultStore for PgResultStore {
    async fn insert_result(&self, record: &PredictionRecord) -> Result<()> {
        query(
            r"
            INSERT INTO prediction_history
                (id, user_id, request, result, created_at, endpoint_type, minimal)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ",
        )
        .bind(record.id)
        .bind(record.owner_id)
        .bind(request_json(&record.request)?)
        .bind(serde_json::to_value(record.outcome)?)
        .bind(record.created_at)
        .bind(record.endpoint.as_str())
        .bind(record.endpoint.is_minimal())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn query_results(&self, owner: Uuid) -> Result<Vec<PredictionRecord>> {
        let sql = format!(
            "SELECT id, user_id, request, result, created_at, endpoint_type \
             FROM prediction_history \
             WHERE user_id = $1 AND {MEANINGFUL} \
             ORDER BY created_at DESC"
        );
        let rows: Vec<HistoryRow> = query_as(&sql).bind(owner).fetch_all(&self.pool).await?;
        rows.into_iter().map(from_row).collect()
    }

    async fn load_all(&self) -> Result<HashMap<Uuid, Vec<PredictionRecord>>> {
        let sql = format!(
            "SELECT id, user_id, request, result, created_at, endpoint_type \
             FROM prediction_history \
             WHERE {MEANINGFUL} \
             ORDER BY user_id, created_at DESC"
        );
        let rows: Vec<HistoryRow> = query_as(&sql).fetch_all(&self.pool).await?;

        let mut grouped: HashMap<Uuid, Vec<PredictionRecord>> = HashMap::new();
        for row in rows {
            let record = from_row(row)?;
            grouped.entry(record.owner_id).or_default().push(record);
        }
        Ok(grouped)
    }
}
