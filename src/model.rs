//! Request, result and history records exchanged with clients and backends
//!
//! Every inbound payload is a closed record: unknown fields are rejected at
//! deserialization time and the remaining range checks live in
//! [`PredictionRequest::validate`] / [`MinimalPredictionRequest::validate`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result};

/// Caller identity extracted from a verified credential
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Unique user identifier
    pub id: Uuid,
    /// Role claim (e.g. `user`, `admin`)
    pub role: String,
}

/// Full feature vector accepted by `POST /api/v1/predict`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
#[allow(clippy::struct_excessive_bools, missing_docs)]
pub struct PredictionRequest {
    pub product_name: String,
    pub brand: String,
    pub category: String,
    pub region: String,
    pub seller: String,
    pub price: f64,
    pub original_price: f64,
    pub discount_percentage: f64,
    pub stock_level: f64,
    pub customer_rating: f64,
    pub review_count: f64,
    pub delivery_days: f64,
    pub is_weekend: bool,
    pub is_holiday: bool,
    pub day_of_week: u8,
    pub month: u8,
    pub quarter: u8,
    pub sales_quantity_lag_1: f64,
    pub price_lag_1: f64,
    pub sales_quantity_lag_3: f64,
    pub price_lag_3: f64,
    pub sales_quantity_lag_7: f64,
    pub price_lag_7: f64,
    pub sales_quantity_rolling_mean_3: f64,
    pub price_rolling_mean_3: f64,
    pub sales_quantity_rolling_mean_7: f64,
    pub price_rolling_mean_7: f64,
}

impl PredictionRequest {
    /// Range-check the calendar fields and require the identifying strings.
    pub fn validate(&self) -> Result<()> {
        require_non_empty("product_name", &self.product_name)?;
        require_non_empty("region", &self.region)?;
        require_non_empty("seller", &self.seller)?;
        if self.day_of_week > 6 {
            return Err(Error::InvalidRequest(
                "day_of_week must be between 0 and 6".to_string(),
            ));
        }
        if !(1..=12).contains(&self.month) {
            return Err(Error::InvalidRequest(
                "month must be between 1 and 12".to_string(),
            ));
        }
        if !(1..=4).contains(&self.quarter) {
            return Err(Error::InvalidRequest(
                "quarter must be between 1 and 4".to_string(),
            ));
        }
        Ok(())
    }
}

/// Reduced input accepted by `POST /api/v1/predict/minimal`
///
/// The prediction backend fills in anything left out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
#[allow(missing_docs)]
pub struct MinimalPredictionRequest {
    pub product_name: String,
    pub region: String,
    pub seller: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prediction_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stock_level: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_rating: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review_count: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery_days: Option<f64>,
}

impl MinimalPredictionRequest {
    /// Require the three identifying fields.
    pub fn validate(&self) -> Result<()> {
        require_non_empty("product_name", &self.product_name)?;
        require_non_empty("region", &self.region)?;
        require_non_empty("seller", &self.seller)
    }
}

fn require_non_empty(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        Err(Error::InvalidRequest(format!("{field} must not be empty")))
    } else {
        Ok(())
    }
}

/// The request that produced a stored result
///
/// Serialized bare; the owning record's `endpoint_type` says which shape it is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestPayload {
    /// Full feature vector
    Full(PredictionRequest),
    /// Minimal input
    Minimal(MinimalPredictionRequest),
}

impl RequestPayload {
    /// Endpoint this payload was submitted to
    #[must_use]
    pub fn endpoint(&self) -> EndpointKind {
        match self {
            Self::Full(_) => EndpointKind::Full,
            Self::Minimal(_) => EndpointKind::Minimal,
        }
    }
}

/// Which prediction endpoint produced a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EndpointKind {
    /// `POST /api/v1/predict`
    #[serde(rename = "predict")]
    Full,
    /// `POST /api/v1/predict/minimal`
    #[serde(rename = "predict/minimal")]
    Minimal,
}

impl EndpointKind {
    /// Value of the durable `endpoint_type` column
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Full => "predict",
            Self::Minimal => "predict/minimal",
        }
    }

    /// Whether the result came from the minimal endpoint
    #[must_use]
    pub fn is_minimal(self) -> bool {
        matches!(self, Self::Minimal)
    }

    /// Parse the durable `endpoint_type` column
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "predict" => Some(Self::Full),
            "predict/minimal" => Some(Self::Minimal),
            _ => None,
        }
    }
}

/// Values returned by the prediction backend
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PredictionOutcome {
    /// Predicted unit price
    pub predicted_price: f64,
    /// Predicted sales quantity
    pub predicted_sales: f64,
}

impl PredictionOutcome {
    /// Build an outcome from price and sales predictions
    #[must_use]
    pub fn new(predicted_price: f64, predicted_sales: f64) -> Self {
        Self {
            predicted_price,
            predicted_sales,
        }
    }

    /// A `(0, 0)` outcome is a placeholder and is neither stored nor served.
    #[must_use]
    #[allow(clippy::float_cmp)]
    pub fn is_meaningful(&self) -> bool {
        !(self.predicted_price == 0.0 && self.predicted_sales == 0.0)
    }
}

/// One computed prediction, owned by a user
///
/// Immutable once created: it is only ever read, evicted from the cache,
/// or persisted. On the wire it is flat: the bare `request`, its
/// `endpoint_type` and a `minimal` flag.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "RecordWire")]
pub struct PredictionRecord {
    /// Record id
    pub id: Uuid,
    /// Owning user
    pub owner_id: Uuid,
    /// Request that produced the outcome
    pub request: RequestPayload,
    /// Predicted values
    pub outcome: PredictionOutcome,
    /// When the outcome was computed
    pub created_at: DateTime<Utc>,
    /// Endpoint the request was sent to
    pub endpoint: EndpointKind,
}

#[derive(Serialize)]
struct RecordView<'a> {
    id: Uuid,
    user_id: Uuid,
    request: &'a RequestPayload,
    result: PredictionOutcome,
    created_at: DateTime<Utc>,
    endpoint_type: EndpointKind,
    minimal: bool,
}

impl Serialize for PredictionRecord {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        RecordView {
            id: self.id,
            user_id: self.owner_id,
            request: &self.request,
            result: self.outcome,
            created_at: self.created_at,
            endpoint_type: self.endpoint,
            minimal: self.endpoint.is_minimal(),
        }
        .serialize(serializer)
    }
}

#[derive(Deserialize)]
struct RecordWire {
    id: Uuid,
    user_id: Uuid,
    request: serde_json::Value,
    result: PredictionOutcome,
    created_at: DateTime<Utc>,
    endpoint_type: EndpointKind,
    #[serde(default)]
    minimal: Option<bool>,
}

impl TryFrom<RecordWire> for PredictionRecord {
    type Error = String;

    fn try_from(wire: RecordWire) -> std::result::Result<Self, Self::Error> {
        if wire.minimal.is_some_and(|m| m != wire.endpoint_type.is_minimal()) {
            return Err(format!(
                "minimal flag contradicts endpoint_type {}",
                wire.endpoint_type.as_str()
            ));
        }
        let request = match wire.endpoint_type {
            EndpointKind::Full => serde_json::from_value(wire.request).map(RequestPayload::Full),
            EndpointKind::Minimal => {
                serde_json::from_value(wire.request).map(RequestPayload::Minimal)
            }
        }
        .map_err(|e| format!("request does not match endpoint_type: {e}"))?;

        Ok(Self {
            id: wire.id,
            owner_id: wire.user_id,
            request,
            outcome: wire.result,
            created_at: wire.created_at,
            endpoint: wire.endpoint_type,
        })
    }
}

impl PredictionRecord {
    /// Stamp a freshly computed outcome with a new id and the current time.
    #[must_use]
    pub fn new(owner_id: Uuid, request: RequestPayload, outcome: PredictionOutcome) -> Self {
        let endpoint = request.endpoint();
        Self {
            id: Uuid::new_v4(),
            owner_id,
            request,
            outcome,
            created_at: Utc::now(),
            endpoint,
        }
    }

    /// Shorthand for `self.outcome.is_meaningful()`
    #[must_use]
    pub fn is_meaningful(&self) -> bool {
        self.outcome.is_meaningful()
    }
}

/// Response body of `GET /api/v1/statistics/user`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserStatistics {
    /// Caller
    pub user_id: Uuid,
    /// Caller's history, newest first
    pub predictions: Vec<PredictionRecord>,
}

/// Best iteration and score of one trained model
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub struct ModelScore {
    pub best_iteration: i64,
    pub best_score: f64,
}

/// Response of the prediction backend's training endpoint
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub struct TrainingReport {
    pub price_model: ModelScore,
    pub sales_model: ModelScore,
}

/// Response of the prediction backend's status endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelStatus {
    /// Whether both models have been trained
    pub models_trained: bool,
}
