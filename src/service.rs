//! Business operations behind the protected routes

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::Result;
use crate::backend::PredictionClient;
use crate::history::{PersistenceFanout, ResultCache, ResultStore};
use crate::model::{
    Identity, MinimalPredictionRequest, ModelStatus, PredictionOutcome, PredictionRecord,
    PredictionRequest, RequestPayload, TrainingReport, UserStatistics,
};

/// Prediction, training and history operations for authenticated callers
#[derive(Clone)]
pub struct PredictionService {
    client: PredictionClient,
    cache: Arc<ResultCache>,
    store: Arc<dyn ResultStore>,
    fanout: PersistenceFanout,
}

impl PredictionService {
    /// Compose the service from its process-wide collaborators.
    #[must_use]
    pub fn new(
        client: PredictionClient,
        cache: Arc<ResultCache>,
        store: Arc<dyn ResultStore>,
        fanout: PersistenceFanout,
    ) -> Self {
        Self {
            client,
            cache,
            store,
            fanout,
        }
    }

    /// Run a full prediction and record it for the caller.
    #[instrument(skip_all, fields(user = %identity.id))]
    pub async fn predict(
        &self,
        identity: &Identity,
        request: PredictionRequest,
    ) -> Result<PredictionOutcome> {
        request.validate()?;
        let outcome = self.client.predict(&request).await?;
        self.record(identity, RequestPayload::Full(request), outcome);
        Ok(outcome)
    }

    /// Run a minimal-input prediction and record it for the caller.
    #[instrument(skip_all, fields(user = %identity.id))]
    pub async fn predict_minimal(
        &self,
        identity: &Identity,
        request: MinimalPredictionRequest,
    ) -> Result<PredictionOutcome> {
        request.validate()?;
        let outcome = self.client.predict_minimal(&request).await?;
        self.record(identity, RequestPayload::Minimal(request), outcome);
        Ok(outcome)
    }

    /// Retrain the backend models.
    pub async fn train(&self) -> Result<TrainingReport> {
        let report = self.client.train().await?;
        info!(
            price_score = report.price_model.best_score,
            sales_score = report.sales_model.best_score,
            "Models retrained"
        );
        Ok(report)
    }

    /// Whether the backend models are trained.
    pub async fn model_status(&self) -> Result<ModelStatus> {
        self.client.status().await
    }

    /// The caller's history, newest first.
    ///
    /// Served from the result cache when it knows the caller; otherwise
    /// read from the store, whose failure is returned as is.
    #[instrument(skip_all, fields(user = %identity.id))]
    pub async fn user_statistics(&self, identity: &Identity) -> Result<UserStatistics> {
        let predictions = if let Some(cached) = self.cache.get_for_owner(identity.id) {
            debug!(count = cached.len(), "History served from cache");
            cached
        } else {
            let stored = self.store.query_results(identity.id).await?;
            debug!(count = stored.len(), "History served from store");
            stored
        };

        Ok(UserStatistics {
            user_id: identity.id,
            predictions,
        })
    }

    /// Fill the result cache from the store.
    pub async fn prime_cache(&self) -> Result<()> {
        let histories = self.store.load_all().await?;
        self.cache.bulk_load(histories);
        info!(
            owners = self.cache.owners(),
            records = self.cache.len(),
            "Result cache primed"
        );
        Ok(())
    }

    /// The fan-out, for draining on shutdown
    #[must_use]
    pub fn fanout(&self) -> &PersistenceFanout {
        &self.fanout
    }

    fn record(&self, identity: &Identity, request: RequestPayload, outcome: PredictionOutcome) {
        if !outcome.is_meaningful() {
            warn!("Prediction service returned a zero outcome, not recording");
            return;
        }
        let record = PredictionRecord::new(identity.id, request, outcome);
        self.fanout.record_result(identity.id, record);
    }
}
