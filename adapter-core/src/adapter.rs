use crate::booster::Booster;
use crate::config::AdapterMode;
use crate::error::AdapterError;
use crate::lookup::FeatureLookup;
use crate::model::{FeatureList, IdentifierPair, ModelInput, Prediction};
use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

pub const MODEL_FILE_NAME: &str = "xgboost-model";
pub const CSV_CONTENT_TYPE: &str = "text/csv";

/// Model held for the lifetime of the process.
#[derive(Debug, Clone, Default)]
pub enum ModelHandle {
    Booster(Arc<Booster>),
    /// No model is materialized in pass-through mode.
    #[default]
    Empty,
}

impl ModelHandle {
    pub fn is_empty(&self) -> bool {
        matches!(self, ModelHandle::Empty)
    }
}

/// Loads `xgboost-model` from `model_dir`. Pass-through mode never touches the
/// filesystem and returns an empty handle.
pub fn load_model(mode: AdapterMode, model_dir: &Path) -> Result<ModelHandle> {
    match mode {
        AdapterMode::PassThrough => {
            debug!("Pass-through mode, skipping model load");
            Ok(ModelHandle::Empty)
        }
        AdapterMode::Score => {
            let model_path = model_dir.join(MODEL_FILE_NAME);
            info!("Loading model from {}", model_path.display());
            let booster = Booster::from_path(&model_path)?;
            info!(
                "Loaded model with {} trees over {} features",
                booster.num_trees(),
                booster.num_feature()
            );
            Ok(ModelHandle::Booster(Arc::new(booster)))
        }
    }
}

/// Scores `input` with the model, or returns it unchanged in pass-through
/// mode.
pub fn predict(mode: AdapterMode, input: ModelInput, model: &ModelHandle) -> Result<Prediction> {
    match (mode, model) {
        (AdapterMode::PassThrough, _) => Ok(Prediction::Features(input)),
        (AdapterMode::Score, ModelHandle::Booster(booster)) => booster
            .predict_row(&input.to_dense_row())
            .map(Prediction::Scores),
        (AdapterMode::Score, ModelHandle::Empty) => Err(AdapterError::ModelNotLoaded.into()),
    }
}

fn is_csv(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .map(str::trim)
        .is_some_and(|media_type| media_type.eq_ignore_ascii_case(CSV_CONTENT_TYPE))
}

/// Turns serving requests into model input via the feature lookup, then
/// into predictions.
pub struct InferenceAdapter {
    mode: AdapterMode,
    feature_list: FeatureList,
    lookup: Arc<dyn FeatureLookup>,
    model: ModelHandle,
}

impl InferenceAdapter {
    pub fn new(
        mode: AdapterMode,
        feature_list: FeatureList,
        lookup: Arc<dyn FeatureLookup>,
        model: ModelHandle,
    ) -> Self {
        Self {
            mode,
            feature_list,
            lookup,
            model,
        }
    }

    pub async fn prepare_input(&self, body: &str, content_type: &str) -> Result<ModelInput> {
        if !is_csv(content_type) {
            return Err(AdapterError::unsupported_content_type(content_type).into());
        }
        let ids = IdentifierPair::from_csv_body(body)?;

        let start = Instant::now();
        let record = self
            .lookup
            .get_latest_feature_values(&ids, &self.feature_list)
            .await?;
        info!(
            "Time to lookup {} features: {:?}",
            self.feature_list.len(),
            start.elapsed()
        );

        Ok(ModelInput::from_record(&self.feature_list, &record))
    }

    pub fn predict(&self, input: ModelInput) -> Result<Prediction> {
        predict(self.mode, input, &self.model)
    }

    pub async fn invoke(&self, body: &str, content_type: &str) -> Result<Prediction> {
        let input = self.prepare_input(body, content_type).await?;
        self.predict(input)
    }
}
