use crate::lookup::FeatureLookup;
use crate::model::{
    CUSTOMER_ID, FeatureList, FeatureRecord, FeatureRef, FeatureValue, IdentifierPair, PRODUCT_ID,
};
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use rustc_hash::FxHashMap as HashMap;
use url::Url;

const ONLINE_FEATURES_PATH: &str = "get-online-features";
const PRESENT_STATUS: &str = "PRESENT";

#[derive(Debug, Serialize)]
struct OnlineFeaturesRequest<'a> {
    entities: HashMap<&'static str, [serde_json::Value; 1]>,
    features: Vec<&'a str>,
    full_feature_names: bool,
}

#[derive(Debug, Deserialize)]
struct OnlineFeaturesMetadata {
    feature_names: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct OnlineFeatureResults {
    values: Vec<serde_json::Value>,
    #[serde(default)]
    statuses: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct OnlineFeaturesResponse {
    metadata: OnlineFeaturesMetadata,
    results: Vec<OnlineFeatureResults>,
}

#[derive(Debug, Deserialize)]
struct ErrorMessage {
    message: String,
}

/// Client of a Feast feature server's REST endpoint.
///
/// Feature list entries must be `feature_view:feature`; the adapter's
/// identifiers are sent as the `customer_id` and `product_id` entities.
pub struct FeastHttpLookup {
    client: reqwest::Client,
    endpoint: Url,
}

impl FeastHttpLookup {
    pub fn new(base_url: &str) -> Result<Self> {
        let mut base = Url::parse(base_url)
            .with_context(|| format!("Invalid Feast feature server url '{}'", base_url))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let endpoint = base.join(ONLINE_FEATURES_PATH)?;
        Ok(Self {
            client: reqwest::Client::new(),
            endpoint,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

/// Integer-looking identifiers are sent as numbers so they match Int64
/// entity keys.
fn entity_value(id: &str) -> serde_json::Value {
    id.parse::<i64>()
        .map(serde_json::Value::from)
        .unwrap_or_else(|_| serde_json::Value::from(id))
}

fn full_feature_name(feature: &FeatureRef) -> Result<String> {
    let view = feature.group().ok_or_else(|| {
        anyhow!(
            "Feast feature '{}' must be referenced as 'feature_view:feature'",
            feature
        )
    })?;
    Ok(format!("{}__{}", view, feature.name()))
}

fn build_request<'a>(
    ids: &IdentifierPair,
    features: &'a FeatureList,
) -> Result<OnlineFeaturesRequest<'a>> {
    for feature in features {
        full_feature_name(feature)?;
    }
    Ok(OnlineFeaturesRequest {
        entities: [
            (CUSTOMER_ID, [entity_value(&ids.customer_id)]),
            (PRODUCT_ID, [entity_value(&ids.product_id)]),
        ]
        .into_iter()
        .collect(),
        features: features.iter().map(FeatureRef::reference).collect(),
        full_feature_names: true,
    })
}

fn response_to_record(
    response: OnlineFeaturesResponse,
    features: &FeatureList,
) -> Result<FeatureRecord> {
    let OnlineFeaturesResponse { metadata, results } = response;
    if metadata.feature_names.len() != results.len() {
        return Err(anyhow!(
            "Feast response has {} feature names but {} result columns",
            metadata.feature_names.len(),
            results.len()
        ));
    }
    let columns: HashMap<String, OnlineFeatureResults> =
        metadata.feature_names.into_iter().zip(results).collect();

    let mut record = FeatureRecord::default();
    for feature in features {
        let Some(column) = columns.get(&full_feature_name(feature)?) else {
            continue;
        };
        let present = column
            .statuses
            .first()
            .is_none_or(|status| status == PRESENT_STATUS);
        let value = match column.values.first() {
            Some(value) if present => FeatureValue::from_json(value),
            _ => FeatureValue::Missing,
        };
        record.insert(feature.reference().to_string(), value);
    }
    Ok(record)
}

#[async_trait]
impl FeatureLookup for FeastHttpLookup {
    async fn get_latest_feature_values(
        &self,
        ids: &IdentifierPair,
        features: &FeatureList,
    ) -> Result<FeatureRecord> {
        let request = build_request(ids, features)?;
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&request)
            .send()
            .await
            .with_context(|| format!("Failed to call Feast feature server {}", self.endpoint))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorMessage>(&body)
                .map(|err| err.message)
                .unwrap_or(body);
            return Err(anyhow!(
                "Feast feature server returned {}: {}",
                status,
                message
            ));
        }
        let response: OnlineFeaturesResponse = response.json().await?;
        response_to_record(response, features)
    }
}
