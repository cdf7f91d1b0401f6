//! Feature lookup backends resolving a feature list for one identifier pair.

pub mod feast;
pub mod sagemaker;
pub mod static_lookup;

use crate::config::FeatureLookupConfig;
use crate::model::{FeatureList, FeatureRecord, IdentifierPair};
use anyhow::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

#[async_trait]
pub trait FeatureLookup: Send + Sync + 'static {
    /// Latest values of `features` for `ids`, keyed by feature reference.
    /// References the backend has no value for may be absent from the record.
    async fn get_latest_feature_values(
        &self,
        ids: &IdentifierPair,
        features: &FeatureList,
    ) -> Result<FeatureRecord>;
}

pub async fn get_feature_lookup(
    config: &FeatureLookupConfig,
    cwd: Option<&str>,
) -> Result<Arc<dyn FeatureLookup>> {
    match config {
        FeatureLookupConfig::SagemakerFeatureStore {
            feature_groups,
            default_feature_group,
            region,
        } => {
            debug!(
                "Create SageMaker Feature Store lookup for {} feature groups",
                feature_groups.len()
            );
            let lookup = sagemaker::SageMakerFeatureStoreLookup::from_env(
                feature_groups.clone(),
                default_feature_group.clone(),
                region.clone(),
            )
            .await;
            Ok(Arc::new(lookup) as Arc<dyn FeatureLookup>)
        }
        FeatureLookupConfig::Feast { url } => {
            debug!("Create Feast lookup with url: {}", url);
            feast::FeastHttpLookup::new(url).map(|feast| Arc::new(feast) as Arc<dyn FeatureLookup>)
        }
        FeatureLookupConfig::Static { path } => {
            debug!("Create static lookup with path: {}", path);
            let full_path = cwd
                .map(|prefix| Path::new(prefix).join(path))
                .unwrap_or_else(|| PathBuf::from(path));
            static_lookup::StaticFeatureLookup::from_path(&full_path)
                .map(|lookup| Arc::new(lookup) as Arc<dyn FeatureLookup>)
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::AdapterConfig;
    use crate::model::FeatureValue;
    use std::net::SocketAddr;

    /// Serves `router` on an ephemeral local port for backend client tests.
    pub(crate) async fn serve_router(router: axum::Router) -> Result<SocketAddr> {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move { axum::serve(listener, router).await });
        Ok(addr)
    }

    const TEST_DATA_DIR: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/test_data");

    #[tokio::test]
    async fn static_lookup_resolves_path_against_config_dir() -> Result<()> {
        let yaml = std::fs::read_to_string(format!("{}/static.yaml", TEST_DATA_DIR))?;
        let config = AdapterConfig::from_yaml_str(&yaml)?;
        let lookup = get_feature_lookup(&config.feature_lookup, Some(TEST_DATA_DIR)).await?;

        let features = FeatureList::from_names(&["age", "price"])?;
        let record = lookup
            .get_latest_feature_values(&IdentifierPair::new("C999", "P456"), &features)
            .await?;
        assert_eq!(record.get("age"), Some(&FeatureValue::Number(23.0)));
        assert_eq!(record.get("price"), Some(&FeatureValue::Number(19.5)));
        Ok(())
    }

    #[tokio::test]
    async fn static_lookup_with_missing_file_fails() {
        let config = FeatureLookupConfig::Static {
            path: "no_such_features.yaml".to_string(),
        };
        assert!(get_feature_lookup(&config, Some(TEST_DATA_DIR)).await.is_err());
    }

    #[tokio::test]
    async fn feast_lookup_rejects_invalid_url() {
        let config = FeatureLookupConfig::Feast {
            url: "not a url".to_string(),
        };
        assert!(get_feature_lookup(&config, None).await.is_err());
    }
}
