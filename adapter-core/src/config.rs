use crate::model::IdentifierKey;
use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const DEFAULT_MODEL_DIR: &str = "/opt/ml/model";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterMode {
    /// Score the prepared row with the loaded model.
    #[default]
    Score,
    /// Return the prepared row without loading a model.
    PassThrough,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeatureLookupConfig {
    SagemakerFeatureStore {
        /// Feature group name to the identifier used as its record id.
        feature_groups: BTreeMap<String, IdentifierKey>,
        /// Group used for feature list entries without a `group:` prefix.
        #[serde(default)]
        default_feature_group: Option<String>,
        #[serde(default)]
        region: Option<String>,
    },
    Feast {
        url: String,
    },
    Static {
        path: String,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AdapterConfig {
    #[serde(default)]
    pub mode: AdapterMode,
    #[serde(default)]
    pub model_dir: Option<String>,
    pub feature_lookup: FeatureLookupConfig,
}

impl AdapterConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        if yaml.trim().is_empty() {
            return Err(anyhow!("Empty configuration file"));
        }
        let config: AdapterConfig = serde_saphyr::from_str(yaml).map_err(|err| anyhow!(err))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if let FeatureLookupConfig::SagemakerFeatureStore {
            feature_groups,
            default_feature_group: Some(default_group),
            ..
        } = &self.feature_lookup
            && !feature_groups.contains_key(default_group)
        {
            return Err(anyhow!(
                "default_feature_group '{}' is not listed in feature_groups",
                default_group
            ));
        }
        Ok(())
    }
}
