use crate::lookup::FeatureLookup;
use crate::model::{FeatureList, FeatureRecord, FeatureValue, IdentifierPair};
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use serde::Deserialize;
use rustc_hash::FxHashMap as HashMap;
use std::path::Path;

const CUSTOMERS_GROUP: &str = "customers";
const PRODUCTS_GROUP: &str = "products";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
enum StaticValue {
    Bool(bool),
    Number(f64),
    Text(String),
    Null,
}

impl From<&StaticValue> for FeatureValue {
    fn from(value: &StaticValue) -> Self {
        match value {
            StaticValue::Bool(b) => FeatureValue::Number(if *b { 1.0 } else { 0.0 }),
            StaticValue::Number(n) => FeatureValue::Number(*n),
            StaticValue::Text(s) => FeatureValue::from_str_lossy(s),
            StaticValue::Null => FeatureValue::Missing,
        }
    }
}

type Rows = HashMap<String, HashMap<String, StaticValue>>;

#[derive(Debug, Default, Deserialize)]
struct StaticTables {
    #[serde(default)]
    customers: Rows,
    #[serde(default)]
    products: Rows,
}

/// Feature values read once from a YAML file with `customers` and
/// `products` tables keyed by identifier.
///
/// A `customers:` or `products:` prefix pins a feature to one table.
/// Unqualified features are taken from the product row first, then from the
/// customer row.
pub struct StaticFeatureLookup {
    tables: StaticTables,
}

impl StaticFeatureLookup {
    pub fn from_path(path: &Path) -> Result<Self> {
        let yaml = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read static features from {}", path.display()))?;
        Self::from_yaml_str(&yaml)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let tables: StaticTables = serde_saphyr::from_str(yaml).map_err(|err| anyhow!(err))?;
        Ok(Self { tables })
    }
}

#[async_trait]
impl FeatureLookup for StaticFeatureLookup {
    async fn get_latest_feature_values(
        &self,
        ids: &IdentifierPair,
        features: &FeatureList,
    ) -> Result<FeatureRecord> {
        let customer_row = self.tables.customers.get(&ids.customer_id);
        let product_row = self.tables.products.get(&ids.product_id);
        let mut record = FeatureRecord::default();
        for feature in features {
            let rows = match feature.group() {
                Some(CUSTOMERS_GROUP) => [customer_row, None],
                Some(PRODUCTS_GROUP) => [product_row, None],
                Some(other) => {
                    return Err(anyhow!(
                        "Unknown feature group '{}' for static lookup, expected '{}' or '{}'",
                        other,
                        CUSTOMERS_GROUP,
                        PRODUCTS_GROUP
                    ));
                }
                None => [product_row, customer_row],
            };
            if let Some(value) = rows
                .into_iter()
                .flatten()
                .find_map(|row| row.get(feature.name()))
            {
                record.insert(feature.reference().to_string(), FeatureValue::from(value));
            }
        }
        Ok(record)
    }
}
