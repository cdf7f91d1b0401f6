use crate::lookup::FeatureLookup;
use crate::model::{
    FeatureList, FeatureRecord, FeatureRef, FeatureValue, IdentifierKey, IdentifierPair,
};
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_sagemakerfeaturestoreruntime::Client;
use aws_sdk_sagemakerfeaturestoreruntime::config::Region;
use aws_sdk_sagemakerfeaturestoreruntime::types::BatchGetRecordIdentifier;
use rustc_hash::FxHashMap as HashMap;
use std::collections::BTreeMap;
use tracing::debug;

/// Features requested from one feature group for one record.
#[derive(Debug, PartialEq)]
struct GroupRequest<'a> {
    record_id: &'a str,
    feature_names: Vec<&'a str>,
}

/// Maps feature list entries onto feature groups and their record ids.
#[derive(Debug, Clone)]
struct FeatureGroups {
    feature_groups: BTreeMap<String, IdentifierKey>,
    default_feature_group: Option<String>,
}

impl FeatureGroups {
    fn group_of<'a>(&'a self, feature: &'a FeatureRef) -> Result<&'a str> {
        let group = feature
            .group()
            .or(self.default_feature_group.as_deref())
            .ok_or_else(|| {
                anyhow!(
                    "Feature '{}' has no feature group and no default_feature_group is configured",
                    feature
                )
            })?;
        if !self.feature_groups.contains_key(group) {
            return Err(anyhow!(
                "Feature group '{}' of feature '{}' is not configured",
                group,
                feature
            ));
        }
        Ok(group)
    }

    fn plan<'a>(
        &'a self,
        ids: &'a IdentifierPair,
        features: &'a FeatureList,
    ) -> Result<BTreeMap<&'a str, GroupRequest<'a>>> {
        let mut requests: BTreeMap<&str, GroupRequest> = BTreeMap::new();
        for feature in features {
            let group = self.group_of(feature)?;
            let request = requests.entry(group).or_insert_with(|| GroupRequest {
                record_id: ids.value(self.feature_groups[group]),
                feature_names: Vec::new(),
            });
            if !request.feature_names.contains(&feature.name()) {
                request.feature_names.push(feature.name());
            }
        }
        Ok(requests)
    }

    /// Folds `(group, feature, value)` triples back onto feature references.
    /// A value is shared by every reference resolving to the same feature.
    fn collect<'v>(
        &self,
        features: &FeatureList,
        values: impl IntoIterator<Item = (&'v str, &'v str, Option<&'v str>)>,
    ) -> Result<FeatureRecord> {
        let mut by_feature: HashMap<(&str, &str), Vec<&FeatureRef>> = HashMap::default();
        for feature in features {
            by_feature
                .entry((self.group_of(feature)?, feature.name()))
                .or_default()
                .push(feature);
        }
        let mut record = FeatureRecord::default();
        for (group, name, value) in values {
            let Some(references) = by_feature.get(&(group, name)) else {
                continue;
            };
            let value = value
                .map(FeatureValue::from_str_lossy)
                .unwrap_or(FeatureValue::Missing);
            for reference in references {
                record.insert(reference.reference().to_string(), value);
            }
        }
        Ok(record)
    }
}

/// Reads the latest records from SageMaker Feature Store online groups with
/// one `BatchGetRecord` call per request.
pub struct SageMakerFeatureStoreLookup {
    client: Client,
    groups: FeatureGroups,
}

impl SageMakerFeatureStoreLookup {
    pub async fn from_env(
        feature_groups: BTreeMap<String, IdentifierKey>,
        default_feature_group: Option<String>,
        region: Option<String>,
    ) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(Region::new(region));
        }
        let config = loader.load().await;
        Self::new(
            Client::new(&config),
            feature_groups,
            default_feature_group,
        )
    }

    pub fn new(
        client: Client,
        feature_groups: BTreeMap<String, IdentifierKey>,
        default_feature_group: Option<String>,
    ) -> Self {
        Self {
            client,
            groups: FeatureGroups {
                feature_groups,
                default_feature_group,
            },
        }
    }
}

#[async_trait]
impl FeatureLookup for SageMakerFeatureStoreLookup {
    async fn get_latest_feature_values(
        &self,
        ids: &IdentifierPair,
        features: &FeatureList,
    ) -> Result<FeatureRecord> {
        let plan = self.groups.plan(ids, features)?;
        let identifiers = plan
            .iter()
            .map(|(group, request)| {
                BatchGetRecordIdentifier::builder()
                    .feature_group_name(*group)
                    .record_identifiers_value_as_string(request.record_id)
                    .set_feature_names(Some(
                        request.feature_names.iter().map(|n| n.to_string()).collect(),
                    ))
                    .build()
            })
            .collect::<Vec<_>>();
        debug!("BatchGetRecord over {} feature groups", identifiers.len());

        let output = self
            .client
            .batch_get_record()
            .set_identifiers(Some(identifiers))
            .send()
            .await
            .context("BatchGetRecord call to SageMaker Feature Store failed")?;

        if let Some(error) = output.errors().first() {
            return Err(anyhow!(
                "Feature group '{}' failed for record '{}': {} {}",
                error.feature_group_name().unwrap_or_default(),
                error.record_identifier_value_as_string().unwrap_or_default(),
                error.error_code().unwrap_or_default(),
                error.error_message().unwrap_or_default()
            ));
        }
        if !output.unprocessed_identifiers().is_empty() {
            return Err(anyhow!(
                "SageMaker Feature Store left {} feature groups unprocessed",
                output.unprocessed_identifiers().len()
            ));
        }

        let values = output
            .records()
            .iter()
            .filter_map(|detail| detail.feature_group_name().map(|group| (group, detail)))
            .flat_map(|(group, detail)| {
                detail.record().iter().filter_map(move |value| {
                    value
                        .feature_name()
                        .map(|name| (group, name, value.value_as_string()))
                })
            });
        self.groups.collect(features, values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lookup::tests::serve_router;
    use aws_sdk_sagemakerfeaturestoreruntime::config::Credentials;
    use axum::{Json, Router};
    use std::net::SocketAddr;
    use std::sync::{Arc, Mutex};

    type Requests = Arc<Mutex<Vec<serde_json::Value>>>;

    /// Answers every call with `response` and records the request bodies.
    async fn feature_store(response: serde_json::Value) -> Result<(SocketAddr, Requests)> {
        let requests = Requests::default();
        let seen = requests.clone();
        let router = Router::new().fallback(move |body: String| {
            let seen = seen.clone();
            let response = response.clone();
            async move {
                if let Ok(request) = serde_json::from_str(&body) {
                    seen.lock().unwrap().push(request);
                }
                Json(response)
            }
        });
        Ok((serve_router(router).await?, requests))
    }

    fn lookup_at(addr: SocketAddr) -> SageMakerFeatureStoreLookup {
        let config = aws_sdk_sagemakerfeaturestoreruntime::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new("us-east-1"))
            .credentials_provider(Credentials::new("AKIDTEST", "secret", None, None, "test"))
            .endpoint_url(format!("http://{}", addr))
            .build();
        let groups = groups();
        SageMakerFeatureStoreLookup::new(
            Client::from_conf(config),
            groups.feature_groups,
            groups.default_feature_group,
        )
    }

    fn groups() -> FeatureGroups {
        FeatureGroups {
            feature_groups: BTreeMap::from([
                ("customers".to_string(), IdentifierKey::CustomerId),
                ("products".to_string(), IdentifierKey::ProductId),
            ]),
            default_feature_group: Some("customers".to_string()),
        }
    }

    #[test]
    fn plan_groups_features_by_record() -> Result<()> {
        let groups = groups();
        let ids = IdentifierPair::new("C123", "P456");
        let features = FeatureList::from_names(&[
            "age",
            "products:price",
            "customers:age",
            "products:rating",
        ])?;
        let plan = groups.plan(&ids, &features)?;
        assert_eq!(plan.len(), 2);
        assert_eq!(
            plan["customers"],
            GroupRequest {
                record_id: "C123",
                feature_names: vec!["age"],
            }
        );
        assert_eq!(
            plan["products"],
            GroupRequest {
                record_id: "P456",
                feature_names: vec!["price", "rating"],
            }
        );
        Ok(())
    }

    #[test]
    fn plan_rejects_unknown_groups() -> Result<()> {
        let ids = IdentifierPair::new("C123", "P456");
        let features = FeatureList::from_names(&["stores:region"])?;
        assert!(groups().plan(&ids, &features).is_err());

        let no_default = FeatureGroups {
            default_feature_group: None,
            ..groups()
        };
        let features = FeatureList::from_names(&["age"])?;
        assert!(no_default.plan(&ids, &features).is_err());
        Ok(())
    }

    #[test]
    fn collect_converts_string_values() -> Result<()> {
        let groups = groups();
        let features = FeatureList::from_names(&[
            "age",
            "customers:age",
            "products:price",
            "products:name",
        ])?;
        let record = groups.collect(
            &features,
            [
                ("customers", "age", Some("42")),
                ("products", "price", Some("19.5")),
                ("products", "name", Some("widget")),
                ("products", "unrequested", Some("1")),
            ],
        )?;
        assert_eq!(record["age"], FeatureValue::Number(42.0));
        assert_eq!(record["customers:age"], FeatureValue::Number(42.0));
        assert_eq!(record["products:price"], FeatureValue::Number(19.5));
        assert_eq!(record["products:name"], FeatureValue::Missing);
        assert_eq!(record.len(), 4);
        Ok(())
    }

    #[tokio::test]
    async fn lookup_reads_batch_get_record() -> Result<()> {
        let (addr, requests) = feature_store(serde_json::json!({
            "Records": [
                {
                    "FeatureGroupName": "customers",
                    "RecordIdentifierValueAsString": "C123",
                    "Record": [{"FeatureName": "age", "ValueAsString": "42"}]
                },
                {
                    "FeatureGroupName": "products",
                    "RecordIdentifierValueAsString": "P456",
                    "Record": [{"FeatureName": "price", "ValueAsString": "19.5"}]
                }
            ],
            "Errors": [],
            "UnprocessedIdentifiers": []
        }))
        .await?;
        let features = FeatureList::from_names(&["age", "products:price", "products:rating"])?;
        let record = lookup_at(addr)
            .get_latest_feature_values(&IdentifierPair::new("C123", "P456"), &features)
            .await?;
        assert_eq!(record["age"], FeatureValue::Number(42.0));
        assert_eq!(record["products:price"], FeatureValue::Number(19.5));
        assert!(!record.contains_key("products:rating"));

        let requests = requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        let identifiers = &requests[0]["Identifiers"];
        assert_eq!(identifiers[0]["FeatureGroupName"], "customers");
        assert_eq!(
            identifiers[0]["RecordIdentifiersValueAsString"],
            serde_json::json!(["C123"])
        );
        assert_eq!(identifiers[1]["FeatureGroupName"], "products");
        assert_eq!(
            identifiers[1]["FeatureNames"],
            serde_json::json!(["price", "rating"])
        );
        Ok(())
    }

    #[tokio::test]
    async fn record_errors_fail_the_lookup() -> Result<()> {
        let (addr, _) = feature_store(serde_json::json!({
            "Records": [],
            "Errors": [{
                "FeatureGroupName": "products",
                "RecordIdentifierValueAsString": "P456",
                "ErrorCode": "ValidationError",
                "ErrorMessage": "Feature group products does not exist"
            }],
            "UnprocessedIdentifiers": []
        }))
        .await?;
        let features = FeatureList::from_names(&["products:price"])?;
        let err = lookup_at(addr)
            .get_latest_feature_values(&IdentifierPair::new("C123", "P456"), &features)
            .await
            .unwrap_err()
            .to_string();
        assert!(err.contains("'products'"), "{}", err);
        assert!(err.contains("'P456'"), "{}", err);
        assert!(err.ends_with("Feature group products does not exist"), "{}", err);
        Ok(())
    }

    #[tokio::test]
    async fn unprocessed_identifiers_fail_the_lookup() -> Result<()> {
        let (addr, _) = feature_store(serde_json::json!({
            "Records": [],
            "Errors": [],
            "UnprocessedIdentifiers": [{
                "FeatureGroupName": "customers",
                "RecordIdentifiersValueAsString": ["C123"]
            }]
        }))
        .await?;
        let features = FeatureList::from_names(&["age"])?;
        let err = lookup_at(addr)
            .get_latest_feature_values(&IdentifierPair::new("C123", "P456"), &features)
            .await
            .unwrap_err()
            .to_string();
        assert!(err.contains("1 feature groups unprocessed"), "{}", err);
        Ok(())
    }
}
