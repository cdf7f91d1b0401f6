use crate::error::AdapterError;
use anyhow::Result;
use rustc_hash::FxHashMap as HashMap;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::fmt::Formatter;
use std::iter::Peekable;
use std::str::Chars;

pub const FEATURE_LIST_ENV_VAR: &str = "feature_list";
pub const CUSTOMER_ID: &str = "customer_id";
pub const PRODUCT_ID: &str = "product_id";

/// Resolved values for one identifier pair, keyed by the feature reference
/// exactly as it appears in the feature list.
pub type FeatureRecord = HashMap<String, FeatureValue>;

/// One entry of the feature list: `name` or `group:name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FeatureRef {
    reference: String,
    group: Option<String>,
    name: String,
}

impl FeatureRef {
    pub fn parse(reference: &str) -> Result<Self> {
        if reference.trim().is_empty() {
            return Err(AdapterError::invalid_feature_list("empty feature name").into());
        }
        let (group, name) = match reference.split_once(':') {
            Some((group, name)) => {
                if group.is_empty() || name.is_empty() {
                    return Err(AdapterError::invalid_feature_list(format!(
                        "feature reference '{}' must have the form 'group:name'",
                        reference
                    ))
                    .into());
                }
                (Some(group.to_string()), name.to_string())
            }
            None => (None, reference.to_string()),
        };
        Ok(Self {
            reference: reference.to_string(),
            group,
            name,
        })
    }

    pub fn reference(&self) -> &str {
        &self.reference
    }

    pub fn group(&self) -> Option<&str> {
        self.group.as_deref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for FeatureRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.reference)
    }
}

/// Ordered feature names the model expects, fixed for the process lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureList {
    features: Vec<FeatureRef>,
}

impl FeatureList {
    pub fn new(features: Vec<FeatureRef>) -> Result<Self> {
        if features.is_empty() {
            return Err(AdapterError::invalid_feature_list("feature list is empty").into());
        }
        Ok(Self { features })
    }

    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Self> {
        let features = names
            .iter()
            .map(|name| FeatureRef::parse(name.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Self::new(features)
    }

    pub fn from_env() -> Result<Self> {
        Self::from_env_value(std::env::var(FEATURE_LIST_ENV_VAR).ok())
    }

    pub fn from_env_value(value: Option<String>) -> Result<Self> {
        let value = value.ok_or_else(|| AdapterError::FeatureListMissing {
            variable: FEATURE_LIST_ENV_VAR.to_string(),
        })?;
        Self::from_literal(&value)
    }

    /// Parses a literal sequence of strings, e.g. `['a', 'b']`, `("a",)` or a
    /// JSON array.
    pub fn from_literal(literal: &str) -> Result<Self> {
        let names = match serde_json::from_str::<Vec<String>>(literal) {
            Ok(names) => names,
            Err(_) => parse_string_sequence(literal).map_err(AdapterError::invalid_feature_list)?,
        };
        Self::from_names(&names)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FeatureRef> {
        self.features.iter()
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

impl<'a> IntoIterator for &'a FeatureList {
    type Item = &'a FeatureRef;
    type IntoIter = std::slice::Iter<'a, FeatureRef>;

    fn into_iter(self) -> Self::IntoIter {
        self.features.iter()
    }
}

fn skip_whitespace(chars: &mut Peekable<Chars<'_>>) {
    while chars.next_if(|c| c.is_whitespace()).is_some() {}
}

fn read_quoted(chars: &mut Peekable<Chars<'_>>, quote: char) -> Result<String, String> {
    let mut value = String::new();
    loop {
        match chars.next() {
            Some(c) if c == quote => return Ok(value),
            Some('\\') => match chars.next() {
                Some('n') => value.push('\n'),
                Some('t') => value.push('\t'),
                Some('r') => value.push('\r'),
                Some(escaped @ ('\\' | '\'' | '"')) => value.push(escaped),
                Some('x') => value.push(read_code_point(chars, 2)?),
                Some('u') => value.push(read_code_point(chars, 4)?),
                Some('U') => value.push(read_code_point(chars, 8)?),
                Some(other) => {
                    value.push('\\');
                    value.push(other);
                }
                None => return Err("unterminated string literal".to_string()),
            },
            Some(c) => value.push(c),
            None => return Err("unterminated string literal".to_string()),
        }
    }
}

fn read_code_point(chars: &mut Peekable<Chars<'_>>, digits: usize) -> Result<char, String> {
    let hex: String = chars.by_ref().take(digits).collect();
    if hex.len() != digits {
        return Err("truncated escape sequence".to_string());
    }
    u32::from_str_radix(&hex, 16)
        .ok()
        .and_then(char::from_u32)
        .ok_or_else(|| format!("invalid escape sequence '{}'", hex))
}

fn parse_string_sequence(literal: &str) -> Result<Vec<String>, String> {
    let mut chars = literal.trim().chars().peekable();
    let close = match chars.next() {
        Some('[') => ']',
        Some('(') => ')',
        Some(other) => return Err(format!("expected '[' or '(', found '{}'", other)),
        None => return Err("value is empty".to_string()),
    };
    let mut names = Vec::new();
    loop {
        skip_whitespace(&mut chars);
        match chars.next() {
            Some(c) if c == close => break,
            Some(quote @ ('\'' | '"')) => {
                names.push(read_quoted(&mut chars, quote)?);
                skip_whitespace(&mut chars);
                match chars.next() {
                    Some(',') => {}
                    Some(c) if c == close => break,
                    Some(other) => {
                        return Err(format!("expected ',' or '{}', found '{}'", close, other));
                    }
                    None => return Err(format!("missing closing '{}'", close)),
                }
            }
            Some(other) => return Err(format!("expected a string element, found '{}'", other)),
            None => return Err(format!("missing closing '{}'", close)),
        }
    }
    skip_whitespace(&mut chars);
    if let Some(extra) = chars.next() {
        return Err(format!("unexpected trailing character '{}'", extra));
    }
    Ok(names)
}

/// Customer and product identifiers extracted from one request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdentifierPair {
    pub customer_id: String,
    pub product_id: String,
}

impl IdentifierPair {
    pub fn new(customer_id: impl Into<String>, product_id: impl Into<String>) -> Self {
        Self {
            customer_id: customer_id.into(),
            product_id: product_id.into(),
        }
    }

    /// Takes the first two comma-separated fields of a CSV body, trimmed.
    /// Remaining fields are ignored.
    pub fn from_csv_body(body: &str) -> Result<Self> {
        let mut fields = body.split(',');
        let customer_id = fields.next().map(str::trim);
        let product_id = fields.next().map(str::trim);
        match (customer_id, product_id) {
            (Some(customer_id), Some(product_id)) => Ok(Self::new(customer_id, product_id)),
            _ => Err(AdapterError::malformed_request(format!(
                "expected '{},{}' but the body has a single field",
                CUSTOMER_ID, PRODUCT_ID
            ))
            .into()),
        }
    }

    pub fn value(&self, key: IdentifierKey) -> &str {
        match key {
            IdentifierKey::CustomerId => &self.customer_id,
            IdentifierKey::ProductId => &self.product_id,
        }
    }
}

/// Names one side of an [`IdentifierPair`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentifierKey {
    CustomerId,
    ProductId,
}

impl IdentifierKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentifierKey::CustomerId => CUSTOMER_ID,
            IdentifierKey::ProductId => PRODUCT_ID,
        }
    }
}

/// Scalar feature value handed to the model.
///
/// Lookup backends map absent, null and non-numeric values to `Missing`,
/// which reaches the booster as NaN and follows each split's default branch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FeatureValue {
    Number(f64),
    Missing,
}

impl FeatureValue {
    /// Non-finite parses such as `nan` or `inf` are `Missing`.
    pub fn from_str_lossy(raw: &str) -> Self {
        match raw.trim().parse::<f64>() {
            Ok(v) if v.is_finite() => FeatureValue::Number(v),
            _ => FeatureValue::Missing,
        }
    }

    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Number(n) => n
                .as_f64()
                .map(FeatureValue::Number)
                .unwrap_or(FeatureValue::Missing),
            serde_json::Value::Bool(b) => FeatureValue::Number(if *b { 1.0 } else { 0.0 }),
            serde_json::Value::String(s) => FeatureValue::from_str_lossy(s),
            _ => FeatureValue::Missing,
        }
    }

    pub fn as_f64(&self) -> f64 {
        match self {
            FeatureValue::Number(v) => *v,
            FeatureValue::Missing => f64::NAN,
        }
    }
}

impl From<f64> for FeatureValue {
    fn from(value: f64) -> Self {
        FeatureValue::Number(value)
    }
}

impl Serialize for FeatureValue {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            FeatureValue::Number(v) if v.is_finite() => serializer.serialize_f64(*v),
            _ => serializer.serialize_none(),
        }
    }
}

/// One ordered row of feature values, aligned with the feature list.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(transparent)]
pub struct ModelInput {
    pub values: Vec<FeatureValue>,
}

impl ModelInput {
    pub fn new(values: Vec<FeatureValue>) -> Self {
        Self { values }
    }

    /// Builds the row by walking the feature list and looking each entry up,
    /// so column order never depends on the record's iteration order.
    pub fn from_record(feature_list: &FeatureList, record: &FeatureRecord) -> Self {
        let values = feature_list
            .iter()
            .map(|feature| {
                record
                    .get(feature.reference())
                    .copied()
                    .unwrap_or(FeatureValue::Missing)
            })
            .collect();
        Self { values }
    }

    pub fn to_dense_row(&self) -> Vec<f64> {
        self.values.iter().map(FeatureValue::as_f64).collect()
    }
}

/// Output of the predict step.
#[derive(Debug, Clone, PartialEq)]
pub enum Prediction {
    /// Booster output for the row, one value per output group.
    Scores(Vec<f64>),
    /// The prepared row returned unchanged.
    Features(ModelInput),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &FeatureList) -> Vec<&str> {
        list.iter().map(FeatureRef::reference).collect()
    }

    #[test]
    fn parse_python_list_literal() -> Result<()> {
        let list = FeatureList::from_literal("['fg-customers:age', 'fg-products:price']")?;
        assert_eq!(names(&list), vec!["fg-customers:age", "fg-products:price"]);
        let first = list.iter().next().unwrap();
        assert_eq!(first.group(), Some("fg-customers"));
        assert_eq!(first.name(), "age");
        Ok(())
    }

    #[test]
    fn parse_json_and_tuple_literals() -> Result<()> {
        let json = FeatureList::from_literal(r#"["f1", "f2"]"#)?;
        assert_eq!(names(&json), vec!["f1", "f2"]);
        let tuple = FeatureList::from_literal("  ('f1', \"f2\",)  ")?;
        assert_eq!(names(&tuple), vec!["f1", "f2"]);
        assert!(tuple.iter().all(|f| f.group().is_none()));
        Ok(())
    }

    #[test]
    fn parse_escaped_quotes() -> Result<()> {
        let list = FeatureList::from_literal(r"['it\'s']")?;
        assert_eq!(names(&list), vec!["it's"]);
        Ok(())
    }

    #[test]
    fn parse_unicode_escapes() -> Result<()> {
        let json = FeatureList::from_literal(r#"["caf\u00e9", "nan_feature"]"#)?;
        assert_eq!(names(&json), vec!["café", "nan_feature"]);
        let python = FeatureList::from_literal(r"('caf\xe9', 'caf\u00e9', 'b\U0001F600')")?;
        assert_eq!(names(&python), vec!["café", "café", "b\u{1F600}"]);
        Ok(())
    }

    #[test]
    fn reject_malformed_literals() {
        for literal in [
            "",
            "f1,f2",
            "['f1'",
            "['f1' 'f2']",
            "[f1]",
            "[1, 2]",
            "['f1',,]",
            "['f1'] extra",
            "[]",
            "['']",
            "[':f1']",
            "['fg:']",
            r"['\x4']",
            r"['\ud800']",
        ] {
            let err = FeatureList::from_literal(literal).unwrap_err();
            assert!(
                matches!(
                    err.downcast_ref::<AdapterError>(),
                    Some(AdapterError::InvalidFeatureList { .. })
                ),
                "literal {:?} gave {}",
                literal,
                err
            );
        }
    }

    #[test]
    fn missing_env_value_is_an_error() {
        let err = FeatureList::from_env_value(None).unwrap_err();
        assert_eq!(
            err.downcast_ref::<AdapterError>(),
            Some(&AdapterError::FeatureListMissing {
                variable: FEATURE_LIST_ENV_VAR.to_string()
            })
        );
    }

    #[test]
    fn identifiers_are_trimmed() -> Result<()> {
        let ids = IdentifierPair::from_csv_body(" C123 , P456")?;
        assert_eq!(ids, IdentifierPair::new("C123", "P456"));
        let ids = IdentifierPair::from_csv_body("C1,P2,ignored,fields\n")?;
        assert_eq!(ids, IdentifierPair::new("C1", "P2"));
        assert_eq!(ids.value(IdentifierKey::CustomerId), "C1");
        assert_eq!(ids.value(IdentifierKey::ProductId), "P2");
        Ok(())
    }

    #[test]
    fn single_field_body_is_rejected() {
        for body in ["C123", "", "   "] {
            let err = IdentifierPair::from_csv_body(body).unwrap_err();
            let adapter_error = err.downcast_ref::<AdapterError>().unwrap();
            assert!(matches!(adapter_error, AdapterError::MalformedRequest { .. }));
        }
    }

    #[test]
    fn feature_value_conversion() {
        assert_eq!(FeatureValue::from_str_lossy(" 4.5 "), FeatureValue::Number(4.5));
        assert_eq!(FeatureValue::from_str_lossy("abc"), FeatureValue::Missing);
        for non_finite in ["nan", "NaN", "inf", "-infinity"] {
            assert_eq!(FeatureValue::from_str_lossy(non_finite), FeatureValue::Missing);
        }
        assert_eq!(
            FeatureValue::from_json(&serde_json::json!(3)),
            FeatureValue::Number(3.0)
        );
        assert_eq!(
            FeatureValue::from_json(&serde_json::json!(true)),
            FeatureValue::Number(1.0)
        );
        assert_eq!(
            FeatureValue::from_json(&serde_json::json!("7")),
            FeatureValue::Number(7.0)
        );
        assert_eq!(
            FeatureValue::from_json(&serde_json::Value::Null),
            FeatureValue::Missing
        );
        assert!(FeatureValue::Missing.as_f64().is_nan());
    }

    #[test]
    fn model_input_follows_feature_list_order() -> Result<()> {
        let list = FeatureList::from_names(&["f3", "f1", "f2"])?;
        let mut record = FeatureRecord::default();
        record.insert("f1".to_string(), FeatureValue::Number(1.0));
        record.insert("f2".to_string(), FeatureValue::Number(2.0));
        record.insert("f3".to_string(), FeatureValue::Number(3.0));
        record.insert("unrequested".to_string(), FeatureValue::Number(9.0));
        let input = ModelInput::from_record(&list, &record);
        assert_eq!(input.to_dense_row(), vec![3.0, 1.0, 2.0]);

        record.remove("f1");
        let input = ModelInput::from_record(&list, &record);
        assert_eq!(
            input.values,
            vec![
                FeatureValue::Number(3.0),
                FeatureValue::Missing,
                FeatureValue::Number(2.0)
            ]
        );
        Ok(())
    }

    #[test]
    fn model_input_serializes_missing_as_null() -> Result<()> {
        let input = ModelInput::new(vec![FeatureValue::Number(1.5), FeatureValue::Missing]);
        assert_eq!(serde_json::to_string(&input)?, "[1.5,null]");
        Ok(())
    }
}
