//! Tree-ensemble evaluation for models saved in the XGBoost JSON format.
//!
//! Only numerical splits of `gbtree` and `dart` boosters are supported.
//! Missing values (NaN) follow each node's default direction.

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Objective {
    /// Sigmoid over the margin; base score is a probability.
    Logistic,
    /// Raw margin.
    Identity,
    /// Exponential of the margin; base score is on the response scale.
    Exp,
    /// 1.0 when the margin is positive, else 0.0.
    Hinge,
    /// Softmax across output groups.
    SoftProb,
    /// Index of the largest output group.
    SoftMax,
}

impl Objective {
    fn from_name(name: &str) -> Result<Self> {
        match name {
            "binary:logistic" | "reg:logistic" => Ok(Objective::Logistic),
            "binary:logitraw" | "reg:squarederror" | "reg:linear" | "reg:squaredlogerror"
            | "reg:pseudohubererror" | "reg:absoluteerror" | "reg:quantileerror"
            | "rank:pairwise" | "rank:ndcg" | "rank:map" => Ok(Objective::Identity),
            "count:poisson" | "reg:gamma" | "reg:tweedie" => Ok(Objective::Exp),
            "binary:hinge" => Ok(Objective::Hinge),
            "multi:softprob" => Ok(Objective::SoftProb),
            "multi:softmax" => Ok(Objective::SoftMax),
            other => Err(anyhow!("Unsupported objective: {}", other)),
        }
    }

    fn base_margin(&self, base_score: f64) -> f64 {
        match self {
            Objective::Logistic => {
                let p = base_score.clamp(1e-16, 1.0 - 1e-16);
                (p / (1.0 - p)).ln()
            }
            Objective::Exp => base_score.max(1e-16).ln(),
            _ => base_score,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Tree {
    left_children: Vec<i32>,
    right_children: Vec<i32>,
    split_indices: Vec<u32>,
    split_conditions: Vec<f32>,
    default_left: Vec<bool>,
}

impl Tree {
    fn leaf_value(&self, row: &[f32]) -> f32 {
        let mut node = 0usize;
        loop {
            let left = self.left_children[node];
            if left < 0 {
                return self.split_conditions[node];
            }
            let value = row
                .get(self.split_indices[node] as usize)
                .copied()
                .unwrap_or(f32::NAN);
            let go_left = if value.is_nan() {
                self.default_left[node]
            } else {
                value < self.split_conditions[node]
            };
            node = if go_left {
                left as usize
            } else {
                self.right_children[node] as usize
            };
        }
    }

    fn validate(&self, tree_id: usize, num_feature: usize) -> Result<()> {
        let num_nodes = self.left_children.len();
        if num_nodes == 0 {
            return Err(anyhow!("Tree {} has no nodes", tree_id));
        }
        if self.right_children.len() != num_nodes
            || self.split_indices.len() != num_nodes
            || self.split_conditions.len() != num_nodes
            || self.default_left.len() != num_nodes
        {
            return Err(anyhow!("Tree {} has inconsistent node arrays", tree_id));
        }
        for node in 0..num_nodes {
            let left = self.left_children[node];
            let right = self.right_children[node];
            if left < 0 {
                continue;
            }
            // Children always follow their parent, which rules out cycles.
            for child in [left, right] {
                if child <= node as i32 || child as usize >= num_nodes {
                    return Err(anyhow!(
                        "Tree {} node {} has invalid child {}",
                        tree_id,
                        node,
                        child
                    ));
                }
            }
            if num_feature > 0 && self.split_indices[node] as usize >= num_feature {
                return Err(anyhow!(
                    "Tree {} node {} splits on feature {} but the model has {} features",
                    tree_id,
                    node,
                    self.split_indices[node],
                    num_feature
                ));
            }
        }
        Ok(())
    }
}

/// Loaded tree ensemble.
#[derive(Debug, Clone, PartialEq)]
pub struct Booster {
    trees: Vec<Tree>,
    tree_groups: Vec<usize>,
    tree_weights: Vec<f64>,
    num_groups: usize,
    num_feature: usize,
    base_margin: f64,
    objective: Objective,
}

impl Booster {
    pub fn from_path(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read model file {}", path.display()))?;
        Self::from_json_str(&json)
            .with_context(|| format!("Failed to deserialize model file {}", path.display()))
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let document: ModelDocument = serde_json::from_str(json)?;
        Self::try_from(document)
    }

    pub fn num_feature(&self) -> usize {
        self.num_feature
    }

    pub fn num_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn objective(&self) -> Objective {
        self.objective
    }

    /// Raw per-group margins for one row.
    pub fn predict_margin(&self, row: &[f64]) -> Result<Vec<f64>> {
        if self.num_feature > 0 && row.len() > self.num_feature {
            return Err(anyhow!(
                "Row has {} features but the model expects {}",
                row.len(),
                self.num_feature
            ));
        }
        let row: Vec<f32> = row.iter().map(|v| *v as f32).collect();
        let mut margins = vec![self.base_margin; self.num_groups];
        for ((tree, group), weight) in self
            .trees
            .iter()
            .zip(&self.tree_groups)
            .zip(&self.tree_weights)
        {
            margins[*group] += f64::from(tree.leaf_value(&row)) * weight;
        }
        Ok(margins)
    }

    /// Transformed prediction for one row.
    pub fn predict_row(&self, row: &[f64]) -> Result<Vec<f64>> {
        let margins = self.predict_margin(row)?;
        let output = match self.objective {
            Objective::Logistic => margins.iter().map(|m| sigmoid(*m)).collect(),
            Objective::Identity => margins,
            Objective::Exp => margins.iter().map(|m| m.exp()).collect(),
            Objective::Hinge => margins
                .iter()
                .map(|m| if *m > 0.0 { 1.0 } else { 0.0 })
                .collect(),
            Objective::SoftProb => softmax(&margins),
            Objective::SoftMax => vec![argmax(&margins) as f64],
        };
        Ok(output)
    }
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

fn softmax(margins: &[f64]) -> Vec<f64> {
    let max = margins.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = margins.iter().map(|m| (m - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

fn argmax(values: &[f64]) -> usize {
    values
        .iter()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |(best, best_value), (i, v)| {
            if *v > best_value { (i, *v) } else { (best, best_value) }
        })
        .0
}

// Serialized layout, trimmed to the fields needed for prediction.

#[derive(Debug, Deserialize)]
struct ModelDocument {
    learner: LearnerDef,
}

#[derive(Debug, Deserialize)]
struct LearnerDef {
    gradient_booster: GradientBoosterDef,
    learner_model_param: LearnerModelParamDef,
    objective: ObjectiveDef,
}

#[derive(Debug, Deserialize)]
struct LearnerModelParamDef {
    base_score: String,
    #[serde(default)]
    num_class: Option<String>,
    #[serde(default)]
    num_feature: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ObjectiveDef {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "name", rename_all = "snake_case")]
enum GradientBoosterDef {
    Gbtree {
        model: GbTreeModelDef,
    },
    Dart {
        gbtree: Box<DartInnerDef>,
        weight_drop: Vec<f64>,
    },
    Gblinear {},
}

#[derive(Debug, Deserialize)]
struct DartInnerDef {
    model: GbTreeModelDef,
}

#[derive(Debug, Deserialize)]
struct GbTreeModelDef {
    trees: Vec<TreeDef>,
    tree_info: Vec<usize>,
}

#[derive(Debug, Deserialize)]
struct TreeDef {
    left_children: Vec<i32>,
    right_children: Vec<i32>,
    split_indices: Vec<u32>,
    split_conditions: Vec<f32>,
    default_left: Vec<Flag>,
    #[serde(default)]
    split_type: Vec<u8>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(untagged)]
enum Flag {
    Bool(bool),
    Int(u8),
}

impl From<Flag> for bool {
    fn from(value: Flag) -> Self {
        match value {
            Flag::Bool(b) => b,
            Flag::Int(i) => i != 0,
        }
    }
}

/// Parses numeric learner parameters, which are stored as strings and, in
/// newer releases, as single-element vectors such as `[5E-1]`.
fn parse_param<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T> {
    let trimmed = raw.trim().trim_start_matches('[').trim_end_matches(']');
    let first = trimmed.split(',').next().unwrap_or_default().trim();
    first
        .parse::<T>()
        .map_err(|_| anyhow!("Invalid value '{}' for model parameter {}", raw, name))
}

impl TryFrom<ModelDocument> for Booster {
    type Error = anyhow::Error;

    fn try_from(document: ModelDocument) -> Result<Self> {
        let LearnerDef {
            gradient_booster,
            learner_model_param,
            objective,
        } = document.learner;

        let (model, weights) = match gradient_booster {
            GradientBoosterDef::Gbtree { model } => {
                let weights = vec![1.0; model.trees.len()];
                (model, weights)
            }
            GradientBoosterDef::Dart {
                gbtree,
                weight_drop,
            } => (gbtree.model, weight_drop),
            GradientBoosterDef::Gblinear {} => {
                return Err(anyhow!("Linear boosters are not supported"));
            }
        };
        if model.trees.len() != model.tree_info.len() || model.trees.len() != weights.len() {
            return Err(anyhow!(
                "Model declares {} trees but has {} group entries and {} weights",
                model.trees.len(),
                model.tree_info.len(),
                weights.len()
            ));
        }

        let objective = Objective::from_name(&objective.name)?;
        let base_score: f64 = parse_param("base_score", &learner_model_param.base_score)?;
        let num_class: usize = learner_model_param
            .num_class
            .as_deref()
            .map(|raw| parse_param("num_class", raw))
            .transpose()?
            .unwrap_or(0);
        let num_feature: usize = learner_model_param
            .num_feature
            .as_deref()
            .map(|raw| parse_param("num_feature", raw))
            .transpose()?
            .unwrap_or(0);
        let num_groups = num_class.max(1);

        let mut trees = Vec::with_capacity(model.trees.len());
        for (tree_id, tree_def) in model.trees.into_iter().enumerate() {
            if tree_def.split_type.iter().any(|t| *t != 0) {
                return Err(anyhow!("Tree {} uses categorical splits", tree_id));
            }
            let tree = Tree {
                left_children: tree_def.left_children,
                right_children: tree_def.right_children,
                split_indices: tree_def.split_indices,
                split_conditions: tree_def.split_conditions,
                default_left: tree_def.default_left.into_iter().map(bool::from).collect(),
            };
            tree.validate(tree_id, num_feature)?;
            trees.push(tree);
        }
        if let Some(group) = model.tree_info.iter().find(|g| **g >= num_groups) {
            return Err(anyhow!(
                "Tree group {} is out of range for {} output groups",
                group,
                num_groups
            ));
        }

        Ok(Self {
            trees,
            tree_groups: model.tree_info,
            tree_weights: weights,
            num_groups,
            num_feature,
            base_margin: objective.base_margin(base_score),
            objective,
        })
    }
}
