//! Immutable node-side inputs to a compose call: the blueprint node itself,
//! its lightweight related-node references, and the free-text intent bundle.

use serde::{Deserialize, Serialize};

/// A blueprint node as the canvas hands it to the engine. Never mutated here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeContext {
    pub id: String,
    pub label: String,
    pub node_type: String,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub related: Vec<RelatedNode>,
    #[serde(default)]
    pub intent: Option<NodeIntent>,
}

/// Lightweight reference to a neighboring node on the canvas.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelatedNode {
    pub id: String,
    pub label: String,
    pub node_type: String,
    #[serde(default)]
    pub relation: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
}

/// Free-text answers captured by the question wizard, all optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeIntent {
    #[serde(default)]
    pub idea: Option<String>,
    #[serde(default)]
    pub problem: Option<String>,
    #[serde(default)]
    pub primary_audience: Option<String>,
    #[serde(default)]
    pub core_outcome: Option<String>,
    #[serde(default)]
    pub launch_scope: Option<String>,
    #[serde(default)]
    pub primary_risk: Option<String>,
    #[serde(default)]
    pub classification: Option<String>,
}

impl NodeContext {
    pub fn new(
        id: impl Into<String>,
        label: impl Into<String>,
        node_type: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            node_type: node_type.into(),
            domain: None,
            summary: None,
            tags: Vec::new(),
            related: Vec::new(),
            intent: None,
        }
    }

    /// Tags are a set: deduplicated case-insensitively, first appearance wins.
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        let mut seen = Vec::new();
        let mut out = Vec::new();
        for t in tags {
            let norm = t.trim().to_lowercase();
            if norm.is_empty() || seen.contains(&norm) {
                continue;
            }
            seen.push(norm);
            out.push(t.trim().to_string());
        }
        self.tags = out;
        self
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    pub fn with_related(mut self, related: Vec<RelatedNode>) -> Self {
        self.related = related;
        self
    }

    pub fn with_intent(mut self, intent: NodeIntent) -> Self {
        self.intent = Some(intent);
        self
    }

    /// All intent fields that carry text, in declaration order.
    pub fn intent_phrases(&self) -> Vec<&str> {
        let Some(intent) = &self.intent else {
            return Vec::new();
        };
        [
            intent.idea.as_deref(),
            intent.problem.as_deref(),
            intent.primary_audience.as_deref(),
            intent.core_outcome.as_deref(),
            intent.launch_scope.as_deref(),
            intent.primary_risk.as_deref(),
            intent.classification.as_deref(),
        ]
        .into_iter()
        .flatten()
        .filter(|s| !s.trim().is_empty())
        .collect()
    }
}
