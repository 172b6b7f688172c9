//! Retrieval-side boundary: reference documents, retrieval filters and the
//! collaborator traits the engine calls for evidence. The production ranking
//! algorithm lives outside this crate; the in-memory implementations here are
//! deterministic stand-ins for development and tests.

use crate::error::{CardwrightError, Result};
use crate::fragments::ContentFragment;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A structured prior-art document ("PRD") used as retrieval evidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceDocument {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub tech_keywords: Vec<String>,
    #[serde(default)]
    pub risk_profile: Vec<String>,
    #[serde(default)]
    pub kpi_examples: Vec<String>,
    #[serde(default)]
    pub sections: Vec<DocSection>,
}

/// One section of a reference document. `key` is the machine key assigned by
/// whoever authored the document; it takes precedence over the title when
/// resolving a canonical topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocSection {
    pub title: String,
    #[serde(default)]
    pub key: Option<String>,
    pub body: String,
}

/// Filters the engine derives from the node before asking for evidence.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetrievalFilters {
    pub node_types: Vec<String>,
    pub domains: Vec<String>,
    pub tags: Vec<String>,
}

/// One entry in the ranked candidate list a retrieval stage considered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedCandidate {
    pub id: String,
    pub label: String,
    pub score: f32,
}

/// What a retrieval call returns: documents ranked most-relevant-first,
/// typed fragments, the stages that ran, and the ranked candidates.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetrievalOutcome {
    pub documents: Vec<ReferenceDocument>,
    pub fragments: Vec<ContentFragment>,
    pub stages: Vec<String>,
    pub candidates: Vec<RankedCandidate>,
}

/// External retrieval collaborator. Implementations must return documents
/// pre-ranked most-relevant-first; the engine does not re-rank. Transport
/// failures should surface as [`CardwrightError::Retrieval`] (or
/// [`CardwrightError::Timeout`]); the engine converts them into warnings.
#[async_trait]
pub trait KnowledgeSource: Send + Sync {
    async fn retrieve(&self, filters: &RetrievalFilters) -> Result<RetrievalOutcome>;
}

/// Read-only store resolving a template's suggested document ids.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn fetch(&self, document_id: &str) -> Result<Option<ReferenceDocument>>;
}

/// Deterministic in-memory knowledge source. Ranking here is a plain overlap
/// count and is NOT the production relevance algorithm.
#[derive(Debug, Default)]
pub struct InMemoryKnowledge {
    documents: Vec<ReferenceDocument>,
    fragments: Vec<ContentFragment>,
}

impl InMemoryKnowledge {
    pub fn new(documents: Vec<ReferenceDocument>, fragments: Vec<ContentFragment>) -> Self {
        Self {
            documents,
            fragments,
        }
    }

    fn score_document(doc: &ReferenceDocument, filters: &RetrievalFilters) -> f32 {
        let mut score = 0.0f32;
        let doc_tags: Vec<String> = doc.tags.iter().map(|t| t.to_lowercase()).collect();
        for t in &filters.tags {
            if doc_tags.contains(&t.to_lowercase()) {
                score += 1.0;
            }
        }
        let haystack = format!("{} {}", doc.name, doc.description).to_lowercase();
        for nt in &filters.node_types {
            if haystack.contains(&nt.to_lowercase()) {
                score += 3.0;
            }
        }
        for d in &filters.domains {
            if haystack.contains(&d.to_lowercase()) || doc_tags.contains(&d.to_lowercase()) {
                score += 2.0;
            }
        }
        score
    }
}

#[async_trait]
impl KnowledgeSource for InMemoryKnowledge {
    async fn retrieve(&self, filters: &RetrievalFilters) -> Result<RetrievalOutcome> {
        let mut scored: Vec<(f32, &ReferenceDocument)> = self
            .documents
            .iter()
            .map(|d| (Self::score_document(d, filters), d))
            .collect();
        // Stable sort keeps insertion order among equal scores, so output
        // ordering is deterministic for identical inputs.
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        let candidates = scored
            .iter()
            .map(|(score, d)| RankedCandidate {
                id: d.id.clone(),
                label: d.name.clone(),
                score: *score,
            })
            .collect();
        let documents = scored
            .into_iter()
            .filter(|(score, _)| *score > 0.0)
            .map(|(_, d)| d.clone())
            .collect();

        Ok(RetrievalOutcome {
            documents,
            fragments: self.fragments.clone(),
            stages: vec!["memory:overlap".to_string()],
            candidates,
        })
    }
}

/// In-memory document store for development and tests.
#[derive(Debug, Default)]
pub struct InMemoryDocumentStore {
    documents: Vec<ReferenceDocument>,
}

impl InMemoryDocumentStore {
    pub fn new(documents: Vec<ReferenceDocument>) -> Self {
        Self { documents }
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn fetch(&self, document_id: &str) -> Result<Option<ReferenceDocument>> {
        if document_id.trim().is_empty() {
            return Err(CardwrightError::InvalidParams {
                message: "document_id must not be empty".to_string(),
            });
        }
        Ok(self.documents.iter().find(|d| d.id == document_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: &str, name: &str, tags: &[&str]) -> ReferenceDocument {
        ReferenceDocument {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            tags: tags.iter().map(|s| s.to_string()).collect(),
            tech_keywords: vec![],
            risk_profile: vec![],
            kpi_examples: vec![],
            sections: vec![],
        }
    }

    #[tokio::test]
    async fn retrieval_ranks_by_overlap_and_drops_zero_scores() {
        let source = InMemoryKnowledge::new(
            vec![
                doc("a", "Generic doc", &["misc"]),
                doc("b", "Payments backend baseline", &["payments", "stripe"]),
            ],
            vec![],
        );
        let filters = RetrievalFilters {
            node_types: vec!["backend".into()],
            domains: vec![],
            tags: vec!["payments".into()],
        };
        let outcome = source.retrieve(&filters).await.unwrap();
        assert_eq!(outcome.documents.len(), 1);
        assert_eq!(outcome.documents[0].id, "b");
        // Candidates keep the full ranked list, zero scores included.
        assert_eq!(outcome.candidates.len(), 2);
        assert_eq!(outcome.candidates[0].id, "b");
    }

    #[tokio::test]
    async fn store_fetch_rejects_empty_id() {
        let store = InMemoryDocumentStore::new(vec![doc("a", "Doc", &[])]);
        assert!(store.fetch("").await.is_err());
        assert!(store.fetch("a").await.unwrap().is_some());
        assert!(store.fetch("zzz").await.unwrap().is_none());
    }
}
