//! The compose pipeline: establish the target section shape, retrieve
//! evidence, aggregate, draft (or fall back), score, and return one immutable
//! result. `compose` never fails: every upstream error becomes a warning plus
//! reduced-confidence content.

use crate::accuracy::{self, AccuracyReport, EvaluationInput};
use crate::aggregate::{self, Coverage, ExistingSection};
use crate::catalogue;
use crate::config::Config;
use crate::drafting::{CompletionClient, DraftingClient};
use crate::error::CardwrightError;
use crate::knowledge::{
    DocumentStore, KnowledgeSource, RankedCandidate, ReferenceDocument, RetrievalFilters,
    RetrievalOutcome,
};
use crate::node::NodeContext;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// One compose call's inputs.
#[derive(Debug, Clone)]
pub struct ComposeRequest {
    pub node: NodeContext,
    pub template_id: String,
    /// Section bodies the author already drafted in a prior session.
    pub existing_sections: Vec<ExistingSection>,
    /// Checklist items already on the card.
    pub existing_checklist: Vec<String>,
}

impl ComposeRequest {
    pub fn new(node: NodeContext, template_id: impl Into<String>) -> Self {
        Self {
            node,
            template_id: template_id.into(),
            existing_sections: Vec::new(),
            existing_checklist: Vec::new(),
        }
    }
}

/// One final rendered card section.
#[derive(Debug, Clone, Serialize)]
pub struct RenderedSection {
    pub title: String,
    pub description: Option<String>,
    pub body: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DocumentUse {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FragmentUse {
    pub id: String,
    pub kind: String,
}

/// Where the composed content came from.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Provenance {
    pub documents: Vec<DocumentUse>,
    pub fragments: Vec<FragmentUse>,
    pub stages: Vec<String>,
    pub coverage: Coverage,
    pub candidates: Vec<RankedCandidate>,
    pub elapsed_ms: u64,
}

/// Immutable output of one compose call.
#[derive(Debug, Clone, Serialize)]
pub struct ComposeResult {
    pub sections: Vec<RenderedSection>,
    pub checklist: Vec<String>,
    pub used_fallback: bool,
    pub warnings: Vec<String>,
    pub accuracy: AccuracyReport,
    pub provenance: Provenance,
}

/// The card composition engine. Stateless between calls; the only shared
/// state is the read-only catalogue and the collaborator handles, so compose
/// calls may run concurrently without coordination.
pub struct ComposeEngine {
    knowledge: Arc<dyn KnowledgeSource>,
    documents: Arc<dyn DocumentStore>,
    drafting: DraftingClient,
    config: Config,
}

impl ComposeEngine {
    pub fn new(
        config: Config,
        knowledge: Arc<dyn KnowledgeSource>,
        documents: Arc<dyn DocumentStore>,
        completion: Option<Arc<dyn CompletionClient>>,
    ) -> Self {
        let drafting = DraftingClient::new(completion, &config.drafting);
        Self {
            knowledge,
            documents,
            drafting,
            config,
        }
    }

    /// Compose a card for one node. Infallible by design: missing templates,
    /// empty retrieval, and generative failures all degrade, never abort.
    pub async fn compose(&self, request: ComposeRequest) -> ComposeResult {
        let started = Instant::now();
        let mut warnings: Vec<String> = Vec::new();
        let node = &request.node;

        let template = catalogue::get_card_template(&request.template_id);
        if template.is_none() {
            warn!(template_id = %request.template_id, "unknown card template");
            warnings.push(format!("unknown card template '{}'", request.template_id));
        }

        // Resolve the template's suggested documents; first hit wins.
        let mut linked_document: Option<ReferenceDocument> = None;
        if let Some(template) = template {
            for doc_id in &template.suggested_documents {
                match self.documents.fetch(doc_id).await {
                    Ok(Some(doc)) => {
                        debug!(doc_id = %doc.id, "resolved suggested reference document");
                        linked_document = Some(doc);
                        break;
                    }
                    Ok(None) => {}
                    Err(e) => debug!(doc_id = %doc_id, "suggested document lookup failed: {e}"),
                }
            }
        }

        let filters = build_filters(node);
        let retrieval = match tokio::time::timeout(
            Duration::from_millis(self.config.retrieval.timeout_ms),
            self.knowledge.retrieve(&filters),
        )
        .await
        {
            Err(_) => {
                let err = CardwrightError::Timeout {
                    operation: "retrieval".to_string(),
                    timeout_ms: self.config.retrieval.timeout_ms,
                };
                warn!(
                    timeout_ms = self.config.retrieval.timeout_ms,
                    "retrieval timed out"
                );
                warnings.push(err.to_string());
                RetrievalOutcome::default()
            }
            Ok(Err(e)) => {
                warn!("retrieval failed: {e}");
                warnings.push(format!("retrieval failed: {e}"));
                RetrievalOutcome::default()
            }
            Ok(Ok(outcome)) => outcome,
        };

        // Linked document is primary evidence; retrieved documents keep their
        // rank order after it. The aggregator deduplicates by id.
        let mut documents: Vec<ReferenceDocument> = Vec::new();
        if let Some(doc) = &linked_document {
            documents.push(doc.clone());
        }
        documents.extend(retrieval.documents.iter().cloned());

        let aggregated = aggregate::aggregate(
            node,
            template,
            &request.existing_sections,
            &request.existing_checklist,
            &documents,
            &retrieval.fragments,
            self.config.retrieval.top_documents,
        );

        let draft = self
            .drafting
            .draft(node, &aggregated.plans, &aggregated.checklist, &documents)
            .await;

        let mut sections: Vec<RenderedSection> = draft
            .sections
            .iter()
            .map(|s| RenderedSection {
                title: s.title.clone(),
                description: s.description.clone(),
                body: s.body.clone(),
            })
            .collect();

        // Author edits are load-bearing: if the model dropped a pre-drafted
        // body, re-attach it ahead of the generated text.
        for plan in &aggregated.plans {
            let Some(existing) = plan.existing_body.as_deref().map(str::trim) else {
                continue;
            };
            if existing.is_empty() {
                continue;
            }
            if let Some(section) = sections.iter_mut().find(|s| s.title == plan.title)
                && !section.body.contains(existing)
            {
                section.body = format!("{}\n\n---\n\n{}", existing, section.body);
            }
        }

        warnings.extend(draft.warnings.iter().cloned());

        let accuracy = accuracy::evaluate(EvaluationInput {
            node,
            template_matched: template.is_some(),
            reference_document_linked: linked_document.is_some(),
            coverage: Some(&aggregated.coverage),
            generation_succeeded: draft.success,
            used_fallback: draft.used_fallback,
            warnings: &warnings,
            model_confidence: draft.model_confidence,
        });

        let provenance = Provenance {
            documents: aggregated
                .documents_used
                .iter()
                .map(|(id, name)| DocumentUse {
                    id: id.clone(),
                    name: name.clone(),
                })
                .collect(),
            fragments: aggregated
                .fragments_used
                .iter()
                .map(|(id, kind)| FragmentUse {
                    id: id.clone(),
                    kind: kind.to_string(),
                })
                .collect(),
            stages: retrieval.stages,
            coverage: aggregated.coverage,
            candidates: retrieval.candidates,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };

        debug!(
            sections = sections.len(),
            score = accuracy.score,
            used_fallback = draft.used_fallback,
            elapsed_ms = provenance.elapsed_ms,
            "compose complete"
        );

        ComposeResult {
            sections,
            checklist: draft.checklist,
            used_fallback: draft.used_fallback,
            warnings,
            accuracy,
            provenance,
        }
    }
}

/// Derive retrieval filters from the node: its type, domain, and the union
/// of tags and intent keywords, deterministically ordered.
fn build_filters(node: &NodeContext) -> RetrievalFilters {
    let mut tags: Vec<String> = node.tags.iter().map(|t| t.to_lowercase()).collect();
    let mut seen: BTreeSet<String> = tags.iter().cloned().collect();
    let mut intent_terms: BTreeSet<String> = BTreeSet::new();
    for phrase in node.intent_phrases() {
        intent_terms.extend(aggregate::keyword_tokens(phrase));
    }
    for term in intent_terms {
        // Skip full phrases; filters carry individual keywords only.
        if !term.contains(' ') && seen.insert(term.clone()) {
            tags.push(term);
        }
    }
    RetrievalFilters {
        node_types: vec![node.node_type.clone()],
        domains: node.domain.iter().cloned().collect(),
        tags,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeIntent;

    #[test]
    fn filters_union_tags_and_intent_keywords() {
        let node = NodeContext::new("n1", "Checkout", "backend")
            .with_domain("tech")
            .with_tags(vec!["payments".into()])
            .with_intent(NodeIntent {
                problem: Some("Slow refunds frustrate merchants".into()),
                ..Default::default()
            });
        let filters = build_filters(&node);
        assert_eq!(filters.node_types, vec!["backend"]);
        assert_eq!(filters.domains, vec!["tech"]);
        assert_eq!(filters.tags[0], "payments");
        assert!(filters.tags.contains(&"refunds".to_string()));
        assert!(filters.tags.contains(&"merchants".to_string()));
        // No multi-word phrases in filter tags.
        assert!(filters.tags.iter().all(|t| !t.contains(' ')));
    }
}
