//! Section aggregation: the greedy nearest-bucket classifier that merges
//! template slots, reference-document sections, typed fragments and document
//! metadata into one working aggregate per final section.
//!
//! Determinism contract: identical inputs produce byte-identical rendered
//! sections and checklist. Keyword sets are BTreeSets and everything else
//! stays in insertion order, so no hash-map iteration can leak into output.

use crate::canonical::{CanonicalKey, resolve_canonical, synonyms};
use crate::catalogue::{CardTemplate, card_kind_hint};
use crate::fragments::ContentFragment;
use crate::knowledge::ReferenceDocument;
use crate::node::NodeContext;
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::debug;
use unicode_normalization::UnicodeNormalization;

/// How many top-ranked documents contribute sections.
pub const TOP_DOCUMENTS: usize = 3;

/// Where a contribution came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    ExistingDraft,
    ReferenceDocument,
    Fragment,
    Metadata,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::ExistingDraft => "existing_draft",
            SourceKind::ReferenceDocument => "reference_document",
            SourceKind::Fragment => "fragment",
            SourceKind::Metadata => "metadata",
        }
    }
}

/// One body of text routed into an aggregate, with provenance.
#[derive(Debug, Clone)]
pub struct Contribution {
    pub body: String,
    pub source: SourceKind,
    pub origin: String,
}

/// Engine-internal working bucket for one final section.
#[derive(Debug)]
pub struct SectionAggregate {
    pub title: String,
    pub description: Option<String>,
    pub canonical: Option<CanonicalKey>,
    pub hints: BTreeSet<String>,
    pub keywords: BTreeSet<String>,
    pub contributions: Vec<Contribution>,
}

impl SectionAggregate {
    fn reference_count(&self) -> usize {
        self.contributions
            .iter()
            .filter(|c| c.source == SourceKind::ReferenceDocument)
            .count()
    }

    fn has_source(&self, source: SourceKind) -> bool {
        self.contributions.iter().any(|c| c.source == source)
    }
}

/// A section body already drafted by the author in a prior editing session.
#[derive(Debug, Clone)]
pub struct ExistingSection {
    pub title: String,
    pub body: String,
}

/// Aggregated plan for one section, ready for the drafting client.
#[derive(Debug, Clone, Serialize)]
pub struct SectionPlan {
    pub title: String,
    pub description: Option<String>,
    /// Rendered merge of all contributions, may be empty when nothing matched.
    pub body: String,
    /// Verbatim author-drafted body for this slot, when one existed.
    pub existing_body: Option<String>,
}

/// Counters describing how much retrieved evidence actually landed.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Coverage {
    pub sections_with_reference: usize,
    pub sections_with_fragments: usize,
    pub metadata_enriched: bool,
    pub distinct_documents: usize,
}

impl Coverage {
    /// True when any retrieved content made it into a section.
    pub fn any_grounding(&self) -> bool {
        self.sections_with_reference > 0
            || self.sections_with_fragments > 0
            || self.metadata_enriched
    }
}

/// Output of one aggregation pass.
#[derive(Debug)]
pub struct AggregateOutcome {
    pub plans: Vec<SectionPlan>,
    pub checklist: Vec<String>,
    pub coverage: Coverage,
    /// (id, name) of every document that contributed, in first-use order.
    pub documents_used: Vec<(String, String)>,
    /// (id, type tag) of every fragment that contributed, in first-use order.
    pub fragments_used: Vec<(String, &'static str)>,
}

/// Routing candidate derived from a doc section, fragment or metadata list.
struct Candidate {
    canonical: Option<CanonicalKey>,
    key_str: Option<String>,
    keywords: BTreeSet<String>,
    /// Title used if this candidate has to open a new aggregate.
    seed_title: String,
}

/// Normalize text into scoring tokens: NFKC, lower-case, strip
/// non-alphanumerics, keep tokens longer than 2 chars, plus the full
/// lower-cased phrase.
pub(crate) fn keyword_tokens(text: &str) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    let lowered: String = text.nfkc().collect::<String>().to_lowercase();
    let stripped: String = lowered
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    for tok in stripped.split_whitespace() {
        if tok.chars().count() > 2 {
            out.insert(tok.to_string());
        }
    }
    let phrase = lowered.trim().to_string();
    if !phrase.is_empty() {
        out.insert(phrase);
    }
    out
}

/// Normalized blake3 signature used to drop duplicate contributions.
fn contribution_signature(source: SourceKind, body: &str) -> String {
    let normalized = body
        .trim()
        .nfkc()
        .collect::<String>()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    let mut hasher = blake3::Hasher::new();
    hasher.update(source.as_str().as_bytes());
    hasher.update(b"|");
    hasher.update(normalized.as_bytes());
    hasher.finalize().to_hex().to_string()
}

fn score(agg: &SectionAggregate, cand: &Candidate) -> i32 {
    let mut s = 0i32;
    if let (Some(a), Some(c)) = (agg.canonical, cand.canonical)
        && a == c
    {
        s += 12;
    }
    if let Some(key) = &cand.key_str {
        if agg.hints.contains(key) {
            s += 6;
        }
        if agg.keywords.contains(key) {
            s += 2;
        }
    }
    let shared = agg.keywords.intersection(&cand.keywords).count();
    s += 2 * shared.min(3) as i32;
    let refs = agg.reference_count();
    if refs == 0 {
        s += 2;
    } else {
        s -= refs as i32;
    }
    s
}

fn new_aggregate_from(cand: &Candidate) -> SectionAggregate {
    let mut hints = BTreeSet::new();
    if let Some(key) = cand.canonical {
        hints.insert(key.as_str().to_string());
        for s in synonyms(key) {
            hints.insert(s.to_string());
        }
    }
    SectionAggregate {
        title: cand.seed_title.clone(),
        description: None,
        canonical: cand.canonical,
        hints,
        keywords: cand.keywords.clone(),
        contributions: Vec::new(),
    }
}

/// Route one contribution to its best-scoring aggregate, opening a new
/// aggregate when nothing scores positively and the pool already has bodies.
fn route(aggregates: &mut Vec<SectionAggregate>, cand: Candidate, contribution: Contribution) {
    if aggregates.is_empty() {
        let mut agg = new_aggregate_from(&cand);
        agg.contributions.push(contribution);
        aggregates.push(agg);
        return;
    }

    let mut best_idx = 0usize;
    let mut best_score = i32::MIN;
    for (idx, agg) in aggregates.iter().enumerate() {
        let s = score(agg, &cand);
        if s > best_score {
            best_score = s;
            best_idx = idx;
        }
    }

    let pool_has_bodies = aggregates.iter().any(|a| !a.contributions.is_empty());
    // One aggregate per canonical topic: never open a second bucket for a
    // topic that already has one.
    let topic_taken = cand
        .canonical
        .is_some_and(|c| aggregates.iter().any(|a| a.canonical == Some(c)));

    if best_score <= 0 && pool_has_bodies && !topic_taken {
        debug!(
            title = %cand.seed_title,
            best_score,
            "no aggregate scored positively; opening a new section"
        );
        let mut agg = new_aggregate_from(&cand);
        agg.contributions.push(contribution);
        aggregates.push(agg);
    } else {
        aggregates[best_idx].contributions.push(contribution);
    }
}

/// Merge checklists as a stable set union: first appearance wins, compared
/// case-insensitively on collapsed whitespace.
fn merge_checklists(sources: &[&[String]]) -> Vec<String> {
    let mut seen: BTreeSet<String> = BTreeSet::new();
    let mut out = Vec::new();
    for source in sources {
        for item in *source {
            let norm = item.trim().to_lowercase();
            let norm = norm.split_whitespace().collect::<Vec<_>>().join(" ");
            if norm.is_empty() || seen.contains(&norm) {
                continue;
            }
            seen.insert(norm);
            out.push(item.trim().to_string());
        }
    }
    out
}

/// Run the full aggregation pass for one compose call.
pub fn aggregate(
    node: &NodeContext,
    template: Option<&CardTemplate>,
    existing_sections: &[ExistingSection],
    existing_checklist: &[String],
    documents: &[ReferenceDocument],
    fragments: &[ContentFragment],
    top_documents: usize,
) -> AggregateOutcome {
    let mut aggregates: Vec<SectionAggregate> = Vec::new();
    let mut documents_used: Vec<(String, String)> = Vec::new();
    let mut fragments_used: Vec<(String, &'static str)> = Vec::new();

    // Intent tokens feed every slot's keyword set.
    let mut intent_keywords = BTreeSet::new();
    for phrase in node.intent_phrases() {
        intent_keywords.extend(keyword_tokens(phrase));
    }

    // Step 1: seed one aggregate per template slot.
    if let Some(template) = template {
        for spec in &template.sections {
            let canonical = resolve_canonical(&spec.title)
                .or_else(|| spec.description.as_deref().and_then(resolve_canonical))
                .or_else(|| card_kind_hint(&template.id, &spec.title));
            let mut hints = BTreeSet::new();
            if let Some(key) = canonical {
                hints.insert(key.as_str().to_string());
                for s in synonyms(key) {
                    hints.insert(s.to_string());
                }
            }
            let mut keywords = keyword_tokens(&spec.title);
            if let Some(desc) = &spec.description {
                keywords.extend(keyword_tokens(desc));
            }
            for hint in &hints {
                keywords.extend(keyword_tokens(hint));
            }
            keywords.extend(intent_keywords.iter().cloned());

            let mut agg = SectionAggregate {
                title: spec.title.clone(),
                description: spec.description.clone(),
                canonical,
                hints,
                keywords,
                contributions: Vec::new(),
            };
            // Author edits are never discarded, only supplemented.
            if let Some(existing) = existing_sections
                .iter()
                .find(|e| e.title.eq_ignore_ascii_case(&spec.title))
                && !existing.body.trim().is_empty()
            {
                agg.contributions.push(Contribution {
                    body: existing.body.clone(),
                    source: SourceKind::ExistingDraft,
                    origin: "author-draft".to_string(),
                });
            }
            aggregates.push(agg);
        }
    }

    // Step 2: reference-document sections from the top-ranked documents.
    let mut seen_doc_ids = BTreeSet::new();
    let top_docs: Vec<&ReferenceDocument> = documents
        .iter()
        .filter(|d| seen_doc_ids.insert(d.id.clone()))
        .take(top_documents.max(1))
        .collect();

    for doc in &top_docs {
        for section in &doc.sections {
            if section.body.trim().is_empty() {
                continue;
            }
            let key_str = section
                .key
                .as_deref()
                .map(|k| k.trim().to_lowercase())
                .filter(|k| !k.is_empty());
            let canonical = key_str
                .as_deref()
                .and_then(resolve_canonical)
                .or_else(|| resolve_canonical(&section.title));
            let mut keywords = keyword_tokens(&section.title);
            if let Some(k) = &key_str {
                keywords.extend(keyword_tokens(k));
            }
            let cand = Candidate {
                canonical,
                key_str: key_str.or_else(|| Some(section.title.trim().to_lowercase())),
                keywords,
                seed_title: section.title.clone(),
            };
            let contribution = Contribution {
                body: format!("**{}:**\n{}", doc.name, section.body.trim()),
                source: SourceKind::ReferenceDocument,
                origin: format!("{}/{}", doc.id, section.title),
            };
            route(&mut aggregates, cand, contribution);
            if !documents_used.iter().any(|(id, _)| id == &doc.id) {
                documents_used.push((doc.id.clone(), doc.name.clone()));
            }
        }
    }

    // Step 3: typed fragments. Acceptance criteria only ever feed the
    // checklist; everything else renders to markdown and routes like a
    // document section, with the type tag as its canonical hint.
    let mut fragment_checklist: Vec<String> = Vec::new();
    for frag in fragments {
        let items = frag.checklist_items();
        if !items.is_empty() {
            fragment_checklist.extend(items.iter().cloned());
            fragments_used.push((frag.id.clone(), frag.type_tag()));
            continue;
        }
        let Some(md) = frag.render_markdown() else {
            continue;
        };
        let canonical = frag.canonical_hint();
        let mut keywords = keyword_tokens(&frag.keyword_text());
        keywords.insert(frag.type_tag().to_string());
        let seed_title = canonical
            .map(|k| title_case(k.as_str()))
            .unwrap_or_else(|| title_case(&frag.type_tag().replace('_', " ")));
        let cand = Candidate {
            canonical,
            key_str: Some(frag.type_tag().to_string()),
            keywords,
            seed_title,
        };
        let contribution = Contribution {
            body: md,
            source: SourceKind::Fragment,
            origin: format!("{}:{}", frag.id, frag.type_tag()),
        };
        route(&mut aggregates, cand, contribution);
        fragments_used.push((frag.id.clone(), frag.type_tag()));
    }

    // Step 4: metadata enrichment from the top-ranked document.
    let mut metadata_enriched = false;
    if let Some(top) = top_docs.first() {
        let metadata: [(&[String], &str, CanonicalKey, bool); 4] = [
            (&top.tags, "Related tags", CanonicalKey::Overview, true),
            (
                &top.tech_keywords,
                "Technology keywords",
                CanonicalKey::Architecture,
                true,
            ),
            (
                &top.risk_profile,
                "Known risk profile",
                CanonicalKey::Risks,
                false,
            ),
            (&top.kpi_examples, "Example KPIs", CanonicalKey::Kpis, false),
        ];
        for (items, label, key, inline) in metadata {
            if items.is_empty() {
                continue;
            }
            let body = if inline {
                format!("**{}:** {}", label, items.join(", "))
            } else {
                let bullets: String = items.iter().map(|i| format!("- {}\n", i)).collect();
                format!("**{}:**\n{}", label, bullets.trim_end())
            };
            let cand = Candidate {
                canonical: Some(key),
                key_str: None,
                keywords: keyword_tokens(&items.join(" ")),
                seed_title: title_case(key.as_str()),
            };
            route(
                &mut aggregates,
                cand,
                Contribution {
                    body,
                    source: SourceKind::Metadata,
                    origin: top.id.clone(),
                },
            );
            metadata_enriched = true;
        }
    }

    // Step 5: render each aggregate, deduplicating by signature and joining
    // blended contributions with a horizontal rule.
    let mut plans = Vec::with_capacity(aggregates.len());
    let mut coverage = Coverage {
        metadata_enriched,
        distinct_documents: documents_used.len(),
        ..Coverage::default()
    };
    for agg in &aggregates {
        let mut seen = BTreeSet::new();
        let mut bodies: Vec<&str> = Vec::new();
        for c in &agg.contributions {
            let sig = contribution_signature(c.source, &c.body);
            if seen.insert(sig) {
                bodies.push(c.body.trim());
            }
        }
        let body = if bodies.len() >= 2 {
            bodies.join("\n\n---\n\n")
        } else {
            bodies.first().map(|b| b.to_string()).unwrap_or_default()
        };
        if agg.has_source(SourceKind::ReferenceDocument) {
            coverage.sections_with_reference += 1;
        }
        if agg.has_source(SourceKind::Fragment) {
            coverage.sections_with_fragments += 1;
        }
        plans.push(SectionPlan {
            title: agg.title.clone(),
            description: agg.description.clone(),
            body,
            existing_body: agg
                .contributions
                .iter()
                .find(|c| c.source == SourceKind::ExistingDraft)
                .map(|c| c.body.clone()),
        });
    }

    // Step 6: checklist union, first appearance wins.
    let template_checklist: &[String] = template.map(|t| t.default_checklist.as_slice()).unwrap_or(&[]);
    let checklist = merge_checklists(&[
        existing_checklist,
        template_checklist,
        &fragment_checklist,
    ]);

    debug!(
        sections = plans.len(),
        with_reference = coverage.sections_with_reference,
        with_fragments = coverage.sections_with_fragments,
        documents = coverage.distinct_documents,
        "aggregation complete"
    );

    AggregateOutcome {
        plans,
        checklist,
        coverage,
        documents_used,
        fragments_used,
    }
}

fn title_case(text: &str) -> String {
    text.split_whitespace()
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
