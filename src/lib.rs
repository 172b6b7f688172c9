//! cardwright: knowledge-base-augmented card composition for blueprint nodes.
//!
//! Given a graph node and a card template, the engine retrieves prior-art
//! reference documents and reusable content fragments, reconciles them into a
//! canonical section structure, asks a generative service for polished
//! section bodies (falling back to a deterministic scaffold when it fails),
//! and attaches a reproducible accuracy report so downstream UI knows how
//! much to trust the result.
//!
//! The entry point is [`engine::ComposeEngine::compose`]; it never returns an
//! error for the drafting path. The components that legitimately raise are
//! configuration loading in [`config`] and the embedding utility in
//! [`embeddings`].

pub mod accuracy;
pub mod aggregate;
pub mod canonical;
pub mod catalogue;
pub mod config;
pub mod drafting;
pub mod embeddings;
pub mod engine;
pub mod error;
pub mod fragments;
pub mod knowledge;
pub mod node;
pub mod scaffold;

pub use accuracy::{AccuracyReport, AccuracyStatus};
pub use aggregate::{Coverage, ExistingSection, SectionPlan, SourceKind};
pub use canonical::{CanonicalKey, resolve_canonical};
pub use catalogue::{CardTemplate, SectionSpec, get_card_template};
pub use config::Config;
pub use drafting::{CompletionClient, CompletionOutput, DraftingClient, create_completion_client};
pub use embeddings::{Embedder, FakeEmbedder, HttpEmbedder, cosine_similarity, create_embedder};
pub use engine::{ComposeEngine, ComposeRequest, ComposeResult, Provenance, RenderedSection};
pub use error::{CardwrightError, Result};
pub use fragments::{ContentFragment, FragmentPayload};
pub use knowledge::{
    DocSection, DocumentStore, InMemoryDocumentStore, InMemoryKnowledge, KnowledgeSource,
    RankedCandidate, ReferenceDocument, RetrievalFilters, RetrievalOutcome,
};
pub use node::{NodeContext, NodeIntent, RelatedNode};
