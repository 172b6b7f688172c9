//! Static registry of card templates. Pure lookup, no logic beyond the
//! per-card-kind canonical hints consulted when a section title and
//! description both fail to resolve.

use crate::canonical::CanonicalKey;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// One declared section slot in a card template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectionSpec {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl SectionSpec {
    pub fn new(title: &str, description: &str) -> Self {
        Self {
            title: title.to_string(),
            description: Some(description.to_string()),
        }
    }
}

/// A card template: ordered section slots, a default checklist, and the
/// reference documents worth trying to resolve for this card kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CardTemplate {
    pub id: String,
    pub label: String,
    pub sections: Vec<SectionSpec>,
    #[serde(default)]
    pub default_checklist: Vec<String>,
    #[serde(default)]
    pub suggested_documents: Vec<String>,
}

/// Canonical hints per card kind, matched by substring against a slot title
/// after title and description resolution both came up empty.
static CARD_KIND_HINTS: &[(&str, &[(&str, CanonicalKey)])] = &[
    (
        "backend-service",
        &[
            ("scaling", CanonicalKey::Operations),
            ("slo", CanonicalKey::Kpis),
            ("error budget", CanonicalKey::Kpis),
            ("failure", CanonicalKey::Risks),
        ],
    ),
    (
        "ui-component",
        &[
            ("states", CanonicalKey::Interfaces),
            ("props", CanonicalKey::Interfaces),
            ("accessibility", CanonicalKey::Testing),
        ],
    ),
    (
        "data-pipeline",
        &[
            ("lineage", CanonicalKey::Data),
            ("backfill", CanonicalKey::Operations),
            ("freshness", CanonicalKey::Kpis),
        ],
    ),
    (
        "integration",
        &[
            ("partner", CanonicalKey::Interfaces),
            ("sandbox", CanonicalKey::Testing),
            ("webhook", CanonicalKey::Interfaces),
        ],
    ),
    (
        "product-brief",
        &[
            ("north star", CanonicalKey::Kpis),
            ("launch", CanonicalKey::Deployment),
            ("who is this for", CanonicalKey::Personas),
        ],
    ),
];

/// Resolve a canonical key from the per-card-kind hint table.
pub fn card_kind_hint(template_id: &str, slot_title: &str) -> Option<CanonicalKey> {
    let title = slot_title.to_lowercase();
    CARD_KIND_HINTS
        .iter()
        .find(|(kind, _)| *kind == template_id)
        .and_then(|(_, hints)| {
            hints
                .iter()
                .find(|(needle, _)| title.contains(needle))
                .map(|(_, key)| *key)
        })
}

static CATALOGUE: Lazy<Vec<CardTemplate>> = Lazy::new(built_in_templates);

/// Look up a card template by id. Read-only, no network.
pub fn get_card_template(template_id: &str) -> Option<&'static CardTemplate> {
    CATALOGUE.iter().find(|t| t.id == template_id)
}

/// All registered templates, in declaration order.
pub fn all_templates() -> &'static [CardTemplate] {
    &CATALOGUE
}

fn built_in_templates() -> Vec<CardTemplate> {
    vec![
        CardTemplate {
            id: "backend-service".into(),
            label: "Backend Service".into(),
            sections: vec![
                SectionSpec::new("Overview", "What this service owns and why it exists"),
                SectionSpec::new("Architecture", "Internal structure, key modules, data flow"),
                SectionSpec::new("Interfaces", "APIs exposed and contracts consumed"),
                SectionSpec::new("Data", "Persistence, schemas, retention"),
                SectionSpec::new("Testing", "Quality strategy and validation approach"),
                SectionSpec::new("Operations", "Monitoring, alerting, runbook pointers"),
                SectionSpec::new("Risks", "Known failure modes and mitigations"),
            ],
            default_checklist: vec![
                "API contract reviewed with consumers".into(),
                "Health and readiness endpoints defined".into(),
                "Alert thresholds agreed with on-call".into(),
            ],
            suggested_documents: vec!["prd-service-baseline".into(), "prd-platform-core".into()],
        },
        CardTemplate {
            id: "ui-component".into(),
            label: "UI Component".into(),
            sections: vec![
                SectionSpec::new("Overview", "Purpose of the component and where it renders"),
                SectionSpec::new("Design", "Composition, layout and visual states"),
                SectionSpec::new("Interfaces", "Props, events and data dependencies"),
                SectionSpec::new("Accessibility & Testing", "a11y requirements and test coverage"),
            ],
            default_checklist: vec![
                "Empty, loading and error states designed".into(),
                "Keyboard navigation verified".into(),
            ],
            suggested_documents: vec!["prd-design-system".into()],
        },
        CardTemplate {
            id: "data-pipeline".into(),
            label: "Data Pipeline".into(),
            sections: vec![
                SectionSpec::new("Overview", "Sources, sinks and the transformation purpose"),
                SectionSpec::new("Architecture", "Stages, orchestration and scheduling"),
                SectionSpec::new("Data", "Schemas, lineage and quality checks"),
                SectionSpec::new("Operations", "Backfill strategy, monitoring, SLAs"),
                SectionSpec::new("Risks", "Failure modes and data-loss mitigations"),
            ],
            default_checklist: vec![
                "Schema contracts versioned".into(),
                "Backfill procedure documented".into(),
                "Freshness SLA agreed with consumers".into(),
            ],
            suggested_documents: vec!["prd-data-platform".into()],
        },
        CardTemplate {
            id: "integration".into(),
            label: "Third-Party Integration".into(),
            sections: vec![
                SectionSpec::new("Overview", "What the integration provides and for whom"),
                SectionSpec::new("Interfaces", "Partner endpoints, auth, webhooks"),
                SectionSpec::new("Deployment", "Environments, credentials, sandbox vs production"),
                SectionSpec::new("Testing", "Sandbox validation and contract tests"),
                SectionSpec::new("Risks", "Partner availability and versioning risks"),
            ],
            default_checklist: vec![
                "Sandbox credentials provisioned".into(),
                "Rate limits and quotas documented".into(),
                "Fallback behavior on partner outage defined".into(),
            ],
            suggested_documents: vec!["prd-partner-integrations".into()],
        },
        CardTemplate {
            id: "product-brief".into(),
            label: "Product Brief".into(),
            sections: vec![
                SectionSpec::new("Overview", "The idea, the problem and the opportunity"),
                SectionSpec::new("Personas", "Who this is for and what they need"),
                SectionSpec::new("KPIs", "Success metrics and the north-star measure"),
                SectionSpec::new("Launch Scope", "What ships first and what waits"),
                SectionSpec::new("Risks", "Biggest bets and how to de-risk them"),
            ],
            default_checklist: vec![
                "Primary audience validated".into(),
                "North-star metric agreed".into(),
            ],
            suggested_documents: vec!["prd-product-briefs".into()],
        },
    ]
}
