//! Deterministic fallback composition: when the generative service fails or
//! is unavailable, section bodies are synthesized here from the aggregated
//! draft, title-matched reference sections, and fixed skeletons keyed on
//! section-title keywords. No randomness, no wall clock.

use crate::aggregate::SectionPlan;
use crate::knowledge::ReferenceDocument;
use crate::node::NodeContext;
use strsim::jaro_winkler;

/// Minimum Jaro-Winkler similarity for the last-resort title match.
const FUZZY_TITLE_THRESHOLD: f64 = 0.88;

/// Compose a fallback body for one section plan.
///
/// Preference ladder: aggregated/existing body, then a reference-document
/// section matched by title, then the keyword-keyed scaffold. The result
/// always opens with a sentence naming the node.
pub fn fallback_body(
    plan: &SectionPlan,
    node: &NodeContext,
    documents: &[ReferenceDocument],
) -> String {
    let body = if !plan.body.trim().is_empty() {
        plan.body.trim().to_string()
    } else if let Some(matched) = match_reference_section(&plan.title, documents) {
        matched
    } else {
        scaffold_body(&plan.title, node)
    };
    ensure_lead_in(&body, node)
}

/// Title-match ladder against reference-document sections:
/// exact, then substring, then superstring (all case-insensitive), then
/// Jaro-Winkler as a last resort.
pub fn match_reference_section(title: &str, documents: &[ReferenceDocument]) -> Option<String> {
    let wanted = title.trim().to_lowercase();
    if wanted.is_empty() {
        return None;
    }
    let sections = documents
        .iter()
        .flat_map(|d| d.sections.iter())
        .filter(|s| !s.body.trim().is_empty());

    let mut fuzzy_best: Option<(f64, String)> = None;
    for section in sections {
        let candidate = section.title.trim().to_lowercase();
        if candidate == wanted || candidate.contains(&wanted) || wanted.contains(&candidate) {
            return Some(section.body.trim().to_string());
        }
        let score = jaro_winkler(&candidate, &wanted);
        if score >= FUZZY_TITLE_THRESHOLD
            && fuzzy_best.as_ref().is_none_or(|(best, _)| score > *best)
        {
            fuzzy_best = Some((score, section.body.trim().to_string()));
        }
    }
    fuzzy_best.map(|(_, body)| body)
}

/// Guarantee the first rendered sentence names the node; otherwise prepend a
/// node-specific lead-in built from type, domain, tags and primary risk.
pub fn ensure_lead_in(body: &str, node: &NodeContext) -> String {
    let first = first_sentence(body);
    if first.to_lowercase().contains(&node.label.to_lowercase()) {
        return body.trim().to_string();
    }
    let mut lead = format!("{} is a {} node", node.label, node.node_type);
    if let Some(domain) = &node.domain {
        lead.push_str(&format!(" in the {} domain", domain));
    }
    if !node.tags.is_empty() {
        lead.push_str(&format!(" (tagged: {})", node.tags.join(", ")));
    }
    lead.push('.');
    if let Some(risk) = node
        .intent
        .as_ref()
        .and_then(|i| i.primary_risk.as_deref())
        .filter(|r| !r.trim().is_empty())
    {
        lead.push_str(&format!(" Primary risk to manage: {}.", risk.trim()));
    }
    format!("{}\n\n{}", lead, body.trim())
}

fn first_sentence(body: &str) -> &str {
    let end = body.find('.').map(|i| i + 1).unwrap_or(body.len());
    &body[..end]
}

/// Hand-composed skeleton keyed on section-title keywords, extended with an
/// intent-classification block when the node carries a matching tag.
pub fn scaffold_body(title: &str, node: &NodeContext) -> String {
    let lower = title.to_lowercase();
    let label = &node.label;
    let domain_clause = node
        .domain
        .as_deref()
        .map(|d| format!(" within the {} domain", d))
        .unwrap_or_default();

    let mut body = if lower.contains("overview") || lower.contains("summary") {
        format!(
            "**Role & Scope**\n{label} is the {kind} responsible for this part of the blueprint{domain_clause}. \
             Describe what it owns, what it explicitly does not own, and who depends on it.\n\n\
             **Key Outcomes**\n- The single result {label} must make true\n- How neighbors observe that result\n- What changes for users when it ships",
            kind = node.node_type,
        )
    } else if lower.contains("architecture") || lower.contains("design") {
        if is_ui_node(&node.node_type) {
            format!(
                "{label} composes smaller presentational pieces into one user-facing surface{domain_clause}.\n\n\
                 **Composition**\n- Child components and what each renders\n- State owned locally vs. lifted to callers\n- Visual states: empty, loading, error, populated\n\n\
                 **Data flow**\n- Where props enter and events exit\n- Derived state and when it recomputes"
            )
        } else {
            format!(
                "{label} is a {kind} with a small set of clear responsibilities{domain_clause}.\n\n\
                 **Responsibilities**\n- Core operations {label} performs\n- Invariants it must uphold\n- Work it delegates to neighbors\n\n\
                 **Shape**\n- Entry points and the request path through them\n- Internal modules and why they are separate",
                kind = node.node_type,
            )
        }
    } else if lower.contains("interface") {
        format!(
            "{label} exposes a deliberately narrow surface{domain_clause}.\n\n\
             **Consumers**\n- Who calls {label} and for what\n- Expectations each consumer holds\n\n\
             **Contract**\n- Inputs, outputs and error behavior\n- Versioning and backward-compatibility stance"
        )
    } else if lower.contains("dependenc") {
        format!(
            "{label} sits between upstream providers and downstream consumers{domain_clause}.\n\n\
             **Upstream**\n- Services or data {label} requires to function\n- Behavior when an upstream is degraded\n\n\
             **Downstream**\n- Who breaks if {label} breaks\n- Signals consumers should watch"
        )
    } else if lower.contains("testing") || lower.contains("validation") {
        format!(
            "{label} earns trust through layered verification{domain_clause}.\n\n\
             **Quality strategy**\n- Unit coverage for core logic\n- Contract tests at each interface\n- One end-to-end path proving the main flow\n\n\
             **Monitoring**\n- Signals that confirm healthy behavior in production\n- Alerts that page a human"
        )
    } else if lower.contains("roadmap") || lower.contains("backlog") {
        format!(
            "{label} moves forward in deliberately small increments{domain_clause}.\n\n\
             **Deliverables**\n- The next shippable slice\n- What is explicitly deferred\n\n\
             **Risks to the plan**\n- Dependencies that could slip\n- Decisions still open"
        )
    } else {
        format!(
            "{label} needs concrete, actionable guidance here{domain_clause}.\n\n\
             - State the goal of this section in one sentence\n\
             - List the decisions already made and their rationale\n\
             - Name the open questions blocking progress\n\
             - Identify who must be consulted before this changes"
        )
    };

    if let Some(block) = intent_block(node) {
        body.push_str("\n\n");
        body.push_str(&block);
    }
    body
}

fn is_ui_node(node_type: &str) -> bool {
    let t = node_type.to_lowercase();
    ["frontend", "ui", "component", "page", "view", "web"]
        .iter()
        .any(|k| t.contains(k))
}

/// Intent-classification-specific extension: persona snapshot, outcome
/// guardrails, launch commitments, or primary-risk explanation.
fn intent_block(node: &NodeContext) -> Option<String> {
    let intent = node.intent.as_ref()?;
    let class = intent.classification.as_deref()?.to_lowercase();
    if class.contains("persona") || class.contains("audience") {
        let audience = intent.primary_audience.as_deref().unwrap_or("the primary audience");
        Some(format!(
            "**Persona snapshot**\nBuilt for {}. Keep their vocabulary, constraints and success criteria in view when filling this in.",
            audience
        ))
    } else if class.contains("outcome") {
        let outcome = intent.core_outcome.as_deref().unwrap_or("the core outcome");
        Some(format!(
            "**Outcome guardrails**\nEvery decision recorded here should trace back to: {}.",
            outcome
        ))
    } else if class.contains("launch") {
        let scope = intent.launch_scope.as_deref().unwrap_or("the launch scope");
        Some(format!(
            "**Launch commitments**\nFirst release is bounded to: {}. Anything beyond that belongs in a follow-up.",
            scope
        ))
    } else if class.contains("risk") {
        let risk = intent.primary_risk.as_deref().unwrap_or("the primary risk");
        Some(format!(
            "**Primary risk**\nThe riskiest assumption is: {}. Note the cheapest experiment that would confirm or kill it.",
            risk
        ))
    } else {
        None
    }
}
