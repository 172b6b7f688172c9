//! Typed reusable content fragments and their markdown renderers.
//!
//! Fragments arrive from retrieval with a `type` discriminator from a fixed
//! vocabulary; each variant knows how to render its payload into markdown and
//! which canonical topic it favors when routed into a section aggregate.

use crate::canonical::CanonicalKey;
use serde::{Deserialize, Serialize};

/// A retrieved reusable content fragment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentFragment {
    pub id: String,
    #[serde(flatten)]
    pub payload: FragmentPayload,
}

/// Fixed fragment vocabulary, tagged on the wire by `type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FragmentPayload {
    AcceptanceCriteria {
        items: Vec<String>,
    },
    KpiSet {
        #[serde(default)]
        name: Option<String>,
        kpis: Vec<String>,
    },
    RiskMitigation {
        risk: String,
        #[serde(default)]
        impact: Option<String>,
        #[serde(default)]
        likelihood: Option<String>,
        mitigations: Vec<String>,
    },
    InterfacePattern {
        name: String,
        #[serde(default)]
        consumers: Vec<String>,
        #[serde(default)]
        contract: Option<String>,
        #[serde(default)]
        schema: Option<serde_json::Value>,
    },
    Guideline {
        #[serde(default)]
        area: Option<String>,
        rules: Vec<String>,
    },
    DecisionMatrix {
        decisions: Vec<DecisionRow>,
    },
    TemplateSkeleton {
        #[serde(default)]
        name: Option<String>,
        outline: Vec<String>,
    },
    StepList {
        #[serde(default)]
        title: Option<String>,
        steps: Vec<String>,
    },
}

/// One row of a decision matrix fragment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRow {
    pub decision: String,
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default)]
    pub rationale: Option<String>,
}

impl ContentFragment {
    /// Stable type-tag string, used for provenance and keyword routing.
    pub fn type_tag(&self) -> &'static str {
        match &self.payload {
            FragmentPayload::AcceptanceCriteria { .. } => "acceptance_criteria",
            FragmentPayload::KpiSet { .. } => "kpi_set",
            FragmentPayload::RiskMitigation { .. } => "risk_mitigation",
            FragmentPayload::InterfacePattern { .. } => "interface_pattern",
            FragmentPayload::Guideline { .. } => "guideline",
            FragmentPayload::DecisionMatrix { .. } => "decision_matrix",
            FragmentPayload::TemplateSkeleton { .. } => "template_skeleton",
            FragmentPayload::StepList { .. } => "step_list",
        }
    }

    /// Canonical topic this fragment kind favors when routed.
    pub fn canonical_hint(&self) -> Option<CanonicalKey> {
        match &self.payload {
            FragmentPayload::AcceptanceCriteria { .. } => None,
            FragmentPayload::KpiSet { .. } => Some(CanonicalKey::Kpis),
            FragmentPayload::RiskMitigation { .. } => Some(CanonicalKey::Risks),
            FragmentPayload::InterfacePattern { .. } => Some(CanonicalKey::Interfaces),
            FragmentPayload::Guideline { .. } => Some(CanonicalKey::Governance),
            FragmentPayload::DecisionMatrix { .. } => Some(CanonicalKey::Architecture),
            FragmentPayload::TemplateSkeleton { .. } => None,
            FragmentPayload::StepList { .. } => Some(CanonicalKey::Tutorials),
        }
    }

    /// Checklist items carried by this fragment, if any. Acceptance criteria
    /// feed the checklist and never a section body.
    pub fn checklist_items(&self) -> &[String] {
        match &self.payload {
            FragmentPayload::AcceptanceCriteria { items } => items,
            _ => &[],
        }
    }

    /// Free-text terms used for keyword scoring against aggregates.
    pub fn keyword_text(&self) -> String {
        match &self.payload {
            FragmentPayload::AcceptanceCriteria { items } => items.join(" "),
            FragmentPayload::KpiSet { name, kpis } => {
                format!("{} {}", name.as_deref().unwrap_or(""), kpis.join(" "))
            }
            FragmentPayload::RiskMitigation {
                risk, mitigations, ..
            } => format!("{} {}", risk, mitigations.join(" ")),
            FragmentPayload::InterfacePattern {
                name, consumers, ..
            } => format!("{} {}", name, consumers.join(" ")),
            FragmentPayload::Guideline { area, rules } => {
                format!("{} {}", area.as_deref().unwrap_or(""), rules.join(" "))
            }
            FragmentPayload::DecisionMatrix { decisions } => decisions
                .iter()
                .map(|d| d.decision.as_str())
                .collect::<Vec<_>>()
                .join(" "),
            FragmentPayload::TemplateSkeleton { name, outline } => {
                format!("{} {}", name.as_deref().unwrap_or(""), outline.join(" "))
            }
            FragmentPayload::StepList { title, steps } => {
                format!("{} {}", title.as_deref().unwrap_or(""), steps.join(" "))
            }
        }
    }

    /// Render the typed payload into markdown. Returns `None` for fragment
    /// kinds that never contribute a section body.
    pub fn render_markdown(&self) -> Option<String> {
        match &self.payload {
            FragmentPayload::AcceptanceCriteria { .. } => None,
            FragmentPayload::KpiSet { name, kpis } => {
                if kpis.is_empty() {
                    return None;
                }
                let mut out = String::new();
                if let Some(name) = name {
                    out.push_str(&format!("**KPI set:** {}\n", name));
                }
                out.push_str(&bullets(kpis));
                Some(out.trim_end().to_string())
            }
            FragmentPayload::RiskMitigation {
                risk,
                impact,
                likelihood,
                mitigations,
            } => {
                let mut out = format!("**Risk:** {}\n", risk);
                if let Some(impact) = impact {
                    out.push_str(&format!("**Impact:** {}\n", impact));
                }
                if let Some(likelihood) = likelihood {
                    out.push_str(&format!("**Likelihood:** {}\n", likelihood));
                }
                if !mitigations.is_empty() {
                    out.push_str("**Mitigations:**\n");
                    out.push_str(&bullets(mitigations));
                }
                Some(out.trim_end().to_string())
            }
            FragmentPayload::InterfacePattern {
                name,
                consumers,
                contract,
                schema,
            } => {
                let mut out = format!("**Interface:** {}\n", name);
                if !consumers.is_empty() {
                    out.push_str(&format!("**Consumers:** {}\n", consumers.join(", ")));
                }
                if let Some(contract) = contract {
                    out.push_str(&format!("**Contract:** {}\n", contract));
                }
                if let Some(schema) = schema {
                    let pretty =
                        serde_json::to_string_pretty(schema).unwrap_or_else(|_| schema.to_string());
                    out.push_str(&format!("```json\n{}\n```\n", pretty));
                }
                Some(out.trim_end().to_string())
            }
            FragmentPayload::Guideline { area, rules } => {
                if rules.is_empty() {
                    return None;
                }
                let mut out = String::new();
                if let Some(area) = area {
                    out.push_str(&format!("**Guidelines ({}):**\n", area));
                }
                out.push_str(&bullets(rules));
                Some(out.trim_end().to_string())
            }
            FragmentPayload::DecisionMatrix { decisions } => {
                if decisions.is_empty() {
                    return None;
                }
                let mut out = String::new();
                for row in decisions {
                    out.push_str(&format!("**Decision:** {}\n", row.decision));
                    if !row.options.is_empty() {
                        out.push_str(&bullets(&row.options));
                    }
                    if let Some(rationale) = &row.rationale {
                        out.push_str(&format!("**Rationale:** {}\n", rationale));
                    }
                    out.push('\n');
                }
                Some(out.trim_end().to_string())
            }
            FragmentPayload::TemplateSkeleton { name, outline } => {
                if outline.is_empty() {
                    return None;
                }
                let mut out = String::new();
                if let Some(name) = name {
                    out.push_str(&format!("**Template:** {}\n", name));
                }
                out.push_str(&bullets(outline));
                Some(out.trim_end().to_string())
            }
            FragmentPayload::StepList { title, steps } => {
                if steps.is_empty() {
                    return None;
                }
                let mut out = String::new();
                if let Some(title) = title {
                    out.push_str(&format!("**{}**\n", title));
                }
                for (i, step) in steps.iter().enumerate() {
                    out.push_str(&format!("{}. {}\n", i + 1, step));
                }
                Some(out.trim_end().to_string())
            }
        }
    }
}

fn bullets(items: &[String]) -> String {
    items
        .iter()
        .map(|i| format!("- {}\n", i))
        .collect::<String>()
}
