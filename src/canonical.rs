//! Canonical section keys and the synonym table that reconciles
//! differently-titled sections across templates and reference documents.

use serde::{Deserialize, Serialize};

/// Fixed vocabulary of section topics. Declaration order matters: when a
/// title matches synonyms of more than one key, the first declared key wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalKey {
    Overview,
    Architecture,
    Interfaces,
    Deployment,
    Testing,
    Operations,
    Data,
    Security,
    Risks,
    Kpis,
    Personas,
    Tutorials,
    Tooling,
    Governance,
}

impl CanonicalKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            CanonicalKey::Overview => "overview",
            CanonicalKey::Architecture => "architecture",
            CanonicalKey::Interfaces => "interfaces",
            CanonicalKey::Deployment => "deployment",
            CanonicalKey::Testing => "testing",
            CanonicalKey::Operations => "operations",
            CanonicalKey::Data => "data",
            CanonicalKey::Security => "security",
            CanonicalKey::Risks => "risks",
            CanonicalKey::Kpis => "kpis",
            CanonicalKey::Personas => "personas",
            CanonicalKey::Tutorials => "tutorials",
            CanonicalKey::Tooling => "tooling",
            CanonicalKey::Governance => "governance",
        }
    }
}

/// Per-key synonym substrings, lower-case, in declaration order.
/// Kept as a plain static slice so lookups stay allocation-free.
static SYNONYMS: &[(CanonicalKey, &[&str])] = &[
    (
        CanonicalKey::Overview,
        &["overview", "summary", "purpose", "introduction", "role & scope", "about this"],
    ),
    (
        CanonicalKey::Architecture,
        &["architecture", "solution", "system design", "technical design", "design", "structure"],
    ),
    (
        CanonicalKey::Interfaces,
        &["interface", "api", "contract", "endpoint", "integration point"],
    ),
    (
        CanonicalKey::Deployment,
        &["deployment", "release", "rollout", "infrastructure", "hosting", "environment"],
    ),
    (
        CanonicalKey::Testing,
        &["testing", "test strategy", "validation", "quality assurance", "qa plan"],
    ),
    (
        CanonicalKey::Operations,
        &["operations", "operational", "monitoring", "observability", "runbook", "on-call", "maintenance"],
    ),
    (
        CanonicalKey::Data,
        &["data model", "data", "schema", "storage", "persistence"],
    ),
    (
        CanonicalKey::Security,
        &["security", "authentication", "authorization", "privacy", "compliance", "threat"],
    ),
    (
        CanonicalKey::Risks,
        &["risk", "mitigation", "assumption", "concern", "failure mode"],
    ),
    (
        CanonicalKey::Kpis,
        &["kpi", "metric", "success criteria", "measure", "target"],
    ),
    (
        CanonicalKey::Personas,
        &["persona", "audience", "user profile", "stakeholder"],
    ),
    (
        CanonicalKey::Tutorials,
        &["tutorial", "how-to", "walkthrough", "getting started", "guide", "steps"],
    ),
    (
        CanonicalKey::Tooling,
        &["tooling", "tools", "tech stack", "stack", "dependencies", "libraries"],
    ),
    (
        CanonicalKey::Governance,
        &["governance", "guideline", "policy", "standard", "convention", "process"],
    ),
];

/// Map an arbitrary section title or hint string to a canonical key.
///
/// Case-insensitive substring containment; the first key in declaration
/// order with a matching synonym wins. Pure function, no side effects.
pub fn resolve_canonical(title_or_hint: &str) -> Option<CanonicalKey> {
    let haystack = title_or_hint.to_lowercase();
    if haystack.trim().is_empty() {
        return None;
    }
    for (key, syns) in SYNONYMS {
        if syns.iter().any(|s| haystack.contains(s)) {
            return Some(*key);
        }
    }
    None
}

/// Synonym substrings for a canonical key, used to seed aggregate hint sets.
pub fn synonyms(key: CanonicalKey) -> &'static [&'static str] {
    SYNONYMS
        .iter()
        .find(|(k, _)| *k == key)
        .map(|(_, syns)| *syns)
        .unwrap_or(&[])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_common_titles() {
        assert_eq!(resolve_canonical("Overview"), Some(CanonicalKey::Overview));
        assert_eq!(
            resolve_canonical("Technical Architecture"),
            Some(CanonicalKey::Architecture)
        );
        assert_eq!(
            resolve_canonical("Public API Contracts"),
            Some(CanonicalKey::Interfaces)
        );
        assert_eq!(resolve_canonical("KPIs & Metrics"), Some(CanonicalKey::Kpis));
    }

    #[test]
    fn declaration_order_breaks_ties() {
        // "Design overview" matches both Overview and Architecture synonyms;
        // Overview is declared first.
        assert_eq!(
            resolve_canonical("Design overview"),
            Some(CanonicalKey::Overview)
        );
    }

    #[test]
    fn unknown_title_resolves_to_none() {
        assert_eq!(resolve_canonical("Meeting cadence"), None);
        assert_eq!(resolve_canonical(""), None);
    }

    #[test]
    fn synonyms_round_trip() {
        for (key, syns) in SYNONYMS {
            assert!(!syns.is_empty());
            assert_eq!(synonyms(*key), *syns);
            // Every synonym must resolve back to a key at least as early
            // in declaration order as its own.
            for s in *syns {
                assert!(resolve_canonical(s).is_some(), "synonym {s} unresolved");
            }
        }
    }
}
