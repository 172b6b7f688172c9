//! Deterministic accuracy scoring for composed cards. Pure function of its
//! inputs apart from the report timestamp; downstream UI uses the score and
//! `needs_review` to flag content for a human pass.

use crate::aggregate::Coverage;
use crate::node::NodeContext;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Whether the body text came from the generative service or the fallback.
/// Independent of the numeric score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AccuracyStatus {
    Fresh,
    Fallback,
}

/// The confidence report attached to every compose result.
#[derive(Debug, Clone, Serialize)]
pub struct AccuracyReport {
    /// Integer score in [5, 100].
    pub score: u8,
    pub status: AccuracyStatus,
    /// Human-readable contributing factors, in evaluation order.
    pub factors: Vec<String>,
    pub evaluated_at: DateTime<Utc>,
    /// The generative service's self-reported confidence, when echoed.
    pub model_confidence: Option<u8>,
    pub needs_review: bool,
}

/// Everything the evaluator looks at.
#[derive(Debug, Clone, Copy)]
pub struct EvaluationInput<'a> {
    pub node: &'a NodeContext,
    pub template_matched: bool,
    pub reference_document_linked: bool,
    pub coverage: Option<&'a Coverage>,
    pub generation_succeeded: bool,
    pub used_fallback: bool,
    pub warnings: &'a [String],
    pub model_confidence: Option<u8>,
}

const BASELINE: i32 = 40;
const FLOOR: i32 = 5;
const CEILING: i32 = 100;

/// Score a compose result. Same inputs always produce the same score,
/// status, factors and flags; only `evaluated_at` moves.
pub fn evaluate(input: EvaluationInput<'_>) -> AccuracyReport {
    let mut score = BASELINE;
    let mut factors = vec![format!("baseline score {}", BASELINE)];

    let summary_len = input
        .node
        .summary
        .as_deref()
        .map(|s| s.trim().chars().count())
        .unwrap_or(0);
    let summary_bonus = match summary_len {
        0 => 0,
        1..=39 => 6,
        40..=79 => 12,
        80..=159 => 18,
        _ => 24,
    };
    if summary_bonus > 0 {
        score += summary_bonus;
        factors.push(format!(
            "node summary present ({} chars, +{})",
            summary_len, summary_bonus
        ));
    }

    let tag_count = input.node.tags.len();
    let tag_bonus = match tag_count {
        0 => 0,
        1 => 4,
        2..=4 => 8,
        _ => 12,
    };
    if tag_bonus > 0 {
        score += tag_bonus;
        factors.push(format!("{} tags (+{})", tag_count, tag_bonus));
    }

    if input.node.domain.is_some() {
        score += 6;
        factors.push("domain assigned (+6)".to_string());
    }
    if !input.node.related.is_empty() {
        score += 6;
        factors.push(format!("{} related nodes (+6)", input.node.related.len()));
    }
    if input.template_matched {
        score += 10;
        factors.push("card template matched (+10)".to_string());
    }
    if input.reference_document_linked {
        score += 8;
        factors.push("reference document linked (+8)".to_string());
    }

    let mut enhanced = false;
    if let Some(coverage) = input.coverage {
        enhanced = coverage.any_grounding();
        let ref_bonus = match coverage.sections_with_reference {
            0 => 0,
            1 => 8,
            2..=3 => 14,
            _ => 20,
        };
        if ref_bonus > 0 {
            score += ref_bonus;
            factors.push(format!(
                "{} sections grounded in reference documents (+{})",
                coverage.sections_with_reference, ref_bonus
            ));
        }
        let frag_bonus = (4 * coverage.sections_with_fragments as i32).min(10);
        if frag_bonus > 0 {
            score += frag_bonus;
            factors.push(format!(
                "{} sections enriched by fragments (+{})",
                coverage.sections_with_fragments, frag_bonus
            ));
        }
        if coverage.metadata_enriched {
            score += 4;
            factors.push("document metadata applied (+4)".to_string());
        }
        if coverage.distinct_documents >= 2 {
            score += 6;
            factors.push(format!(
                "{} distinct reference documents blended (+6)",
                coverage.distinct_documents
            ));
        }
    }

    if let Some(confidence) = input.model_confidence {
        let blended = ((score + confidence as i32) as f64 / 2.0).round() as i32;
        factors.push(format!(
            "blended with model confidence {} ({} -> {})",
            confidence, score, blended
        ));
        score = blended;
    }

    if input.used_fallback {
        let penalty = if enhanced { 8 } else { 22 };
        score -= penalty;
        factors.push(if enhanced {
            format!("fallback content enriched by retrieval (-{})", penalty)
        } else {
            format!("fallback content without retrieval grounding (-{})", penalty)
        });
    }
    if !input.warnings.is_empty() {
        let penalty = (5 * input.warnings.len() as i32).min(15);
        score -= penalty;
        factors.push(format!(
            "{} generation warnings (-{})",
            input.warnings.len(),
            penalty
        ));
    }

    // Hard caps after penalties, before the final clamp.
    if input.used_fallback {
        let cap = if enhanced { 88 } else { 75 };
        if score > cap {
            score = cap;
            factors.push(format!("capped at {} for fallback content", cap));
        }
    }
    if !input.warnings.is_empty() && score > 92 {
        score = 92;
        factors.push("capped at 92 due to warnings".to_string());
    }

    let score = score.clamp(FLOOR, CEILING) as u8;
    let needs_review = !input.warnings.is_empty() || (input.used_fallback && !enhanced);
    let status = if input.generation_succeeded {
        AccuracyStatus::Fresh
    } else {
        AccuracyStatus::Fallback
    };

    AccuracyReport {
        score,
        status,
        factors,
        evaluated_at: Utc::now(),
        model_confidence: input.model_confidence,
        needs_review,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bare_node() -> NodeContext {
        NodeContext::new("n1", "Checkout Service", "backend")
    }

    fn eval_with<'a>(
        node: &'a NodeContext,
        f: impl FnOnce(&mut EvaluationInput<'a>),
    ) -> AccuracyReport {
        let mut input = EvaluationInput {
            node,
            template_matched: false,
            reference_document_linked: false,
            coverage: None,
            generation_succeeded: true,
            used_fallback: false,
            warnings: &[],
            model_confidence: None,
        };
        f(&mut input);
        evaluate(input)
    }

    #[test]
    fn raw_fallback_is_capped_and_flagged() {
        let node = bare_node().with_domain("tech");
        let warnings = vec!["generation failed: boom".to_string()];
        let report = eval_with(&node, |i| {
            i.template_matched = true;
            i.generation_succeeded = false;
            i.used_fallback = true;
            i.warnings = &warnings;
        });
        assert_eq!(report.status, AccuracyStatus::Fallback);
        assert!(report.needs_review);
        assert!(report.score <= 75);
        assert!(report.score >= 5);
    }

    #[test]
    fn rich_context_with_model_confidence_scores_high() {
        let node = bare_node()
            .with_domain("tech")
            .with_summary("x".repeat(200))
            .with_tags((0..6).map(|i| format!("tag{}", i)).collect());
        let coverage = Coverage {
            sections_with_reference: 1,
            ..Coverage::default()
        };
        let report = eval_with(&node, |i| {
            i.template_matched = true;
            i.reference_document_linked = true;
            i.coverage = Some(&coverage);
            i.model_confidence = Some(90);
        });
        assert_eq!(report.status, AccuracyStatus::Fresh);
        assert!(!report.needs_review);
        assert!((80..=100).contains(&report.score), "score {}", report.score);
    }

    #[test]
    fn score_is_monotone_in_summary_length() {
        let lengths = [0usize, 39, 40, 79, 80, 159, 160, 400];
        let mut last = 0u8;
        for len in lengths {
            let node = if len == 0 {
                bare_node()
            } else {
                bare_node().with_summary("x".repeat(len))
            };
            let report = eval_with(&node, |_| {});
            assert!(
                report.score >= last,
                "score dropped from {} to {} at summary length {}",
                last,
                report.score,
                len
            );
            last = report.score;
        }
    }

    #[test]
    fn enhanced_fallback_is_trusted_more_than_raw() {
        let node = bare_node()
            .with_summary("x".repeat(200))
            .with_tags(vec!["a".into(), "b".into(), "c".into(), "d".into(), "e".into()])
            .with_domain("tech");
        let coverage = Coverage {
            sections_with_reference: 4,
            sections_with_fragments: 2,
            metadata_enriched: true,
            distinct_documents: 2,
        };
        let enhanced = eval_with(&node, |i| {
            i.template_matched = true;
            i.reference_document_linked = true;
            i.coverage = Some(&coverage);
            i.generation_succeeded = false;
            i.used_fallback = true;
        });
        let raw = eval_with(&node, |i| {
            i.template_matched = true;
            i.generation_succeeded = false;
            i.used_fallback = true;
        });
        assert!(enhanced.score > raw.score);
        assert!(enhanced.score <= 88);
        assert!(raw.score <= 75);
        // Enriched fallback with no warnings does not force review.
        assert!(!enhanced.needs_review);
        assert!(raw.needs_review);
    }

    #[test]
    fn warnings_cap_applies_even_to_fresh_output() {
        let node = bare_node()
            .with_summary("x".repeat(200))
            .with_tags((0..6).map(|i| format!("t{}", i)).collect())
            .with_domain("tech");
        let warnings = vec!["model omitted section 'Risks'".to_string()];
        let coverage = Coverage {
            sections_with_reference: 4,
            sections_with_fragments: 3,
            metadata_enriched: true,
            distinct_documents: 3,
        };
        let report = eval_with(&node, |i| {
            i.template_matched = true;
            i.reference_document_linked = true;
            i.coverage = Some(&coverage);
            i.model_confidence = Some(100);
            i.warnings = &warnings;
        });
        assert!(report.score <= 92);
        assert!(report.needs_review);
        assert_eq!(report.status, AccuracyStatus::Fresh);
    }

    #[test]
    fn score_never_leaves_bounds() {
        let node = bare_node();
        let warnings: Vec<String> = (0..10).map(|i| format!("w{}", i)).collect();
        let report = eval_with(&node, |i| {
            i.generation_succeeded = false;
            i.used_fallback = true;
            i.warnings = &warnings;
        });
        assert!(report.score >= 5);

        let rich = bare_node()
            .with_summary("x".repeat(500))
            .with_tags((0..9).map(|i| format!("t{}", i)).collect())
            .with_domain("tech");
        let coverage = Coverage {
            sections_with_reference: 9,
            sections_with_fragments: 9,
            metadata_enriched: true,
            distinct_documents: 5,
        };
        let report = eval_with(&rich, |i| {
            i.template_matched = true;
            i.reference_document_linked = true;
            i.coverage = Some(&coverage);
            i.model_confidence = Some(100);
        });
        assert!(report.score <= 100);
    }
}
