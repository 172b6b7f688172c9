//! Generative drafting client: builds the strict instruction + grounded user
//! message, calls a chat-style completion service under a timeout with
//! cancellation, and recovers structured output from messy model text.
//! Every failure path lands in the deterministic fallback in `scaffold`.

use crate::aggregate::SectionPlan;
use crate::config::DraftingConfig;
use crate::error::CardwrightError;
use crate::knowledge::ReferenceDocument;
use crate::node::NodeContext;
use crate::scaffold;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const SYSTEM_INSTRUCTION: &str = "You write concise, specific engineering documentation cards. \
Respond only with a JSON object of the shape \
{\"sections\":[{\"title\":\"...\",\"body\":\"...\"}],\"notes\":\"optional\",\"quality\":{\"confidence\":0-100}}. \
Cover every requested section title. Ground every claim in the provided context; never invent \
external facts. No prose outside the JSON object.";

/// Raw output of one chat-style completion call.
#[derive(Debug, Clone)]
pub struct CompletionOutput {
    pub text: String,
    pub token_usage: Option<u64>,
}

/// External generative service boundary. Implementations must honor the
/// cancellation token and return promptly once it fires.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(
        &self,
        system: &str,
        user: &str,
        cancel: &CancellationToken,
    ) -> anyhow::Result<CompletionOutput>;
}

/// OpenAI-compatible chat completion over HTTP (`<base_url>/chat/completions`,
/// bearer auth, JSON response format).
pub struct OpenAiCompletionClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiCompletionClient {
    pub fn new(base_url: String, api_key: String, model: String) -> anyhow::Result<Self> {
        use anyhow::Context;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("build http client")?;
        Ok(Self {
            client,
            base_url,
            api_key,
            model,
        })
    }
}

#[async_trait]
impl CompletionClient for OpenAiCompletionClient {
    async fn complete(
        &self,
        system: &str,
        user: &str,
        cancel: &CancellationToken,
    ) -> anyhow::Result<CompletionOutput> {
        use anyhow::{Context, anyhow};
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user}
            ],
            "temperature": 0.2,
            "response_format": {"type": "json_object"}
        });
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let send = self.client.post(&url).bearer_auth(&self.api_key).json(&body).send();
        let resp = tokio::select! {
            _ = cancel.cancelled() => return Err(anyhow!("completion call cancelled")),
            resp = send => resp.context("completion http send")?,
        };
        if !resp.status().is_success() {
            return Err(anyhow!(
                "completion service error {}: {}",
                resp.status(),
                resp.text().await.unwrap_or_default()
            ));
        }
        let v: serde_json::Value = resp.json().await.context("parse completion response json")?;
        let text = v["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        let token_usage = v["usage"]["total_tokens"].as_u64();
        Ok(CompletionOutput { text, token_usage })
    }
}

/// Build the configured completion client, if credentials are present.
/// Missing or placeholder credentials are not an error: drafting degrades to
/// the deterministic fallback.
pub fn create_completion_client(cfg: &DraftingConfig) -> Option<Arc<dyn CompletionClient>> {
    let is_placeholder = |s: &str| {
        let t = s.trim();
        t.is_empty()
            || t.contains("${")
            || t.eq_ignore_ascii_case("your-api-key-here")
            || t.eq_ignore_ascii_case("changeme")
    };
    let key = std::env::var(&cfg.api_key_env).unwrap_or_default();
    if is_placeholder(&key) {
        warn!(
            "No generative credentials in {}; drafting will use the deterministic fallback",
            cfg.api_key_env
        );
        return None;
    }
    match OpenAiCompletionClient::new(cfg.base_url.clone(), key, cfg.model.clone()) {
        Ok(client) => {
            info!("Using generative drafting (model={})", cfg.model);
            Some(Arc::new(client))
        }
        Err(e) => {
            warn!("Failed to build completion client: {e}");
            None
        }
    }
}

/// One final drafted section.
#[derive(Debug, Clone, Serialize)]
pub struct DraftedSection {
    pub title: String,
    pub description: Option<String>,
    pub body: String,
}

/// Outcome of one drafting attempt, fallback included. `success=false` only
/// signals the accuracy evaluator; it never aborts the compose pipeline.
#[derive(Debug, Clone)]
pub struct DraftResult {
    pub success: bool,
    pub sections: Vec<DraftedSection>,
    pub checklist: Vec<String>,
    pub used_fallback: bool,
    pub warnings: Vec<String>,
    pub token_usage: Option<u64>,
    pub raw_output: Option<String>,
    pub model_confidence: Option<u8>,
}

pub struct DraftingClient {
    completion: Option<Arc<dyn CompletionClient>>,
    timeout_ms: u64,
    excerpt_chars: usize,
}

impl DraftingClient {
    pub fn new(completion: Option<Arc<dyn CompletionClient>>, cfg: &DraftingConfig) -> Self {
        Self {
            completion,
            timeout_ms: cfg.timeout_ms,
            excerpt_chars: cfg.reference_excerpt_chars,
        }
    }

    /// Draft final section bodies. Never returns an error: every failure path
    /// yields the deterministic fallback plus a warning.
    pub async fn draft(
        &self,
        node: &NodeContext,
        plans: &[SectionPlan],
        checklist: &[String],
        documents: &[ReferenceDocument],
    ) -> DraftResult {
        let mut warnings = Vec::new();

        let Some(client) = &self.completion else {
            warnings.push("generative service not configured".to_string());
            return self.fallback(node, plans, checklist, documents, warnings, None);
        };

        let system = SYSTEM_INSTRUCTION.to_string();
        let user = self.build_user_message(node, plans, checklist, documents);
        debug!(chars = user.len(), sections = plans.len(), "requesting draft");

        let cancel = CancellationToken::new();
        let outcome = tokio::time::timeout(
            Duration::from_millis(self.timeout_ms),
            client.complete(&system, &user, &cancel),
        )
        .await;

        let raw = match outcome {
            Err(_) => {
                // Timer fired: cancel so the in-flight call unwinds, then fall back.
                cancel.cancel();
                warn!(timeout_ms = self.timeout_ms, "generative call timed out");
                let err = CardwrightError::Timeout {
                    operation: "generation".to_string(),
                    timeout_ms: self.timeout_ms,
                };
                warnings.push(err.to_string());
                return self.fallback(node, plans, checklist, documents, warnings, None);
            }
            Ok(Err(e)) => {
                warn!("generative call failed: {e}");
                warnings.push(format!("generation failed: {e}"));
                return self.fallback(node, plans, checklist, documents, warnings, None);
            }
            Ok(Ok(out)) => out,
        };

        let Some(payload) = parse_model_payload(&raw.text) else {
            warnings.push("generation returned unparseable output".to_string());
            return self.fallback(node, plans, checklist, documents, warnings, Some(raw.text));
        };
        let model_sections = payload.sections.unwrap_or_default();
        let all_empty = model_sections.iter().all(|s| s.body.trim().is_empty());
        if model_sections.is_empty() || all_empty {
            warnings.push("generation returned no usable section bodies".to_string());
            return self.fallback(node, plans, checklist, documents, warnings, Some(raw.text));
        }

        // Map model sections back onto the requested plan slots. Slots the
        // model skipped are filled through the fallback composition.
        let mut sections = Vec::with_capacity(plans.len());
        for plan in plans {
            let matched = model_sections.iter().find(|s| titles_match(&s.title, &plan.title));
            match matched.filter(|s| !s.body.trim().is_empty()) {
                Some(s) => sections.push(DraftedSection {
                    title: plan.title.clone(),
                    description: plan.description.clone(),
                    body: s.body.trim().to_string(),
                }),
                None => {
                    warnings.push(format!("model omitted section '{}'", plan.title));
                    sections.push(DraftedSection {
                        title: plan.title.clone(),
                        description: plan.description.clone(),
                        body: scaffold::fallback_body(plan, node, documents),
                    });
                }
            }
        }

        let model_confidence = payload
            .quality
            .and_then(|q| q.confidence)
            .map(|c| c.round().clamp(0.0, 100.0) as u8);

        DraftResult {
            success: true,
            sections,
            checklist: checklist.to_vec(),
            used_fallback: false,
            warnings,
            token_usage: raw.token_usage,
            raw_output: Some(raw.text),
            model_confidence,
        }
    }

    fn fallback(
        &self,
        node: &NodeContext,
        plans: &[SectionPlan],
        checklist: &[String],
        documents: &[ReferenceDocument],
        warnings: Vec<String>,
        raw_output: Option<String>,
    ) -> DraftResult {
        let sections = plans
            .iter()
            .map(|plan| DraftedSection {
                title: plan.title.clone(),
                description: plan.description.clone(),
                body: scaffold::fallback_body(plan, node, documents),
            })
            .collect();
        DraftResult {
            success: false,
            sections,
            checklist: checklist.to_vec(),
            used_fallback: true,
            warnings,
            token_usage: None,
            raw_output,
            model_confidence: None,
        }
    }

    fn build_user_message(
        &self,
        node: &NodeContext,
        plans: &[SectionPlan],
        checklist: &[String],
        documents: &[ReferenceDocument],
    ) -> String {
        let mut msg = String::new();

        msg.push_str("## Node\n");
        msg.push_str(&format!("Label: {}\nType: {}\n", node.label, node.node_type));
        if let Some(domain) = &node.domain {
            msg.push_str(&format!("Domain: {}\n", domain));
        }
        if let Some(summary) = &node.summary
            && !summary.trim().is_empty()
        {
            msg.push_str(&format!("Summary: {}\n", summary.trim()));
        }
        if !node.tags.is_empty() {
            msg.push_str(&format!("Tags: {}\n", node.tags.join(", ")));
        }
        if let Some(intent) = &node.intent {
            let fields = [
                ("Idea", &intent.idea),
                ("Problem", &intent.problem),
                ("Primary audience", &intent.primary_audience),
                ("Core outcome", &intent.core_outcome),
                ("Launch scope", &intent.launch_scope),
                ("Primary risk", &intent.primary_risk),
            ];
            for (label, value) in fields {
                if let Some(v) = value
                    && !v.trim().is_empty()
                {
                    msg.push_str(&format!("{}: {}\n", label, v.trim()));
                }
            }
        }

        if !node.related.is_empty() {
            msg.push_str("\n## Related nodes\n");
            for rel in &node.related {
                let relation = rel.relation.as_deref().unwrap_or("related to");
                msg.push_str(&format!("- {} ({}, {})", rel.label, rel.node_type, relation));
                if let Some(summary) = &rel.summary {
                    msg.push_str(&format!(": {}", excerpt(summary, self.excerpt_chars)));
                }
                msg.push('\n');
            }
        }

        msg.push_str("\n## Card sections to write\n");
        for plan in plans {
            match &plan.description {
                Some(desc) => msg.push_str(&format!("- {}: {}\n", plan.title, desc)),
                None => msg.push_str(&format!("- {}\n", plan.title)),
            }
        }

        let drafted: Vec<&SectionPlan> =
            plans.iter().filter(|p| !p.body.trim().is_empty()).collect();
        if !drafted.is_empty() {
            msg.push_str("\n## Existing draft content (improve, never discard facts)\n");
            for plan in drafted {
                msg.push_str(&format!("### {}\n{}\n", plan.title, plan.body.trim()));
            }
        }

        if !documents.is_empty() {
            msg.push_str("\n## Reference excerpts\n");
            for doc in documents {
                for section in &doc.sections {
                    if section.body.trim().is_empty() {
                        continue;
                    }
                    msg.push_str(&format!(
                        "- {} / {}: {}\n",
                        doc.name,
                        section.title,
                        excerpt(section.body.trim(), self.excerpt_chars)
                    ));
                }
            }
        }

        if !checklist.is_empty() {
            msg.push_str("\n## Checklist the card must satisfy\n");
            for item in checklist {
                msg.push_str(&format!("- {}\n", item));
            }
        }

        msg
    }
}

fn titles_match(a: &str, b: &str) -> bool {
    let a = a.trim().to_lowercase();
    let b = b.trim().to_lowercase();
    a == b || a.contains(&b) || b.contains(&a)
}

fn excerpt(text: &str, max_chars: usize) -> String {
    let mut out: String = text.chars().take(max_chars).collect();
    if text.chars().count() > max_chars {
        out.push_str("...");
    }
    out
}

#[derive(Debug, Deserialize)]
struct ModelPayload {
    sections: Option<Vec<ModelSection>>,
    #[allow(dead_code)]
    notes: Option<String>,
    quality: Option<ModelQuality>,
}

#[derive(Debug, Deserialize)]
struct ModelSection {
    title: String,
    #[serde(default)]
    body: String,
}

#[derive(Debug, Deserialize)]
struct ModelQuality {
    confidence: Option<f64>,
}

/// Parse model text as the expected payload: strip code fences, try direct
/// JSON, then brace-matched candidate extraction.
fn parse_model_payload(text: &str) -> Option<ModelPayload> {
    let stripped = strip_code_fences(text);
    if let Ok(payload) = serde_json::from_str::<ModelPayload>(stripped.trim()) {
        return Some(payload);
    }
    for candidate in extract_json_candidates(&stripped) {
        if let Ok(payload) = serde_json::from_str::<ModelPayload>(&candidate) {
            return Some(payload);
        }
    }
    debug!("no parseable payload in model output ({} chars)", text.len());
    None
}

fn strip_code_fences(text: &str) -> String {
    static FENCE_RE: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"(?m)^```[a-zA-Z]*\s*$").unwrap());
    FENCE_RE.replace_all(text, "").to_string()
}

/// Brace-matched top-level JSON object extraction, string-escape aware.
fn extract_json_candidates(text: &str) -> Vec<String> {
    let mut candidates = Vec::new();
    let mut depth: u32 = 0;
    let mut start: Option<usize> = None;
    let mut in_string = false;
    let mut escape = false;

    for (idx, ch) in text.char_indices() {
        if in_string {
            if escape {
                escape = false;
                continue;
            }
            match ch {
                '\\' => escape = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => {
                if depth == 0 {
                    start = Some(idx);
                }
                depth += 1;
            }
            '}' => {
                if depth > 0 {
                    depth -= 1;
                    if depth == 0
                        && let Some(s) = start.take()
                    {
                        candidates.push(text[s..idx + 1].to_string());
                    }
                }
            }
            _ => {}
        }
    }
    candidates
}
