//! §4.J Intent Router. Grounded on `providers::llm::LlmProvider::classify`
//! for the model-backed path, with a deterministic keyword fallback
//! constructed the same way `doc-chunker`'s structural splitters fall back to
//! a `Default` chunking mode when no structural marker is found: a cheap
//! rule stands in for a model-backed decision so retrieval always proceeds.

use providers::LlmProvider;
use rag_model::{DocType, RetrievalMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    RegulationQuery,
    AuditQuery,
    IssueQuery,
    General,
}

impl Intent {
    pub fn as_str(self) -> &'static str {
        match self {
            Intent::RegulationQuery => "regulation_query",
            Intent::AuditQuery => "audit_query",
            Intent::IssueQuery => "issue_query",
            Intent::General => "general",
        }
    }

    fn from_label(label: &str) -> Self {
        match label {
            "regulation_query" => Intent::RegulationQuery,
            "audit_query" => Intent::AuditQuery,
            "issue_query" => Intent::IssueQuery,
            _ => Intent::General,
        }
    }

    /// Scopes retrieval per §4.J: regulation queries see the whole
    /// regulation category (internal + external); audit/issue queries see
    /// the whole report/issue category; general is unrestricted.
    fn doc_type_filter(self) -> Option<Vec<DocType>> {
        match self {
            Intent::RegulationQuery => Some(DocType::regulation_types()),
            Intent::AuditQuery | Intent::IssueQuery => Some(DocType::report_or_issue_types()),
            Intent::General => None,
        }
    }

    fn is_analytical(self) -> bool {
        matches!(self, Intent::AuditQuery)
    }
}

#[derive(Debug, Clone)]
pub struct RoutedIntent {
    pub intent: Intent,
    pub intent_reason: String,
    pub top_k: usize,
    pub doc_type_filter: Option<Vec<DocType>>,
    pub retrieval_mode: RetrievalMode,
    pub use_rerank: bool,
}

const TOP_K_FACTUAL: usize = 5;
const TOP_K_ANALYTICAL: usize = 20;

/// Classifies `query` via the LLM provider's fixed classification prompt; on
/// any provider failure or unparsable response, falls back to the
/// deterministic keyword rule so retrieval always proceeds (§4.J).
pub fn route(llm: &dyn LlmProvider, query: &str, default_mode: RetrievalMode) -> RoutedIntent {
    let (intent, reason) = match llm.classify(&classification_prompt(query)) {
        Ok(raw) => match parse_classification(&raw) {
            Some(parsed) => parsed,
            None => keyword_fallback(query),
        },
        Err(_) => keyword_fallback(query),
    };

    RoutedIntent {
        intent,
        intent_reason: reason,
        top_k: if intent.is_analytical() { TOP_K_ANALYTICAL } else { TOP_K_FACTUAL },
        doc_type_filter: intent.doc_type_filter(),
        retrieval_mode: default_mode,
        use_rerank: true,
    }
}

fn classification_prompt(query: &str) -> String {
    format!(
        "Classify the intent of this audit/compliance query as one of \
         regulation_query, audit_query, issue_query, general. Respond with \
         JSON {{\"intent\":...,\"reason\":...}}.\nQuery: {query}"
    )
}

fn parse_classification(raw: &str) -> Option<(Intent, String)> {
    let value: serde_json::Value = serde_json::from_str(raw).ok()?;
    let label = value.get("intent")?.as_str()?;
    let reason = value.get("reason").and_then(|v| v.as_str()).unwrap_or("llm classification").to_string();
    Some((Intent::from_label(label), reason))
}

fn keyword_fallback(query: &str) -> (Intent, String) {
    let intent = if query.contains('第') || query.to_lowercase().contains("regulation") {
        Intent::RegulationQuery
    } else if query.contains("整改") || query.to_lowercase().contains("issue") {
        Intent::IssueQuery
    } else if query.contains("审计") || query.to_lowercase().contains("audit") {
        Intent::AuditQuery
    } else {
        Intent::General
    };
    (intent, "deterministic keyword fallback".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use providers::llm::DeterministicLlm;

    #[test]
    fn regulation_keyword_routes_to_regulation_query_with_low_top_k() {
        let llm = DeterministicLlm;
        let routed = route(&llm, "第三条的适用范围是什么", RetrievalMode::Hybrid);
        assert_eq!(routed.intent, Intent::RegulationQuery);
        assert_eq!(routed.top_k, TOP_K_FACTUAL);
        assert_eq!(routed.doc_type_filter, Some(vec![DocType::InternalRegulation, DocType::ExternalRegulation]));
    }

    #[test]
    fn audit_keyword_routes_to_analytical_top_k() {
        let llm = DeterministicLlm;
        let routed = route(&llm, "审计发现的主要风险有哪些", RetrievalMode::Hybrid);
        assert_eq!(routed.intent, Intent::AuditQuery);
        assert_eq!(routed.top_k, TOP_K_ANALYTICAL);
    }

    #[test]
    fn unparsable_provider_response_falls_back_to_keyword_rule() {
        struct BrokenLlm;
        impl LlmProvider for BrokenLlm {
            fn classify(&self, _prompt: &str) -> Result<String, providers::llm::LlmError> {
                Ok("not json".to_string())
            }
            fn generate(&self, _: &str, _: &dyn Fn() -> bool, _: &mut dyn FnMut(providers::llm::StreamEvent)) -> Result<(), providers::llm::LlmError> {
                Ok(())
            }
        }
        let routed = route(&BrokenLlm, "general question", RetrievalMode::Hybrid);
        assert_eq!(routed.intent, Intent::General);
        assert!(routed.intent_reason.contains("fallback"));
    }
}
