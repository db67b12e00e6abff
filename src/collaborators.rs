//! Pluggable strategies the orchestrator and auxiliary endpoints call into.
//!
//! The defaults are simple stand-ins. Real ranking, QA or
//! fact-checking models implement the same traits and are swapped in through
//! [`Collaborators`] without touching the orchestrator.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::protocol::{FactCheckResponse, ProofReceipt, SummaryResponse};

pub const ANSWER_UNAVAILABLE: &str = "[Answer extraction not available]";
const SUMMARY_PREVIEW_CHARS: usize = 60;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "kebab-case")]
pub struct RerankConfig {
    pub top_k: usize,
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self { top_k: 10 }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RankedDoc {
    pub doc: String,
    pub badge: String,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("reranker failed: {0}")]
pub struct RerankError(pub String);

pub trait Reranker: Send + Sync {
    fn rerank(&self, query: &str, docs: &[String], top_k: usize)
        -> Result<Vec<RankedDoc>, RerankError>;
}

pub trait AnswerExtractor: Send + Sync {
    /// Returns an answer span, or a sentinel when no model is available.
    fn extract(&self, query: &str, doc: &str) -> String;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FactVerdict {
    LikelyTrue,
    Unverified,
    NoClaim,
}

impl FactVerdict {
    pub fn result(self) -> &'static str {
        match self {
            FactVerdict::LikelyTrue => "Likely True",
            FactVerdict::Unverified => "Unverified",
            FactVerdict::NoClaim => "No claim provided",
        }
    }

    pub fn badge(self) -> &'static str {
        match self {
            FactVerdict::LikelyTrue => "✅ Fact-Checked",
            FactVerdict::Unverified => "⚠️ Unverified",
            FactVerdict::NoClaim => "❓",
        }
    }

    pub fn into_response(self) -> FactCheckResponse {
        FactCheckResponse {
            result: self.result().to_string(),
            badge: self.badge().to_string(),
        }
    }
}

pub trait FactChecker: Send + Sync {
    fn check(&self, claim: &str) -> FactVerdict;
}

pub enum SummaryInput<'a> {
    Text(&'a str),
    Url(&'a str),
    Empty,
}

pub trait Summarizer: Send + Sync {
    fn summarize(&self, input: SummaryInput<'_>) -> SummaryResponse;
}

/// Hook point for zero-knowledge proofs over personalization payloads.
pub trait ProofHook: Send + Sync {
    fn prove(&self, payload: &serde_json::Value) -> ProofReceipt;
}

/// Claims mentioning the marker keyword pass; everything else is unverified.
pub struct KeywordFactChecker {
    marker: String,
}

impl KeywordFactChecker {
    pub fn new(marker: impl Into<String>) -> Self {
        Self {
            marker: marker.into(),
        }
    }
}

impl Default for KeywordFactChecker {
    fn default() -> Self {
        Self::new("example")
    }
}

impl FactChecker for KeywordFactChecker {
    fn check(&self, claim: &str) -> FactVerdict {
        if claim.trim().is_empty() {
            FactVerdict::NoClaim
        } else if claim.contains(&self.marker) {
            FactVerdict::LikelyTrue
        } else {
            FactVerdict::Unverified
        }
    }
}

/// Orders documents by length, longest first, and badges fact-checked ones.
pub struct LengthReranker {
    fact_checker: Arc<dyn FactChecker>,
}

impl LengthReranker {
    pub fn new(fact_checker: Arc<dyn FactChecker>) -> Self {
        Self { fact_checker }
    }
}

impl Reranker for LengthReranker {
    fn rerank(
        &self,
        _query: &str,
        docs: &[String],
        top_k: usize,
    ) -> Result<Vec<RankedDoc>, RerankError> {
        let mut scored: Vec<&String> = docs.iter().collect();
        // Stable sort keeps backend order among equal lengths.
        scored.sort_by(|a, b| b.len().cmp(&a.len()));
        Ok(scored
            .into_iter()
            .take(top_k)
            .map(|doc| RankedDoc {
                doc: doc.clone(),
                badge: match self.fact_checker.check(doc) {
                    FactVerdict::LikelyTrue => FactVerdict::LikelyTrue.badge().to_string(),
                    _ => String::new(),
                },
            })
            .collect())
    }
}

/// Fallback when the reranker fails: first `top_k` docs, unscored.
pub fn unscored(docs: &[String], top_k: usize) -> Vec<RankedDoc> {
    docs.iter()
        .take(top_k)
        .map(|doc| RankedDoc {
            doc: doc.clone(),
            badge: String::new(),
        })
        .collect()
}

pub struct UnavailableAnswerExtractor;

impl AnswerExtractor for UnavailableAnswerExtractor {
    fn extract(&self, _query: &str, _doc: &str) -> String {
        ANSWER_UNAVAILABLE.to_string()
    }
}

pub struct TruncatingSummarizer;

impl Summarizer for TruncatingSummarizer {
    fn summarize(&self, input: SummaryInput<'_>) -> SummaryResponse {
        let summary = match input {
            SummaryInput::Url(url) => format!("[Summary for {url}] This is a dummy summary."),
            SummaryInput::Text(text) => {
                let preview: String = text.chars().take(SUMMARY_PREVIEW_CHARS).collect();
                format!("[Summary] {preview}...")
            }
            SummaryInput::Empty => "No input provided.".to_string(),
        };
        SummaryResponse { summary }
    }
}

pub struct PendingProofHook;

impl ProofHook for PendingProofHook {
    fn prove(&self, _payload: &serde_json::Value) -> ProofReceipt {
        ProofReceipt {
            zkp: "dummy-proof".into(),
            status: "ZKP integration planned".into(),
        }
    }
}

/// Strategy bundle handed to the gateway.
#[derive(Clone)]
pub struct Collaborators {
    pub reranker: Arc<dyn Reranker>,
    pub answers: Arc<dyn AnswerExtractor>,
    pub fact_checker: Arc<dyn FactChecker>,
    pub summarizer: Arc<dyn Summarizer>,
    pub prover: Arc<dyn ProofHook>,
}

impl Default for Collaborators {
    fn default() -> Self {
        let fact_checker: Arc<dyn FactChecker> = Arc::new(KeywordFactChecker::default());
        Self {
            reranker: Arc::new(LengthReranker::new(fact_checker.clone())),
            answers: Arc::new(UnavailableAnswerExtractor),
            fact_checker,
            summarizer: Arc::new(TruncatingSummarizer),
            prover: Arc::new(PendingProofHook),
        }
    }
}
