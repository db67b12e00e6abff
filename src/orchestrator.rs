use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::backend::{BackendError, SearchBackend};
use crate::collaborators::{unscored, AnswerExtractor, RankedDoc, Reranker};
use crate::error::{GatewayError, GatewayResult};
use crate::hvc::{decrypt_text, encrypt_results, HomomorphicVectorCipher};
use crate::protocol::{Query, Response};

/// Single-pass query pipeline: mode detection, retrieval, rerank, optional
/// answer extraction, response assembly. Holds no per-request state.
pub struct QueryOrchestrator {
    cipher: Arc<dyn HomomorphicVectorCipher>,
    backend: Arc<dyn SearchBackend>,
    reranker: Arc<dyn Reranker>,
    answers: Arc<dyn AnswerExtractor>,
    top_k: usize,
    backend_timeout: Duration,
}

/// Outcome of the shared retrieve/rerank/answer steps, before mode-specific
/// response assembly.
struct Retrieved {
    docs: Vec<String>,
    answer: Option<String>,
}

impl QueryOrchestrator {
    pub fn new(
        cipher: Arc<dyn HomomorphicVectorCipher>,
        backend: Arc<dyn SearchBackend>,
        reranker: Arc<dyn Reranker>,
        answers: Arc<dyn AnswerExtractor>,
        top_k: usize,
        backend_timeout: Duration,
    ) -> Self {
        Self {
            cipher,
            backend,
            reranker,
            answers,
            top_k,
            backend_timeout,
        }
    }

    pub fn cipher(&self) -> &Arc<dyn HomomorphicVectorCipher> {
        &self.cipher
    }

    pub async fn execute(&self, query: Query) -> GatewayResult<Response> {
        let started = Instant::now();
        let response = match query {
            Query::Plaintext { text, want_answer } => {
                let retrieved = self.retrieve(&text, want_answer).await?;
                Response::Plaintext {
                    results: retrieved.docs,
                    answer: retrieved.answer,
                }
            }
            Query::Encrypted {
                ciphertext,
                want_answer,
            } => {
                let text = decrypt_text(self.cipher.as_ref(), &ciphertext)?;
                if text.trim().is_empty() {
                    return Err(GatewayError::MalformedInput(
                        "encrypted query decodes to empty text".into(),
                    ));
                }
                let retrieved = self.retrieve(&text, want_answer).await?;
                let sealed = encrypt_results(self.cipher.as_ref(), &retrieved.docs)?;
                Response::Encrypted {
                    ciphertext: sealed.to_base64(),
                    answer: retrieved.answer,
                }
            }
        };
        debug!(
            mode = ?response.mode(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "query pipeline complete"
        );
        Ok(response)
    }

    async fn retrieve(&self, text: &str, want_answer: bool) -> GatewayResult<Retrieved> {
        let docs = match tokio::time::timeout(self.backend_timeout, self.backend.search(text)).await
        {
            Ok(result) => result?,
            Err(_) => {
                return Err(BackendError::Timeout {
                    after_ms: self.backend_timeout.as_millis() as u64,
                }
                .into())
            }
        };
        let ranked = match self.reranker.rerank(text, &docs, self.top_k) {
            Ok(ranked) => ranked,
            Err(err) => {
                warn!(%err, "reranker failed, returning unscored results");
                unscored(&docs, self.top_k)
            }
        };
        let answer = match ranked.first() {
            Some(top) if want_answer => Some(self.answers.extract(text, &top.doc)),
            _ => None,
        };
        Ok(Retrieved {
            docs: ranked.into_iter().map(|RankedDoc { doc, .. }| doc).collect(),
            answer,
        })
    }
}
