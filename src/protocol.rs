//! Wire shapes and the dual-mode query/response model.
//!
//! The wire types keep the field names clients already send. [`Query`] and
//! [`Response`] are the internal, mode-tagged forms the orchestrator works on.

use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, GatewayResult};
use crate::hvc::CiphertextBundle;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct EncryptedQuery {
    /// Base64 ciphertext bundle; empty when the caller sends plaintext.
    pub ciphertext: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<bool>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct EncryptedResult {
    pub ciphertext: String,
    #[serde(default)]
    pub results: Vec<String>,
    #[serde(default)]
    pub answer: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SearchQuery {
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<bool>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SearchResult {
    pub results: Vec<String>,
    #[serde(default)]
    pub answer: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfidentialityMode {
    Plaintext,
    Encrypted,
}

#[derive(Clone, Debug)]
pub enum Query {
    Plaintext {
        text: String,
        want_answer: bool,
    },
    Encrypted {
        ciphertext: CiphertextBundle,
        want_answer: bool,
    },
}

impl Query {
    /// Plaintext wins when `query` is non-blank; otherwise the ciphertext is
    /// decoded. A request carrying neither is rejected.
    pub fn from_wire(wire: &EncryptedQuery) -> GatewayResult<Self> {
        let want_answer = wire.answer.unwrap_or(false);
        if let Some(text) = wire.query.as_deref().filter(|text| !text.trim().is_empty()) {
            return Ok(Query::Plaintext {
                text: text.to_owned(),
                want_answer,
            });
        }
        if wire.ciphertext.trim().is_empty() {
            return Err(GatewayError::MalformedInput(
                "either query or ciphertext is required".into(),
            ));
        }
        Ok(Query::Encrypted {
            ciphertext: CiphertextBundle::from_base64(&wire.ciphertext)?,
            want_answer,
        })
    }

    pub fn from_search(search: &SearchQuery) -> GatewayResult<Self> {
        if search.query.trim().is_empty() {
            return Err(GatewayError::MalformedInput("query must not be empty".into()));
        }
        Ok(Query::Plaintext {
            text: search.query.clone(),
            want_answer: search.answer.unwrap_or(false),
        })
    }

    pub fn mode(&self) -> ConfidentialityMode {
        match self {
            Query::Plaintext { .. } => ConfidentialityMode::Plaintext,
            Query::Encrypted { .. } => ConfidentialityMode::Encrypted,
        }
    }

    pub fn want_answer(&self) -> bool {
        match self {
            Query::Plaintext { want_answer, .. } | Query::Encrypted { want_answer, .. } => {
                *want_answer
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Response {
    Plaintext {
        results: Vec<String>,
        answer: Option<String>,
    },
    /// Results exist only inside `ciphertext`. The extracted answer stays in
    /// the clear.
    Encrypted {
        ciphertext: String,
        answer: Option<String>,
    },
}

impl Response {
    pub fn mode(&self) -> ConfidentialityMode {
        match self {
            Response::Plaintext { .. } => ConfidentialityMode::Plaintext,
            Response::Encrypted { .. } => ConfidentialityMode::Encrypted,
        }
    }

    /// Plaintext responses echo the caller's ciphertext field untouched.
    pub fn into_wire(self, echoed_ciphertext: String) -> EncryptedResult {
        match self {
            Response::Plaintext { results, answer } => EncryptedResult {
                ciphertext: echoed_ciphertext,
                results,
                answer,
            },
            Response::Encrypted { ciphertext, answer } => EncryptedResult {
                ciphertext,
                results: Vec::new(),
                answer,
            },
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DotRequest {
    pub vec1: Vec<f64>,
    pub vec2: Vec<f64>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DotResponse {
    pub dot_product: Vec<f64>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FactCheckRequest {
    #[serde(default)]
    pub claim: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct FactCheckResponse {
    pub result: String,
    pub badge: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SummarizeRequest {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SummaryResponse {
    pub summary: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProofReceipt {
    pub zkp: String,
    pub status: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn encrypted_query_defaults() {
        let wire: EncryptedQuery = serde_json::from_str(r#"{"ciphertext": ""}"#).unwrap();
        assert_eq!(
            wire,
            EncryptedQuery {
                ciphertext: String::new(),
                query: None,
                answer: None,
            }
        );
    }

    #[test]
    fn encrypted_result_serializes_null_answer() {
        let result = EncryptedResult {
            ciphertext: "abc".into(),
            results: vec![],
            answer: None,
        };
        assert_eq!(
            serde_json::to_value(&result).unwrap(),
            serde_json::json!({"ciphertext": "abc", "results": [], "answer": null})
        );
    }

    #[test]
    fn plaintext_wins_over_ciphertext() {
        let wire = EncryptedQuery {
            ciphertext: "not-even-base64".into(),
            query: Some("capital of france".into()),
            answer: Some(true),
        };
        let query = Query::from_wire(&wire).unwrap();
        assert_eq!(query.mode(), ConfidentialityMode::Plaintext);
        assert!(query.want_answer());
    }

    #[test]
    fn empty_request_is_malformed() {
        let wire = EncryptedQuery {
            ciphertext: " ".into(),
            query: Some("   ".into()),
            answer: None,
        };
        assert!(matches!(
            Query::from_wire(&wire),
            Err(GatewayError::MalformedInput(_))
        ));
    }

    #[test]
    fn encrypted_response_never_carries_plaintext_results() {
        let wire = Response::Encrypted {
            ciphertext: "ct".into(),
            answer: None,
        }
        .into_wire("ignored".into());
        assert!(wire.results.is_empty());
        assert_eq!(wire.ciphertext, "ct");
    }
}
