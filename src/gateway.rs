//! The shared service object every transport calls into.
//!
//! All mutable process state (rate-limit windows, the federated aggregate,
//! HVC key material, counters) is owned here and reached only through the
//! methods below. Each gated operation runs the access gate first, then the
//! rate limiter, so unauthenticated traffic never consumes quota.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Instant, SystemTime};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::access::{AccessGate, Authorization};
use crate::backend::{HttpSearchBackend, SearchBackend};
use crate::collaborators::{Collaborators, SummaryInput};
use crate::config::GatewayConfig;
use crate::error::{GatewayError, GatewayResult};
use crate::hvc::{HomomorphicVectorCipher, SchemeContext};
use crate::orchestrator::QueryOrchestrator;
use crate::privacy::{
    AcceptedAck, AggregateSnapshot, DpNoiser, FederatedAggregator, TelemetryPayload,
};
use crate::protocol::{
    ConfidentialityMode, DotRequest, DotResponse, EncryptedQuery, EncryptedResult,
    FactCheckRequest, FactCheckResponse, ProofReceipt, Query, Response, SearchQuery, SearchResult,
    SummarizeRequest, SummaryResponse,
};
use crate::rate_limit::{RateDecision, RateLimiter};
use crate::telemetry::{self, TelemetryHandle};

/// Caller-supplied facts about one request, gathered by the transport.
#[derive(Clone, Debug)]
pub struct RequestContext {
    pub credential: Option<String>,
    /// Rate-limit identity, normally the peer address.
    pub identity: String,
    pub received_at: SystemTime,
}

impl RequestContext {
    pub fn new(credential: Option<String>, identity: impl Into<String>) -> Self {
        Self {
            credential,
            identity: identity.into(),
            received_at: SystemTime::now(),
        }
    }

    pub fn at(mut self, received_at: SystemTime) -> Self {
        self.received_at = received_at;
        self
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub scheme_initialized: bool,
    pub counters: BTreeMap<String, u64>,
}

pub struct GatewayBuilder {
    config: GatewayConfig,
    backend: Option<Arc<dyn SearchBackend>>,
    scheme: Option<Arc<SchemeContext>>,
    noiser: Option<DpNoiser>,
    collaborators: Collaborators,
}

impl GatewayBuilder {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            config,
            backend: None,
            scheme: None,
            noiser: None,
            collaborators: Collaborators::default(),
        }
    }

    pub fn backend(mut self, backend: Arc<dyn SearchBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Injects a scheme context. Its lifecycle stays with the caller: `build`
    /// does not initialize an injected context.
    pub fn scheme(mut self, scheme: Arc<SchemeContext>) -> Self {
        self.scheme = Some(scheme);
        self
    }

    pub fn noiser(mut self, noiser: DpNoiser) -> Self {
        self.noiser = Some(noiser);
        self
    }

    pub fn collaborators(mut self, collaborators: Collaborators) -> Self {
        self.collaborators = collaborators;
        self
    }

    pub fn build(self) -> GatewayResult<Gateway> {
        let config = self.config;
        config.validate()?;

        let scheme = match self.scheme {
            Some(scheme) => scheme,
            None => {
                let scheme = Arc::new(SchemeContext::new(config.hvc.clone())?);
                scheme.init()?;
                scheme
            }
        };
        let backend: Arc<dyn SearchBackend> = match self.backend {
            Some(backend) => backend,
            None => Arc::new(HttpSearchBackend::from_config(&config.backend)?),
        };
        let noiser = self
            .noiser
            .unwrap_or_else(|| DpNoiser::from_config(&config.privacy));
        info!(
            mechanism = ?noiser.mechanism(),
            epsilon = config.privacy.epsilon,
            "telemetry noise configured"
        );

        let cipher: Arc<dyn HomomorphicVectorCipher> = scheme.clone();
        let orchestrator = QueryOrchestrator::new(
            cipher,
            backend,
            self.collaborators.reranker.clone(),
            self.collaborators.answers.clone(),
            config.rerank.top_k,
            config.backend.timeout(),
        );

        Ok(Gateway {
            gate: AccessGate::new(&config.auth.api_key),
            limiter: RateLimiter::new(config.rate_limit.requests_per_hour),
            aggregator: FederatedAggregator::new(noiser, config.privacy.epsilon),
            scheme,
            orchestrator,
            collaborators: self.collaborators,
            telemetry: TelemetryHandle::new(),
        })
    }
}

pub struct Gateway {
    gate: AccessGate,
    limiter: RateLimiter,
    aggregator: FederatedAggregator,
    scheme: Arc<SchemeContext>,
    orchestrator: QueryOrchestrator,
    collaborators: Collaborators,
    telemetry: TelemetryHandle,
}

impl Gateway {
    pub fn builder(config: GatewayConfig) -> GatewayBuilder {
        GatewayBuilder::new(config)
    }

    /// Access gate, then rate limiter. Every gated operation calls this first.
    pub fn admit(&self, ctx: &RequestContext) -> GatewayResult<()> {
        if self.gate.authorize(ctx.credential.as_deref()) == Authorization::Unauthorized {
            self.telemetry.incr(telemetry::AUTH_REJECTED);
            debug!(identity = %ctx.identity, "request rejected: bad credential");
            return Err(GatewayError::Unauthorized);
        }
        match self.limiter.check(&ctx.identity, ctx.received_at) {
            RateDecision::Allowed { remaining } => {
                debug!(identity = %ctx.identity, remaining, "request admitted");
                Ok(())
            }
            RateDecision::LimitExceeded { retry_after } => {
                self.telemetry.incr(telemetry::RATE_LIMITED);
                warn!(identity = %ctx.identity, "rate limit exceeded");
                Err(GatewayError::RateLimited { retry_after })
            }
        }
    }

    async fn run_query(&self, query: Query) -> GatewayResult<Response> {
        let started = Instant::now();
        self.telemetry.incr(telemetry::SEARCH_QUERIES);
        if query.mode() == ConfidentialityMode::Encrypted {
            self.telemetry.incr(telemetry::SEARCH_ENCRYPTED);
        }
        let outcome = self.orchestrator.execute(query).await;
        if let Err(GatewayError::BackendUnavailable(err)) = &outcome {
            self.telemetry.incr(telemetry::BACKEND_FAILURES);
            warn!(%err, "search backend unavailable");
        }
        self.telemetry
            .record_latency_ms(telemetry::QUERY_LATENCY, started.elapsed().as_millis() as u64);
        outcome
    }

    /// Dual-mode query entry point; the response mirrors the request's mode.
    pub async fn submit_query(
        &self,
        ctx: &RequestContext,
        request: EncryptedQuery,
    ) -> GatewayResult<EncryptedResult> {
        self.admit(ctx)?;
        let query = Query::from_wire(&request)?;
        let response = self.run_query(query).await?;
        Ok(response.into_wire(request.ciphertext))
    }

    pub async fn search(
        &self,
        ctx: &RequestContext,
        request: SearchQuery,
    ) -> GatewayResult<SearchResult> {
        self.admit(ctx)?;
        match self.run_query(Query::from_search(&request)?).await? {
            Response::Plaintext { results, answer } => {
                Ok(SearchResult { results, answer })
            }
            Response::Encrypted { .. } => Err(GatewayError::MalformedInput(
                "plaintext search produced an encrypted response".into(),
            )),
        }
    }

    pub fn federated_update(
        &self,
        ctx: &RequestContext,
        payload: TelemetryPayload,
    ) -> GatewayResult<AcceptedAck> {
        self.admit(ctx)?;
        let ack = self.aggregator.accept(payload)?;
        self.telemetry.incr(telemetry::FEDERATED_UPDATES);
        info!(num_updates = ack.num_updates, "federated update accepted");
        Ok(ack)
    }

    /// Read-only aggregate; not gated.
    pub fn aggregate(&self) -> AggregateSnapshot {
        self.aggregator.aggregate()
    }

    /// Encrypts both vectors, multiplies them under encryption and returns the
    /// decrypted product slots.
    pub fn encrypted_dot(
        &self,
        ctx: &RequestContext,
        request: DotRequest,
    ) -> GatewayResult<DotResponse> {
        self.admit(ctx)?;
        let cipher = self.orchestrator.cipher();
        let a = cipher.encrypt(&request.vec1)?;
        let b = cipher.encrypt(&request.vec2)?;
        let product = cipher.encrypted_dot(&a, &b)?;
        Ok(DotResponse {
            dot_product: cipher.decrypt(&product)?,
        })
    }

    pub fn fact_check(
        &self,
        ctx: &RequestContext,
        request: FactCheckRequest,
    ) -> GatewayResult<FactCheckResponse> {
        self.admit(ctx)?;
        // A bare url stands in for the claim when no claim text is given.
        let claim = request
            .claim
            .filter(|claim| !claim.is_empty())
            .or(request.url)
            .unwrap_or_default();
        Ok(self.collaborators.fact_checker.check(&claim).into_response())
    }

    pub fn summarize(
        &self,
        ctx: &RequestContext,
        request: SummarizeRequest,
    ) -> GatewayResult<SummaryResponse> {
        self.admit(ctx)?;
        let input = match (request.url.as_deref(), request.text.as_deref()) {
            (Some(url), _) if !url.is_empty() => SummaryInput::Url(url),
            (_, Some(text)) if !text.is_empty() => SummaryInput::Text(text),
            _ => SummaryInput::Empty,
        };
        Ok(self.collaborators.summarizer.summarize(input))
    }

    pub fn zkp_proof(
        &self,
        ctx: &RequestContext,
        payload: serde_json::Value,
    ) -> GatewayResult<ProofReceipt> {
        self.admit(ctx)?;
        Ok(self.collaborators.prover.prove(&payload))
    }

    pub fn health(&self) -> HealthReport {
        HealthReport {
            status: "ok",
            scheme_initialized: self.scheme.is_initialized(),
            counters: self.telemetry.counters(),
        }
    }

    /// Drops rate-limit windows from past hours.
    pub fn prune_rate_limits(&self, now: SystemTime) -> usize {
        self.limiter.prune(now)
    }

    pub fn telemetry(&self) -> &TelemetryHandle {
        &self.telemetry
    }
}
