//! # Filter Decision Pipeline
//!
//! The ordered stages every moderation request passes through:
//!
//! 1. response-cache lookup (hit returns immediately)
//! 2. rate limit
//! 3. credential validation
//! 4. request validation
//! 5. pattern pre-screen
//! 6. AI-result cache, then the AI provider when review is needed
//! 7. verdict composition (including redaction)
//! 8. tracker updates and cache fills
//!
//! The pipeline only rejects for rate limit, auth and validation; an AI
//! failure degrades to an allow verdict with the `error` flag and counter
//! or cache failures are logged and swallowed.

use std::sync::Arc;
use std::time::Instant;

use crate::ai::ProviderRegistry;
use crate::auth::{AuthError, CredentialService};
use crate::ratelimit::{FixedWindowLimiter, RateLimitDecision};
use crate::screening::{redact, PreScreener};
use crate::stats::tracker::{RequestOutcome, RequestTracker};
use crate::stats::ApiKind;

pub mod request;
pub mod response_cache;
pub mod result_cache;

pub use request::{
    FilterConfig, FilterRequest, FilterRequestBody, FilterResult, Flag, ValidationError,
};
pub use response_cache::ResponseCache;
pub use result_cache::AiResultCache;

/// Transport-level facts about one request, supplied by the HTTP layer.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Request path, part of the response-cache key
    pub path: String,
    /// Request method, part of the response-cache key
    pub method: String,
    /// Source IP
    pub ip: String,
    /// Presented API key, if any
    pub api_key: Option<String>,
    /// `nocache` query flag
    pub no_cache: bool,
}

/// Why the pipeline refused to produce a verdict.
#[derive(Debug)]
pub enum PipelineReject {
    /// Over the rate limit window
    RateLimited(RateLimitDecision),
    /// Missing, unknown or revoked credential
    Unauthorized(String),
    /// Request failed validation
    Invalid(ValidationError),
    /// Credential storage failure
    Internal(String),
}

/// A produced verdict plus the scratch the HTTP layer needs for headers.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    /// The verdict
    pub result: FilterResult,
    /// Whether the response cache answered
    pub used_cache: bool,
    /// Whether a provider was consulted
    pub used_ai: bool,
    /// Wall-clock handling time
    pub latency_ms: u64,
    /// Rate-limit state for the `X-RateLimit-*` headers (absent on cache
    /// hits, which return before the rate-limit stage)
    pub rate_limit: Option<RateLimitDecision>,
}

/// The assembled pipeline. Cheap to share behind an `Arc`.
pub struct FilterPipeline {
    screener: PreScreener,
    providers: Arc<ProviderRegistry>,
    credentials: Arc<CredentialService>,
    limiter: Arc<FixedWindowLimiter>,
    tracker: Arc<RequestTracker>,
    response_cache: Arc<ResponseCache>,
    result_cache: Arc<AiResultCache>,
}

impl FilterPipeline {
    /// Wire the pipeline together.
    pub fn new(
        providers: Arc<ProviderRegistry>,
        credentials: Arc<CredentialService>,
        limiter: Arc<FixedWindowLimiter>,
        tracker: Arc<RequestTracker>,
        response_cache: Arc<ResponseCache>,
        result_cache: Arc<AiResultCache>,
    ) -> Self {
        Self {
            screener: PreScreener::new(),
            providers,
            credentials,
            limiter,
            tracker,
            response_cache,
            result_cache,
        }
    }

    /// Run one request through every stage.
    pub async fn execute(
        &self,
        ctx: &RequestContext,
        body: FilterRequestBody,
    ) -> Result<PipelineOutcome, PipelineReject> {
        let start = Instant::now();
        let (request, validation) = body.into_request_lenient();

        let api_kind = if request.image.is_some() {
            ApiKind::Image
        } else {
            ApiKind::Text
        };

        // Stage 1: response cache. The key covers the presented credential,
        // so hits never leak across callers.
        let credential_fragment = ctx.api_key.as_deref().unwrap_or("anonymous");
        let cache_key = response_cache::response_cache_key(
            &ctx.path,
            &ctx.method,
            credential_fragment,
            &request,
        );

        if !ctx.no_cache {
            if let Some(result) = self.response_cache.get(&cache_key) {
                let latency_ms = elapsed_ms(start);
                self.track(
                    &ctx.ip,
                    &result,
                    true,
                    false,
                    latency_ms,
                    api_kind,
                )
                .await;

                return Ok(PipelineOutcome {
                    result,
                    used_cache: true,
                    used_ai: false,
                    latency_ms,
                    rate_limit: None,
                });
            }
        }

        // Stage 2: rate limit, keyed by credential when one is presented.
        let limit_identifier = match &ctx.api_key {
            Some(key) => format!("key:{}", response_cache::hash_base36(key)),
            None => format!("ip:{}", ctx.ip),
        };
        let decision = self.limiter.check(&limit_identifier).await;
        if !decision.allowed {
            return Err(PipelineReject::RateLimited(decision));
        }

        // Stage 3: credential validation.
        let api_key = ctx
            .api_key
            .as_deref()
            .ok_or_else(|| PipelineReject::Unauthorized("missing API key".to_string()))?;
        let credential = match self.credentials.validate(api_key).await {
            Ok(credential) => credential,
            Err(AuthError::NotFound) => {
                return Err(PipelineReject::Unauthorized("unknown API key".to_string()));
            }
            Err(AuthError::Revoked) => {
                return Err(PipelineReject::Unauthorized("API key revoked".to_string()));
            }
            Err(AuthError::Database(e)) => {
                return Err(PipelineReject::Internal(e.to_string()));
            }
        };

        // Stage 4: request validation.
        if let Err(e) = validation {
            return Err(PipelineReject::Invalid(e));
        }

        // Stage 5: pattern pre-screen.
        let text = request.text.as_deref().unwrap_or("");
        let prescreen = self.screener.screen(text, &request.config);

        let mut used_ai = false;
        let result = if !prescreen.needs_ai_review && request.image.is_none() {
            let mut result = FilterResult::allowed();
            if request.config.return_filtered_message {
                result.filtered_content = Some(text.to_string());
            }
            result
        } else {
            // Stage 6: AI-result cache, then the provider.
            let result_key =
                result_cache::result_cache_key(text, &request.history, &request.config);

            let verdict = match self.result_cache.get(&result_key) {
                Some(cached) => cached,
                None => {
                    used_ai = true;
                    let provider = self.providers.provider(request.tier);
                    let verdict = match provider
                        .analyze(text, &request.history, &request.config)
                        .await
                    {
                        Ok(verdict) => compose_verdict(&request, &prescreen, verdict),
                        Err(e) => {
                            log::warn!(
                                "AI analysis failed on {} tier: {}",
                                request.tier,
                                e
                            );
                            FilterResult::ai_failure()
                        }
                    };
                    self.result_cache.store(&result_key, &verdict);
                    verdict
                }
            };
            verdict
        };

        // Stage 8: tracker writes land before the handler returns, then the
        // response cache is filled.
        let latency_ms = elapsed_ms(start);
        let outcome = RequestOutcome {
            caller_id: credential.user_id.clone(),
            blocked: result.blocked,
            cached: false,
            flags: result.flags.clone(),
            latency_ms,
            api: api_kind,
            api_error: result.flags.contains(&Flag::Error),
        };
        self.tracker.record(&outcome).await;

        if !ctx.no_cache {
            self.response_cache.store(&cache_key, &result);
        }

        Ok(PipelineOutcome {
            result,
            used_cache: false,
            used_ai,
            latency_ms,
            rate_limit: Some(decision),
        })
    }

    /// Tracker write for the cache-hit path, where no credential was
    /// validated: the caller id falls back to the IP-derived hash, which is
    /// identical to the credential's user id by construction.
    async fn track(
        &self,
        ip: &str,
        result: &FilterResult,
        cached: bool,
        api_error: bool,
        latency_ms: u64,
        api: ApiKind,
    ) {
        let outcome = RequestOutcome {
            caller_id: crate::auth::caller_id_for_ip(ip),
            blocked: result.blocked,
            cached,
            flags: result.flags.clone(),
            latency_ms,
            api,
            api_error,
        };
        self.tracker.record(&outcome).await;
    }
}

/// Merge the provider's verdict with pre-screen context into the final
/// result.
fn compose_verdict(
    request: &FilterRequest,
    prescreen: &crate::screening::PreScreenOutcome,
    verdict: crate::ai::AiVerdict,
) -> FilterResult {
    if !verdict.is_violation {
        let mut result = FilterResult::allowed();
        if !verdict.reason.is_empty() {
            result.reason = verdict.reason;
        }
        if request.config.return_filtered_message {
            result.filtered_content = request.text.clone();
        }
        return result;
    }

    // The model confirmed a violation; prefer its flags and reason, falling
    // back to the deterministic pre-screen findings.
    let flags = if verdict.flags.is_empty() {
        prescreen.flags.clone()
    } else {
        verdict.flags
    };
    let reason = if verdict.reason.is_empty() {
        prescreen
            .reason
            .clone()
            .unwrap_or_else(|| "Content violates moderation policy".to_string())
    } else {
        verdict.reason
    };

    let filtered_content = if request.config.return_filtered_message {
        verdict.filtered_content.or_else(|| {
            request
                .text
                .as_deref()
                .map(|text| redact::mask_spans(text, &prescreen.matches))
        })
    } else {
        None
    };

    FilterResult {
        blocked: true,
        flags,
        reason,
        filtered_content,
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

// ============================================================================
// Tests
// ============================================================================
