use async_trait::async_trait;
use common::errors::{RemedyError, RemedyResult};
use infra::Backoff;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Request to the external text-generation collaborator.
#[derive(Debug, Clone, Serialize)]
pub struct FixSynthesisRequest {
    pub issue_description: String,
    pub code_context: String,
    pub strategy_hint: String,
}

/// Candidate fix text plus the model's own confidence report.
#[derive(Debug, Clone, Deserialize)]
pub struct FixSynthesisResponse {
    pub fix_text: String,
    pub confidence: f64,
}

/// Fix-text synthesis boundary. The pipeline never depends on what is
/// behind it; transport failures surface as `RemedyError::Provider`.
#[async_trait]
pub trait FixTextProvider: Send + Sync {
    async fn synthesize(&self, request: &FixSynthesisRequest) -> RemedyResult<FixSynthesisResponse>;
}

/// HTTP-backed provider with bounded retry and exponential backoff on
/// transient failures. On exhaustion the caller degrades to a non-model
/// strategy; this type never panics the pipeline.
pub struct HttpFixProvider {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    max_retries: u32,
    backoff: Backoff,
}

impl HttpFixProvider {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
        max_retries: u32,
    ) -> RemedyResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RemedyError::Provider(format!("client build: {e}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key,
            max_retries,
            backoff: Backoff::default(),
        })
    }

    async fn call_once(&self, request: &FixSynthesisRequest) -> RemedyResult<FixSynthesisResponse> {
        let mut builder = self.client.post(&self.endpoint).json(request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = builder
            .send()
            .await
            .map_err(|e| RemedyError::Provider(format!("request failed: {e}")))?;

        let status = response.status();
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(RemedyError::TransientIo(format!(
                "provider returned {status}"
            )));
        }
        if !status.is_success() {
            return Err(RemedyError::Provider(format!(
                "provider returned {status}"
            )));
        }

        response
            .json::<FixSynthesisResponse>()
            .await
            .map_err(|e| RemedyError::Provider(format!("bad response body: {e}")))
    }
}

#[async_trait]
impl FixTextProvider for HttpFixProvider {
    async fn synthesize(&self, request: &FixSynthesisRequest) -> RemedyResult<FixSynthesisResponse> {
        let mut attempt = 0u32;
        loop {
            match self.call_once(request).await {
                Ok(mut response) => {
                    response.confidence = response.confidence.clamp(0.0, 1.0);
                    return Ok(response);
                }
                Err(e) if e.is_retriable() && attempt < self.max_retries => {
                    let delay = self.backoff.delay_for(attempt);
                    attempt += 1;
                    debug!(attempt, delay_ms = delay.as_millis() as u64, error = %e, "retrying provider call");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    warn!(attempts = attempt + 1, error = %e, "provider call exhausted");
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Provider that fails transiently N times before succeeding, to
    /// exercise the retry contract without a network.
    struct FlakyProvider {
        failures: AtomicU32,
        inner_retries: u32,
    }

    #[async_trait]
    impl FixTextProvider for FlakyProvider {
        async fn synthesize(
            &self,
            request: &FixSynthesisRequest,
        ) -> RemedyResult<FixSynthesisResponse> {
            // Mirrors HttpFixProvider's loop over a fallible transport
            let mut attempt = 0u32;
            loop {
                let remaining = self.failures.load(Ordering::SeqCst);
                if remaining == 0 {
                    return Ok(FixSynthesisResponse {
                        fix_text: format!("fixed: {}", request.strategy_hint),
                        confidence: 0.9,
                    });
                }
                self.failures.fetch_sub(1, Ordering::SeqCst);
                let err = RemedyError::TransientIo("synthetic".into());
                if attempt >= self.inner_retries {
                    return Err(err);
                }
                attempt += 1;
            }
        }
    }

    fn request() -> FixSynthesisRequest {
        FixSynthesisRequest {
            issue_description: "null dereference".into(),
            code_context: "x.unwrap()".into(),
            strategy_hint: "model-assisted".into(),
        }
    }

    #[tokio::test]
    async fn transient_failures_are_retried_to_success() {
        let provider = FlakyProvider {
            failures: AtomicU32::new(2),
            inner_retries: 3,
        };
        let response = provider.synthesize(&request()).await.expect("synthesize");
        assert_eq!(response.confidence, 0.9);
    }

    #[tokio::test]
    async fn exhausted_retries_surface_the_error() {
        let provider = FlakyProvider {
            failures: AtomicU32::new(10),
            inner_retries: 2,
        };
        let err = provider.synthesize(&request()).await.expect_err("must fail");
        assert!(err.is_retriable(), "transient error class preserved: {err}");
    }
}
