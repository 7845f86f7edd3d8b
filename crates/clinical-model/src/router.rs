use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::provider::{GenerationRequest, GenerationResponse, ModelClient, ProviderError};
use crate::stream::Chunk;

/// A provider entry in priority order, with a retry budget of its own.
pub struct ModelSlot {
    pub client: Box<dyn ModelClient>,
    pub max_retries: u32,
}

impl ModelSlot {
    pub fn new(client: Box<dyn ModelClient>, max_retries: u32) -> Self {
        Self { client, max_retries }
    }
}

/// Routes generation requests across model providers in priority order,
/// retrying within a slot before failing over to the next one.
///
/// `RateLimited` never triggers a same-slot retry — its backoff is the
/// caller's job; every other error
/// gets jittered backoff between attempts.
pub struct ModelRouter {
    slots: Vec<ModelSlot>,
}

impl ModelRouter {
    pub fn new(slots: Vec<ModelSlot>) -> Self {
        assert!(!slots.is_empty(), "ModelRouter requires at least one slot");
        Self { slots }
    }
}

#[async_trait]
impl ModelClient for ModelRouter {
    fn name(&self) -> &str {
        "router"
    }

    async fn generate(
        &self,
        req: &GenerationRequest,
        cancel: CancellationToken,
    ) -> Result<GenerationResponse, ProviderError> {
        let mut last_err: Option<ProviderError> = None;

        for slot in &self.slots {
            if cancel.is_cancelled() {
                return Err(ProviderError::Cancelled);
            }
            let name = slot.client.name();

            for attempt in 0..=slot.max_retries {
                match slot.client.generate(req, cancel.clone()).await {
                    Ok(resp) => {
                        if attempt > 0 {
                            info!(provider = %name, attempt, "generation succeeded after retry");
                        }
                        return Ok(resp);
                    }
                    Err(e) => {
                        warn!(provider = %name, attempt, err = %e, "model client generate failed");

                        if matches!(e, ProviderError::RateLimited { .. } | ProviderError::Cancelled) {
                            last_err = Some(e);
                            break;
                        }

                        last_err = Some(e);

                        if attempt < slot.max_retries {
                            let backoff_ms = 200 * (attempt as u64 + 1) + jitter_ms(attempt);
                            tokio::time::sleep(tokio::time::Duration::from_millis(backoff_ms))
                                .await;
                        }
                    }
                }
            }

            info!(provider = %name, "slot exhausted, trying next provider");
        }

        Err(last_err.unwrap_or_else(|| ProviderError::Unavailable("all providers failed".into())))
    }

    async fn stream_generate(
        &self,
        req: &GenerationRequest,
        tx: mpsc::Sender<Chunk>,
        cancel: CancellationToken,
    ) -> Result<(), ProviderError> {
        let mut last_err: Option<ProviderError> = None;

        for slot in &self.slots {
            if cancel.is_cancelled() {
                return Err(ProviderError::Cancelled);
            }
            let name = slot.client.name();

            for attempt in 0..=slot.max_retries {
                match slot
                    .client
                    .stream_generate(req, tx.clone(), cancel.clone())
                    .await
                {
                    Ok(()) => {
                        if attempt > 0 {
                            info!(provider = %name, attempt, "stream succeeded after retry");
                        }
                        return Ok(());
                    }
                    Err(e) => {
                        warn!(provider = %name, attempt, err = %e, "model client stream failed");

                        if matches!(e, ProviderError::RateLimited { .. } | ProviderError::Cancelled) {
                            last_err = Some(e);
                            break;
                        }

                        last_err = Some(e);

                        if attempt < slot.max_retries {
                            let backoff_ms = 200 * (attempt as u64 + 1) + jitter_ms(attempt);
                            tokio::time::sleep(tokio::time::Duration::from_millis(backoff_ms))
                                .await;
                        }
                    }
                }
            }

            info!(provider = %name, "stream slot exhausted, trying next provider");
        }

        Err(last_err.unwrap_or_else(|| ProviderError::Unavailable("all providers failed".into())))
    }
}

/// Small deterministic jitter so retries across concurrent sessions don't
/// all land on the same backoff boundary.
fn jitter_ms(attempt: u32) -> u64 {
    (attempt as u64 * 37) % 100
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ModelMessage;

    struct AlwaysFail;

    #[async_trait]
    impl ModelClient for AlwaysFail {
        fn name(&self) -> &str {
            "always-fail"
        }
        async fn generate(
            &self,
            _req: &GenerationRequest,
            _cancel: CancellationToken,
        ) -> Result<GenerationResponse, ProviderError> {
            Err(ProviderError::Unavailable("intentional failure".into()))
        }
    }

    struct AlwaysOk;

    #[async_trait]
    impl ModelClient for AlwaysOk {
        fn name(&self) -> &str {
            "always-ok"
        }
        async fn generate(
            &self,
            req: &GenerationRequest,
            _cancel: CancellationToken,
        ) -> Result<GenerationResponse, ProviderError> {
            Ok(GenerationResponse {
                content: "ok".to_string(),
                model: req.model.clone(),
                tokens_in: 1,
                tokens_out: 1,
                stop_reason: "stop".to_string(),
                tool_calls: Vec::new(),
                grounding_urls: Vec::new(),
                incomplete: false,
            })
        }
    }

    struct AlwaysRateLimited;

    #[async_trait]
    impl ModelClient for AlwaysRateLimited {
        fn name(&self) -> &str {
            "always-rate-limited"
        }
        async fn generate(
            &self,
            _req: &GenerationRequest,
            _cancel: CancellationToken,
        ) -> Result<GenerationResponse, ProviderError> {
            Err(ProviderError::RateLimited { retry_after_ms: 10 })
        }
    }

    fn dummy_request() -> GenerationRequest {
        let mut req = GenerationRequest::new("test-model", "You are a test.");
        req.messages.push(ModelMessage::user("hello"));
        req
    }

    #[tokio::test]
    async fn router_falls_back_to_second_provider() {
        let router = ModelRouter::new(vec![
            ModelSlot::new(Box::new(AlwaysFail), 0),
            ModelSlot::new(Box::new(AlwaysOk), 0),
        ]);

        let resp = router
            .generate(&dummy_request(), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(resp.content, "ok");
    }

    #[tokio::test]
    async fn router_errors_when_all_fail() {
        let router = ModelRouter::new(vec![
            ModelSlot::new(Box::new(AlwaysFail), 0),
            ModelSlot::new(Box::new(AlwaysFail), 0),
        ]);

        let result = router.generate(&dummy_request(), CancellationToken::new()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn rate_limited_skips_retries_within_slot() {
        let router = ModelRouter::new(vec![
            ModelSlot::new(Box::new(AlwaysRateLimited), 5),
            ModelSlot::new(Box::new(AlwaysOk), 0),
        ]);

        let resp = router
            .generate(&dummy_request(), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(resp.content, "ok");
    }

    #[tokio::test]
    async fn cancelled_token_short_circuits() {
        let router = ModelRouter::new(vec![ModelSlot::new(Box::new(AlwaysOk), 0)]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = router.generate(&dummy_request(), cancel).await;
        assert!(matches!(result, Err(ProviderError::Cancelled)));
    }
}
