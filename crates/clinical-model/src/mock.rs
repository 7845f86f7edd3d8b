use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::provider::{GenerationRequest, GenerationResponse, ModelClient, ProviderError};
use crate::stream::Chunk;

/// A scripted response or error a test wants `MockModelClient` to return,
/// consumed in FIFO order — one script entry per call to `generate`.
pub enum Scripted {
    Response(GenerationResponse),
    Chunks(Vec<Chunk>),
    Error(ProviderErrorKind),
}

/// Error-kind surface exposed to test authors without requiring
/// `ProviderError` to implement `Clone`.
#[derive(Debug, Clone)]
pub enum ProviderErrorKind {
    RateLimited { retry_after_ms: u64 },
    ContextTooLarge(usize),
    Transient(String),
    InvalidRequest(String),
    Cancelled,
}

impl From<ProviderErrorKind> for ProviderError {
    fn from(k: ProviderErrorKind) -> Self {
        match k {
            ProviderErrorKind::RateLimited { retry_after_ms } => {
                ProviderError::RateLimited { retry_after_ms }
            }
            ProviderErrorKind::ContextTooLarge(n) => ProviderError::ContextTooLarge(n),
            ProviderErrorKind::Transient(m) => ProviderError::Transient(m),
            ProviderErrorKind::InvalidRequest(m) => ProviderError::InvalidRequest(m),
            ProviderErrorKind::Cancelled => ProviderError::Cancelled,
        }
    }
}

/// Deterministic, scriptable `ModelClient` for orchestrator tests. Each
/// call to `generate`/`stream_generate` consumes the next queued
/// `Scripted` entry; once the queue is empty it returns a generic
/// default response rather than panicking, so tests that don't care about
/// exact call counts still pass.
pub struct MockModelClient {
    script: Mutex<Vec<Scripted>>,
    pub calls: Mutex<Vec<GenerationRequest>>,
}

impl MockModelClient {
    pub fn new(script: Vec<Scripted>) -> Self {
        Self {
            script: Mutex::new(script),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn record(&self, req: &GenerationRequest) {
        self.calls.lock().unwrap().push(req.clone());
    }

    fn next_scripted(&self) -> Option<Scripted> {
        let mut script = self.script.lock().unwrap();
        if script.is_empty() {
            None
        } else {
            Some(script.remove(0))
        }
    }
}

fn default_response(model: &str) -> GenerationResponse {
    GenerationResponse {
        content: "mock response".to_string(),
        model: model.to_string(),
        tokens_in: 10,
        tokens_out: 10,
        stop_reason: "stop".to_string(),
        tool_calls: Vec::new(),
        grounding_urls: Vec::new(),
        incomplete: false,
    }
}

#[async_trait]
impl ModelClient for MockModelClient {
    fn name(&self) -> &str {
        "mock"
    }

    async fn generate(
        &self,
        req: &GenerationRequest,
        cancel: CancellationToken,
    ) -> Result<GenerationResponse, ProviderError> {
        self.record(req);
        if cancel.is_cancelled() {
            return Err(ProviderError::Cancelled);
        }
        match self.next_scripted() {
            Some(Scripted::Response(resp)) => Ok(resp),
            Some(Scripted::Chunks(chunks)) => Ok(collapse_chunks(&req.model, chunks)),
            Some(Scripted::Error(kind)) => Err(kind.into()),
            None => Ok(default_response(&req.model)),
        }
    }

    async fn stream_generate(
        &self,
        req: &GenerationRequest,
        tx: mpsc::Sender<Chunk>,
        cancel: CancellationToken,
    ) -> Result<(), ProviderError> {
        self.record(req);
        if cancel.is_cancelled() {
            return Err(ProviderError::Cancelled);
        }
        match self.next_scripted() {
            Some(Scripted::Chunks(chunks)) => {
                for chunk in chunks {
                    if cancel.is_cancelled() {
                        let _ = tx
                            .send(Chunk::End {
                                model: req.model.clone(),
                                stop_reason: String::new(),
                                incomplete: true,
                            })
                            .await;
                        return Ok(());
                    }
                    if tx.send(chunk).await.is_err() {
                        return Ok(());
                    }
                }
                Ok(())
            }
            Some(Scripted::Response(resp)) => {
                let _ = tx
                    .send(Chunk::TextDelta {
                        text: resp.content,
                    })
                    .await;
                let _ = tx
                    .send(Chunk::End {
                        model: resp.model,
                        stop_reason: resp.stop_reason,
                        incomplete: resp.incomplete,
                    })
                    .await;
                Ok(())
            }
            Some(Scripted::Error(kind)) => Err(kind.into()),
            None => {
                let _ = tx
                    .send(Chunk::TextDelta {
                        text: "mock response".to_string(),
                    })
                    .await;
                let _ = tx
                    .send(Chunk::End {
                        model: req.model.clone(),
                        stop_reason: "stop".to_string(),
                        incomplete: false,
                    })
                    .await;
                Ok(())
            }
        }
    }
}

fn collapse_chunks(model: &str, chunks: Vec<Chunk>) -> GenerationResponse {
    let mut content = String::new();
    let mut tool_calls = Vec::new();
    let mut grounding_urls = Vec::new();
    let mut tokens_in = 0;
    let mut tokens_out = 0;
    let mut stop_reason = String::new();
    let mut incomplete = false;

    for chunk in chunks {
        match chunk {
            Chunk::TextDelta { text } => content.push_str(&text),
            Chunk::FunctionCall { id, name, input } => {
                tool_calls.push(crate::provider::ToolCall { id, name, input })
            }
            Chunk::GroundingRef { url } => grounding_urls.push(url),
            Chunk::Usage {
                tokens_in: ti,
                tokens_out: to,
            } => {
                tokens_in = ti;
                tokens_out = to;
            }
            Chunk::End {
                stop_reason: sr,
                incomplete: inc,
                ..
            } => {
                stop_reason = sr;
                incomplete = inc;
            }
            Chunk::Error { .. } => {}
        }
    }

    GenerationResponse {
        content,
        model: model.to_string(),
        tokens_in,
        tokens_out,
        stop_reason,
        tool_calls,
        grounding_urls,
        incomplete,
    }
}
