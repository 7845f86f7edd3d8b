use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::provider::{GenerationRequest, GenerationResponse, ModelClient, ProviderError, ToolCall};
use crate::stream::{parse_sse_line, Chunk, SseParsed};

const API_VERSION: &str = "2023-06-01";

/// Reference `ModelClient` implementation against an Anthropic-shaped
/// Messages API. Any OpenAI-compatible-but-Anthropic-framed backend (the
/// common shape among hosted clinical LLM gateways) can sit behind this by
/// pointing `base_url` at it.
pub struct AnthropicLikeClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl AnthropicLikeClient {
    pub fn new(api_key: String, base_url: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: base_url.unwrap_or_else(|| "https://api.anthropic.com".to_string()),
        }
    }
}

#[async_trait]
impl ModelClient for AnthropicLikeClient {
    fn name(&self) -> &str {
        "anthropic-like"
    }

    async fn generate(
        &self,
        req: &GenerationRequest,
        cancel: CancellationToken,
    ) -> Result<GenerationResponse, ProviderError> {
        if cancel.is_cancelled() {
            return Err(ProviderError::Cancelled);
        }

        let body = build_request_body(req, false);
        let url = format!("{}/v1/messages", self.base_url);

        debug!(model = %req.model, "sending request to model provider");

        let send = self
            .client
            .post(&url)
            .header("anthropic-version", API_VERSION)
            .header("x-api-key", &self.api_key)
            .header("content-type", "application/json")
            .json(&body)
            .send();

        let resp = tokio::select! {
            r = send => r?,
            _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
        };

        let status = resp.status().as_u16();
        if status == 429 {
            let retry = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(5000);
            return Err(ProviderError::RateLimited {
                retry_after_ms: retry,
            });
        }
        if status == 413 {
            return Err(ProviderError::ContextTooLarge(0));
        }
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "model provider error");
            return Err(ProviderError::Api {
                status,
                message: text,
            });
        }

        let api_resp: ApiResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        Ok(parse_response(api_resp))
    }

    async fn stream_generate(
        &self,
        req: &GenerationRequest,
        tx: mpsc::Sender<Chunk>,
        cancel: CancellationToken,
    ) -> Result<(), ProviderError> {
        if cancel.is_cancelled() {
            return Err(ProviderError::Cancelled);
        }

        let body = build_request_body(req, true);
        let url = format!("{}/v1/messages", self.base_url);

        debug!(model = %req.model, "sending streaming request to model provider");

        let send = self
            .client
            .post(&url)
            .header("anthropic-version", API_VERSION)
            .header("x-api-key", &self.api_key)
            .header("content-type", "application/json")
            .json(&body)
            .send();

        let resp = tokio::select! {
            r = send => r?,
            _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
        };

        let status = resp.status().as_u16();
        if status == 429 {
            let retry = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(5000);
            return Err(ProviderError::RateLimited {
                retry_after_ms: retry,
            });
        }
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "model provider streaming error");
            return Err(ProviderError::Api {
                status,
                message: text,
            });
        }

        process_stream(resp, tx, cancel).await;
        Ok(())
    }
}

fn build_request_body(req: &GenerationRequest, stream: bool) -> serde_json::Value {
    let messages: Vec<serde_json::Value> = if let Some(ref raw) = req.raw_messages {
        raw.clone()
    } else {
        req.messages
            .iter()
            .map(|m| {
                serde_json::json!({
                    "role": m.role,
                    "content": m.content,
                })
            })
            .collect()
    };

    let mut body = serde_json::json!({
        "model": req.model,
        "max_tokens": req.max_output_tokens,
        "temperature": req.temperature,
        "system": req.system_instruction,
        "messages": messages,
        "stream": stream,
    });

    if !req.tools.is_empty() {
        let tools: Vec<serde_json::Value> = req
            .tools
            .iter()
            .map(|t| {
                serde_json::json!({
                    "name": t.name,
                    "description": t.description,
                    "input_schema": t.parameters,
                })
            })
            .collect();
        body["tools"] = serde_json::Value::Array(tools);
    }

    body
}

fn parse_response(resp: ApiResponse) -> GenerationResponse {
    let mut text_parts: Vec<String> = Vec::new();
    let mut tool_calls: Vec<ToolCall> = Vec::new();

    for block in resp.content {
        match block {
            ContentBlock::Text { text } => text_parts.push(text),
            ContentBlock::ToolUse { id, name, input } => {
                tool_calls.push(ToolCall { id, name, input });
            }
            ContentBlock::Unknown => {}
        }
    }

    GenerationResponse {
        content: text_parts.join(""),
        model: resp.model,
        tokens_in: resp.usage.input_tokens,
        tokens_out: resp.usage.output_tokens,
        stop_reason: resp.stop_reason.unwrap_or_default(),
        tool_calls,
        grounding_urls: Vec::new(),
        incomplete: false,
    }
}

/// Byte-stream SSE parser for the Messages-API wire format. Mirrors the
/// event-by-event accumulation needed because `content_block_delta` frames
/// don't repeat the block type — it has to be tracked from the matching
/// `content_block_start`.
async fn process_stream(
    resp: reqwest::Response,
    tx: mpsc::Sender<Chunk>,
    cancel: CancellationToken,
) {
    use futures_util::StreamExt;

    let mut current_event = String::new();
    let mut current_block_type = String::new();
    let mut tool_use_id = String::new();
    let mut tool_use_name = String::new();
    let mut tool_use_input_json = String::new();
    let mut model = String::new();
    let mut tokens_in: u32 = 0;
    let mut tokens_out: u32 = 0;
    let mut stop_reason = String::new();
    let mut line_buf = String::new();
    let mut incomplete = false;

    let mut byte_stream = resp.bytes_stream();

    loop {
        let next = tokio::select! {
            n = byte_stream.next() => n,
            _ = cancel.cancelled() => {
                incomplete = true;
                None
            }
        };

        let Some(chunk) = next else { break };
        let chunk = match chunk {
            Ok(c) => c,
            Err(e) => {
                let _ = tx.send(Chunk::Error { message: e.to_string() }).await;
                return;
            }
        };

        let text = match std::str::from_utf8(&chunk) {
            Ok(t) => t,
            Err(_) => continue,
        };

        line_buf.push_str(text);
        let lines: Vec<&str> = line_buf.split('\n').collect();
        let (complete, remainder) = lines.split_at(lines.len() - 1);
        let remainder = remainder.first().unwrap_or(&"").to_string();

        for line in complete {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            if let Some(parsed) = parse_sse_line(line) {
                match parsed {
                    SseParsed::Event(ev) => current_event = ev,
                    SseParsed::Data(data) => {
                        if let Some(event) = parse_data_block(
                            &current_event,
                            &data,
                            &mut current_block_type,
                            &mut tool_use_id,
                            &mut tool_use_name,
                            &mut tool_use_input_json,
                            &mut model,
                            &mut tokens_in,
                            &mut tokens_out,
                            &mut stop_reason,
                        ) {
                            if tx.send(event).await.is_err() {
                                return;
                            }
                        }
                    }
                }
            }
        }

        line_buf = remainder;
    }

    let _ = tx
        .send(Chunk::Usage {
            tokens_in,
            tokens_out,
        })
        .await;
    let _ = tx
        .send(Chunk::End {
            model,
            stop_reason,
            incomplete,
        })
        .await;
}

#[allow(clippy::too_many_arguments)]
fn parse_data_block(
    event_type: &str,
    data: &str,
    current_block_type: &mut String,
    tool_use_id: &mut String,
    tool_use_name: &mut String,
    tool_use_input_json: &mut String,
    model: &mut String,
    tokens_in: &mut u32,
    tokens_out: &mut u32,
    stop_reason: &mut String,
) -> Option<Chunk> {
    match event_type {
        "message_start" => {
            if let Ok(msg) = serde_json::from_str::<MessageStart>(data) {
                *model = msg.message.model;
                *tokens_in = msg.message.usage.input_tokens;
            }
            None
        }

        "content_block_start" => {
            if let Ok(block_start) = serde_json::from_str::<ContentBlockStart>(data) {
                *current_block_type = block_start.content_block.block_type.clone();
                if block_start.content_block.block_type == "tool_use" {
                    *tool_use_id = block_start.content_block.id.unwrap_or_default();
                    *tool_use_name = block_start.content_block.name.unwrap_or_default();
                    tool_use_input_json.clear();
                }
            }
            None
        }

        "content_block_delta" => {
            if let Ok(delta) = serde_json::from_str::<ContentBlockDelta>(data) {
                match delta.delta.delta_type.as_str() {
                    "text_delta" => {
                        if let Some(text) = delta.delta.text {
                            return Some(Chunk::TextDelta { text });
                        }
                    }
                    "input_json_delta" => {
                        if let Some(partial) = delta.delta.partial_json {
                            tool_use_input_json.push_str(&partial);
                        }
                    }
                    other => {
                        debug!(delta_type = other, "unhandled delta type");
                    }
                }
            }
            None
        }

        "content_block_stop" => {
            if current_block_type == "tool_use" {
                let input = serde_json::from_str::<serde_json::Value>(tool_use_input_json)
                    .unwrap_or(serde_json::Value::Object(Default::default()));
                let event = Chunk::FunctionCall {
                    id: std::mem::take(tool_use_id),
                    name: std::mem::take(tool_use_name),
                    input,
                };
                tool_use_input_json.clear();
                current_block_type.clear();
                return Some(event);
            }
            current_block_type.clear();
            None
        }

        "message_delta" => {
            if let Ok(delta) = serde_json::from_str::<MessageDelta>(data) {
                *tokens_out = delta.usage.output_tokens;
                if let Some(reason) = delta.delta.stop_reason {
                    *stop_reason = reason;
                }
            }
            None
        }

        "error" => {
            warn!(data, "model provider stream error");
            Some(Chunk::Error {
                message: data.to_string(),
            })
        }

        _ => None,
    }
}

#[derive(Deserialize)]
struct ApiResponse {
    model: String,
    content: Vec<ContentBlock>,
    stop_reason: Option<String>,
    usage: Usage,
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Deserialize)]
struct Usage {
    input_tokens: u32,
    output_tokens: u32,
}

#[derive(Deserialize)]
struct MessageStart {
    message: MessageStartInner,
}

#[derive(Deserialize)]
struct MessageStartInner {
    model: String,
    usage: InputUsage,
}

#[derive(Deserialize)]
struct InputUsage {
    input_tokens: u32,
}

#[derive(Deserialize)]
struct ContentBlockStart {
    content_block: ContentBlockMeta,
}

#[derive(Deserialize)]
struct ContentBlockMeta {
    #[serde(rename = "type")]
    block_type: String,
    id: Option<String>,
    name: Option<String>,
}

#[derive(Deserialize)]
struct ContentBlockDelta {
    delta: DeltaContent,
}

#[derive(Deserialize)]
struct DeltaContent {
    #[serde(rename = "type")]
    delta_type: String,
    text: Option<String>,
    partial_json: Option<String>,
}

#[derive(Deserialize)]
struct MessageDelta {
    delta: MessageDeltaInner,
    usage: OutputUsage,
}

#[derive(Deserialize)]
struct MessageDeltaInner {
    stop_reason: Option<String>,
}

#[derive(Deserialize)]
struct OutputUsage {
    output_tokens: u32,
}
