/// A single unit of a streamed generation.
#[derive(Debug, Clone)]
pub enum Chunk {
    /// Incremental text content from the model.
    TextDelta { text: String },

    /// The model wants to call a tool.
    FunctionCall {
        id: String,
        name: String,
        input: serde_json::Value,
    },

    /// A source URL the model grounded its answer in.
    GroundingRef { url: String },

    /// Token accounting, emitted once the full response is known.
    Usage { tokens_in: u32, tokens_out: u32 },

    /// Stream completed. `incomplete` is true when the caller cancelled
    /// the call before the model finished — `stop_reason` is then
    /// provider-specific (often empty).
    End {
        model: String,
        stop_reason: String,
        incomplete: bool,
    },

    /// Error during streaming; always followed by no further chunks.
    Error { message: String },
}

/// Parse a single SSE line (`event: <type>` or `data: <json>`), the same
/// framing used both when consuming upstream provider streams and when
/// emitting SSE to gateway clients.
pub fn parse_sse_line(line: &str) -> Option<SseParsed> {
    if let Some(event_type) = line.strip_prefix("event: ") {
        Some(SseParsed::Event(event_type.to_string()))
    } else {
        line.strip_prefix("data: ")
            .map(|data| SseParsed::Data(data.to_string()))
    }
}

#[derive(Debug)]
pub enum SseParsed {
    Event(String),
    Data(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_event_and_data_lines() {
        match parse_sse_line("event: content_block_delta") {
            Some(SseParsed::Event(e)) => assert_eq!(e, "content_block_delta"),
            other => panic!("unexpected: {other:?}"),
        }
        match parse_sse_line("data: {\"a\":1}") {
            Some(SseParsed::Data(d)) => assert_eq!(d, "{\"a\":1}"),
            other => panic!("unexpected: {other:?}"),
        }
        assert!(parse_sse_line("").is_none());
    }
}
