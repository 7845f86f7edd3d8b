pub mod anthropic_like;
pub mod mock;
pub mod provider;
pub mod router;
pub mod stream;

pub use anthropic_like::AnthropicLikeClient;
pub use mock::{MockModelClient, ProviderErrorKind, Scripted};
pub use provider::{
    ChatHandle, GenerationRequest, GenerationResponse, ModelClient, ModelMessage, ModelRole,
    ProviderError, SafetyCategory, SafetySetting, ToolCall, ToolDeclaration,
};
pub use router::{ModelRouter, ModelSlot};
pub use stream::{parse_sse_line, Chunk, SseParsed};
