pub mod context_window;
pub mod core;
pub mod dynamic;
pub mod entities;
pub mod error;
pub mod metadata;
pub mod registry;
pub mod risk;
pub mod router_intent;

pub use context_window::{CompressedHistory, ContextWindowManager};
pub use core::{ConversationCore, SendMessageOutcome, SendMessageRequest};
pub use dynamic::{DynamicOrchestrator, DynamicState};
pub use entities::{Entity, EntityExtractor, EntityType, ExtractionResult};
pub use error::{OrchestratorError, Result};
pub use metadata::{MetadataCollector, OperationalMetadata};
pub use registry::AgentRegistry;
pub use risk::{EdgeCaseDetector, EdgeCaseOutcome, StressSignal};
pub use router_intent::{IntentRouter, RoutingDecision, RoutingInput, RoutingReason};
