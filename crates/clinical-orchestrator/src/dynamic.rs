//! Tool-aware orchestration layer. Active only when advanced
//! orchestration is enabled and standard routing hasn't been forced by a
//! risk override. Tracks tool continuity across turns, refreshes a
//! dominant-topic estimate on a fixed cadence, and caps the tools offered to
//! the model by a session-wide budget with LRU eviction.

use std::collections::VecDeque;

use clinical_core::types::AgentKind;

use crate::router_intent::{IntentRouter, RoutingDecision, RoutingInput};

const LOCK_IN_CONFIDENCE: f64 = 0.75;

/// One turn's worth of tool usage, tracked for the continuity lookback.
#[derive(Debug, Clone)]
pub struct ToolUsageRecord {
    pub turn_index: usize,
    pub tool_name: String,
}

/// Session-scoped state the dynamic orchestrator carries across turns.
/// Owned by the caller and threaded through each `decide` call.
#[derive(Debug, Clone, Default)]
pub struct DynamicState {
    pub tool_history: VecDeque<ToolUsageRecord>,
    pub dominant_topic: Option<String>,
    pub turns_since_topic_refresh: u32,
    /// Unique tool names used this session, ordered oldest-used-first for
    /// LRU eviction once the session budget is hit.
    pub tool_budget_lru: VecDeque<String>,
}

impl DynamicState {
    pub fn record_tools(&mut self, turn_index: usize, tools: &[String], session_budget: usize) {
        for tool in tools {
            self.tool_history.push_back(ToolUsageRecord {
                turn_index,
                tool_name: tool.clone(),
            });
            self.touch_budget(tool, session_budget);
        }
    }

    fn touch_budget(&mut self, tool: &str, session_budget: usize) {
        if let Some(pos) = self.tool_budget_lru.iter().position(|t| t == tool) {
            self.tool_budget_lru.remove(pos);
        }
        self.tool_budget_lru.push_back(tool.to_string());
        while self.tool_budget_lru.len() > session_budget {
            self.tool_budget_lru.pop_front();
        }
    }

    /// Tools used within the trailing `lookback` turns, most recent first.
    pub fn recent_tools(&self, current_turn: usize, lookback: u32) -> Vec<String> {
        let floor = current_turn.saturating_sub(lookback as usize);
        self.tool_history
            .iter()
            .rev()
            .filter(|r| r.turn_index >= floor)
            .map(|r| r.tool_name.clone())
            .collect()
    }
}

pub struct DynamicOrchestrator {
    router: IntentRouter,
    pub tool_continuity_lookback_turns: u32,
    pub dominant_topic_window_turns: u32,
    pub session_tool_budget: usize,
    pub hybrid_tool_cap: usize,
}

impl DynamicOrchestrator {
    pub fn new(router: IntentRouter) -> Self {
        Self {
            router,
            tool_continuity_lookback_turns: clinical_core::config::TOOL_CONTINUITY_LOOKBACK_TURNS,
            dominant_topic_window_turns: clinical_core::config::DOMINANT_TOPIC_WINDOW_TURNS,
            session_tool_budget: clinical_core::config::SESSION_TOOL_BUDGET,
            hybrid_tool_cap: clinical_core::config::HYBRID_TOOL_CAP,
        }
    }

    /// Decide the active agent and the tool set to offer for this turn.
    /// Falls back to the baseline `IntentRouter` whenever classifier
    /// confidence doesn't clear the lock-in threshold.
    pub fn decide(
        &self,
        input: &RoutingInput,
        state: &mut DynamicState,
        current_turn: usize,
        candidate_tools_by_agent: impl Fn(AgentKind) -> Vec<String>,
    ) -> (RoutingDecision, Vec<String>) {
        state.turns_since_topic_refresh += 1;
        if state.turns_since_topic_refresh >= self.dominant_topic_window_turns {
            state.dominant_topic = dominant_topic_from_scores(input.classifier_scores);
            state.turns_since_topic_refresh = 0;
        }

        let decision = self.router.route(input);

        let tools = if decision.confidence >= LOCK_IN_CONFIDENCE {
            let continuity = state.recent_tools(current_turn, self.tool_continuity_lookback_turns);
            let candidates = candidate_tools_by_agent(decision.agent);
            self.merge_tools(continuity, candidates)
        } else {
            // Below the lock-in threshold: don't commit to a tool plan,
            // offer only the target agent's baseline tool set.
            candidate_tools_by_agent(decision.agent)
                .into_iter()
                .take(self.hybrid_tool_cap)
                .collect()
        };

        state.record_tools(current_turn, &tools, self.session_tool_budget);
        (decision, tools)
    }

    /// Prioritized-union merge of carried-over tools and the new agent's
    /// candidate tools, capped at `hybrid_tool_cap`. Continuity tools win
    /// ties since they represent an in-flight workflow.
    fn merge_tools(&self, continuity: Vec<String>, candidates: Vec<String>) -> Vec<String> {
        let mut merged = Vec::new();
        for t in continuity {
            if !merged.contains(&t) {
                merged.push(t);
            }
            if merged.len() >= self.hybrid_tool_cap {
                return merged;
            }
        }
        for t in candidates {
            if !merged.contains(&t) {
                merged.push(t);
            }
            if merged.len() >= self.hybrid_tool_cap {
                break;
            }
        }
        merged
    }
}

fn dominant_topic_from_scores(scores: &[(AgentKind, f64)]) -> Option<String> {
    scores
        .iter()
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(agent, _)| agent.as_str().to_string())
}
