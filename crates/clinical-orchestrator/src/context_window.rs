use std::collections::HashSet;

use clinical_core::config::ContextWindowConfig;
use clinical_sessions::Message;

/// `ceil(chars/4)` substitute token estimator, used everywhere a quick
/// token count is needed without a real tokenizer.
pub fn estimate_tokens(text: &str) -> usize {
    (text.chars().count() + 3) / 4
}

fn estimate_message_tokens(m: &Message) -> usize {
    estimate_tokens(&m.content)
}

fn estimate_history_tokens(history: &[Message]) -> usize {
    history.iter().map(estimate_message_tokens).sum()
}

/// Produces a bounded history for the next generation call.
pub struct ContextWindowManager {
    config: ContextWindowConfig,
}

impl ContextWindowManager {
    pub fn new(config: ContextWindowConfig) -> Self {
        Self { config }
    }

    /// Compress `history` against `current_user_message` if it exceeds
    /// `trigger_tokens`. Always preserves ordering and never duplicates a
    /// message. Returns the (possibly unchanged) history plus whether
    /// compression ran.
    pub fn compress(&self, history: &[Message], current_user_message: &str) -> CompressedHistory {
        let estimate = estimate_history_tokens(history);
        if estimate <= self.config.trigger_tokens || history.is_empty() {
            return CompressedHistory {
                messages: history.to_vec(),
                was_compressed: false,
                estimated_tokens: estimate,
            };
        }

        self.compress_with_target(history, current_user_message, self.config.target_tokens)
    }

    /// Re-run compression with a tighter token budget — used for the single
    /// `ContextTooLarge` retry in the turn pipeline's failure handling.
    pub fn compress_with_target(
        &self,
        history: &[Message],
        current_user_message: &str,
        target_tokens: usize,
    ) -> CompressedHistory {
        let k1 = self.config.initial_framing_messages.min(history.len());
        let k2 = (2 * self.config.max_exchanges).min(history.len());

        let mut kept_indices: HashSet<usize> = HashSet::new();
        for i in 0..k1 {
            kept_indices.insert(i);
        }
        let tail_start = history.len().saturating_sub(k2);
        for i in tail_start..history.len() {
            kept_indices.insert(i);
        }

        let mut kept_tokens: usize = kept_indices
            .iter()
            .map(|&i| estimate_message_tokens(&history[i]))
            .sum();

        let query_terms = terms(current_user_message);

        // Middle messages, ranked by token-overlap relevance against the
        // current user message (a cosine-free fallback).
        let mut middle: Vec<(usize, f64)> = (k1..tail_start)
            .filter(|i| !kept_indices.contains(i))
            .map(|i| (i, overlap_score(&query_terms, &history[i].content)))
            .collect();
        middle.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        for (i, _score) in middle {
            if kept_tokens >= target_tokens {
                break;
            }
            kept_indices.insert(i);
            kept_tokens += estimate_message_tokens(&history[i]);
        }

        let mut ordered: Vec<usize> = kept_indices.into_iter().collect();
        ordered.sort_unstable();

        let messages: Vec<Message> = ordered.into_iter().map(|i| history[i].clone()).collect();
        let estimated_tokens = messages.iter().map(estimate_message_tokens).sum();

        CompressedHistory {
            messages,
            was_compressed: true,
            estimated_tokens,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompressedHistory {
    pub messages: Vec<Message>,
    pub was_compressed: bool,
    pub estimated_tokens: usize,
}

fn terms(text: &str) -> HashSet<String> {
    text.split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
        .filter(|w| !w.is_empty())
        .collect()
}

fn overlap_score(query_terms: &HashSet<String>, text: &str) -> f64 {
    if query_terms.is_empty() {
        return 0.0;
    }
    let candidate_terms = terms(text);
    if candidate_terms.is_empty() {
        return 0.0;
    }
    let overlap = query_terms.intersection(&candidate_terms).count();
    overlap as f64 / query_terms.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use clinical_sessions::Message;

    fn msg(role_user: bool, content: &str, ts: &str) -> Message {
        if role_user {
            Message::user(content, ts)
        } else {
            Message::model(content, "socratico", ts)
        }
    }

    #[test]
    fn passes_through_under_trigger() {
        let mgr = ContextWindowManager::new(ContextWindowConfig {
            max_exchanges: 6,
            trigger_tokens: 50_000,
            target_tokens: 30_000,
            initial_framing_messages: 4,
        });
        let history = vec![msg(true, "hello", "t1"), msg(false, "hi there", "t2")];
        let result = mgr.compress(&history, "hello");
        assert!(!result.was_compressed);
        assert_eq!(result.messages.len(), 2);
    }

    #[test]
    fn compresses_over_trigger_and_keeps_last_user_message() {
        let mgr = ContextWindowManager::new(ContextWindowConfig {
            max_exchanges: 2,
            trigger_tokens: 10,
            target_tokens: 8,
            initial_framing_messages: 2,
        });

        let long_text = "a".repeat(200);
        let mut history = Vec::new();
        for i in 0..20 {
            history.push(msg(i % 2 == 0, &long_text, &format!("t{i}")));
        }
        let last_user_content = "final question about anxiety treatment";
        history.push(Message::user(last_user_content, "t-final"));

        let result = mgr.compress(&history, last_user_content);
        assert!(result.was_compressed);
        assert_eq!(
            result.messages.last().unwrap().content,
            last_user_content
        );
        assert!(result.messages.first().is_some());
        // Never duplicates: all kept indices map to distinct message ids.
        let mut ids: Vec<&str> = result.messages.iter().map(|m| m.id.as_str()).collect();
        ids.sort_unstable();
        let before = ids.len();
        ids.dedup();
        assert_eq!(before, ids.len());
    }

    #[test]
    fn ordering_is_preserved_after_compression() {
        let mgr = ContextWindowManager::new(ContextWindowConfig {
            max_exchanges: 2,
            trigger_tokens: 10,
            target_tokens: 8,
            initial_framing_messages: 2,
        });
        let long_text = "word ".repeat(100);
        let history: Vec<Message> = (0..16)
            .map(|i| msg(i % 2 == 0, &long_text, &format!("t{i}")))
            .collect();
        let result = mgr.compress(&history, "word");

        let mut last_ts: Option<&str> = None;
        for m in &result.messages {
            if let Some(prev) = last_ts {
                assert!(prev <= m.timestamp.as_str());
            }
            last_ts = Some(&m.timestamp);
        }
    }
}
