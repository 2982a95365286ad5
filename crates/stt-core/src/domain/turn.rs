//! Voice-agent turn state and conversational history.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The role of a message in a turn's conversational history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

impl MessageRole {
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "system" => Some(Self::System),
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One message in a turn machine's conversational history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryMessage {
    pub role: MessageRole,
    pub content: String,
}

/// Phase of the listen → think → speak voice-agent state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnPhase {
    Listening,
    Thinking,
    Speaking,
}

/// Reason a turn's speaking phase ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    Completed,
    BargeIn,
    Stopped,
}

/// One round of user utterance → assistant reply. At most one
/// non-listening turn is active per session at a time.
#[derive(Debug, Clone)]
pub struct VoiceTurn {
    pub turn_id: Uuid,
    pub phase: TurnPhase,
    pub started_at: f64,
    pub played_ms: f64,
}

impl VoiceTurn {
    #[must_use]
    pub fn new(turn_id: Uuid, started_at: f64) -> Self {
        Self {
            turn_id,
            phase: TurnPhase::Thinking,
            started_at,
            played_ms: 0.0,
        }
    }
}

/// Append-only conversational history, trimmed to `max_turns` user/
/// assistant pairs while always keeping the system message.
#[derive(Debug, Clone, Default)]
pub struct History {
    messages: Vec<HistoryMessage>,
}

impl History {
    #[must_use]
    pub fn new(system_prompt: Option<String>) -> Self {
        let messages = system_prompt
            .map(|content| {
                vec![HistoryMessage {
                    role: MessageRole::System,
                    content,
                }]
            })
            .unwrap_or_default();
        Self { messages }
    }

    pub fn push(&mut self, role: MessageRole, content: String) {
        self.messages.push(HistoryMessage { role, content });
    }

    #[must_use]
    pub fn messages(&self) -> &[HistoryMessage] {
        &self.messages
    }

    /// Drop the oldest user/assistant pairs until at most `max_turns`
    /// pairs remain, always keeping the system message (invariant 5).
    pub fn trim(&mut self, max_turns: usize) {
        let pair_count = self
            .messages
            .iter()
            .filter(|m| m.role != MessageRole::System)
            .count()
            / 2;
        if pair_count <= max_turns {
            return;
        }
        let excess_pairs = pair_count - max_turns;
        let mut dropped_pairs = 0;
        let mut keep = Vec::with_capacity(self.messages.len());
        let mut non_system_seen = 0;
        for msg in self.messages.drain(..) {
            if msg.role == MessageRole::System {
                keep.push(msg);
                continue;
            }
            if dropped_pairs < excess_pairs {
                non_system_seen += 1;
                if non_system_seen % 2 == 0 {
                    dropped_pairs += 1;
                }
                continue;
            }
            keep.push(msg);
        }
        self.messages = keep;
    }

    /// Clear everything except the system message (`reset_history`).
    pub fn reset(&mut self) {
        self.messages.retain(|m| m.role == MessageRole::System);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trim_keeps_system_message() {
        let mut h = History::new(Some("you are helpful".into()));
        for i in 0..5 {
            h.push(MessageRole::User, format!("user {i}"));
            h.push(MessageRole::Assistant, format!("assistant {i}"));
        }
        h.trim(2);
        assert_eq!(h.messages()[0].role, MessageRole::System);
        let non_system = h.messages().iter().filter(|m| m.role != MessageRole::System).count();
        assert_eq!(non_system, 4);
    }

    #[test]
    fn reset_clears_everything_but_system() {
        let mut h = History::new(Some("sys".into()));
        h.push(MessageRole::User, "hi".into());
        h.push(MessageRole::Assistant, "hello".into());
        h.reset();
        assert_eq!(h.messages().len(), 1);
        assert_eq!(h.messages()[0].role, MessageRole::System);
    }

    #[test]
    fn trim_is_noop_under_budget() {
        let mut h = History::new(None);
        h.push(MessageRole::User, "hi".into());
        h.push(MessageRole::Assistant, "hello".into());
        h.trim(10);
        assert_eq!(h.messages().len(), 2);
    }
}
