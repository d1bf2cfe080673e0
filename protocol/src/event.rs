use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// Prefixes the server puts in front of chat lines, one per chat channel.
pub const CHAT_CHANNELS: [&str; 7] = [
    "(Group)",
    "(Vehicle)",
    "(Unknown)",
    "(Global)",
    "(Side)",
    "(Command)",
    "(Direct)",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// Generic server output: joins, kicks, BattlEye notices and so on.
    Event,
    Chat,
}

impl EventKind {
    pub fn classify(payload: &str) -> Self {
        if CHAT_CHANNELS
            .iter()
            .any(|channel| payload.starts_with(channel))
        {
            EventKind::Chat
        } else {
            EventKind::Event
        }
    }
}

/// A message pushed by the server, as handed to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub timestamp: SystemTime,
    pub kind: EventKind,
    pub payload: String,
}

impl Event {
    /// Classifies `payload` and stamps it with the current time.
    pub fn new(payload: impl Into<String>) -> Self {
        let payload = payload.into();
        Self {
            timestamp: SystemTime::now(),
            kind: EventKind::classify(&payload),
            payload,
        }
    }

    pub fn is_chat(&self) -> bool {
        self.kind == EventKind::Chat
    }
}
