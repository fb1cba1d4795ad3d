use serde::{Deserialize, Serialize};

/// Where a session is in its lifecycle.
///
/// The pipeline states double as the turn lock: while a session is in one of
/// them, no other turn may begin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// No persona loaded yet
    Idle,
    /// Persona loaded, waiting for input
    Ready,
    Transcribing,
    Retrieving,
    Generating,
    Synthesizing,
    /// Terminal
    Stopped,
}

impl SessionState {
    /// True while a turn is in flight.
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            Self::Transcribing | Self::Retrieving | Self::Generating | Self::Synthesizing
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Ready => "ready",
            Self::Transcribing => "transcribing",
            Self::Retrieving => "retrieving",
            Self::Generating => "generating",
            Self::Synthesizing => "synthesizing",
            Self::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Phase indicator shown to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusValue {
    Ready,
    Listening,
    Thinking,
    Speaking,
}

impl StatusValue {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::Listening => "listening",
            Self::Thinking => "thinking",
            Self::Speaking => "speaking",
        }
    }
}
