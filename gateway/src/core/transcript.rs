//! Conversation transcript types.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Who said an utterance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "user")]
    User,
    /// Serialized as "ai" on the wire and in stored transcripts
    #[serde(rename = "ai", alias = "assistant")]
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "ai",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current UTC time as RFC 3339.
pub fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| OffsetDateTime::UNIX_EPOCH.to_string())
}

/// One transcript entry. Never mutated after it is appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utterance {
    pub role: Role,
    pub text: String,
    pub at: String,
}

impl Utterance {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
            at: now_rfc3339(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, text)
    }
}

/// A finished conversation as handed to the transcript store.
///
/// Stores upsert on `id`, so submitting the same record twice overwrites.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptRecord {
    /// Conversation id
    pub id: String,
    pub persona_id: Option<String>,
    pub company_id: Option<String>,
    pub messages: Vec<Utterance>,
    pub duration_sec: u64,
}

impl TranscriptRecord {
    /// Whole seconds, rounded, never below one.
    pub fn duration_from_secs(secs: f64) -> u64 {
        if !secs.is_finite() || secs < 1.0 {
            return 1;
        }
        (secs.round() as u64).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_wire_names() {
        let json = serde_json::to_string(&Utterance::assistant("Hello")).expect("serialize");
        assert!(json.contains(r#""role":"ai""#));

        let parsed: Utterance =
            serde_json::from_str(r#"{"role":"assistant","text":"x","at":"2025-01-01T00:00:00Z"}"#)
                .expect("alias");
        assert_eq!(parsed.role, Role::Assistant);
    }

    #[test]
    fn test_timestamp_is_rfc3339() {
        let utterance = Utterance::user("hi");
        assert!(OffsetDateTime::parse(&utterance.at, &Rfc3339).is_ok());
    }

    #[test]
    fn test_duration_rounding() {
        assert_eq!(TranscriptRecord::duration_from_secs(0.0), 1);
        assert_eq!(TranscriptRecord::duration_from_secs(0.4), 1);
        assert_eq!(TranscriptRecord::duration_from_secs(1.4), 1);
        assert_eq!(TranscriptRecord::duration_from_secs(1.5), 2);
        assert_eq!(TranscriptRecord::duration_from_secs(61.2), 61);
        assert_eq!(TranscriptRecord::duration_from_secs(f64::NAN), 1);
    }
}
