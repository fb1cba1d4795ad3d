use std::sync::Arc;
use std::time::Instant;

use super::OrchestratorError;
use super::events::StartRequest;
use super::state::SessionState;
use crate::core::persistence::Persona;
use crate::core::transcript::{TranscriptRecord, Utterance, now_rfc3339};

/// One conversation's state, owned by its orchestrator.
#[derive(Debug)]
pub struct Session {
    pub id: String,
    pub persona_id: Option<String>,
    pub persona: Option<Arc<Persona>>,
    pub conversation_id: String,
    pub company_id: Option<String>,
    pub started_at: String,
    created: Instant,
    transcript: Vec<Utterance>,
    state: SessionState,
    /// Id of the most recent turn; a stale turn can't release a newer one
    turn_seq: u64,
    last_user_normalized: Option<String>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            persona_id: None,
            persona: None,
            conversation_id: uuid::Uuid::new_v4().to_string(),
            company_id: None,
            started_at: now_rfc3339(),
            created: Instant::now(),
            transcript: Vec::new(),
            state: SessionState::Idle,
            turn_seq: 0,
            last_user_normalized: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn transcript(&self) -> &[Utterance] {
        &self.transcript
    }

    pub fn last_user_normalized(&self) -> Option<&str> {
        self.last_user_normalized.as_deref()
    }

    /// Reset for a new logical conversation. The persona is loaded separately.
    pub fn begin(&mut self, request: &StartRequest) -> Result<(), OrchestratorError> {
        match self.state {
            SessionState::Stopped => return Err(OrchestratorError::SessionStopped),
            s if s.is_busy() => return Err(OrchestratorError::TurnInProgress),
            _ => {}
        }
        self.persona_id = Some(request.persona_id.clone());
        self.persona = None;
        self.conversation_id = request
            .conversation_id
            .clone()
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        self.company_id = request.company_id.clone().filter(|id| !id.is_empty());
        self.started_at = now_rfc3339();
        self.created = Instant::now();
        self.transcript.clear();
        self.last_user_normalized = None;
        self.state = SessionState::Idle;
        Ok(())
    }

    /// Cache the persona for the rest of the session.
    pub fn set_persona(&mut self, persona: Persona) {
        self.persona = Some(Arc::new(persona));
        if self.state == SessionState::Idle {
            self.state = SessionState::Ready;
        }
    }

    /// Take the turn lock. Returns the id that releases it.
    pub fn try_begin_turn(&mut self) -> Result<u64, OrchestratorError> {
        match self.state {
            SessionState::Stopped => Err(OrchestratorError::SessionStopped),
            s if s.is_busy() => Err(OrchestratorError::TurnInProgress),
            _ if self.persona_id.is_none() => Err(OrchestratorError::NotStarted),
            _ => {
                self.state = SessionState::Transcribing;
                self.turn_seq += 1;
                Ok(self.turn_seq)
            }
        }
    }

    /// Move between pipeline states. Ignored once stopped.
    pub fn advance(&mut self, next: SessionState) {
        if self.state.is_busy() {
            self.state = next;
        }
    }

    /// Release the turn lock held by `turn`. A no-op for any other turn.
    pub fn finish_turn(&mut self, turn: u64) {
        if turn == self.turn_seq && self.state.is_busy() {
            self.state = if self.persona.is_some() {
                SessionState::Ready
            } else {
                SessionState::Idle
            };
        }
    }

    pub fn push(&mut self, utterance: Utterance) {
        self.transcript.push(utterance);
    }

    pub fn remember_user(&mut self, normalized: String) {
        self.last_user_normalized = Some(normalized);
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.created.elapsed().as_secs_f64()
    }

    /// Enter the terminal state.
    ///
    /// Returns the record to persist the first time only, and only when a
    /// `start` was received.
    pub fn stop(&mut self) -> Option<TranscriptRecord> {
        if self.state == SessionState::Stopped {
            return None;
        }
        self.state = SessionState::Stopped;
        let persona_id = self.persona_id.clone()?;
        Some(TranscriptRecord {
            id: self.conversation_id.clone(),
            persona_id: Some(persona_id),
            company_id: self.company_id.clone(),
            messages: std::mem::take(&mut self.transcript),
            duration_sec: TranscriptRecord::duration_from_secs(self.elapsed_secs()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn start(persona: &str) -> StartRequest {
        StartRequest {
            persona_id: persona.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_turn_requires_start() {
        let mut session = Session::new();
        assert!(matches!(
            session.try_begin_turn(),
            Err(OrchestratorError::NotStarted)
        ));
    }

    #[test]
    fn test_single_flight() {
        let mut session = Session::new();
        session.begin(&start("p1")).unwrap();
        session.set_persona(Persona::default());
        assert_eq!(session.state(), SessionState::Ready);

        let turn = session.try_begin_turn().unwrap();
        assert!(matches!(
            session.try_begin_turn(),
            Err(OrchestratorError::TurnInProgress)
        ));
        assert!(matches!(
            session.begin(&start("p2")),
            Err(OrchestratorError::TurnInProgress)
        ));

        session.advance(SessionState::Generating);
        session.finish_turn(turn);
        assert_eq!(session.state(), SessionState::Ready);
        assert!(session.try_begin_turn().is_ok());
    }

    #[test]
    fn test_stale_turn_cannot_release_newer_turn() {
        let mut session = Session::new();
        session.begin(&start("p1")).unwrap();
        session.set_persona(Persona::default());

        let first = session.try_begin_turn().unwrap();
        session.finish_turn(first);
        let second = session.try_begin_turn().unwrap();
        assert_ne!(first, second);

        // the first turn's task releasing again must not free the second
        session.finish_turn(first);
        assert_eq!(session.state(), SessionState::Transcribing);
        session.finish_turn(second);
        assert_eq!(session.state(), SessionState::Ready);
    }

    #[test]
    fn test_begin_generates_conversation_id() {
        let mut session = Session::new();
        session
            .begin(&StartRequest {
                persona_id: "p1".into(),
                conversation_id: Some(String::new()),
                company_id: Some("acme".into()),
            })
            .unwrap();
        assert!(uuid::Uuid::parse_str(&session.conversation_id).is_ok());
        assert_eq!(session.company_id.as_deref(), Some("acme"));
    }

    #[test]
    fn test_stop_yields_record_once() {
        let mut session = Session::new();
        session
            .begin(&StartRequest {
                persona_id: "p1".into(),
                conversation_id: Some("c1".into()),
                company_id: None,
            })
            .unwrap();
        session.push(Utterance::user("hello there"));

        let record = session.stop().expect("first stop");
        assert_eq!(record.id, "c1");
        assert_eq!(record.messages.len(), 1);
        assert_eq!(record.duration_sec, 1);
        assert!(session.stop().is_none());
        assert_eq!(session.state(), SessionState::Stopped);
        assert!(matches!(
            session.try_begin_turn(),
            Err(OrchestratorError::SessionStopped)
        ));
    }

    #[test]
    fn test_stop_without_start_has_nothing_to_persist() {
        let mut session = Session::new();
        assert!(session.stop().is_none());
    }
}
