//! Tutoring Session State
//!
//! The per-room state machine and the context object every persona's tool
//! service shares. A fresh [`TutorContext`] is created for each room session,
//! which resets the mode and the current concept.

use crate::{
    concept::{ConceptRecord, ConceptStore},
    generic_types::GenericSessionConfig,
    mode::Mode,
    persona::{Persona, PersonaPrompts, VoiceMap},
};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tracing::{info, warn};

/// Mode and concept selection for one room session.
///
/// `current_mode` stays `None` until the first switch; after that it always
/// holds one of the three teaching modes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionState {
    pub current_mode: Option<Mode>,
    pub current_concept: Option<ConceptRecord>,
}

impl SessionState {
    /// The persona that should be speaking for this state.
    pub fn active_persona(&self) -> Persona {
        self.current_mode.map(Persona::from).unwrap_or(Persona::Greeter)
    }
}

/// Notifications from tool handlers to the session loop.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A tool changed the state without changing persona.
    StateUpdate(SessionState),
    /// The active persona must be replaced by a fresh `persona`.
    Handoff {
        persona: Persona,
        state: SessionState,
    },
}

/// Shared handle to one session's state, the concept store and the event
/// channel back to the session loop.
#[derive(Clone)]
pub struct TutorContext {
    state: Arc<Mutex<SessionState>>,
    concepts: Arc<ConceptStore>,
    events_tx: Option<mpsc::Sender<SessionEvent>>,
}

impl TutorContext {
    /// Creates a context with a fresh, unset state.
    pub fn new(concepts: Arc<ConceptStore>, events_tx: Option<mpsc::Sender<SessionEvent>>) -> Self {
        Self {
            state: Arc::new(Mutex::new(SessionState::default())),
            concepts,
            events_tx,
        }
    }

    pub fn concepts(&self) -> &ConceptStore {
        &self.concepts
    }

    pub async fn snapshot(&self) -> SessionState {
        self.state.lock().await.clone()
    }

    /// Moves the state machine to `mode` and requests a handoff to its persona.
    pub async fn switch_to(&self, mode: Mode) {
        let snapshot = {
            let mut state = self.state.lock().await;
            state.current_mode = Some(mode);
            state.clone()
        };
        info!(%mode, "Switching to mode");
        self.emit(SessionEvent::Handoff {
            persona: Persona::from(mode),
            state: snapshot,
        })
        .await;
    }

    /// Looks a concept up and, if found, makes it the current concept.
    ///
    /// On a miss the state is left untouched.
    pub async fn select_concept(&self, concept_id: &str) -> Option<ConceptRecord> {
        let concept = self.concepts.find(concept_id)?.clone();
        let snapshot = {
            let mut state = self.state.lock().await;
            state.current_concept = Some(concept.clone());
            state.clone()
        };
        self.emit(SessionEvent::StateUpdate(snapshot)).await;
        Some(concept)
    }

    async fn emit(&self, event: SessionEvent) {
        if let Some(tx) = &self.events_tx {
            if tx.send(event).await.is_err() {
                warn!("Failed to broadcast session event: receiver dropped.");
            }
        }
    }
}

/// Builds provider session configurations for personas.
#[derive(Debug, Clone)]
pub struct SessionFactory {
    prompts: PersonaPrompts,
    voices: VoiceMap,
}

impl SessionFactory {
    pub fn new(prompts: PersonaPrompts, voices: VoiceMap) -> Self {
        Self { prompts, voices }
    }

    pub fn voices(&self) -> &VoiceMap {
        &self.voices
    }

    pub fn instructions(&self, persona: Persona) -> &str {
        self.prompts.instructions(persona)
    }

    pub fn create(&self, persona: Persona) -> GenericSessionConfig {
        let voice = self.voices.voice_for(persona).to_string();
        info!(%persona, %voice, "Creating session for {} with voice {}", persona, voice);
        GenericSessionConfig {
            persona,
            instructions: self.prompts.instructions(persona).to_string(),
            voice,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concept::tests::sample_store;
    use std::collections::HashMap;

    fn context() -> (TutorContext, mpsc::Receiver<SessionEvent>) {
        let (tx, rx) = mpsc::channel(8);
        (TutorContext::new(Arc::new(sample_store()), Some(tx)), rx)
    }

    #[tokio::test]
    async fn test_new_context_starts_unset() {
        let (ctx, _rx) = context();
        let state = ctx.snapshot().await;
        assert_eq!(state, SessionState::default());
        assert_eq!(state.active_persona(), Persona::Greeter);
    }

    #[tokio::test]
    async fn test_switch_emits_handoff() {
        let (ctx, mut rx) = context();

        ctx.switch_to(Mode::Quiz).await;

        let state = ctx.snapshot().await;
        assert_eq!(state.current_mode, Some(Mode::Quiz));
        assert_eq!(state.active_persona(), Persona::Quiz);
        match rx.recv().await {
            Some(SessionEvent::Handoff { persona, state }) => {
                assert_eq!(persona, Persona::Quiz);
                assert_eq!(state.current_mode, Some(Mode::Quiz));
            }
            other => panic!("Expected handoff, got {:?}", other),
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_modes_cycle_indefinitely() {
        let (ctx, _rx) = context();
        for mode in [Mode::Learn, Mode::TeachBack, Mode::Quiz, Mode::Learn] {
            ctx.switch_to(mode).await;
            assert_eq!(ctx.snapshot().await.current_mode, Some(mode));
        }
    }

    #[tokio::test]
    async fn test_select_concept_hit_and_miss() {
        let (ctx, mut rx) = context();

        let loops = ctx.select_concept(" Loops ").await.expect("loops exists");
        assert_eq!(loops.id, "loops");
        assert!(matches!(rx.recv().await, Some(SessionEvent::StateUpdate(_))));

        assert!(ctx.select_concept("recursion").await.is_none());
        assert_eq!(ctx.snapshot().await.current_concept, Some(loops));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_context_without_channel() {
        let ctx = TutorContext::new(Arc::new(sample_store()), None);
        ctx.switch_to(Mode::Learn).await;
        assert_eq!(ctx.snapshot().await.current_mode, Some(Mode::Learn));
    }

    #[test]
    fn test_factory_uses_persona_voice() {
        let raw: HashMap<String, String> = Persona::ALL
            .into_iter()
            .map(|p| (p.as_str().to_string(), format!("You are {}.", p.speaker())))
            .collect();
        let factory = SessionFactory::new(
            PersonaPrompts::from_map(&raw).unwrap(),
            VoiceMap::default(),
        );

        let config = factory.create(Persona::TeachBack);
        assert_eq!(config.persona, Persona::TeachBack);
        assert_eq!(config.voice, "en-US-ken");
        assert_eq!(config.instructions, "You are Ken.");
    }
}
