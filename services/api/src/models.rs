//! API Models
//!
//! Response bodies for the REST API (documented with `utoipa`) and the
//! in-memory conversation history kept by each WebSocket session.

use serde::{Deserialize, Serialize};
use std::fmt;
use tutor_core::{concept::ConceptRecord, persona::Persona, session::SessionFactory};
use utoipa::ToSchema;

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, Copy, PartialEq)]
pub enum MessageRole {
    User,
    Ai,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageRole::User => write!(f, "user"),
            MessageRole::Ai => write!(f, "ai"),
        }
    }
}

/// One utterance in a session's conversation.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Turn {
    pub role: MessageRole,
    pub content: String,
    /// The persona that was active when the utterance was made.
    pub persona: Persona,
}

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
pub struct Concept {
    #[schema(example = "loops")]
    pub id: String,
    #[schema(example = "Loops")]
    pub title: String,
    pub summary: String,
    pub sample_question: String,
}

impl From<&ConceptRecord> for Concept {
    fn from(record: &ConceptRecord) -> Self {
        Self {
            id: record.id.clone(),
            title: record.title.clone(),
            summary: record.summary.clone(),
            sample_question: record.sample_question.clone(),
        }
    }
}

/// Public description of a persona, also sent over the WebSocket on handoff.
#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
pub struct PersonaInfo {
    #[schema(example = "quiz")]
    pub name: String,
    #[schema(example = "Alicia")]
    pub speaker: String,
    #[schema(example = "en-US-alicia")]
    pub voice: String,
    pub tools: Vec<String>,
}

impl PersonaInfo {
    pub fn describe(persona: Persona, factory: &SessionFactory) -> Self {
        Self {
            name: persona.as_str().to_string(),
            speaker: persona.speaker().to_string(),
            voice: factory.voices().voice_for(persona).to_string(),
            tools: persona.tool_names().iter().map(|t| t.to_string()).collect(),
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct ErrorResponse {
    pub message: String,
}
