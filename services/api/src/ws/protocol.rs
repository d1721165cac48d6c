//! Defines the WebSocket message protocol between the browser client and the API server.

use crate::models::PersonaInfo;
use serde::{Deserialize, Serialize};
use tutor_core::{generic_types::GenericServerEvent, session::SessionState};
use uuid::Uuid;

/// Messages sent from the client (browser) to the server.
#[derive(Deserialize, Debug, PartialEq)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Joins a room and starts a fresh tutoring session. Must be the first message.
    #[serde(rename = "init")]
    Init { room: String },
    /// A typed utterance from the student.
    #[serde(rename = "user_message")]
    UserMessage { text: String },
    /// Toggles the voice input/output feature.
    #[serde(rename = "set_voice_enabled")]
    SetVoiceEnabled { enabled: bool },
}

/// Messages sent from the server to the client (browser).
#[derive(Serialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Confirms the session started with the greeter active.
    Initialized {
        session_id: Uuid,
        room: String,
        persona: PersonaInfo,
        state: SessionState,
    },
    /// A handoff replaced the active persona.
    PersonaChanged { persona: PersonaInfo },
    /// Pushes the complete, updated session state to the client.
    StateUpdate { state: SessionState },
    Error { message: String },
    ResponseStart,
    ResponseChunk { chunk: String },
    ResponseEnd,
    /// An update on the user's speech-to-text transcription.
    TranscriptionUpdate { text: String, is_final: bool },
    /// A chunk of synthesized speech (base64 encoded PCM16).
    AudioChunk { data: String },
    AiSpeakingStart,
    AiSpeakingEnd,
}

impl From<GenericServerEvent> for ServerMessage {
    fn from(event: GenericServerEvent) -> Self {
        match event {
            GenericServerEvent::Transcription { text, is_final } => {
                ServerMessage::TranscriptionUpdate { text, is_final }
            }
            GenericServerEvent::AudioChunk(data) => ServerMessage::AudioChunk { data },
            GenericServerEvent::Speaking => ServerMessage::AiSpeakingStart,
            GenericServerEvent::SpeakingDone => ServerMessage::AiSpeakingEnd,
            GenericServerEvent::Error(message) => ServerMessage::Error { message },
            GenericServerEvent::Closed => ServerMessage::Error {
                message: "Voice connection closed.".to_string(),
            },
        }
    }
}
