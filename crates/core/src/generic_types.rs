use crate::persona::Persona;

/// Configuration for opening a real-time voice session on behalf of a persona.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenericSessionConfig {
    pub persona: Persona,
    pub instructions: String,
    /// Provider voice id, e.g. `en-US-matthew`.
    pub voice: String,
}

/// Events a real-time voice provider emits back to the application.
#[derive(Debug, Clone)]
pub enum GenericServerEvent {
    /// A transcription of the user's speech.
    Transcription { text: String, is_final: bool },
    /// A chunk of synthesized speech (base64 encoded PCM16).
    AudioChunk(String),
    Speaking,
    SpeakingDone,
    Error(String),
    Closed,
}
