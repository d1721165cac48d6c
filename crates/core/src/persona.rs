//! Tutor Personas
//!
//! A persona is a conversational role with its own instructions, tool set and
//! synthesized voice. The greeter routes the student; the other three map
//! one-to-one onto a [`Mode`].

use crate::mode::Mode;
use anyhow::{Context, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Persona {
    Greeter,
    Learn,
    Quiz,
    TeachBack,
}

impl Persona {
    pub const ALL: [Persona; 4] = [
        Persona::Greeter,
        Persona::Learn,
        Persona::Quiz,
        Persona::TeachBack,
    ];

    /// Key used for prompt files and voice configuration.
    pub fn as_str(&self) -> &'static str {
        match self {
            Persona::Greeter => "greeter",
            Persona::Learn => "learn",
            Persona::Quiz => "quiz",
            Persona::TeachBack => "teach_back",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim().to_lowercase();
        Self::ALL.into_iter().find(|p| p.as_str() == name)
    }

    /// The name the persona introduces itself with.
    pub fn speaker(&self) -> &'static str {
        match self {
            Persona::Greeter | Persona::Learn => "Matthew",
            Persona::Quiz => "Alicia",
            Persona::TeachBack => "Ken",
        }
    }

    pub fn default_voice(&self) -> &'static str {
        match self {
            Persona::Greeter | Persona::Learn => "en-US-matthew",
            Persona::Quiz => "en-US-alicia",
            Persona::TeachBack => "en-US-ken",
        }
    }

    /// The mode this persona teaches in. The greeter has none.
    pub fn mode(&self) -> Option<Mode> {
        match self {
            Persona::Greeter => None,
            Persona::Learn => Some(Mode::Learn),
            Persona::Quiz => Some(Mode::Quiz),
            Persona::TeachBack => Some(Mode::TeachBack),
        }
    }

    /// Names of the tools this persona exposes to the LLM.
    pub fn tool_names(&self) -> &'static [&'static str] {
        match self {
            Persona::Greeter => &["switch_mode"],
            Persona::Learn => &["get_concept", "switch_to_quiz", "switch_to_teach_back"],
            Persona::Quiz => &["ask_question", "switch_to_learn", "switch_to_teach_back"],
            Persona::TeachBack => &[
                "prompt_teaching",
                "give_feedback",
                "switch_to_learn",
                "switch_to_quiz",
            ],
        }
    }
}

impl From<Mode> for Persona {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Learn => Persona::Learn,
            Mode::Quiz => Persona::Quiz,
            Mode::TeachBack => Persona::TeachBack,
        }
    }
}

impl fmt::Display for Persona {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Voice id per persona, handed to the speech provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceMap {
    voices: HashMap<Persona, String>,
}

impl Default for VoiceMap {
    fn default() -> Self {
        let voices = Persona::ALL
            .into_iter()
            .map(|p| (p, p.default_voice().to_string()))
            .collect();
        Self { voices }
    }
}

impl VoiceMap {
    pub fn with_voice(mut self, persona: Persona, voice: impl Into<String>) -> Self {
        self.voices.insert(persona, voice.into());
        self
    }

    pub fn voice_for(&self, persona: Persona) -> &str {
        self.voices
            .get(&persona)
            .map(String::as_str)
            .unwrap_or(persona.default_voice())
    }

    /// Looks a voice up by persona name, falling back to the greeter's voice
    /// for names that match no persona.
    pub fn voice_for_name(&self, name: &str) -> &str {
        self.voice_for(Persona::from_name(name).unwrap_or(Persona::Greeter))
    }
}

/// Instruction text for each persona.
#[derive(Debug, Clone)]
pub struct PersonaPrompts {
    prompts: HashMap<Persona, String>,
}

impl PersonaPrompts {
    /// Picks each persona's prompt out of a map keyed by persona name, as
    /// produced by loading a prompts directory.
    pub fn from_map(prompts: &HashMap<String, String>) -> Result<Self> {
        let prompts = Persona::ALL
            .into_iter()
            .map(|p| {
                let text = prompts
                    .get(p.as_str())
                    .with_context(|| format!("Missing prompt template: '{}.md'", p.as_str()))?;
                Ok((p, text.trim().to_string()))
            })
            .collect::<Result<HashMap<_, _>>>()?;
        Ok(Self { prompts })
    }

    pub fn instructions(&self, persona: Persona) -> &str {
        self.prompts
            .get(&persona)
            .map(String::as_str)
            .unwrap_or_default()
    }
}
