use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The pedagogical activity a session is currently in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Learn,
    Quiz,
    TeachBack,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("'{0}' is not a valid mode")]
pub struct ModeParseError(pub String);

impl Mode {
    pub const ALL: [Mode; 3] = [Mode::Learn, Mode::Quiz, Mode::TeachBack];

    /// Machine name used in tool arguments and config keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Learn => "learn",
            Mode::Quiz => "quiz",
            Mode::TeachBack => "teach_back",
        }
    }

    /// Name spoken to the student.
    pub fn title(&self) -> &'static str {
        match self {
            Mode::Learn => "Learn",
            Mode::Quiz => "Quiz",
            Mode::TeachBack => "Teach Back",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = ModeParseError;

    /// Accepts `learn`, `quiz` or `teach_back`, ignoring case and surrounding whitespace.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase();
        match normalized.as_str() {
            "learn" => Ok(Mode::Learn),
            "quiz" => Ok(Mode::Quiz),
            "teach_back" => Ok(Mode::TeachBack),
            _ => Err(ModeParseError(normalized)),
        }
    }
}
