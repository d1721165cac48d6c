//! Persona Tool Services
//!
//! Each persona exposes its tools to the LLM through its own MCP server
//! handler. All four share a [`TutorContext`], so a handoff only swaps which
//! handler is served while the session state carries over.

use crate::{
    feedback::feedback_message,
    mode::Mode,
    persona::Persona,
    session::TutorContext,
};
use rmcp::{
    ServerHandler,
    handler::server::{router::tool::ToolRouter, tool::Parameters},
    model::{ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router,
};
use schemars::JsonSchema;
use serde::Deserialize;
use tracing::info;

// --- Tool Arguments ---

#[derive(Deserialize, JsonSchema, Debug)]
pub struct SwitchModeArgs {
    #[schemars(description = "The learning mode: 'learn', 'quiz', or 'teach_back'")]
    pub mode: String,
}

#[derive(Deserialize, JsonSchema, Debug)]
pub struct ConceptArgs {
    #[schemars(
        description = "The concept ID, e.g. 'variables', 'loops', 'functions', 'conditionals', or 'arrays'"
    )]
    pub concept_id: String,
}

#[derive(Deserialize, JsonSchema, Debug)]
pub struct FeedbackArgs {
    #[schemars(description = "Type of feedback: 'excellent', 'good', or 'needs_work'")]
    pub feedback_type: String,
}

/// Runs a switch requested from inside a teaching persona.
async fn handoff(ctx: &TutorContext, mode: Mode) -> Result<String, String> {
    ctx.switch_to(mode).await;
    let persona = Persona::from(mode);
    Ok(format!(
        "Switching to {} mode with {}...",
        mode.title(),
        persona.speaker()
    ))
}

fn tool_server_info() -> ServerInfo {
    ServerInfo {
        capabilities: ServerCapabilities::builder().enable_tools().build(),
        ..Default::default()
    }
}

// --- Greeter ---

/// Welcomes the student and routes them to a teaching mode.
pub struct GreeterTools {
    ctx: TutorContext,
    tool_router: ToolRouter<Self>,
}

#[tool_handler]
impl ServerHandler for GreeterTools {
    fn get_info(&self) -> ServerInfo {
        tool_server_info()
    }
}

#[tool_router]
impl GreeterTools {
    pub fn new(ctx: TutorContext) -> Self {
        Self {
            ctx,
            tool_router: Self::tool_router(),
        }
    }

    /// Switches to the named mode. Unknown names leave the state untouched.
    #[tool(
        description = "Switch to a specific learning mode: 'learn', 'quiz', or 'teach_back'."
    )]
    pub async fn switch_mode(&self, args: Parameters<SwitchModeArgs>) -> Result<String, String> {
        info!(args = ?args.0, "Executing tool 'switch_mode'");
        let mode = match args.0.mode.parse::<Mode>() {
            Ok(mode) => mode,
            Err(e) => {
                return Ok(format!(
                    "Sorry, '{}' is not a valid mode. Please choose 'learn', 'quiz', or 'teach back'.",
                    e.0
                ));
            }
        };

        self.ctx.switch_to(mode).await;
        Ok(format!(
            "Switching you to {} mode with {}...",
            mode.title(),
            Persona::from(mode).speaker()
        ))
    }
}

// --- Learn ---

/// Explains concepts from the content file.
pub struct LearnTools {
    ctx: TutorContext,
    tool_router: ToolRouter<Self>,
}

#[tool_handler]
impl ServerHandler for LearnTools {
    fn get_info(&self) -> ServerInfo {
        tool_server_info()
    }
}

#[tool_router]
impl LearnTools {
    pub fn new(ctx: TutorContext) -> Self {
        Self {
            ctx,
            tool_router: Self::tool_router(),
        }
    }

    #[tool(description = "Get a concept to explain.")]
    pub async fn get_concept(&self, args: Parameters<ConceptArgs>) -> Result<String, String> {
        info!(args = ?args.0, "Executing tool 'get_concept'");
        match self.ctx.select_concept(&args.0.concept_id).await {
            Some(concept) => {
                info!(title = %concept.title, "Explaining concept");
                Ok(format!(
                    "Let me explain {}. {} Do you have any questions about this?",
                    concept.title, concept.summary
                ))
            }
            None => Ok(format!(
                "I don't have information about '{}'. {}",
                args.0.concept_id,
                available_hint(&self.ctx, "Available concepts are: ", "and")
            )),
        }
    }

    #[tool(description = "Switch to Quiz mode.")]
    pub async fn switch_to_quiz(&self) -> Result<String, String> {
        handoff(&self.ctx, Mode::Quiz).await
    }

    #[tool(description = "Switch to Teach Back mode.")]
    pub async fn switch_to_teach_back(&self) -> Result<String, String> {
        handoff(&self.ctx, Mode::TeachBack).await
    }
}

// --- Quiz ---

/// Tests the student with the sample questions.
pub struct QuizTools {
    ctx: TutorContext,
    tool_router: ToolRouter<Self>,
}

#[tool_handler]
impl ServerHandler for QuizTools {
    fn get_info(&self) -> ServerInfo {
        tool_server_info()
    }
}

#[tool_router]
impl QuizTools {
    pub fn new(ctx: TutorContext) -> Self {
        Self {
            ctx,
            tool_router: Self::tool_router(),
        }
    }

    #[tool(description = "Ask a quiz question about a concept.")]
    pub async fn ask_question(&self, args: Parameters<ConceptArgs>) -> Result<String, String> {
        info!(args = ?args.0, "Executing tool 'ask_question'");
        match self.ctx.select_concept(&args.0.concept_id).await {
            Some(concept) => {
                info!(title = %concept.title, "Quizzing on concept");
                Ok(format!(
                    "Here's your question about {}: {}",
                    concept.title, concept.sample_question
                ))
            }
            None => Ok(format!(
                "I don't have questions about '{}'. {}",
                args.0.concept_id,
                available_hint(&self.ctx, "Let's try: ", "or")
            )),
        }
    }

    #[tool(description = "Switch to Learn mode.")]
    pub async fn switch_to_learn(&self) -> Result<String, String> {
        handoff(&self.ctx, Mode::Learn).await
    }

    #[tool(description = "Switch to Teach Back mode.")]
    pub async fn switch_to_teach_back(&self) -> Result<String, String> {
        handoff(&self.ctx, Mode::TeachBack).await
    }
}

// --- Teach Back ---

/// Has the student explain a concept and grades the explanation.
pub struct TeachBackTools {
    ctx: TutorContext,
    tool_router: ToolRouter<Self>,
}

#[tool_handler]
impl ServerHandler for TeachBackTools {
    fn get_info(&self) -> ServerInfo {
        tool_server_info()
    }
}

#[tool_router]
impl TeachBackTools {
    pub fn new(ctx: TutorContext) -> Self {
        Self {
            ctx,
            tool_router: Self::tool_router(),
        }
    }

    #[tool(description = "Prompt the student to teach a concept.")]
    pub async fn prompt_teaching(&self, args: Parameters<ConceptArgs>) -> Result<String, String> {
        info!(args = ?args.0, "Executing tool 'prompt_teaching'");
        match self.ctx.select_concept(&args.0.concept_id).await {
            Some(concept) => {
                info!(title = %concept.title, "Student teaching concept");
                Ok(format!(
                    "Okay, I'm ready to learn! Please explain {} to me as if I've never heard of it before. Take your time and use examples if you'd like.",
                    concept.title
                ))
            }
            None => Ok(format!(
                "I don't have that concept. {}",
                available_hint(&self.ctx, "Try: ", "or")
            )),
        }
    }

    #[tool(description = "Give feedback on the student's explanation.")]
    pub async fn give_feedback(&self, args: Parameters<FeedbackArgs>) -> Result<String, String> {
        info!(args = ?args.0, "Executing tool 'give_feedback'");
        Ok(feedback_message(&args.0.feedback_type).to_string())
    }

    #[tool(description = "Switch to Learn mode.")]
    pub async fn switch_to_learn(&self) -> Result<String, String> {
        handoff(&self.ctx, Mode::Learn).await
    }

    #[tool(description = "Switch to Quiz mode.")]
    pub async fn switch_to_quiz(&self) -> Result<String, String> {
        handoff(&self.ctx, Mode::Quiz).await
    }
}

fn available_hint(ctx: &TutorContext, lead: &str, conjunction: &str) -> String {
    if ctx.concepts().is_empty() {
        "No concepts are loaded right now.".to_string()
    } else {
        format!("{lead}{}.", ctx.concepts().id_list(conjunction))
    }
}
