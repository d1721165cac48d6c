use anyhow::{Result, anyhow};
use async_openai::{
    Client,
    config::OpenAIConfig,
    error::OpenAIError,
    types::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs, ChatCompletionTool,
        CreateChatCompletionRequestArgs, CreateChatCompletionResponse,
    },
};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use std::pin::Pin;

/// A tool call requested by the LLM.
pub type ToolCall = async_openai::types::ChatCompletionMessageToolCall;

#[derive(Debug, Clone)]
pub enum LLMStreamEvent {
    TextChunk(String),
}

pub type LLMStream = Pin<Box<dyn Stream<Item = Result<LLMStreamEvent, OpenAIError>> + Send>>;

/// What the active persona decided to do with a user turn.
#[derive(Debug, Clone)]
pub enum LLMAction {
    /// Speak this text directly.
    TextResponse(String),
    /// Run these persona tools first.
    ToolCall(Vec<ToolCall>),
}

/// A chat client that drives a persona's turn.
///
/// `instructions` is the active persona's system prompt; it is sent ahead of
/// the conversation on every call, so a handoff takes effect on the next turn.
#[async_trait]
pub trait LLMClient: Send + Sync {
    async fn decide_action(
        &self,
        instructions: &str,
        conversation: Vec<ChatCompletionRequestMessage>,
        tools: Vec<ChatCompletionTool>,
    ) -> Result<LLMAction>;

    /// Streams the spoken reply once tool results are in the conversation.
    async fn stream_after_tools(
        &self,
        instructions: &str,
        conversation_with_tool_results: Vec<ChatCompletionRequestMessage>,
    ) -> Result<LLMStream>;
}

/// `LLMClient` for any OpenAI-compatible chat completions endpoint.
pub struct OpenAICompatibleClient {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAICompatibleClient {
    pub fn new(config: OpenAIConfig, model: String) -> Self {
        Self {
            client: Client::with_config(config),
            model,
        }
    }
}

fn with_instructions(
    instructions: &str,
    conversation: Vec<ChatCompletionRequestMessage>,
) -> Result<Vec<ChatCompletionRequestMessage>> {
    let mut messages = Vec::with_capacity(conversation.len() + 1);
    messages.push(
        ChatCompletionRequestSystemMessageArgs::default()
            .content(instructions)
            .build()?
            .into(),
    );
    messages.extend(conversation);
    Ok(messages)
}

#[async_trait]
impl LLMClient for OpenAICompatibleClient {
    async fn decide_action(
        &self,
        instructions: &str,
        conversation: Vec<ChatCompletionRequestMessage>,
        tools: Vec<ChatCompletionTool>,
    ) -> Result<LLMAction> {
        let mut request = CreateChatCompletionRequestArgs::default();
        request
            .model(&self.model)
            .messages(with_instructions(instructions, conversation)?);
        // An empty tool list is rejected by most endpoints.
        if !tools.is_empty() {
            request.tools(tools).tool_choice("auto");
        }
        let request = request.build()?;

        let response: CreateChatCompletionResponse = self.client.chat().create(request).await?;
        let choice = response
            .choices
            .first()
            .ok_or_else(|| anyhow!("LLM response contained no choices."))?;

        if let Some(tool_calls) = &choice.message.tool_calls {
            Ok(LLMAction::ToolCall(tool_calls.clone()))
        } else if let Some(content) = &choice.message.content {
            Ok(LLMAction::TextResponse(content.clone()))
        } else {
            Err(anyhow!(
                "LLM response had neither text content nor tool calls."
            ))
        }
    }

    async fn stream_after_tools(
        &self,
        instructions: &str,
        conversation_with_tool_results: Vec<ChatCompletionRequestMessage>,
    ) -> Result<LLMStream> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(with_instructions(
                instructions,
                conversation_with_tool_results,
            )?)
            .stream(true)
            .build()?;

        let stream = self.client.chat().create_stream(request).await?;

        Ok(Box::pin(stream.filter_map(|result| async {
            match result {
                Ok(response) => response
                    .choices
                    .first()
                    .and_then(|choice| choice.delta.content.clone())
                    .filter(|content| !content.is_empty())
                    .map(|content| Ok(LLMStreamEvent::TextChunk(content))),
                Err(e) => Some(Err(e)),
            }
        })))
    }
}
