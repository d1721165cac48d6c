//! Contains the logic for a single persona turn: the LLM decides, persona
//! tools run, and the reply is spoken or streamed back.

use crate::{
    models::{MessageRole, Turn},
    state::AppState,
    ws::{protocol::ServerMessage, provider::RealtimeClientEvent, session::send_msg},
};
use anyhow::{Context, Result, anyhow};
use async_openai::types::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestToolMessageArgs, ChatCompletionRequestUserMessageArgs,
    ChatCompletionTool, ChatCompletionToolArgs, FunctionObjectArgs,
};
use axum::extract::ws::{Message, WebSocket};
use futures_util::{StreamExt, stream::SplitSink};
use rmcp::{
    model::{CallToolRequestParam, RawContent},
    service::{RoleClient, RunningService},
};
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tracing::{info, warn};
use tutor_core::{
    concept::ConceptStore,
    llm_client::{LLMAction, LLMStreamEvent, ToolCall},
    persona::Persona,
    session::SessionState,
};

/// Builds the system prompt for this turn: the persona's instructions plus
/// the loaded concepts and the current selection.
pub fn turn_instructions(
    instructions: &str,
    concepts: &ConceptStore,
    session: &SessionState,
) -> String {
    let mut prompt = instructions.to_string();
    prompt.push_str("\n\n# Available Concepts\n\n");
    if concepts.is_empty() {
        prompt.push_str("No concepts are loaded.");
    } else {
        prompt.push_str(&concepts.title_lines());
    }
    if let Some(concept) = &session.current_concept {
        prompt.push_str(&format!(
            "\n\n# Current Concept\n\n{} (id: {})",
            concept.title, concept.id
        ));
    }
    prompt
}

fn conversation(history: &[Turn]) -> Result<Vec<ChatCompletionRequestMessage>> {
    history
        .iter()
        .map(|turn| -> Result<ChatCompletionRequestMessage> {
            Ok(match turn.role {
                MessageRole::User => ChatCompletionRequestUserMessageArgs::default()
                    .content(turn.content.clone())
                    .build()?
                    .into(),
                MessageRole::Ai => ChatCompletionRequestAssistantMessageArgs::default()
                    .content(turn.content.clone())
                    .build()?
                    .into(),
            })
        })
        .collect()
}

async fn persona_tools(
    mcp_client: &RunningService<RoleClient, ()>,
) -> Result<Vec<ChatCompletionTool>> {
    mcp_client
        .list_all_tools()
        .await?
        .into_iter()
        .map(|t| -> Result<ChatCompletionTool> {
            Ok(ChatCompletionToolArgs::default()
                .function(
                    FunctionObjectArgs::default()
                        .name(t.name)
                        .description(t.description.unwrap_or_default())
                        .parameters(serde_json::to_value(&*t.input_schema)?)
                        .build()?,
                )
                .build()?)
        })
        .collect()
}

/// Outcome of one persona turn.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnReply {
    pub text: String,
    pub tool_calls: usize,
}

/// Runs one tool call on the active persona's tool service.
///
/// Failures become the tool's result text and never end the turn.
async fn run_tool_call(mcp_client: &RunningService<RoleClient, ()>, call: &ToolCall) -> String {
    match call_persona_tool(mcp_client, call).await {
        Ok(text) => text,
        Err(e) => {
            warn!(tool = %call.function.name, error = %e, "Persona tool call failed");
            format!("Error: tool '{}' failed: {}", call.function.name, e)
        }
    }
}

async fn call_persona_tool(
    mcp_client: &RunningService<RoleClient, ()>,
    call: &ToolCall,
) -> Result<String> {
    let arguments = match call.function.arguments.trim() {
        "" => None,
        raw => Some(
            serde_json::from_str::<serde_json::Map<String, serde_json::Value>>(raw)
                .context("arguments were not a JSON object")?,
        ),
    };
    let result = mcp_client
        .peer()
        .call_tool(CallToolRequestParam {
            name: call.function.name.clone().into(),
            arguments,
        })
        .await?;

    let annotated_content = result
        .content
        .context("Tool call returned no content")?
        .pop()
        .context("Content list was empty")?;
    match annotated_content.raw {
        RawContent::Text(text_content) => Ok(text_content.text),
        _ => Err(anyhow!("Unexpected content type from tool")),
    }
}

/// Runs one student utterance through the active persona.
///
/// The LLM either answers directly or calls persona tools, whose results
/// feed a second, streamed completion. Any handoff those tools request is
/// queued on the session event channel by the time this returns.
pub async fn run_turn(
    state: &Arc<AppState>,
    persona: Persona,
    session: &SessionState,
    history: &mut Vec<Turn>,
    mcp_client: &RunningService<RoleClient, ()>,
    user_text: &str,
) -> Result<TurnReply> {
    history.push(Turn {
        role: MessageRole::User,
        content: user_text.to_string(),
        persona,
    });

    let instructions = turn_instructions(
        state.session_factory.instructions(persona),
        &state.concepts,
        session,
    );
    let messages = conversation(history)?;
    let tools = persona_tools(mcp_client).await?;

    let action = state
        .llm_client
        .decide_action(&instructions, messages.clone(), tools)
        .await?;

    let mut full_response = String::new();
    let mut tool_calls = 0;
    match action {
        LLMAction::TextResponse(response_text) => full_response = response_text,
        LLMAction::ToolCall(calls) => {
            let mut conversation_with_tools = messages;
            conversation_with_tools.push(
                ChatCompletionRequestAssistantMessageArgs::default()
                    .tool_calls(calls.clone())
                    .build()?
                    .into(),
            );

            for call in &calls {
                info!(%persona, tool = %call.function.name, "Persona tool call");
                let result_text = run_tool_call(mcp_client, call).await;
                conversation_with_tools.push(
                    ChatCompletionRequestToolMessageArgs::default()
                        .tool_call_id(call.id.clone())
                        .content(result_text)
                        .build()?
                        .into(),
                );
                tool_calls += 1;
            }

            let mut final_stream = state
                .llm_client
                .stream_after_tools(&instructions, conversation_with_tools)
                .await?;
            while let Some(event_result) = final_stream.next().await {
                match event_result {
                    Ok(LLMStreamEvent::TextChunk(chunk)) => full_response.push_str(&chunk),
                    Err(e) => warn!(error = %e, "Error in reply stream"),
                }
            }
        }
    }

    if !full_response.is_empty() {
        history.push(Turn {
            role: MessageRole::Ai,
            content: full_response.clone(),
            persona,
        });
    }

    Ok(TurnReply {
        text: full_response,
        tool_calls,
    })
}

/// Hands a reply to the voice session. Returns whether it was queued.
///
/// Empty replies are never spoken.
async fn speak_reply(
    realtime_tx: &mpsc::Sender<RealtimeClientEvent>,
    persona: Persona,
    text: String,
) -> bool {
    if text.trim().is_empty() {
        warn!(%persona, "Persona produced an empty reply; nothing to speak.");
        return false;
    }
    match realtime_tx.send(RealtimeClientEvent::TextToSpeak(text)).await {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, "Voice session dropped; reply was not spoken.");
            false
        }
    }
}

/// Handles one student utterance with the active persona and delivers the
/// reply: spoken when voice is on, streamed as text otherwise.
///
/// Returns the number of tool calls the persona made.
#[allow(clippy::too_many_arguments)]
pub async fn handle_turn(
    state: &Arc<AppState>,
    persona: Persona,
    session: &SessionState,
    history: &mut Vec<Turn>,
    mcp_client: &RunningService<RoleClient, ()>,
    user_text: &str,
    socket_tx: &Arc<Mutex<SplitSink<WebSocket, Message>>>,
    realtime_tx: &Option<mpsc::Sender<RealtimeClientEvent>>,
) -> Result<usize> {
    let reply = run_turn(state, persona, session, history, mcp_client, user_text).await?;

    if let Some(tx) = realtime_tx {
        speak_reply(tx, persona, reply.text).await;
    } else if reply.text.trim().is_empty() {
        warn!(%persona, "Persona produced an empty reply; nothing to send.");
    } else {
        let mut sink = socket_tx.lock().await;
        send_msg(&mut sink, ServerMessage::ResponseStart).await?;
        send_msg(&mut sink, ServerMessage::ResponseChunk { chunk: reply.text }).await?;
        send_msg(&mut sink, ServerMessage::ResponseEnd).await?;
    }

    Ok(reply.tool_calls)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{handlers::tests::test_state_with, ws::session::ActivePersona};
    use async_openai::{
        error::OpenAIError,
        types::{ChatCompletionRequestToolMessageContent, ChatCompletionToolType, FunctionCall},
    };
    use async_trait::async_trait;
    use tutor_core::{
        concept::ConceptRecord,
        llm_client::{LLMClient, LLMStream},
        mode::Mode,
        session::{SessionEvent, TutorContext},
    };

    mockall::mock! {
        pub Llm {}

        #[async_trait]
        impl LLMClient for Llm {
            async fn decide_action(
                &self,
                instructions: &str,
                conversation: Vec<ChatCompletionRequestMessage>,
                tools: Vec<ChatCompletionTool>,
            ) -> Result<LLMAction>;

            async fn stream_after_tools(
                &self,
                instructions: &str,
                conversation_with_tool_results: Vec<ChatCompletionRequestMessage>,
            ) -> Result<LLMStream>;
        }
    }

    pub(crate) fn tool_call(id: &str, name: &str, arguments: &str) -> ToolCall {
        ToolCall {
            id: id.to_string(),
            r#type: ChatCompletionToolType::Function,
            function: FunctionCall {
                name: name.to_string(),
                arguments: arguments.to_string(),
            },
        }
    }

    pub(crate) fn reply_stream(chunks: &[&str]) -> LLMStream {
        let events: Vec<Result<LLMStreamEvent, OpenAIError>> = chunks
            .iter()
            .map(|chunk| Ok(LLMStreamEvent::TextChunk(chunk.to_string())))
            .collect();
        Box::pin(futures_util::stream::iter(events))
    }

    /// Text of every tool result message in a conversation, in order.
    pub(crate) fn tool_results(conversation: &[ChatCompletionRequestMessage]) -> Vec<String> {
        conversation
            .iter()
            .filter_map(|message| match message {
                ChatCompletionRequestMessage::Tool(tool) => match &tool.content {
                    ChatCompletionRequestToolMessageContent::Text(text) => Some(text.clone()),
                    _ => None,
                },
                _ => None,
            })
            .collect()
    }

    pub(crate) fn tool_names(tools: &[ChatCompletionTool]) -> Vec<String> {
        let mut names: Vec<String> = tools.iter().map(|t| t.function.name.clone()).collect();
        names.sort();
        names
    }

    fn record(id: &str, title: &str) -> ConceptRecord {
        ConceptRecord {
            id: id.to_string(),
            title: title.to_string(),
            summary: String::new(),
            sample_question: String::new(),
        }
    }

    #[test]
    fn test_turn_instructions_list_concepts() {
        let concepts = ConceptStore::new(vec![record("loops", "Loops"), record("arrays", "Arrays")]);
        let prompt = turn_instructions("You are Ken.", &concepts, &SessionState::default());

        assert!(prompt.starts_with("You are Ken.\n\n# Available Concepts"));
        assert!(prompt.contains("- Loops (id: loops)\n- Arrays (id: arrays)"));
        assert!(!prompt.contains("# Current Concept"));
    }

    #[test]
    fn test_turn_instructions_include_current_concept() {
        let session = SessionState {
            current_mode: Some(Mode::Quiz),
            current_concept: Some(record("loops", "Loops")),
        };
        let prompt = turn_instructions("You are Alicia.", &ConceptStore::default(), &session);

        assert!(prompt.contains("No concepts are loaded."));
        assert!(prompt.ends_with("# Current Concept\n\nLoops (id: loops)"));
    }

    #[test]
    fn test_conversation_preserves_roles() {
        let history = vec![
            Turn {
                role: MessageRole::User,
                content: "hi".to_string(),
                persona: Persona::Greeter,
            },
            Turn {
                role: MessageRole::Ai,
                content: "Welcome!".to_string(),
                persona: Persona::Greeter,
            },
        ];

        let messages = conversation(&history).unwrap();

        assert!(matches!(messages[0], ChatCompletionRequestMessage::User(_)));
        assert!(matches!(messages[1], ChatCompletionRequestMessage::Assistant(_)));
    }

    #[tokio::test]
    async fn test_greeter_turn_switches_to_quiz() {
        let mut llm = MockLlm::new();
        llm.expect_decide_action()
            .withf(|_, _, tools| tool_names(tools) == vec!["switch_mode".to_string()])
            .times(1)
            .returning(|_, _, _| {
                Ok(LLMAction::ToolCall(vec![tool_call(
                    "call_1",
                    "switch_mode",
                    r#"{"mode": "Quiz"}"#,
                )]))
            });
        llm.expect_stream_after_tools()
            .withf(|_, conversation| {
                tool_results(conversation) == vec!["Switching you to Quiz mode with Alicia...".to_string()]
            })
            .times(1)
            .returning(|_, _| Ok(reply_stream(&["Great choice! ", "Alicia will quiz you now."])));

        let state = test_state_with(Arc::new(llm));
        let (events_tx, mut events_rx) = mpsc::channel(8);
        let ctx = TutorContext::new(state.concepts.clone(), Some(events_tx));
        let greeter = ActivePersona::connect(Persona::Greeter, &ctx).await.unwrap();
        let mut history = vec![];

        let reply = run_turn(
            &state,
            Persona::Greeter,
            &ctx.snapshot().await,
            &mut history,
            &greeter.mcp_client,
            "Quiz me please",
        )
        .await
        .unwrap();

        assert_eq!(
            reply,
            TurnReply {
                text: "Great choice! Alicia will quiz you now.".to_string(),
                tool_calls: 1,
            }
        );
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].content, reply.text);
        assert_eq!(ctx.snapshot().await.current_mode, Some(Mode::Quiz));
        assert!(matches!(
            events_rx.try_recv(),
            Ok(SessionEvent::Handoff { persona: Persona::Quiz, .. })
        ));
        assert!(events_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_failed_tool_calls_do_not_fail_the_turn() {
        let mut llm = MockLlm::new();
        llm.expect_decide_action().times(1).returning(|_, _, _| {
            Ok(LLMAction::ToolCall(vec![
                // Not one of the greeter's tools.
                tool_call("call_1", "ask_question", r#"{"concept_id": "loops"}"#),
                tool_call("call_2", "switch_mode", "not json"),
            ]))
        });
        llm.expect_stream_after_tools()
            .withf(|_, conversation| {
                let results = tool_results(conversation);
                results.len() == 2
                    && results[0].starts_with("Error: tool 'ask_question' failed")
                    && results[1].starts_with("Error: tool 'switch_mode' failed")
            })
            .times(1)
            .returning(|_, _| Ok(reply_stream(&["Which mode would you like?"])));

        let state = test_state_with(Arc::new(llm));
        let (events_tx, mut events_rx) = mpsc::channel(8);
        let ctx = TutorContext::new(state.concepts.clone(), Some(events_tx));
        let greeter = ActivePersona::connect(Persona::Greeter, &ctx).await.unwrap();
        let mut history = vec![];

        let reply = run_turn(
            &state,
            Persona::Greeter,
            &ctx.snapshot().await,
            &mut history,
            &greeter.mcp_client,
            "ask me about loops",
        )
        .await
        .unwrap();

        assert_eq!(reply.text, "Which mode would you like?");
        assert_eq!(reply.tool_calls, 2);
        assert_eq!(ctx.snapshot().await.current_mode, None);
        assert!(events_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_direct_answer_skips_second_completion() {
        let mut llm = MockLlm::new();
        llm.expect_decide_action()
            .withf(|instructions, _, _| instructions.starts_with("You are Matthew."))
            .times(1)
            .returning(|_, _, _| Ok(LLMAction::TextResponse("Hi! Which mode?".to_string())));
        llm.expect_stream_after_tools().times(0);

        let state = test_state_with(Arc::new(llm));
        let ctx = TutorContext::new(state.concepts.clone(), None);
        let greeter = ActivePersona::connect(Persona::Greeter, &ctx).await.unwrap();
        let mut history = vec![];

        let reply = run_turn(
            &state,
            Persona::Greeter,
            &ctx.snapshot().await,
            &mut history,
            &greeter.mcp_client,
            "hello",
        )
        .await
        .unwrap();

        assert_eq!(
            reply,
            TurnReply {
                text: "Hi! Which mode?".to_string(),
                tool_calls: 0,
            }
        );
    }

    #[tokio::test]
    async fn test_speak_reply_skips_empty_text() {
        let (tx, mut rx) = mpsc::channel(4);

        assert!(!speak_reply(&tx, Persona::Quiz, "  \n".to_string()).await);
        assert!(rx.try_recv().is_err());

        assert!(speak_reply(&tx, Persona::Quiz, "Here's your question.".to_string()).await);
        assert!(matches!(
            rx.try_recv(),
            Ok(RealtimeClientEvent::TextToSpeak(ref text)) if text == "Here's your question."
        ));

        drop(rx);
        assert!(!speak_reply(&tx, Persona::Quiz, "Anyone there?".to_string()).await);
    }

    #[tokio::test]
    async fn test_stream_errors_are_skipped() {
        let mut llm = MockLlm::new();
        llm.expect_decide_action().times(1).returning(|_, _, _| {
            Ok(LLMAction::ToolCall(vec![tool_call(
                "call_1",
                "switch_mode",
                r#"{"mode": "learn"}"#,
            )]))
        });
        llm.expect_stream_after_tools().times(1).returning(|_, _| {
            let events: Vec<Result<LLMStreamEvent, OpenAIError>> = vec![
                Ok(LLMStreamEvent::TextChunk("Over ".to_string())),
                Err(OpenAIError::InvalidArgument("dropped chunk".to_string())),
                Ok(LLMStreamEvent::TextChunk("to Matthew.".to_string())),
            ];
            let stream: LLMStream = Box::pin(futures_util::stream::iter(events));
            Ok(stream)
        });

        let state = test_state_with(Arc::new(llm));
        let ctx = TutorContext::new(state.concepts.clone(), None);
        let greeter = ActivePersona::connect(Persona::Greeter, &ctx).await.unwrap();
        let mut history = vec![];

        let reply = run_turn(
            &state,
            Persona::Greeter,
            &ctx.snapshot().await,
            &mut history,
            &greeter.mcp_client,
            "teach me",
        )
        .await
        .unwrap();

        assert_eq!(reply.text, "Over to Matthew.");
        assert_eq!(ctx.snapshot().await.current_mode, Some(Mode::Learn));
    }
}
