//! Handles the real-time WebSocket connection to OpenAI for voice interaction.

use super::RealtimeClientEvent;
use crate::{
    audio_utils,
    state::AppState,
    ws::{protocol::ServerMessage, session::send_msg},
};
use anyhow::{Context, Result};
use async_openai::types::realtime::{
    self as oai_realtime, ClientEvent as OAIClientEvent, ServerEvent as OAIServerEvent,
};
use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt, stream::SplitSink};
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{client::IntoClientRequest, protocol::Message as WsMessage},
};
use tracing::{debug, info, warn};
use tutor_core::generic_types::{GenericServerEvent, GenericSessionConfig};

/// Resolves a configured voice id to a Realtime API voice.
///
/// The default persona voice ids are mapped onto distinct built-in voices;
/// anything else is tried as a built-in voice name and falls back to `alloy`.
pub fn realtime_voice(voice: &str) -> oai_realtime::RealtimeVoice {
    let name = match voice {
        "en-US-matthew" => "ash",
        "en-US-alicia" => "coral",
        "en-US-ken" => "echo",
        other => other,
    };
    serde_json::from_value(serde_json::Value::String(name.to_lowercase())).unwrap_or_else(|_| {
        warn!(%voice, "Unknown voice for OpenAI Realtime. Falling back to alloy.");
        oai_realtime::RealtimeVoice::Alloy
    })
}

fn session_update(config: &GenericSessionConfig, model: &str) -> OAIClientEvent {
    let session = oai_realtime::SessionResource {
        model: Some(model.to_string()),
        modalities: Some(vec!["text".to_string(), "audio".to_string()]),
        instructions: Some(format!(
            "{}\n\n# Voice\n\nYou are the voice of {}. Whenever you receive a system message, read it aloud exactly as written, without adding or removing anything.",
            config.instructions,
            config.persona.speaker()
        )),
        voice: Some(realtime_voice(&config.voice)),
        input_audio_format: Some(oai_realtime::AudioFormat::PCM16),
        output_audio_format: Some(oai_realtime::AudioFormat::PCM16),
        input_audio_transcription: Some(oai_realtime::AudioTranscription {
            model: Some("whisper-1".to_string()),
            ..Default::default()
        }),
        // Replies come from the persona, not from the realtime model.
        turn_detection: Some(oai_realtime::TurnDetection::ServerVAD {
            threshold: 0.5,
            prefix_padding_ms: 200,
            silence_duration_ms: 700,
            interrupt_response: Some(true),
            create_response: Some(false),
        }),
        ..Default::default()
    };
    OAIClientEvent::SessionUpdate(oai_realtime::SessionUpdateEvent {
        session,
        event_id: None,
    })
}

/// Maps a Realtime API server event onto a provider-neutral event.
pub fn translate(event: OAIServerEvent) -> Option<GenericServerEvent> {
    match event {
        OAIServerEvent::ConversationItemInputAudioTranscriptionDelta(e) => {
            Some(GenericServerEvent::Transcription {
                text: e.delta,
                is_final: false,
            })
        }
        OAIServerEvent::ConversationItemInputAudioTranscriptionCompleted(e) => {
            Some(GenericServerEvent::Transcription {
                text: e.transcript,
                is_final: true,
            })
        }
        OAIServerEvent::ResponseAudioDelta(e) => Some(GenericServerEvent::AudioChunk(e.delta)),
        OAIServerEvent::ResponseCreated(_) => Some(GenericServerEvent::Speaking),
        OAIServerEvent::ResponseDone(_) => Some(GenericServerEvent::SpeakingDone),
        OAIServerEvent::Error(e) => Some(GenericServerEvent::Error(e.error.message)),
        _ => None,
    }
}

/// Runs the OpenAI Realtime connection for one persona session.
///
/// Client audio is appended to the input buffer, persona replies are spoken
/// in the persona's voice, and final transcriptions are forwarded to the
/// session loop.
pub async fn run(
    state: &Arc<AppState>,
    session: &GenericSessionConfig,
    mut rx: mpsc::Receiver<RealtimeClientEvent>,
    socket_tx: Arc<Mutex<SplitSink<WebSocket, Message>>>,
    transcript_tx: mpsc::Sender<String>,
) -> Result<()> {
    let model = &state.config.realtime_model;
    let url = format!("wss://api.openai.com/v1/realtime?model={}", model);
    let api_key = state
        .config
        .openai_api_key
        .as_ref()
        .context("Voice requires OPENAI_API_KEY")?;

    let mut request = url.into_client_request()?;
    request
        .headers_mut()
        .insert("Authorization", format!("Bearer {}", api_key).parse()?);
    request
        .headers_mut()
        .insert("OpenAI-Beta", "realtime=v1".parse()?);

    let (ws_stream, _) = connect_async(request)
        .await
        .context("Failed to connect to OpenAI Realtime WebSocket")?;
    let (mut openai_tx, mut openai_rx) = ws_stream.split();
    info!("Connected to OpenAI Realtime API.");

    openai_tx
        .send(WsMessage::Text(
            serde_json::to_string(&session_update(session, model))?.into(),
        ))
        .await?;

    let mut spoken_ms: u64 = 0;
    // Replies requested but not yet finished. A retired session stays open
    // until these are done so a handoff does not cut off the last reply.
    let mut pending_replies: u32 = 0;
    let mut retiring = false;
    loop {
        tokio::select! {
            biased;
            event = rx.recv(), if !retiring => {
                let Some(event) = event else {
                    if pending_replies == 0 {
                        info!(spoken_ms, "Voice session closed.");
                        return Ok(());
                    }
                    info!(pending_replies, "Voice session retired. Finishing the current reply.");
                    retiring = true;
                    continue;
                };
                match event {
                    RealtimeClientEvent::Audio(data) => {
                        let audio = audio_utils::encode_i16(&audio_utils::pcm16_from_le_bytes(&data));
                        let append_event = oai_realtime::InputAudioBufferAppendEvent { audio, event_id: None };
                        openai_tx.send(WsMessage::Text(serde_json::to_string(&OAIClientEvent::InputAudioBufferAppend(append_event))?.into())).await?;
                    }
                    RealtimeClientEvent::TextToSpeak(text) => {
                        let item = oai_realtime::Item {
                            r#type: Some(oai_realtime::ItemType::Message),
                            role: Some(oai_realtime::ItemRole::System),
                            content: Some(vec![oai_realtime::ItemContent {
                                r#type: oai_realtime::ItemContentType::InputText,
                                text: Some(text), audio: None, transcript: None,
                            }]),
                            id: None, status: None, call_id: None, name: None, arguments: None, output: None
                        };
                        let create_event = oai_realtime::ConversationItemCreateEvent { item, event_id: None, previous_item_id: None };
                        openai_tx.send(WsMessage::Text(serde_json::to_string(&OAIClientEvent::ConversationItemCreate(create_event))?.into())).await?;

                        let response_event = oai_realtime::ResponseCreateEvent { response: None, event_id: None };
                        openai_tx.send(WsMessage::Text(serde_json::to_string(&OAIClientEvent::ResponseCreate(response_event))?.into())).await?;
                        pending_replies += 1;
                    }
                }
            },
            msg = openai_rx.next() => {
                let text = match msg {
                    Some(Ok(WsMessage::Text(text))) => text,
                    Some(Ok(WsMessage::Close(_))) | None => {
                        info!(spoken_ms, "OpenAI Realtime connection closed.");
                        if !retiring {
                            let mut sink = socket_tx.lock().await;
                            send_msg(&mut sink, GenericServerEvent::Closed.into()).await?;
                        }
                        return Ok(());
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => return Err(e).context("OpenAI Realtime stream error"),
                };
                let server_event = match serde_json::from_str::<OAIServerEvent>(&text) {
                    Ok(event) => event,
                    Err(e) => {
                        debug!(error = %e, "Ignoring unrecognized realtime event");
                        continue;
                    }
                };
                let Some(event) = translate(server_event) else { continue };

                let mut finished = false;
                match &event {
                    GenericServerEvent::AudioChunk(data) => {
                        spoken_ms += audio_utils::chunk_duration_ms(data);
                    }
                    GenericServerEvent::Transcription { text, is_final: true } => {
                        if !retiring && !text.trim().is_empty() && transcript_tx.send(text.clone()).await.is_err() {
                            warn!("Session loop dropped; discarding transcript.");
                        }
                    }
                    GenericServerEvent::SpeakingDone => {
                        pending_replies = pending_replies.saturating_sub(1);
                        debug!(spoken_ms, pending_replies, "Finished speaking");
                        finished = retiring && pending_replies == 0;
                    }
                    _ => {}
                }
                {
                    let mut sink = socket_tx.lock().await;
                    send_msg(&mut sink, ServerMessage::from(event)).await?;
                }
                if finished {
                    info!(spoken_ms, "Retired voice session finished its last reply.");
                    return Ok(());
                }
            },
        }
    }
}
