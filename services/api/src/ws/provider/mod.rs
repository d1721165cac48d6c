//! Real-time voice provider connection: speech-to-text for the student and
//! text-to-speech in the active persona's voice.

pub mod openai;

use super::{protocol::ServerMessage, session::send_msg};
use crate::state::AppState;
use anyhow::Result;
use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures_util::stream::SplitSink;
use std::sync::Arc;
use tokio::{
    sync::{Mutex, mpsc},
    task::JoinHandle,
};
use tracing::{Instrument, error};
use tutor_core::generic_types::GenericSessionConfig;

/// An internal event passed to the active real-time provider task.
#[derive(Debug)]
pub enum RealtimeClientEvent {
    /// A chunk of PCM16 audio from the client.
    Audio(Bytes),
    /// Text the persona should speak.
    TextToSpeak(String),
}

/// Spawns a voice provider task configured for one persona.
///
/// Final transcriptions of the student's speech are forwarded on
/// `transcript_tx` so the session loop can run them as turns. A handoff
/// aborts the returned task and starts a new one with the next persona's
/// session config.
pub async fn start_realtime_provider(
    state: Arc<AppState>,
    session: GenericSessionConfig,
    socket_tx: Arc<Mutex<SplitSink<WebSocket, Message>>>,
    transcript_tx: mpsc::Sender<String>,
) -> Result<(mpsc::Sender<RealtimeClientEvent>, JoinHandle<()>)> {
    let (tx, rx) = mpsc::channel(128);
    let span = tracing::info_span!("voice", persona = %session.persona, voice = %session.voice);

    let handle = tokio::spawn(
        async move {
            if let Err(e) = openai::run(&state, &session, rx, socket_tx.clone(), transcript_tx).await {
                error!(error = ?e, "Realtime provider task failed");
                let mut sink = socket_tx.lock().await;
                let _ = send_msg(
                    &mut sink,
                    ServerMessage::Error {
                        message: format!("Voice connection failed: {}", e),
                    },
                )
                .await;
            }
        }
        .instrument(span),
    );

    Ok((tx, handle))
}
