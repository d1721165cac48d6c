//! Manages the WebSocket connection lifecycle for one room's tutoring session.

use super::{
    cycle::handle_turn,
    protocol::{ClientMessage, ServerMessage},
    provider::{self, RealtimeClientEvent},
};
use crate::{
    models::{PersonaInfo, Turn},
    state::AppState,
};
use anyhow::{Result, anyhow};
use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use bytes::Bytes;
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use rmcp::{
    ServerHandler, ServiceExt,
    service::{RoleClient, RoleServer, RunningService},
};
use std::sync::Arc;
use tokio::{
    io::DuplexStream,
    sync::{Mutex, mpsc},
    task::JoinHandle,
};
use tracing::{Instrument, error, info, instrument, warn};
use tutor_core::{
    agent::{GreeterTools, LearnTools, QuizTools, TeachBackTools},
    generic_types::GenericSessionConfig,
    persona::Persona,
    session::{SessionEvent, TutorContext},
};
use uuid::Uuid;

type SocketSink = Arc<Mutex<SplitSink<WebSocket, Message>>>;

/// Axum handler to upgrade an HTTP connection to a WebSocket.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Entry point for a new connection: waits for `init`, then runs the session.
#[instrument(name = "ws_session", skip_all, fields(session_id, room))]
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let session_id = Uuid::new_v4();
    tracing::Span::current().record("session_id", session_id.to_string());
    info!("New WebSocket connection. Awaiting initialization...");

    let (socket_tx, mut socket_rx) = socket.split();
    let socket_tx: SocketSink = Arc::new(Mutex::new(socket_tx));

    let init = match socket_rx.next().await {
        Some(Ok(Message::Text(text))) => parse_init(&text),
        Some(Ok(_)) => Err(anyhow!("First message was not a text `init` message.")),
        Some(Err(e)) => Err(anyhow!(e)),
        None => {
            info!("Client disconnected before sending init message.");
            return;
        }
    };
    let room = match init {
        Ok(room) => room,
        Err(e) => {
            error!("Session initialization failed: {:?}", e);
            let _ = send_msg(
                &mut *socket_tx.lock().await,
                ServerMessage::Error {
                    message: e.to_string(),
                },
            )
            .await;
            return;
        }
    };
    tracing::Span::current().record("room", room.as_str());

    let session_span = tracing::info_span!("tutor_session", %session_id, %room);
    if let Err(e) = run_tutor_session(state, socket_tx, socket_rx, session_id, room)
        .instrument(session_span)
        .await
    {
        error!(error = ?e, "Tutor session terminated with error.");
    }
    info!("Tutor session finished.");
}

/// Parses the first client message, which must be a non-empty `init`.
fn parse_init(text: &str) -> Result<String> {
    match serde_json::from_str::<ClientMessage>(text)? {
        ClientMessage::Init { room } if !room.trim().is_empty() => Ok(room.trim().to_string()),
        ClientMessage::Init { .. } => Err(anyhow!("`room` must not be empty")),
        _ => Err(anyhow!("First message must be `init`")),
    }
}

/// The persona currently answering, with its tool service and MCP client.
pub(crate) struct ActivePersona {
    pub(crate) persona: Persona,
    pub(crate) mcp_client: RunningService<RoleClient, ()>,
    tools_handle: JoinHandle<()>,
}

impl ActivePersona {
    /// Constructs a fresh tool service for `persona` and connects a client to it.
    pub(crate) async fn connect(persona: Persona, ctx: &TutorContext) -> Result<Self> {
        let (server_transport, client_transport) = tokio::io::duplex(4096);
        let ctx = ctx.clone();
        let tools_handle = match persona {
            Persona::Greeter => tokio::spawn(serve_tools(GreeterTools::new(ctx), server_transport)),
            Persona::Learn => tokio::spawn(serve_tools(LearnTools::new(ctx), server_transport)),
            Persona::Quiz => tokio::spawn(serve_tools(QuizTools::new(ctx), server_transport)),
            Persona::TeachBack => {
                tokio::spawn(serve_tools(TeachBackTools::new(ctx), server_transport))
            }
        };
        let mcp_client = ().serve(client_transport).await?;
        Ok(Self {
            persona,
            mcp_client,
            tools_handle,
        })
    }

    /// Replaces this persona with a freshly constructed `persona`.
    async fn replace(&mut self, persona: Persona, ctx: &TutorContext) -> Result<()> {
        let next = Self::connect(persona, ctx).await?;
        std::mem::replace(self, next).shutdown();
        Ok(())
    }

    fn shutdown(self) {
        self.tools_handle.abort();
    }
}

async fn serve_tools<S: ServerHandler>(tools: S, transport: DuplexStream) {
    match ServiceExt::<RoleServer>::serve(tools, transport).await {
        Ok(service) => {
            let _ = service.waiting().await;
        }
        Err(e) => error!(error = ?e, "Persona tool service failed to start"),
    }
}

/// Takes every session event queued so far, oldest first.
fn drain_events(events_rx: &mut mpsc::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut events = vec![];
    while let Ok(event) = events_rx.try_recv() {
        events.push(event);
    }
    events
}

/// A running voice provider task for the active persona.
struct VoiceLink {
    tx: mpsc::Sender<RealtimeClientEvent>,
    handle: JoinHandle<()>,
}

#[derive(Debug, Default)]
struct SessionUsage {
    turns: usize,
    failed_turns: usize,
    tool_calls: usize,
    handoffs: usize,
}

/// Everything one room session owns besides its event sources.
struct TutorSession {
    state: Arc<AppState>,
    ctx: TutorContext,
    socket_tx: SocketSink,
    transcript_tx: mpsc::Sender<String>,
    active: ActivePersona,
    voice: Option<VoiceLink>,
    retired_voices: Vec<JoinHandle<()>>,
    history: Vec<Turn>,
    usage: SessionUsage,
}

impl TutorSession {
    async fn set_voice_enabled(&mut self, enabled: bool) -> Result<()> {
        if let Some(link) = self.voice.take() {
            link.handle.abort();
        }
        if enabled {
            let session_config = self.state.session_factory.create(self.active.persona);
            self.voice = Some(self.start_voice(session_config).await?);
            info!(persona = %self.active.persona, "Voice enabled by client.");
        } else {
            info!("Voice disabled by client.");
        }
        Ok(())
    }

    async fn start_voice(&self, session_config: GenericSessionConfig) -> Result<VoiceLink> {
        let (tx, handle) = provider::start_realtime_provider(
            self.state.clone(),
            session_config,
            self.socket_tx.clone(),
            self.transcript_tx.clone(),
        )
        .await?;
        Ok(VoiceLink { tx, handle })
    }

    async fn forward_audio(&self, data: Bytes) {
        match &self.voice {
            Some(link) => {
                if let Err(e) = link.tx.send(RealtimeClientEvent::Audio(data)).await {
                    error!("Failed to send audio to provider task: {}", e);
                }
            }
            None => warn!("Received audio data from client, but voice is not enabled."),
        }
    }

    async fn apply_event(&mut self, event: SessionEvent) -> Result<()> {
        match event {
            SessionEvent::StateUpdate(new_state) => {
                send_msg(
                    &mut *self.socket_tx.lock().await,
                    ServerMessage::StateUpdate { state: new_state },
                )
                .await
            }
            SessionEvent::Handoff {
                persona,
                state: new_state,
            } => {
                info!(from = %self.active.persona, to = %persona, "Handing off to new persona");
                self.usage.handoffs += 1;
                let session_config = self.state.session_factory.create(persona);
                self.active.replace(persona, &self.ctx).await?;

                if let Some(link) = self.voice.take() {
                    // Dropping the sender lets the old voice finish its last reply.
                    drop(link.tx);
                    self.retired_voices.retain(|h| !h.is_finished());
                    self.retired_voices.push(link.handle);
                    self.voice = Some(self.start_voice(session_config).await?);
                }

                let mut sink = self.socket_tx.lock().await;
                send_msg(
                    &mut sink,
                    ServerMessage::PersonaChanged {
                        persona: PersonaInfo::describe(persona, &self.state.session_factory),
                    },
                )
                .await?;
                send_msg(&mut sink, ServerMessage::StateUpdate { state: new_state }).await
            }
        }
    }

    async fn apply_pending(&mut self, events_rx: &mut mpsc::Receiver<SessionEvent>) -> Result<()> {
        for event in drain_events(events_rx) {
            self.apply_event(event).await?;
        }
        Ok(())
    }

    async fn take_turn(&mut self, user_text: &str) -> Result<()> {
        let session = self.ctx.snapshot().await;
        let voice_tx = self.voice.as_ref().map(|link| link.tx.clone());
        match handle_turn(
            &self.state,
            self.active.persona,
            &session,
            &mut self.history,
            &self.active.mcp_client,
            user_text,
            &self.socket_tx,
            &voice_tx,
        )
        .await
        {
            Ok(tool_calls) => {
                self.usage.turns += 1;
                self.usage.tool_calls += tool_calls;
            }
            Err(e) => {
                self.usage.failed_turns += 1;
                error!(error = ?e, persona = %self.active.persona, "Turn failed");
                send_msg(
                    &mut *self.socket_tx.lock().await,
                    ServerMessage::Error {
                        message: "Sorry, I couldn't process that. Please try again.".to_string(),
                    },
                )
                .await?;
            }
        }
        Ok(())
    }

    async fn finish(mut self) {
        if let Some(link) = self.voice.take() {
            link.handle.abort();
        }
        for handle in self.retired_voices.drain(..) {
            handle.abort();
        }
        let final_state = self.ctx.snapshot().await;
        info!(
            turns = self.usage.turns,
            failed_turns = self.usage.failed_turns,
            tool_calls = self.usage.tool_calls,
            handoffs = self.usage.handoffs,
            final_mode = ?final_state.current_mode,
            "Session usage"
        );
        self.active.shutdown();
    }
}

/// The main event loop for an active tutoring session.
///
/// Student turns (typed or transcribed) are handled one at a time by the
/// active persona. Session events raised by persona tools during a turn are
/// applied before anything else is read, so the next turn always runs on
/// the persona the last switch asked for.
async fn run_tutor_session(
    state: Arc<AppState>,
    socket_tx: SocketSink,
    mut socket_rx: SplitStream<WebSocket>,
    session_id: Uuid,
    room: String,
) -> Result<()> {
    let (events_tx, mut events_rx) = mpsc::channel(32);
    let ctx = TutorContext::new(state.concepts.clone(), Some(events_tx));
    let active = ActivePersona::connect(Persona::Greeter, &ctx).await?;
    let (transcript_tx, mut transcript_rx) = mpsc::channel::<String>(8);

    send_msg(
        &mut *socket_tx.lock().await,
        ServerMessage::Initialized {
            session_id,
            room,
            persona: PersonaInfo::describe(active.persona, &state.session_factory),
            state: ctx.snapshot().await,
        },
    )
    .await?;

    let mut session = TutorSession {
        state,
        ctx,
        socket_tx,
        transcript_tx,
        active,
        voice: None,
        retired_voices: vec![],
        history: vec![],
        usage: SessionUsage::default(),
    };

    let outcome = loop {
        let user_text = tokio::select! {
            biased;
            Some(event) = events_rx.recv() => {
                if let Err(e) = session.apply_event(event).await {
                    break Err(e);
                }
                None
            },
            Some(msg_result) = socket_rx.next() => {
                match msg_result {
                    Ok(Message::Text(text)) => match serde_json::from_str::<ClientMessage>(&text) {
                        Ok(ClientMessage::UserMessage { text }) => Some(text),
                        Ok(ClientMessage::SetVoiceEnabled { enabled }) => {
                            if let Err(e) = session.set_voice_enabled(enabled).await {
                                break Err(e);
                            }
                            None
                        }
                        Ok(ClientMessage::Init { .. }) => {
                            warn!("Ignoring repeated init message.");
                            None
                        }
                        Err(e) => {
                            warn!(error = %e, "Ignoring malformed client message.");
                            None
                        }
                    },
                    Ok(Message::Binary(data)) => {
                        session.forward_audio(data).await;
                        None
                    }
                    Ok(Message::Close(_)) => {
                        info!("Client sent close frame. Shutting down session.");
                        break Ok(());
                    }
                    Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => None,
                    Err(e) => {
                        error!("Error receiving from client WebSocket: {:?}", e);
                        break Ok(());
                    }
                }
            },
            Some(transcript) = transcript_rx.recv() => Some(transcript),
            else => break Ok(()),
        };

        let Some(user_text) = user_text else { continue };
        if let Err(e) = session.take_turn(&user_text).await {
            break Err(e);
        }
        // Apply the turn's switches before the next utterance is read.
        if let Err(e) = session.apply_pending(&mut events_rx).await {
            break Err(e);
        }
    };

    session.finish().await;
    outcome
}

/// A helper function to serialize and send a `ServerMessage` to the client.
pub(crate) async fn send_msg(
    socket_tx: &mut SplitSink<WebSocket, Message>,
    msg: ServerMessage,
) -> Result<()> {
    let serialized = serde_json::to_string(&msg)?;
    socket_tx.send(Message::Text(serialized.into())).await?;
    Ok(())
}
