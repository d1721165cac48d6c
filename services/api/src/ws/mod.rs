//! WebSocket tutoring sessions
//!
//! One connection joins one room and runs one tutoring session:
//!
//! - `protocol`: Defines the JSON-based message format for client-server communication.
//! - `session`: Manages the connection lifecycle, persona handoffs and session events.
//! - `cycle`: Runs a single persona turn: tool calls, then the reply.
//! - `provider`: Handles the real-time voice connection for the active persona.

mod cycle;
pub mod protocol;
mod provider;
pub mod session;

pub use session::ws_handler;
