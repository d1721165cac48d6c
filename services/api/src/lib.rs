//! Tutor API Library Crate
//!
//! This library contains the tutoring web service: configuration, shared
//! state, the REST handlers over the concept store, and the WebSocket
//! session that runs the persona state machine. The `api` binary is a thin
//! wrapper around it.

pub mod audio_utils;
pub mod config;
pub mod handlers;
pub mod models;
pub mod router;
pub mod state;
pub mod ws;
