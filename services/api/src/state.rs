//! Shared Application State
//!
//! This module defines the `AppState` struct, which holds the loaded concept
//! store, the persona session factory and the chat client.

use crate::config::Config;
use std::sync::Arc;
use tutor_core::{concept::ConceptStore, llm_client::LLMClient, session::SessionFactory};

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub concepts: Arc<ConceptStore>,
    pub session_factory: Arc<SessionFactory>,
    pub llm_client: Arc<dyn LLMClient>,
    pub config: Arc<Config>,
}
