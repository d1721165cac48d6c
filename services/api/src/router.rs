//! Axum Router Configuration
//!
//! This module defines the complete HTTP routing for the application,
//! including the REST API, WebSocket endpoint, and OpenAPI documentation.

use crate::{
    handlers,
    models::{Concept, ErrorResponse, PersonaInfo},
    state::AppState,
    ws::ws_handler,
};

use axum::{Router, routing::get};
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::list_concepts,
        handlers::get_concept,
        handlers::list_personas,
    ),
    components(
        schemas(Concept, PersonaInfo, ErrorResponse)
    ),
    tags(
        (name = "Tutor API", description = "Concept content and personas for the voice tutor")
    )
)]
pub struct ApiDoc;

/// Creates the main Axum router for the application.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    let api_router = Router::new()
        .route("/concepts", get(handlers::list_concepts))
        .route("/concepts/{id}", get(handlers::get_concept))
        .route("/personas", get(handlers::list_personas))
        .route("/ws", get(ws_handler))
        .with_state(app_state);

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(api_router)
}
