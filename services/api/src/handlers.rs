//! Axum Handlers for the REST API
//!
//! Read-only views over the concept store and the persona roster. The
//! `utoipa` doc attributes feed the generated OpenAPI document.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use std::sync::Arc;
use tracing::error;
use tutor_core::persona::Persona;

use crate::{
    models::{Concept, ErrorResponse, PersonaInfo},
    state::AppState,
};

pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    InternalServerError(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, Json(ErrorResponse { message })).into_response()
            }
            ApiError::NotFound(message) => {
                (StatusCode::NOT_FOUND, Json(ErrorResponse { message })).into_response()
            }
            ApiError::InternalServerError(err) => {
                error!("Internal Server Error: {:?}", err);
                let message = "An internal server error occurred.".to_string();
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorResponse { message }),
                )
                    .into_response()
            }
        }
    }
}

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self::InternalServerError(err.into())
    }
}

/// List every loaded concept in file order.
#[utoipa::path(
    get,
    path = "/concepts",
    responses(
        (status = 200, description = "All loaded concepts", body = [Concept])
    )
)]
pub async fn list_concepts(State(state): State<Arc<AppState>>) -> Json<Vec<Concept>> {
    Json(state.concepts.all().iter().map(Concept::from).collect())
}

/// Get a single concept by id. The id is matched case-insensitively.
#[utoipa::path(
    get,
    path = "/concepts/{id}",
    responses(
        (status = 200, description = "Concept details", body = Concept),
        (status = 400, description = "Empty concept id", body = ErrorResponse),
        (status = 404, description = "Concept not found", body = ErrorResponse)
    ),
    params(
        ("id" = String, Path, description = "Concept ID, e.g. 'loops'")
    )
)]
pub async fn get_concept(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Concept>, ApiError> {
    if id.trim().is_empty() {
        return Err(ApiError::BadRequest("Concept id must not be empty".to_string()));
    }
    let concept = state.concepts.find(&id).ok_or_else(|| {
        ApiError::NotFound(format!(
            "Concept '{}' not found. Available concepts are: {}",
            id,
            state.concepts.id_list("and")
        ))
    })?;
    Ok(Json(Concept::from(concept)))
}

/// Describe each persona: speaker, voice and tool set.
#[utoipa::path(
    get,
    path = "/personas",
    responses(
        (status = 200, description = "All personas", body = [PersonaInfo])
    )
)]
pub async fn list_personas(State(state): State<Arc<AppState>>) -> Json<Vec<PersonaInfo>> {
    Json(
        Persona::ALL
            .into_iter()
            .map(|p| PersonaInfo::describe(p, &state.session_factory))
            .collect(),
    )
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::{Config, Provider};
    use async_openai::config::OpenAIConfig;
    use std::{collections::HashMap, path::PathBuf};
    use tutor_core::{
        concept::{ConceptRecord, ConceptStore},
        llm_client::{LLMClient, OpenAICompatibleClient},
        persona::{PersonaPrompts, VoiceMap},
        session::SessionFactory,
    };

    pub(crate) fn test_state() -> Arc<AppState> {
        test_state_with(Arc::new(OpenAICompatibleClient::new(
            OpenAIConfig::new().with_api_key("test-key"),
            "gpt-4o".to_string(),
        )))
    }

    /// Two concepts, prompts "You are {speaker}." and the given chat client.
    pub(crate) fn test_state_with(llm_client: Arc<dyn LLMClient>) -> Arc<AppState> {
        let concepts = ConceptStore::new(
            ["variables", "loops"]
                .into_iter()
                .map(|id| ConceptRecord {
                    id: id.to_string(),
                    title: id.to_uppercase(),
                    summary: format!("About {id}."),
                    sample_question: format!("What are {id}?"),
                })
                .collect(),
        );
        let prompts: HashMap<String, String> = Persona::ALL
            .into_iter()
            .map(|p| (p.as_str().to_string(), format!("You are {}.", p.speaker())))
            .collect();
        let config = Config {
            bind_address: "127.0.0.1:0".parse().unwrap(),
            provider: Provider::OpenAI,
            openai_api_key: Some("test-key".to_string()),
            gemini_api_key: None,
            chat_model: "gpt-4o".to_string(),
            realtime_model: "gpt-4o-realtime-preview-2024-10-01".to_string(),
            log_level: tracing::Level::INFO,
            prompts_path: PathBuf::from("./prompts"),
            content_path: PathBuf::from("content.json"),
            voices: VoiceMap::default(),
        };

        Arc::new(AppState {
            concepts: Arc::new(concepts),
            session_factory: Arc::new(SessionFactory::new(
                PersonaPrompts::from_map(&prompts).unwrap(),
                config.voices.clone(),
            )),
            llm_client,
            config: Arc::new(config),
        })
    }

    #[tokio::test]
    async fn test_list_concepts_keeps_file_order() {
        let Json(concepts) = list_concepts(State(test_state())).await;
        let ids: Vec<_> = concepts.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["variables", "loops"]);
    }

    #[tokio::test]
    async fn test_get_concept_found_and_missing() {
        let state = test_state();

        let Json(concept) = get_concept(State(state.clone()), Path("LOOPS".to_string()))
            .await
            .ok()
            .expect("loops should be found");
        assert_eq!(concept.title, "LOOPS");

        match get_concept(State(state.clone()), Path("recursion".to_string())).await {
            Err(ApiError::NotFound(message)) => {
                assert!(message.contains("variables and loops"))
            }
            _ => panic!("Expected NotFound"),
        }

        let response = get_concept(State(state), Path("  ".to_string()))
            .await
            .err()
            .expect("empty id is rejected")
            .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_list_personas() {
        let Json(personas) = list_personas(State(test_state())).await;
        let voices: Vec<_> = personas
            .iter()
            .map(|p| (p.name.as_str(), p.voice.as_str()))
            .collect();
        assert_eq!(
            voices,
            vec![
                ("greeter", "en-US-matthew"),
                ("learn", "en-US-matthew"),
                ("quiz", "en-US-alicia"),
                ("teach_back", "en-US-ken"),
            ]
        );
    }

    #[test]
    fn test_internal_error_hides_details() {
        let response = ApiError::from(anyhow::anyhow!("secret detail")).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
