//! Check-in API - REST server
//!
//! Provides HTTP endpoints for principal authentication, event management
//! and participant check-in.
//!
//! Author: hephaex@gmail.com

pub mod audit;
pub mod auth;
pub mod checkin;
pub mod error;
pub mod events;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod state;

use axum::{middleware as axum_middleware, routing::get, Router};
use state::AppState;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};

/// OpenAPI document for the HTTP surface
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Check-in API",
        description = "Event check-in with JWT access/refresh token rotation"
    ),
    paths(
        handlers::health::health_check,
        handlers::health::readiness_check,
        handlers::auth::register_handler,
        handlers::auth::login_handler,
        handlers::auth::refresh_handler,
        handlers::auth::logout_handler,
        handlers::auth::me_handler,
        handlers::auth::delete_principal_handler,
        handlers::events::create_event,
        handlers::events::get_event,
        handlers::events::add_participant,
        handlers::checkins::check_in,
        handlers::checkins::cancel_check_in,
        handlers::checkins::checkin_status,
    ),
    components(schemas(
        error::ApiError,
        auth::RegisterRequest,
        auth::LoginRequest,
        auth::RefreshRequest,
        auth::LogoutRequest,
        auth::AuthResponse,
        handlers::auth::LogoutResponse,
        handlers::health::HealthResponse,
        handlers::health::ReadinessResponse,
        handlers::health::ReadinessChecks,
        events::CreateEventRequest,
        events::AddParticipantRequest,
        events::EventDetails,
        checkin::CheckInRequest,
        checkin::CheckInStatus,
        checkin_core::PrincipalPublic,
        checkin_core::Role,
        checkin_core::Event,
        checkin_core::Participant,
        checkin_core::CheckIn,
        checkin_core::CheckInMethod,
    )),
    modifiers(&BearerAuth),
    tags(
        (name = "health", description = "Liveness and readiness"),
        (name = "auth", description = "Registration and token lifecycle"),
        (name = "events", description = "Events and participants"),
        (name = "checkins", description = "Participant check-in")
    )
)]
pub struct ApiDoc;

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

/// Build the full application router
pub fn create_router(state: Arc<AppState>) -> Router {
    let request_timeout = Duration::from_secs(state.config.server.request_timeout_secs);

    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/ready", get(handlers::health::readiness_check))
        .route("/metrics", get(handlers::health::metrics))
        .route(
            "/api-docs/openapi.json",
            get(|| async { axum::Json(ApiDoc::openapi()) }),
        )
        .nest("/api/v1", routes::api_routes(state.clone()))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::metrics_middleware,
        ))
        .layer(axum_middleware::from_fn(
            middleware::security_headers_middleware,
        ))
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Router over in-memory storage with fast password hashing
#[cfg(any(test, feature = "test-utils"))]
pub fn create_router_for_testing() -> Router {
    create_router(create_state_for_testing())
}

/// State behind [`create_router_for_testing`], for tests that seed data directly
#[cfg(any(test, feature = "test-utils"))]
pub fn create_state_for_testing() -> Arc<AppState> {
    Arc::new(AppState::new(
        checkin_core::AppConfig::default(),
        state::Stores::in_memory(),
        auth::PasswordConfig::minimal(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_document_lists_paths() {
        let doc = ApiDoc::openapi();
        let json = serde_json::to_value(&doc).unwrap();

        assert!(json["paths"]["/api/v1/auth/refresh"].is_object());
        assert!(json["paths"]["/api/v1/events/{id}/checkins"].is_object());
        assert!(json["components"]["securitySchemes"]["bearer_auth"].is_object());
    }

    #[tokio::test]
    async fn test_router_builds() {
        let _ = create_router_for_testing().into_make_service();
    }
}
