//! API route definitions
//!
//! Author: hephaex@gmail.com

use crate::auth::middleware::{auth_middleware, optional_auth_middleware, require_role};
use crate::handlers::{auth, checkins, events};
use crate::state::AppState;
use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};
use checkin_core::Role;
use std::sync::Arc;

const EVENT_MANAGERS: &[Role] = &[Role::Organizer, Role::Admin];
const ADMINS: &[Role] = &[Role::Admin];

/// Create API v1 routes
///
/// `route_layer` wraps outward, so in each protected group the auth
/// middleware runs before the role check.
pub fn api_routes(state: Arc<AppState>) -> Router<Arc<AppState>> {
    // Public routes (no authentication required)
    // Logout reads its tokens itself so an expired access token does not block it
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register_handler))
        .route("/auth/login", post(auth::login_handler))
        .route("/auth/refresh", post(auth::refresh_handler))
        .route("/auth/logout", post(auth::logout_handler));

    // Identity attached when present
    let optional_routes = Router::new()
        .route("/events/:id", get(events::get_event))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            optional_auth_middleware,
        ));

    // Any authenticated principal
    let authenticated_routes = Router::new()
        .route("/auth/me", get(auth::me_handler))
        .route(
            "/participants/:id/checkin-status",
            get(checkins::checkin_status),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    // Organizers and admins; per-event ownership is checked by the services
    let manager_routes = Router::new()
        .route("/events", post(events::create_event))
        .route("/events/:id/participants", post(events::add_participant))
        .route("/events/:id/checkins", post(checkins::check_in))
        .route("/checkins/:id", delete(checkins::cancel_check_in))
        .route_layer(middleware::from_fn(require_role(EVENT_MANAGERS)))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    let admin_routes = Router::new()
        .route("/principals/:id", delete(auth::delete_principal_handler))
        .route_layer(middleware::from_fn(require_role(ADMINS)))
        .route_layer(middleware::from_fn_with_state(state, auth_middleware));

    Router::new()
        .merge(public_routes)
        .merge(optional_routes)
        .merge(authenticated_routes)
        .merge(manager_routes)
        .merge(admin_routes)
}
