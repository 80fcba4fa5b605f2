use std::sync::Arc;

use axum::{
    middleware,
    routing::{delete, get, patch, post},
    Router,
};

use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::handlers;

pub fn schedule_routes(state: Arc<AppConfig>) -> Router {
    Router::new()
        // Patient-facing availability views
        .route("/doctors/{doctor_id}/available", get(handlers::get_available_schedules))
        .route("/{schedule_id}/slots", get(handlers::get_available_slots))

        // Staff calendar management
        .route("/doctors/{doctor_id}", post(handlers::create_schedule))
        .route("/doctors/{doctor_id}", get(handlers::list_doctor_schedules))
        .route("/{schedule_id}/deactivate", patch(handlers::deactivate_schedule))
        .route("/{schedule_id}", delete(handlers::delete_schedule))

        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .with_state(state)
}
