pub mod access;
pub mod config;
pub mod crm;
pub mod db_types;
pub mod error;
pub mod event_log;
pub mod extract;
pub mod handlers;
pub mod leads;
pub mod memory_store;
pub mod notify;
pub mod openai_types;
pub mod pages;
pub mod phone;
pub mod pipeline;
pub mod quality;
pub mod schema;
pub mod store;
pub mod transcript;
pub mod twilio;
pub mod twilio_types;
pub mod types;
pub mod utils;

use crate::types::AppState;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

pub fn app(app_state: Arc<AppState>) -> Router {
    Router::new()
        .route(
            "/voice/recording_callback",
            get(handlers::recording_callback).post(handlers::recording_callback),
        )
        .route("/voice/ci_callback", post(handlers::transcript_callback))
        .route(
            "/voice/incoming",
            get(handlers::incoming_call).post(handlers::incoming_call),
        )
        .route("/health", get(handlers::health))
        .with_state(app_state)
}
