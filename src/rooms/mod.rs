mod msg;
mod new;
mod room;
mod ws;

use axum::{Router, routing::{get, post}};

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/new", post(new::new_room))
        .route("/{name}/ws", get(ws::room_ws))
        .route("/{name}/messages", get(room::messages))
}

/// Room names are path segments; only word characters pass.
pub(crate) fn is_valid_room_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}
