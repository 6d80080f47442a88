use std::sync::Arc;

use axum::{Json, debug_handler, extract::State, http::StatusCode, response::{IntoResponse, Response}};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{AppResult, registry::RoomRegistry, rooms::is_valid_room_name};

#[derive(Debug, Deserialize)]
pub(crate) struct NewRoomQuery {
    name: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct RoomSummary {
    id: Uuid,
    name: String,
}

/// Explicit room creation. Rooms also spring into being when a session
/// connects to them, so this is get-or-create rather than a bare insert.
#[debug_handler(state = crate::AppState)]
pub(crate) async fn new_room(
    State(registry): State<Arc<RoomRegistry>>,

    Json(NewRoomQuery { name }): Json<NewRoomQuery>,
) -> AppResult<Response> {
    if !is_valid_room_name(&name) {
        return Ok((StatusCode::BAD_REQUEST, "room names are word characters only").into_response());
    }

    let room = registry.get_or_create(&name).await?;

    Ok(Json(RoomSummary {
        id: room.uuid,
        name: room.name,
    })
    .into_response())
}
