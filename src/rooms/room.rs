use axum::{Json, debug_handler, extract::{Path, State}, http::StatusCode, response::{IntoResponse, Response}};
use sqlx::SqlitePool;

use crate::{AppResult, db, error::RoomError, rooms::msg::MessageEvent};

/// Room history, oldest first, in the same shape the broadcast events use.
#[debug_handler]
pub(crate) async fn messages(
    State(db_pool): State<SqlitePool>,
    Path(room_name): Path<String>,
) -> AppResult<Response> {
    let Some(room) = db::find_room(&db_pool, &room_name).await? else {
        return Ok((StatusCode::NOT_FOUND, RoomError::NotFound.to_string()).into_response());
    };

    let events: Vec<MessageEvent> = db::list_messages(&db_pool, room.uuid)
        .await?
        .into_iter()
        .map(MessageEvent::from)
        .collect();

    Ok(Json(events).into_response())
}
