use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use serde::Deserialize;
use wanderchat_shared::UserIdentity;

use crate::auth::jwt;
use crate::state::AppState;
use crate::ws::actor;

/// Query parameters for WebSocket connection: `?token=JWT&user_id=ID`.
#[derive(Debug, Deserialize)]
pub struct WsAuthQuery {
    pub token: String,
    pub user_id: String,
}

/// 4001 = token expired
/// 4002 = token invalid
/// 4003 = user id does not match the token subject
pub const CLOSE_TOKEN_EXPIRED: u16 = 4001;
pub const CLOSE_TOKEN_INVALID: u16 = 4002;
pub const CLOSE_USER_MISMATCH: u16 = 4003;

/// GET /ws?token=JWT&user_id=ID
/// WebSocket upgrade endpoint. Authenticates via query parameters.
/// On auth failure, upgrades then immediately closes with the matching close code.
/// On success, spawns an actor for the connection.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(params): Query<WsAuthQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    match authenticate(&state, &params) {
        Ok(identity) => {
            tracing::info!(user_id = %identity.id, "WebSocket connection authenticated");
            ws.on_upgrade(move |socket| handle_authenticated(socket, state, identity))
        }
        Err((close_code, reason)) => {
            tracing::warn!(
                close_code = close_code,
                reason = reason,
                "WebSocket auth failed"
            );

            ws.on_upgrade(move |mut socket| async move {
                let close_frame = CloseFrame {
                    code: close_code,
                    reason: reason.into(),
                };
                let _ = socket.send(Message::Close(Some(close_frame))).await;
            })
        }
    }
}

fn authenticate(state: &AppState, params: &WsAuthQuery) -> Result<UserIdentity, (u16, &'static str)> {
    let claims = jwt::validate_access_token(&state.jwt_secret, &params.token).map_err(|err| {
        match err.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => (CLOSE_TOKEN_EXPIRED, "Token expired"),
            _ => (CLOSE_TOKEN_INVALID, "Token invalid"),
        }
    })?;

    if claims.sub != params.user_id {
        return Err((CLOSE_USER_MISMATCH, "User id does not match token"));
    }
    Ok(claims.identity())
}

async fn handle_authenticated(socket: WebSocket, state: AppState, identity: UserIdentity) {
    actor::run_connection(socket, state, identity).await;
}
