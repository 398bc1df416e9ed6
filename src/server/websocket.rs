//! Game WebSocket channel
//!
//! Clients send `{"event":"gameAction","sessionToken":..,"action":{..}}`
//! text frames. Each one is answered on the same socket with an
//! `actionConfirmed` or `actionError` event.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use hyper_tungstenite::tungstenite::Message;
use serde::Deserialize;
use tracing::{debug, error, info, warn};

use crate::intake::{ActionEvent, GameAction};
use crate::server::http::AppState;

const GAME_ACTION_EVENT: &str = "gameAction";

type GameSocket = hyper_tungstenite::WebSocketStream<hyper_util::rt::TokioIo<hyper::upgrade::Upgraded>>;

/// Inbound frame
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameActionFrame {
    pub event: String,
    pub session_token: String,
    pub action: GameAction,
}

/// Handle WebSocket upgrade for the game channel
pub fn handle_game_upgrade(
    state: Arc<AppState>,
    req: Request<Incoming>,
    addr: SocketAddr,
) -> Response<Full<Bytes>> {
    match hyper_tungstenite::upgrade(req, None) {
        Ok((response, websocket)) => {
            tokio::spawn(async move {
                match websocket.await {
                    Ok(ws) => {
                        info!(client = %addr, "Game client connected");
                        run_game_socket(state, ws).await;
                        info!(client = %addr, "Game client disconnected");
                    }
                    Err(e) => {
                        error!("WebSocket upgrade failed: {:?}", e);
                    }
                }
            });

            let (parts, _) = response.into_parts();
            Response::from_parts(parts, Full::new(Bytes::new()))
        }
        Err(e) => {
            error!("WebSocket upgrade error: {:?}", e);
            Response::builder()
                .status(StatusCode::BAD_REQUEST)
                .body(Full::new(Bytes::from(format!(
                    "WebSocket upgrade failed: {e}"
                ))))
                .unwrap_or_default()
        }
    }
}

async fn run_game_socket(state: Arc<AppState>, ws: GameSocket) {
    let (mut sink, mut stream) = ws.split();

    while let Some(msg) = stream.next().await {
        let reply = match msg {
            Ok(Message::Text(text)) => handle_frame(&state, &text).await,
            Ok(Message::Ping(data)) => Some(Message::Pong(data)),
            Ok(Message::Close(frame)) => {
                debug!("Game client closed: {:?}", frame);
                break;
            }
            Ok(Message::Binary(_)) => {
                warn!("Ignoring binary frame on game channel");
                None
            }
            Ok(_) => None,
            Err(e) => {
                warn!("Game socket error: {}", e);
                break;
            }
        };

        if let Some(reply) = reply {
            if let Err(e) = sink.send(reply).await {
                warn!("Failed to send game event: {}", e);
                break;
            }
        }
    }
}

/// Process one text frame, returning the event to send back
async fn handle_frame(state: &AppState, text: &str) -> Option<Message> {
    let event = match serde_json::from_str::<GameActionFrame>(text) {
        Ok(frame) if frame.event == GAME_ACTION_EVENT => {
            let action_id = frame.action.id.clone();
            let result = state.intake.submit(&frame.session_token, frame.action).await;
            ActionEvent::from_result(action_id, &result)
        }
        Ok(frame) => ActionEvent::Error {
            action_id: frame.action.id,
            error: format!("Unknown event: {}", frame.event),
        },
        Err(e) => ActionEvent::Error {
            action_id: String::new(),
            error: format!("Malformed frame: {}", e),
        },
    };

    match serde_json::to_string(&event) {
        Ok(json) => Some(Message::Text(json.into())),
        Err(e) => {
            error!("Failed to encode game event: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::http::test_state;
    use serde_json::{json, Value as JsonValue};

    fn decode(message: Option<Message>) -> JsonValue {
        match message {
            Some(Message::Text(text)) => serde_json::from_str(&text).unwrap(),
            other => panic!("expected text frame, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_game_action_confirmed() {
        let state = test_state();
        let token = state.sessions.create_session("user_1", "0xabc").unwrap();
        let frame = json!({
            "event": "gameAction",
            "sessionToken": token,
            "action": {"id": "a1", "method": "game_action", "parameters": {}}
        });

        let reply = decode(handle_frame(&state, &frame.to_string()).await);
        assert_eq!(reply["event"], "actionConfirmed");
        assert_eq!(reply["actionId"], "a1");
        assert_eq!(reply["status"], "queued");
        assert_eq!(reply["batchPosition"], 1);
    }

    #[tokio::test]
    async fn test_game_action_error() {
        let state = test_state();
        let frame = json!({
            "event": "gameAction",
            "sessionToken": "garbage",
            "action": {"id": "a1", "method": "game_action"}
        });

        let reply = decode(handle_frame(&state, &frame.to_string()).await);
        assert_eq!(reply["event"], "actionError");
        assert_eq!(reply["actionId"], "a1");
        assert_eq!(reply["error"], "Invalid session");
    }

    #[tokio::test]
    async fn test_malformed_and_unknown_frames() {
        let state = test_state();

        let reply = decode(handle_frame(&state, "{not json").await);
        assert_eq!(reply["event"], "actionError");

        let frame = json!({
            "event": "somethingElse",
            "sessionToken": "t",
            "action": {"id": "a9", "method": "game_action"}
        });
        let reply = decode(handle_frame(&state, &frame.to_string()).await);
        assert_eq!(reply["actionId"], "a9");
        assert!(reply["error"].as_str().unwrap().contains("Unknown event"));
    }
}
