use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{CloseFrame, Message, WebSocket, close_code},
    },
    response::Response,
};
use futures_util::sink::SinkExt;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, debug_span, info, trace};

use crate::AppState;

pub async fn sensor_ws(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state).instrument(debug_span!("sensor_ws")))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let _tracker_token = state.ws_graceful_shutdown.tracker.token();
    let cancellation_token = state.ws_graceful_shutdown.token.child_token();

    info!("client connected");

    let mut conn = SocketConn {
        ws: socket,
        cancellation_token,
    };

    while conn.next().await {}
    conn.ws.close().await.ok();
    debug!("client disconnected");
}

struct SocketConn {
    ws: WebSocket,
    cancellation_token: CancellationToken,
}

impl SocketConn {
    async fn close<T: IntoCloseFrame>(&mut self, msg: T) -> anyhow::Result<()> {
        let msg = msg.into_close_frame();
        match msg {
            Some(CloseFrame { code, ref reason }) if code != close_code::NORMAL => {
                debug!(
                    code,
                    %reason,
                    "closing websocket with error"
                );
            }
            _ => {}
        }
        self.ws.send(Message::Close(msg)).await?;
        Ok(())
    }

    async fn next(&mut self) -> bool {
        tokio::select! {
            msg = self.ws.recv() => {
                let msg = match msg {
                    Some(Ok(m)) => m,
                    Some(Err(e)) => {
                        let reason = SocketError::Internal(e.to_string());
                        self.close(reason).await.ok();
                        return false;
                    }
                    None => {
                        return false; // connection closed
                    }
                };

                self.process_msg(msg);
                return true;
            }
            _ = self.cancellation_token.cancelled() => {
                self.close(SocketError::Shutdown).await.ok();
                return false;
            }
        }
    }

    // There is no payload contract on this socket; whatever a client sends
    // is noted and dropped.
    fn process_msg(&mut self, msg: Message) {
        match msg {
            Message::Close(Some(CloseFrame { code, reason })) => {
                trace!(
                    code,
                    %reason,
                    "websocket closed with frame"
                );
            }
            Message::Text(text) => {
                trace!("ignoring text frame: {:?}", text);
            }
            Message::Binary(bytes) => {
                trace!("ignoring binary frame ({} bytes)", bytes.len());
            }
            _ => {} // ignore other messages
        }
    }
}

trait IntoCloseFrame {
    fn into_close_frame(self) -> Option<CloseFrame>;
}

#[derive(Debug, thiserror::Error)]
enum SocketError {
    #[error("server is shutting down")]
    Shutdown,
    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoCloseFrame for SocketError {
    fn into_close_frame(self) -> Option<CloseFrame> {
        Some(match self {
            SocketError::Shutdown => CloseFrame {
                code: close_code::AWAY,
                reason: "server shutting down".into(),
            },
            SocketError::Internal(reason) => CloseFrame {
                code: close_code::ERROR,
                reason: format!("internal error: {}", reason).into(),
            },
        })
    }
}
