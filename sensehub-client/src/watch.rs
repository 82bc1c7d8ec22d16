use futures_util::{SinkExt, StreamExt};
use log::{info, warn};
use tokio_tungstenite::tungstenite::{Message, client::IntoClientRequest, protocol::CloseFrame};
use tokio_util::sync::CancellationToken;

use crate::{ReconnectTimer, http};

/// Hold a socket open against the station and report what happens to it.
///
/// Returns Ok on ctrl-c; any server-side closure is an error so the caller
/// reconnects with backoff.
pub async fn run(
    server_addr: &str,
    tls: bool,
    prefer_ipv6: bool,
    shutdown: &CancellationToken,
    backoff: &mut ReconnectTimer,
) -> anyhow::Result<()> {
    let req = format!("{}://{server_addr}/ws", if tls { "wss" } else { "ws" })
        .into_client_request()?;

    let stream = http::connect_tls(&req, tls, prefer_ipv6).await?;
    let (socket, _) = tokio_tungstenite::client_async(req, stream).await?;
    backoff.reset();
    info!("watching {server_addr}");

    let (mut write, mut read) = socket.split();

    loop {
        tokio::select! {
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Close(frame))) => {
                        match frame {
                            Some(CloseFrame { code, reason }) => {
                                warn!("connection closed by server: code={code:?}, reason={reason}");
                            }
                            None => warn!("connection closed by server"),
                        }
                        anyhow::bail!("server closed the connection");
                    }
                    Some(Ok(_)) => {} // nothing else is defined on this socket
                    Some(Err(e)) => return Err(e.into()),
                    None => anyhow::bail!("connection lost"),
                }
            }
            _ = shutdown.cancelled() => {
                write.close().await.ok();
                return Ok(());
            }
        }
    }
}
