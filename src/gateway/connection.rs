use std::net::SocketAddr;

use futures_util::{SinkExt, StreamExt};
use quickchat_types::ChatFrame;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tracing::Instrument;

use super::Gateway;
use super::handshake::{HandshakeCallback, ResolvedHandshake};
use crate::metrics;

/// Accept sockets until the gateway shuts down
pub async fn run_websocket_server(gateway: Gateway, listener: TcpListener) {
    loop {
        let (socket, addr) = tokio::select! {
            _ = gateway.stopped() => break,
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    tracing::error!("Failed to accept socket: {}", e);
                    continue;
                }
            },
        };

        let gateway = gateway.clone();
        tokio::spawn(async move {
            accept_connection(socket, addr, gateway).await;
        });
    }
    tracing::info!("WebSocket listener stopped");
}

async fn accept_connection<S>(socket: S, addr: SocketAddr, gateway: Gateway)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut ws_config = WebSocketConfig::default();
    ws_config.max_message_size = Some(gateway.config().max_message_size);
    ws_config.max_frame_size = Some(gateway.config().max_message_size);

    let mut resolved = None;
    let callback = HandshakeCallback::new(gateway.config(), &mut resolved);
    let ws_stream =
        match tokio_tungstenite::accept_hdr_async_with_config(socket, callback, Some(ws_config)).await {
            Ok(ws_stream) => ws_stream,
            Err(e) => {
                tracing::debug!(addr = %addr, error = %e, "WebSocket handshake failed");
                return;
            }
        };

    // A completed handshake always went through the callback
    let Some(handshake) = resolved else {
        return;
    };

    handle_websocket(ws_stream, addr, gateway, handshake).await;
}

/// Drive one session: inbound frames become chat events, queued outbound
/// frames are written to the socket. Runs until either side closes.
async fn handle_websocket<S>(
    ws_stream: WebSocketStream<S>,
    addr: SocketAddr,
    gateway: Gateway,
    handshake: ResolvedHandshake,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (session, mut outbound) = gateway.connect(handshake.room_id, handshake.identity);
    let span = tracing::info_span!(
        "websocket_session",
        addr = %addr,
        session_id = %session.id,
        room_id = %session.room_id,
    );

    async {
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        loop {
            tokio::select! {
                msg = ws_receiver.next() => match msg {
                    Some(Ok(WsMessage::Text(text))) => {
                        handle_frame(&gateway, &session, text.as_bytes());
                    }
                    Some(Ok(WsMessage::Binary(data))) => {
                        handle_frame(&gateway, &session, &data);
                    }
                    Some(Ok(WsMessage::Close(_))) | None => {
                        tracing::debug!("Connection closed by client");
                        break;
                    }
                    // Pings are answered by tungstenite itself
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "WebSocket error");
                        break;
                    }
                },

                Some(frame) = outbound.recv() => {
                    if ws_sender.send(WsMessage::Text(frame.to_string())).await.is_err() {
                        break;
                    }
                }

                _ = gateway.stopped() => {
                    let _ = ws_sender.send(WsMessage::Close(None)).await;
                    break;
                }
            }
        }

        gateway.on_disconnect(&session);
        let _ = ws_sender.close().await;
    }
    .instrument(span)
    .await
}

fn handle_frame(gateway: &Gateway, session: &super::Session, data: &[u8]) {
    match serde_json::from_slice::<ChatFrame>(data) {
        Ok(frame) => gateway.on_message(session, frame),
        Err(e) => {
            metrics::MALFORMED_FRAMES.inc();
            tracing::warn!(error = %e, bytes = data.len(), "Ignoring malformed chat frame");
        }
    }
}
