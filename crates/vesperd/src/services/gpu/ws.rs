//! WebSocket subscriber handling.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tokio::time::Instant;
use tracing::{debug, info};

use vesper_common::gpu::{ClientCommand, WsFrame};

use super::monitor::GpuMonitor;
use super::provider::GpuStatsProvider;
use super::GpuServiceState;

pub async fn ws_handler<P: GpuStatsProvider>(
    ws: WebSocketUpgrade,
    State(state): State<GpuServiceState<P>>,
) -> Response {
    state.metrics.observe("/ws");
    ws.on_upgrade(move |socket| handle_socket(socket, state.monitor))
}

async fn handle_socket<P: GpuStatsProvider>(socket: WebSocket, monitor: GpuMonitor<P>) {
    let (mut sender, mut receiver) = socket.split();

    // New subscribers get one snapshot immediately instead of waiting for
    // the next tick. A failed sample just skips it.
    match monitor.snapshot_frame() {
        Ok(frame) => {
            if sender.send(Message::Text(frame)).await.is_err() {
                return;
            }
        }
        Err(e) => debug!("Initial snapshot unavailable: {}", e),
    }

    let (id, mut rx) = monitor.subscribe();
    info!("GPU subscriber {} connected", id);

    let idle = monitor.idle_ping_interval();
    let mut idle_deadline = Instant::now() + idle;

    loop {
        tokio::select! {
            frame = rx.recv() => {
                match frame {
                    Some(frame) => {
                        if sender.send(Message::Text(frame)).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            incoming = receiver.next() => {
                idle_deadline = Instant::now() + idle;
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if let Err(()) = handle_command(&monitor, &text, &mut sender).await {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
            _ = tokio::time::sleep_until(idle_deadline) => {
                // Quiet client: keep the connection alive rather than
                // closing it.
                let ping = serde_json::to_string(&WsFrame::Ping).unwrap_or_default();
                if sender.send(Message::Text(ping)).await.is_err() {
                    break;
                }
                idle_deadline = Instant::now() + idle;
            }
        }
    }

    monitor.unsubscribe(id);
    info!("GPU subscriber {} disconnected", id);
}

async fn handle_command<P, S>(
    monitor: &GpuMonitor<P>,
    text: &str,
    sender: &mut S,
) -> Result<(), ()>
where
    P: GpuStatsProvider,
    S: SinkExt<Message> + Unpin,
{
    let Ok(command) = serde_json::from_str::<ClientCommand>(text) else {
        return Ok(());
    };
    if command.command == "get_history" {
        let frame = WsFrame::History {
            data: monitor.full_history(),
        };
        let payload = serde_json::to_string(&frame).unwrap_or_default();
        if sender.send(Message::Text(payload)).await.is_err() {
            return Err(());
        }
    }
    Ok(())
}
