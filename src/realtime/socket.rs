//! WebSocket transport for the realtime channel
//!
//! One connection per active user identity. The pump task forwards outbound
//! [`ClientEvent`]s, feeds inbound text frames to the [`Dispatcher`] and, when
//! the connection ends for any reason, dispatches a local
//! [`ChannelEvent::Disconnected`]. Reconnecting means calling [`connect`] again.

use super::{ChannelEvent, ClientEvent, Dispatcher, FrameError};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;

const OUTBOUND_BUFFER: usize = 64;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error("Channel is closed")]
    Closed,
}

/// Live connection. Dropping the handle does not close the socket; call
/// [`ChannelHandle::close`].
#[derive(Debug)]
pub struct ChannelHandle {
    outbound: mpsc::Sender<ClientEvent>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ChannelHandle {
    /// Sender the engine uses for typing and read receipts
    pub fn sender(&self) -> mpsc::Sender<ClientEvent> {
        self.outbound.clone()
    }

    pub async fn send(&self, event: ClientEvent) -> Result<(), ChannelError> {
        self.outbound
            .send(event)
            .await
            .map_err(|_| ChannelError::Closed)
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Close the socket and wait for the pump to dispatch `Disconnected`
    pub async fn close(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "Channel pump task failed");
        }
    }
}

/// Open the channel for `user_id` and start pumping frames.
pub async fn connect(
    url: &str,
    user_id: &str,
    dispatcher: Arc<Dispatcher>,
) -> Result<ChannelHandle, ChannelError> {
    let (ws, _response) = tokio_tungstenite::connect_async(url).await?;
    let (mut sink, mut stream) = ws.split();

    let register = ClientEvent::UserRegister {
        user_id: user_id.to_string(),
    };
    sink.send(Message::Text(register.to_frame()?)).await?;
    tracing::info!(url, user_id, "Realtime channel connected");

    let (outbound, mut rx) = mpsc::channel::<ClientEvent>(OUTBOUND_BUFFER);
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    let user = user_id.to_string();

    let task = tokio::spawn(async move {
        let reason = loop {
            tokio::select! {
                () = token.cancelled() => {
                    let _ = sink.send(Message::Close(None)).await;
                    break "closed by client".to_string();
                }
                Some(event) = rx.recv() => {
                    let frame = match event.to_frame() {
                        Ok(frame) => frame,
                        Err(e) => {
                            tracing::warn!(error = %e, "Failed to encode client event");
                            continue;
                        }
                    };
                    if let Err(e) = sink.send(Message::Text(frame)).await {
                        break format!("send failed: {e}");
                    }
                }
                incoming = stream.next() => match incoming {
                    Some(Ok(Message::Text(text))) => {
                        dispatcher.dispatch_frame(&text);
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = sink.send(Message::Pong(data)).await {
                            break format!("pong failed: {e}");
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        break frame.map_or_else(
                            || "closed by server".to_string(),
                            |f| format!("closed by server: {}", f.reason),
                        );
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break format!("receive failed: {e}"),
                    None => break "stream ended".to_string(),
                },
            }
        };
        tracing::info!(user_id = %user, reason = %reason, "Realtime channel disconnected");
        dispatcher.dispatch(ChannelEvent::Disconnected { reason });
    });

    Ok(ChannelHandle {
        outbound,
        cancel,
        task,
    })
}
