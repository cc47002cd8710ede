//! WebSocket bridge between a browser/phone client and one voice session.
//!
//! Binary frames carry 16-bit mono PCM; text frames carry JSON control
//! messages. Every outbound event is sent as a JSON text frame.

use crate::AppState;
use aura_voice::{InboundMessage, OutboundEvent, SessionParams};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Inbound audio arrives in bursts; keep enough room for ~1s of 30ms chunks.
const INBOUND_BUFFER_SIZE: usize = 64;

#[derive(Debug, Deserialize)]
pub struct VoiceQuery {
    pub user_id: String,
    pub tenant_id: Option<String>,
}

impl VoiceQuery {
    fn into_params(self) -> SessionParams {
        let params = SessionParams::new(self.user_id);
        match self.tenant_id.filter(|t| !t.is_empty()) {
            Some(tenant) => params.with_tenant(tenant),
            None => params,
        }
    }
}

/// What the reader does with one client frame.
#[derive(Debug, PartialEq)]
pub(crate) enum Frame {
    Forward(InboundMessage),
    Skip,
    Close,
}

pub(crate) fn classify(msg: Message) -> Frame {
    match msg {
        Message::Binary(data) => Frame::Forward(InboundMessage::Audio(data)),
        Message::Text(text) => Frame::Forward(InboundMessage::Text(text)),
        // Protocol pings are answered by axum.
        Message::Ping(_) | Message::Pong(_) => Frame::Skip,
        Message::Close(_) => Frame::Close,
    }
}

/// JSON text frame for one outbound event.
pub(crate) fn encode(event: &OutboundEvent) -> Option<Message> {
    match event.to_json() {
        Ok(json) => Some(Message::Text(json)),
        Err(e) => {
            error!(error = %e, kind = event.kind(), "Failed to serialize outbound event");
            None
        }
    }
}

/// GET /ws/voice?user_id=..&tenant_id=..
pub async fn ws_voice_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<VoiceQuery>,
    State(state): State<AppState>,
) -> Response {
    info!(user_id = %query.user_id, "Voice WebSocket upgrade requested");
    ws.on_upgrade(move |socket| handle_voice_socket(socket, query.into_params(), state))
}

async fn handle_voice_socket(socket: WebSocket, params: SessionParams, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let capacity = state.orchestrator.config().session.outbound_capacity;
    let (in_tx, in_rx) = mpsc::channel::<InboundMessage>(INBOUND_BUFFER_SIZE);
    let (out_tx, mut out_rx) = mpsc::channel::<OutboundEvent>(capacity);

    let sender_task = tokio::spawn(async move {
        while let Some(event) = out_rx.recv().await {
            let Some(frame) = encode(&event) else {
                continue;
            };
            if let Err(e) = sender.send(frame).await {
                warn!(error = %e, "Failed to send WebSocket message");
                return;
            }
        }
        let _ = sender.send(Message::Close(None)).await;
    });

    let orchestrator = state.orchestrator.clone();
    let session = tokio::spawn(async move { orchestrator.run_session(params, in_rx, out_tx).await });

    loop {
        tokio::select! {
            // The session ended on its own (end_call, error).
            _ = in_tx.closed() => break,
            next = receiver.next() => {
                let msg = match next {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket error");
                        break;
                    }
                    None => break,
                };
                match classify(msg) {
                    Frame::Forward(inbound) => {
                        if in_tx.send(inbound).await.is_err() {
                            break;
                        }
                    }
                    Frame::Skip => {}
                    Frame::Close => {
                        debug!("Client sent close frame");
                        break;
                    }
                }
            }
        }
    }
    drop(in_tx);

    match session.await {
        Ok(Ok(summary)) => info!(
            session_id = %summary.session_id,
            turns = summary.turn_count,
            "Voice WebSocket session finished"
        ),
        Ok(Err(e)) => warn!(error = %e, "Voice session failed to start"),
        Err(e) => error!(error = %e, "Voice session task panicked"),
    }
    if let Err(e) = sender_task.await {
        error!(error = %e, "WebSocket sender task panicked");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_frames_are_audio_and_text_frames_are_control() {
        assert_eq!(
            classify(Message::Binary(vec![0, 1])),
            Frame::Forward(InboundMessage::Audio(vec![0, 1]))
        );
        assert_eq!(
            classify(Message::Text(r#"{"type":"ping"}"#.into())),
            Frame::Forward(InboundMessage::Text(r#"{"type":"ping"}"#.into()))
        );
        assert_eq!(classify(Message::Ping(vec![])), Frame::Skip);
        assert_eq!(classify(Message::Close(None)), Frame::Close);
    }

    #[test]
    fn outbound_events_become_tagged_json_text_frames() {
        let frame = encode(&OutboundEvent::interrupted()).expect("serializable event");
        let Message::Text(json) = frame else {
            panic!("expected a text frame");
        };
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "interrupted");
        assert_eq!(value["message"], "AI stopped speaking");
    }

    #[test]
    fn empty_tenant_is_ignored() {
        let q = VoiceQuery {
            user_id: "u1".into(),
            tenant_id: Some(String::new()),
        };
        let params = q.into_params();
        assert_eq!(params.user_id, "u1");
        assert_eq!(params.tenant_id, None);
    }
}
