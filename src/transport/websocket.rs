//! WebSocket transport
//!
//! Binary messages carry PCM16LE mono audio in both directions. Text
//! messages carry JSON: the client may send `{"type":"ping"}`, the server
//! sends [`ServerEvent`]s.

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use super::{ClientInfo, OutboundMessage, ServerEvent, TransportSession};
use crate::audio::pcm16_from_le_bytes;
use crate::pipeline::{AudioFrame, Frame, FrameSender};

/// Text message from the client
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    Ping,
}

/// Serve one voice session until the client leaves
pub async fn serve(socket: WebSocket, session: TransportSession) {
    let TransportSession {
        task,
        runner,
        handler,
        params,
        outbound_tx,
        mut outbound_rx,
    } = session;

    let client = ClientInfo::new();
    let (mut sender, mut receiver) = socket.split();

    let connected = OutboundMessage::Event(ServerEvent::Connected {
        session_id: client.id.to_string(),
    });
    if outbound_tx.send(connected).await.is_err() {
        return;
    }

    // Forward queued audio and events to the socket
    let mut send_task = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            let message = match message {
                OutboundMessage::Audio(bytes) => Message::Binary(bytes.into()),
                OutboundMessage::Event(event) => match serde_json::to_string(&event) {
                    Ok(text) => Message::Text(text.into()),
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to encode server event");
                        continue;
                    }
                },
            };
            if sender.send(message).await.is_err() {
                break;
            }
        }
    });

    let run_task = task.clone();
    let mut run_handle = tokio::spawn(async move { runner.run(&run_task).await });

    tracing::info!(client_id = %client.id, "client connected");
    if let Err(e) = handler.on_client_connected(&client).await {
        tracing::error!(client_id = %client.id, error = %e, "failed to start session");
        let _ = outbound_tx
            .send(OutboundMessage::Event(ServerEvent::Error {
                message: e.to_string(),
            }))
            .await;
    }

    let input = task.frame_sender();
    let in_rate = params.audio_in_sample_rate;
    let audio_in = params.audio_in_enabled;
    let client_id = client.id;
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Binary(bytes) => {
                    if !audio_in {
                        continue;
                    }
                    let pcm = pcm16_from_le_bytes(&bytes);
                    let frame = Frame::InputAudio(AudioFrame::mono(pcm, in_rate));
                    if input.push(frame).await.is_err() {
                        break;
                    }
                }
                Message::Text(text) => handle_text(text.as_str(), &outbound_tx).await,
                Message::Close(_) => {
                    tracing::info!(client_id = %client_id, "client closed connection");
                    break;
                }
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
        result = &mut run_handle => {
            tracing::info!(client_id = %client.id, ?result, "pipeline finished before client left");
            recv_task.abort();
            send_task.abort();
        }
    }

    handler.on_client_disconnected(&client).await;

    if !run_handle.is_finished() {
        match run_handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, "pipeline run failed"),
            Err(e) => tracing::warn!(error = %e, "pipeline runner panicked"),
        }
    }

    tracing::info!(client_id = %client.id, "client disconnected");
}

async fn handle_text(text: &str, outbound: &mpsc::Sender<OutboundMessage>) {
    let reply = match serde_json::from_str::<ClientMessage>(text) {
        Ok(ClientMessage::Ping) => ServerEvent::Pong,
        Err(e) => {
            tracing::debug!(error = %e, "ignoring malformed client message");
            ServerEvent::Error {
                message: format!("invalid message: {e}"),
            }
        }
    };
    let _ = outbound.send(OutboundMessage::Event(reply)).await;
}

/// Feed a whole PCM buffer into a session in 20 ms frames
///
/// Used by tooling that replays recorded audio into a pipeline.
///
/// # Errors
///
/// Returns error if the pipeline no longer accepts frames
pub async fn feed_pcm(input: &FrameSender, pcm: &[i16], sample_rate: u32) -> crate::Result<()> {
    let frame_len = (sample_rate / 50).max(1) as usize;
    for chunk in pcm.chunks(frame_len) {
        input
            .push(Frame::InputAudio(AudioFrame::mono(chunk.to_vec(), sample_rate)))
            .await?;
    }
    Ok(())
}
