//! WebSocket log viewer.

use axum::{
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade, rejection::WebSocketUpgradeRejection},
    },
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use tracing::debug;

use crate::logs::LogSubscription;

use super::error::ApiResult;
use super::state::AppState;

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub id: String,
}

/// GET /ws/logs?id=<identity>
///
/// The subscription is opened before the upgrade so an unknown container
/// gets a plain 404.
pub async fn ws_logs(
    State(state): State<AppState>,
    Query(query): Query<LogsQuery>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> ApiResult<Response> {
    let subscription = state.logs.subscribe(&query.id).await?;

    match upgrade {
        Ok(ws) => Ok(ws.on_upgrade(move |socket| pump_logs(socket, subscription))),
        Err(rejection) => Ok(rejection.into_response()),
    }
}

/// Forward chunks as text frames until either side goes away.
async fn pump_logs(mut socket: WebSocket, mut subscription: LogSubscription) {
    let mut decoder = Utf8Carry::default();

    loop {
        tokio::select! {
            chunk = subscription.next_chunk() => match chunk {
                Some(bytes) => {
                    let text = decoder.push(&bytes);
                    if text.is_empty() {
                        continue;
                    }
                    if socket.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                None => {
                    let rest = decoder.finish();
                    if !rest.is_empty() {
                        let _ = socket.send(Message::Text(rest.into())).await;
                    }
                    break;
                }
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    subscription.cancel();
    let _ = socket.send(Message::Close(None)).await;
    debug!(identity = subscription.identity(), "Log viewer disconnected");
}

/// Decodes a byte stream into text, holding back a multibyte character
/// split across chunk boundaries until its remaining bytes arrive.
#[derive(Debug, Default)]
struct Utf8Carry {
    pending: Vec<u8>,
}

impl Utf8Carry {
    fn push(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);

        let mut out = String::new();
        let mut rest: &[u8] = &self.pending;
        loop {
            match std::str::from_utf8(rest) {
                Ok(text) => {
                    out.push_str(text);
                    rest = &[];
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    out.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[bad..];
                        }
                        // Incomplete sequence at the end: wait for more bytes.
                        None => {
                            rest = after;
                            break;
                        }
                    }
                }
            }
        }

        self.pending = rest.to_vec();
        out
    }

    /// Whatever is still held back, decoded lossily.
    fn finish(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        rest
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_multibyte_char_is_reassembled() {
        let bytes = "grüße ✓\n".as_bytes();
        let mut decoder = Utf8Carry::default();

        // Split inside the three-byte check mark.
        let cut = bytes.len() - 3;
        let first = decoder.push(&bytes[..cut]);
        let second = decoder.push(&bytes[cut..]);

        assert_eq!(first, "grüße ");
        assert_eq!(second, "✓\n");
        assert!(decoder.finish().is_empty());
    }

    #[test]
    fn test_every_split_point_round_trips() {
        let text = "ä€😀x";
        let bytes = text.as_bytes();
        for cut in 0..=bytes.len() {
            let mut decoder = Utf8Carry::default();
            let mut out = decoder.push(&bytes[..cut]);
            out.push_str(&decoder.push(&bytes[cut..]));
            out.push_str(&decoder.finish());
            assert_eq!(out, text, "split at {cut}");
        }
    }

    #[test]
    fn test_invalid_bytes_become_replacement_chars() {
        let mut decoder = Utf8Carry::default();
        assert_eq!(decoder.push(b"ok\xffok"), "ok\u{fffd}ok");
        assert!(decoder.push(&[0xe2, 0x9c]).is_empty());
        assert_eq!(decoder.finish(), "\u{fffd}");
    }
}
