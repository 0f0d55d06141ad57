//! Connection manager: the socket task that owns the WebSocket.
//!
//! ```text
//!            connect()
//!               │
//!               ▼
//!         ┌────────────┐   open    ┌──────┐  disconnect()  ┌─────────┐
//!         │ CONNECTING │ ────────► │ OPEN │ ─────────────► │ CLOSING │──► CLOSED
//!         └────────────┘           └──┬───┘                └─────────┘
//!               ▲                     │ unclean close / failed open
//!               │    backoff timer    ▼
//!               └──────────────── CLOSED ──► (budget spent) stays CLOSED
//! ```
//!
//! One task per `connect()` call drives the whole loop: open, pump frames,
//! tick the heartbeat, sleep through backoff, reopen. It touches engine state
//! only through [`Shared::apply`], and every call carries the generation the
//! task was started with, so a task outliving `disconnect()` changes nothing.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::engine::Shared;

/// Close code for a normal, intentional shutdown.
pub const NORMAL_CLOSURE: u16 = 1000;
/// Close code reported when the socket dropped without a close frame.
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closing,
    Closed,
}

/// How a connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloseInfo {
    pub code: Option<u16>,
    pub clean: bool,
}

impl CloseInfo {
    pub fn abnormal() -> Self {
        Self {
            code: Some(ABNORMAL_CLOSURE),
            clean: false,
        }
    }

    pub fn from_code(code: u16) -> Self {
        Self {
            code: Some(code),
            clean: code == NORMAL_CLOSURE,
        }
    }

    fn from_frame(frame: Option<CloseFrame>) -> Self {
        match frame {
            Some(frame) => Self::from_code(u16::from(frame.code)),
            // A close frame without a status is still an orderly close.
            None => Self {
                code: None,
                clean: true,
            },
        }
    }
}

/// Close frame sent by `disconnect()`.
pub(crate) fn normal_closure() -> Message {
    Message::Close(Some(CloseFrame {
        code: CloseCode::Normal,
        reason: "client disconnect".into(),
    }))
}

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Drive one logical connection until it is closed for good.
pub(crate) async fn supervise(
    shared: Arc<Shared>,
    url: String,
    generation: u64,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let opened = tokio::select! {
            biased;
            _ = shutdown.changed() => return,
            result = tokio_tungstenite::connect_async(url.as_str()) => result,
        };

        let close = match opened {
            Ok((socket, _response)) => {
                log::debug!("WebSocket handshake with {url} complete");
                match run_session(&shared, generation, socket, &mut shutdown).await {
                    Some(close) => close,
                    None => return,
                }
            }
            Err(e) => {
                shared.apply(|state| {
                    state.on_transport_error(generation, format!("failed to open {url}: {e}"))
                });
                CloseInfo::abnormal()
            }
        };

        let Some(delay) = shared.apply(|state| state.on_close(generation, close)) else {
            return;
        };

        tokio::select! {
            biased;
            _ = shutdown.changed() => return,
            _ = sleep(delay) => {}
        }

        if !shared.apply(|state| state.begin_reconnect(generation)) {
            return;
        }
        log::info!("Reconnecting to {url}");
    }
}

/// Pump one open socket. Returns `None` when the engine asked us to stop,
/// otherwise how the socket closed.
async fn run_session(
    shared: &Shared,
    generation: u64,
    socket: Socket,
    shutdown: &mut watch::Receiver<bool>,
) -> Option<CloseInfo> {
    let (mut sink, mut stream) = socket.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();

    let interval = shared.apply(|state| state.on_open(generation, out_tx))?;
    let period = interval.max(Duration::from_millis(1));
    let mut heartbeat = interval_at(Instant::now() + period, period);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;

            outgoing = out_rx.recv() => match outgoing {
                Some(message) => {
                    let closing = matches!(message, Message::Close(_));
                    if let Err(e) = sink.send(message).await {
                        if closing {
                            return None;
                        }
                        shared.apply(|state| {
                            state.on_transport_error(generation, format!("send failed: {e}"))
                        });
                        return Some(CloseInfo::abnormal());
                    }
                    if closing {
                        return None;
                    }
                }
                // The engine dropped the writer without a close frame.
                None => return None,
            },

            _ = shutdown.changed() => {
                let _ = sink.close().await;
                return None;
            }

            inbound = stream.next() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    shared.apply(|state| state.on_text(generation, text.as_str()));
                }
                Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                    Ok(text) => shared.apply(|state| state.on_text(generation, text)),
                    Err(_) => log::warn!("Dropping non-UTF-8 binary frame ({} bytes)", bytes.len()),
                },
                Some(Ok(Message::Close(frame))) => {
                    return Some(CloseInfo::from_frame(frame));
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    shared.apply(|state| {
                        state.on_transport_error(generation, format!("receive failed: {e}"))
                    });
                    return Some(CloseInfo::abnormal());
                }
                None => return Some(CloseInfo::abnormal()),
            },

            _ = heartbeat.tick() => {
                shared.apply(|state| state.heartbeat_tick(generation));
            }
        }
    }
}
