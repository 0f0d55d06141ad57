//! In-process WebSocket backend and event capture shared by the integration
//! tests.

#![allow(dead_code)]

use std::time::Duration;

use crm_realtime::{EngineEvent, EventKind, RealtimeEngine};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

pub const WAIT: Duration = Duration::from_secs(5);

/// Find a free port for testing.
pub async fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

enum Command {
    Text(String),
    Close(u16),
    Abort,
}

/// What the backend saw from the client.
#[derive(Debug)]
pub enum Inbound {
    Frame(Value),
    Close(Option<u16>),
    Gone,
}

/// One accepted client socket, seen from the backend.
pub struct ServerConn {
    inbound: mpsc::UnboundedReceiver<Inbound>,
    commands: mpsc::UnboundedSender<Command>,
}

impl ServerConn {
    pub fn send(&self, frame: Value) {
        self.commands.send(Command::Text(frame.to_string())).unwrap();
    }

    /// Close with a status code.
    pub fn close(&self, code: u16) {
        self.commands.send(Command::Close(code)).unwrap();
    }

    /// Drop the TCP stream without a close handshake.
    pub fn abort(&self) {
        self.commands.send(Command::Abort).unwrap();
    }

    pub async fn next_frame(&mut self) -> Value {
        match timeout(WAIT, self.inbound.recv()).await {
            Ok(Some(Inbound::Frame(frame))) => frame,
            other => panic!("expected a frame, got {other:?}"),
        }
    }

    /// Next frame of the given type, skipping anything else.
    pub async fn next_of_type(&mut self, kind: &str) -> Value {
        loop {
            let frame = self.next_frame().await;
            if frame["type"] == kind {
                return frame;
            }
        }
    }

    /// Wait for the client to close, returning its close code.
    pub async fn expect_close(&mut self) -> Option<u16> {
        loop {
            match timeout(WAIT, self.inbound.recv()).await {
                Ok(Some(Inbound::Frame(_))) => continue,
                Ok(Some(Inbound::Close(code))) => return code,
                other => panic!("expected a close frame, got {other:?}"),
            }
        }
    }
}

/// A backend that accepts any number of sockets on a free port.
pub struct TestServer {
    pub url: String,
    accepted: mpsc::UnboundedReceiver<ServerConn>,
}

impl TestServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (accepted_tx, accepted) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let Ok(socket) = tokio_tungstenite::accept_async(stream).await else {
                    continue;
                };
                let (inbound_tx, inbound) = mpsc::unbounded_channel();
                let (commands, command_rx) = mpsc::unbounded_channel();
                tokio::spawn(serve(socket, inbound_tx, command_rx));
                if accepted_tx.send(ServerConn { inbound, commands }).is_err() {
                    break;
                }
            }
        });

        Self {
            url: format!("ws://127.0.0.1:{port}/ws"),
            accepted,
        }
    }

    pub async fn accept(&mut self) -> ServerConn {
        timeout(WAIT, self.accepted.recv())
            .await
            .expect("timed out waiting for a client")
            .expect("listener stopped")
    }

    /// Assert that no client connects within `window`.
    pub async fn expect_no_connection(&mut self, window: Duration) {
        if let Ok(Some(_)) = timeout(window, self.accepted.recv()).await {
            panic!("unexpected connection");
        }
    }
}

async fn serve(
    socket: tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>,
    inbound: mpsc::UnboundedSender<Inbound>,
    mut commands: mpsc::UnboundedReceiver<Command>,
) {
    let (mut sink, mut stream) = socket.split();
    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Text(text)) => {
                    if sink.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Some(Command::Close(code)) => {
                    let frame = CloseFrame {
                        code: CloseCode::from(code),
                        reason: "".into(),
                    };
                    let _ = sink.send(Message::Close(Some(frame))).await;
                    break;
                }
                Some(Command::Abort) | None => break,
            },
            message = stream.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    let frame = serde_json::from_str(text.as_str()).unwrap();
                    let _ = inbound.send(Inbound::Frame(frame));
                }
                Some(Ok(Message::Close(frame))) => {
                    let _ = inbound.send(Inbound::Close(frame.map(|f| u16::from(f.code))));
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(_)) | None => {
                    let _ = inbound.send(Inbound::Gone);
                    break;
                }
            },
        }
    }
}

/// Every event the engine emits, in order.
pub struct EventLog {
    rx: mpsc::UnboundedReceiver<EngineEvent>,
}

impl EventLog {
    pub fn attach(engine: &RealtimeEngine) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        for kind in EventKind::ALL {
            let tx = tx.clone();
            engine.subscribe(kind, move |event| {
                let _ = tx.send(event.clone());
            });
        }
        Self { rx }
    }

    /// Events up to and including the first one matching `pred`.
    pub async fn until(&mut self, pred: impl Fn(&EngineEvent) -> bool) -> Vec<EngineEvent> {
        let mut seen = Vec::new();
        let found = timeout(WAIT, async {
            while let Some(event) = self.rx.recv().await {
                let done = pred(&event);
                seen.push(event);
                if done {
                    return true;
                }
            }
            false
        })
        .await;
        assert_eq!(found, Ok(true), "event never arrived; saw {seen:?}");
        seen
    }

    /// Events up to and including the first of `kind`.
    pub async fn until_kind(&mut self, kind: EventKind) -> Vec<EngineEvent> {
        self.until(|event| event.kind() == kind).await
    }

    /// The next event of `kind`, skipping others.
    pub async fn next(&mut self, kind: EventKind) -> EngineEvent {
        self.until_kind(kind).await.pop().unwrap()
    }
}
