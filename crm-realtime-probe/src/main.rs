//! crm-realtime-probe: connect the engine to a backend and log what happens.
//!
//! Useful for checking a deployment's `/ws` endpoint by hand:
//!
//! ```text
//! crm-realtime-probe --host crm.example.com --secure --status active --session deal-42
//! ```

use std::time::Duration;

use clap::Parser;
use crm_realtime::{EngineConfig, EngineEvent, EventKind, RealtimeEngine};
use log::info;
use serde_json::json;

/// Real-time engine probe
#[derive(Parser)]
#[command(name = "crm-realtime-probe")]
#[command(about = "Connect to a CRM real-time endpoint and log every event")]
#[command(version)]
struct Cli {
    /// Full WebSocket URL (overrides --host)
    #[arg(long)]
    url: Option<String>,

    /// Backend host; the endpoint is {ws|wss}://<host>/ws
    #[arg(long, default_value = "localhost:8080")]
    host: String,

    /// Use wss instead of ws
    #[arg(long)]
    secure: bool,

    /// User id to announce (random if omitted)
    #[arg(long)]
    user: Option<String>,

    /// Presence status to announce after connecting
    #[arg(long)]
    status: Option<String>,

    /// Collaboration session to join
    #[arg(long)]
    session: Option<String>,

    /// Stop after this many seconds (runs until Ctrl-C if omitted)
    #[arg(long)]
    duration: Option<u64>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn describe(event: &EngineEvent) -> String {
    match event {
        EngineEvent::Connected { connection_id } => format!("connection id {connection_id}"),
        EngineEvent::Disconnected { code, clean } => format!("code {code:?}, clean: {clean}"),
        EngineEvent::Reconnecting { attempt, delay } => format!("attempt {attempt} in {delay:?}"),
        EngineEvent::Error(e) => e.to_string(),
        EngineEvent::PresenceUpdate(record) => format!("{} is {}", record.user_id, record.status),
        EngineEvent::CollaborationEvent { session_id, event } => {
            format!("{session_id}: {} from '{}'", event.event, event.sender)
        }
        EngineEvent::Participant { session_id, user_id, joined } => {
            let verb = if *joined { "joined" } else { "left" };
            format!("{user_id} {verb} {session_id}")
        }
        EngineEvent::Message(frame)
        | EngineEvent::Notification(frame)
        | EngineEvent::DataUpdate(frame)
        | EngineEvent::SystemMessage(frame) => format!("{} {}", frame.kind(), frame.data()),
        EngineEvent::SyncSuccess { item } => format!("delivered queued {}", item.frame.kind()),
        EngineEvent::SyncFailed { error, .. } => error.to_string(),
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let url = cli
        .url
        .clone()
        .unwrap_or_else(|| EngineConfig::endpoint(&cli.host, cli.secure));
    let mut config = EngineConfig::new(url);
    if let Some(user) = &cli.user {
        config = config.with_user_id(user.clone());
    }

    let engine = RealtimeEngine::new(config);
    for kind in EventKind::ALL {
        engine.subscribe(kind, move |event| {
            if kind == EventKind::Error {
                log::warn!("[{}] {}", kind.name(), describe(event));
            } else {
                info!("[{}] {}", kind.name(), describe(event));
            }
        });
    }

    let id = engine.connect(None, None);
    info!("Probe started as user {} (connection {id})", engine.user_id());

    if let Some(status) = &cli.status {
        engine.update_presence(status, json!({ "source": "probe" }));
    }
    if let Some(session) = &cli.session {
        engine.join_collaboration_session(session, json!({}));
    }

    match cli.duration {
        Some(secs) => {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(secs)) => {}
                _ = tokio::signal::ctrl_c() => info!("Interrupted"),
            }
        }
        None => {
            if let Err(e) = tokio::signal::ctrl_c().await {
                log::error!("Cannot listen for Ctrl-C: {e}");
            }
        }
    }

    if let Some(session) = &cli.session {
        engine.leave_collaboration_session(session);
    }
    let metrics = engine.metrics();
    engine.disconnect();
    // Let the socket task flush the close frame.
    tokio::time::sleep(Duration::from_millis(100)).await;

    match serde_json::to_string_pretty(&metrics) {
        Ok(json) => println!("{json}"),
        Err(e) => log::error!("Cannot serialize metrics: {e}"),
    }
}
