//! Chatroom relay server shell.
//!
//! A thin wrapper around `chatroom_core::ChatServer`: argument parsing,
//! logging setup, and a drain of the notification sink into the log.
//!
//! Exit codes: 0 clean shutdown, 1 configuration error, 2 store
//! corruption.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use chatroom_core::{ChatServer, Error, NotificationSink, ServerConfig, SinkEvent};

/// Chatroom relay server
#[derive(Parser, Debug)]
#[command(name = "chatroom-server")]
#[command(author, version, about)]
struct Args {
    /// Socket address to bind
    #[arg(long, default_value = "0.0.0.0:0")]
    bind: String,

    /// Heartbeat interval in milliseconds
    #[arg(long = "heartbeat-ms", default_value = "60000")]
    heartbeat_ms: u32,

    /// Path of the persisted user store
    #[arg(long, default_value = "./users.bin")]
    store: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // CHATROOM_LOG selects the log level, defaulting to info.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("CHATROOM_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let bind_addr: SocketAddr = match args.bind.parse() {
        Ok(addr) => addr,
        Err(err) => {
            error!(bind = args.bind.as_str(), %err, "invalid bind address");
            return ExitCode::from(1);
        }
    };
    if args.heartbeat_ms == 0 {
        error!("heartbeat interval must be positive");
        return ExitCode::from(1);
    }

    let config = ServerConfig {
        bind_addr,
        heartbeat_interval: Duration::from_millis(u64::from(args.heartbeat_ms)),
        store_path: args.store,
        ..ServerConfig::default()
    };

    let (sink, mut events) = NotificationSink::channel(256);
    let server = match ChatServer::start(config, sink).await {
        Ok(server) => server,
        Err(Error::StoreCorrupt(detail)) => {
            error!(detail, "user store is corrupt, refusing to start");
            return ExitCode::from(2);
        }
        Err(err) => {
            error!(kind = err.kind(), %err, "server failed to start");
            return ExitCode::from(1);
        }
    };
    info!(addr = %server.local_addr(), "serving; press ctrl-c to stop");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Some(SinkEvent::Online(user)) => info!(user, "online"),
                Some(SinkEvent::Offline(user)) => info!(user, "offline"),
                Some(SinkEvent::UsersUpdated) => info!("roster updated"),
                Some(SinkEvent::Log(line)) => info!("{line}"),
                Some(event) => info!(?event, "event"),
                None => break,
            },
        }
    }

    info!("shutting down");
    drop(server);
    ExitCode::SUCCESS
}
