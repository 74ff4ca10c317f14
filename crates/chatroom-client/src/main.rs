//! Chatroom terminal client shell.
//!
//! Connects one session to a server and drives it from a line-based
//! prompt. Notifications arrive asynchronously and are printed as they
//! come.
//!
//! Exit codes: 0 clean shutdown, 1 configuration or connection error.

use std::net::SocketAddr;
use std::process::ExitCode;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::error;
use tracing_subscriber::EnvFilter;

use chatroom_core::{ChatClient, ClientConfig, NotificationSink, SinkEvent};

mod commands;

/// Chatroom terminal client
#[derive(Parser, Debug)]
#[command(name = "chatroom-client")]
#[command(author, version, about)]
struct Args {
    /// Server socket address
    #[arg(long)]
    server: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("CHATROOM_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .init();

    let server_addr: SocketAddr = match args.server.parse() {
        Ok(addr) => addr,
        Err(err) => {
            error!(server = args.server.as_str(), %err, "invalid server address");
            return ExitCode::from(1);
        }
    };

    let (sink, mut events) = NotificationSink::channel(256);
    let client = match ChatClient::connect(ClientConfig::new(server_addr), sink).await {
        Ok(client) => client,
        Err(err) => {
            error!(kind = err.kind(), %err, "could not reach the server");
            return ExitCode::from(1);
        }
    };
    println!(
        "connected to {server_addr} from {}",
        client.get_server_info().local_addr
    );
    println!("type /help for commands");

    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                SinkEvent::Online(user) => println!("* {user} is online"),
                SinkEvent::Offline(user) => println!("* {user} went offline"),
                SinkEvent::NewMsg(Some(from)) => println!("* new message from {from}"),
                SinkEvent::NewMsg(None) => println!("* new message in the room"),
                SinkEvent::UsersUpdated => println!("* user list updated"),
                SinkEvent::ConnectionLost => println!("* connection lost"),
                SinkEvent::NotLogin => println!("* please login first"),
                SinkEvent::Log(line) => println!("* {line}"),
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if !commands::dispatch(&client, line.trim()).await {
                    break;
                }
            }
            Ok(None) => break,
            Err(err) => {
                error!(%err, "stdin closed");
                break;
            }
        }
    }

    client.disconnect();
    ExitCode::SUCCESS
}
