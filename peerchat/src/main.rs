//! `peerchat` — multi-peer encrypted chat client.
//!
//! Runs a line-oriented front end over the session manager. Without an
//! account service configured it starts straight in peer-to-peer mode;
//! with `--auth-url` and `--username` it logs in first and records the
//! local peer identifier with the service.
//!
//! ```bash
//! # Offline, history under the default data directory
//! cargo run --bin peerchat -- --peer-id alice
//!
//! # With an account service
//! PEERCHAT_PASSWORD=secret cargo run --bin peerchat -- \
//!     --auth-url http://127.0.0.1:4000 --username alice --peer-id alice
//! ```

use std::io;
use std::path::Path;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_appender::non_blocking::WorkerGuard;

use peerchat::auth::{AuthClient, Credentials};
use peerchat::config::{CliArgs, ClientConfig};
use peerchat::history::FileBackend;
use peerchat::manager::{ChatEvent, Command, SessionManager};
use peerchat::transport::loopback::LoopbackNetwork;
use peerchat::transport::PeerId;

#[tokio::main]
async fn main() -> io::Result<()> {
    let cli = CliArgs::parse();

    // Load and resolve configuration (CLI args > env > config file > defaults).
    let config = match ClientConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Warning: failed to load config file: {e}");
            ClientConfig::default()
        }
    };

    // Logs go to a file so they never interleave with the chat output.
    let _log_guard = init_logging(&cli.log_level, cli.log_file.as_deref());

    tracing::info!("peerchat starting");

    let local_id = PeerId::new(
        config
            .peer_id
            .clone()
            .or_else(|| config.username.clone())
            .unwrap_or_else(|| "local".to_string()),
    );

    // Optional account-service login before any networking starts.
    if let (Some(auth_url), Some(username)) = (&config.auth_url, &config.username) {
        if let Err(e) = login(auth_url, username, &local_id).await {
            eprintln!("account service: {e}");
            return Ok(());
        }
    }

    let data_dir = config
        .data_dir
        .clone()
        .unwrap_or_else(|| std::env::temp_dir().join("peerchat"));
    let backend = match FileBackend::new(&data_dir) {
        Ok(backend) => backend,
        Err(e) => {
            eprintln!("cannot open data directory {}: {e}", data_dir.display());
            return Ok(());
        }
    };

    let network = LoopbackNetwork::new();
    let (connector, signaling) = match network.register(local_id.clone()) {
        Ok(pair) => pair,
        Err(e) => {
            eprintln!("cannot register peer id: {e}");
            return Ok(());
        }
    };

    let (mut manager, events) =
        SessionManager::new(local_id.clone(), connector, backend, config.event_buffer);
    manager.set_cipher(config.cipher);

    let (cmd_tx, cmd_rx) = mpsc::channel(32);
    tokio::spawn(manager.run(cmd_rx, signaling));
    tokio::spawn(render_events(events));

    println!("peerchat — you are {local_id}");
    println!("commands: /connect <peer>, /switch <peer>, /delete <peer>, /key <passphrase>, /cipher <on|off>, /quit");

    read_commands(cmd_tx).await;

    tracing::info!("peerchat exiting");
    Ok(())
}

/// Initialize file-based logging.
///
/// Returns a [`WorkerGuard`] that must be held until shutdown to ensure all
/// buffered log entries are flushed.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let default_path = std::env::temp_dir().join("peerchat.log");
    let log_path = file_path.unwrap_or(&default_path);

    let log_dir = log_path.parent()?;
    let file_name = log_path.file_name()?.to_str()?;

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}

/// Log in to the account service and record our peer identifier.
///
/// The password comes from `PEERCHAT_PASSWORD`; prompting would block
/// the async runtime and passwords on the command line leak via `ps`.
async fn login(auth_url: &str, username: &str, local_id: &PeerId) -> Result<(), String> {
    let Ok(password) = std::env::var("PEERCHAT_PASSWORD") else {
        return Err("PEERCHAT_PASSWORD is not set".to_string());
    };

    let client = AuthClient::new(auth_url);
    let credentials = Credentials {
        username: username.to_string(),
        password,
    };

    let previous = client.login(&credentials).await.map_err(|e| e.to_string())?;
    if let Some(previous) = previous
        && previous != *local_id
    {
        println!("last session used peer id {previous}");
    }
    client
        .update_peer_id(username, local_id)
        .await
        .map_err(|e| e.to_string())?;

    tracing::info!(username, "logged in to account service");
    Ok(())
}

/// Print manager events as chat output.
async fn render_events(mut events: mpsc::Receiver<ChatEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            ChatEvent::PeerAdded { peer } => println!("* {peer} is available"),
            ChatEvent::Switched { peer, log } => {
                println!("--- {peer} ---");
                print!("{log}");
            }
            ChatEvent::Rendered { line, .. } => print!("{line}"),
            ChatEvent::Unread { peer } => println!("* new message from {peer}"),
            ChatEvent::ActiveClosed { peer } => println!("* chat closed: {peer}"),
            ChatEvent::SessionFailed { peer, reason } => {
                println!("* connection to {peer} failed: {reason}");
            }
            ChatEvent::Warning { peer, message } => match peer {
                Some(peer) => println!("! {peer}: {message}"),
                None => println!("! {message}"),
            },
            ChatEvent::Notice { message } => println!("* {message}"),
            ChatEvent::SignalingDown { retrying } => {
                if retrying {
                    println!("* signaling lost, reconnecting shortly");
                } else {
                    println!("* signaling lost; restart to reconnect");
                }
            }
            ChatEvent::Deleted { peer } => println!("* deleted history with {peer}"),
        }
    }
}

/// Read stdin lines and translate them into manager commands.
async fn read_commands(cmd_tx: mpsc::Sender<Command>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let command = if let Some(rest) = line.strip_prefix('/') {
            let (word, arg) = match rest.split_once(' ') {
                Some((word, arg)) => (word, arg.trim()),
                None => (rest, ""),
            };
            match word {
                "connect" => Command::Connect(PeerId::new(arg)),
                "switch" => Command::Switch(PeerId::new(arg)),
                "delete" => Command::Delete(PeerId::new(arg)),
                "key" => Command::DeriveKey(arg.to_string()),
                "cipher" => match arg.parse() {
                    Ok(mode) => Command::SetCipher(mode),
                    Err(e) => {
                        println!("! {e}");
                        continue;
                    }
                },
                "quit" => Command::Shutdown,
                other => {
                    println!("! unknown command: /{other}");
                    continue;
                }
            }
        } else {
            Command::Send(line.to_string())
        };

        let is_shutdown = matches!(command, Command::Shutdown);
        if cmd_tx.send(command).await.is_err() || is_shutdown {
            break;
        }
    }
}
