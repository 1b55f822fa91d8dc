//! EmiNet endpoint demo.
//!
//! Opens a listening endpoint and a client endpoint, connects the client to
//! the listener, closes the connection, and logs the lifecycle events seen on
//! both sides.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tokio::sync::mpsc;

use eminet::config::load_config;
use eminet::lifecycle::signals;
use eminet::observability::logging::{init_logging, DEFAULT_FILTER};
use eminet::{open, EndpointConfig};

#[derive(Parser)]
#[command(name = "eminet-demo")]
#[command(
    about = "Open a listening and a client endpoint and exercise their lifecycle events",
    long_about = None
)]
struct Cli {
    /// Port the listening endpoint binds.
    #[arg(short, long, default_value_t = 5001)]
    port: u16,

    /// Host the client endpoint connects to.
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// TOML config for the listening endpoint (overrides --port).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Give up after this many seconds.
    #[arg(long, default_value_t = 5)]
    timeout_secs: u64,
}

#[derive(Debug)]
enum Milestone {
    ServerDisconnect,
    ClientDisconnect,
    Failed,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging(&format!("{DEFAULT_FILTER},eminet_demo=info"));

    let cli = Cli::parse();
    let server_config = match &cli.config {
        Some(path) => load_config(path)?,
        None => EndpointConfig::listen(cli.port),
    };

    let (tx, mut rx) = mpsc::unbounded_channel();

    let client = open(EndpointConfig::client())?;
    let server = open(server_config)?;

    let server_tx = tx.clone();
    server.on_connection(move |socket| {
        tracing::info!(peer_addr = %socket.remote_addr(), "Client connected");
        let tx = server_tx.clone();
        socket.on_disconnect(move || {
            tracing::info!("Client disconnected");
            let _ = tx.send(Milestone::ServerDisconnect);
        });
    });
    let error_tx = tx.clone();
    server.on_error(move |e| {
        tracing::error!(error = %e, "Server endpoint failed");
        let _ = error_tx.send(Milestone::Failed);
    });

    let port = server.local_addr().map_or(cli.port, |addr| addr.port());
    client.connect(cli.host.clone(), port, move |result| {
        let socket = match result {
            Ok(socket) => socket,
            Err(e) => {
                tracing::error!(error = %e, "Failed to connect");
                let _ = tx.send(Milestone::Failed);
                return;
            }
        };

        let disconnect_tx = tx.clone();
        socket.on_disconnect(move || {
            tracing::info!("Disconnected");
            let _ = disconnect_tx.send(Milestone::ClientDisconnect);
        });

        tracing::info!(?socket, "Connected");
        socket.close();
    });

    tracing::info!(?server, ?client, "Endpoints opened");

    let mut pending = 2;
    let deadline = tokio::time::sleep(Duration::from_secs(cli.timeout_secs));
    tokio::pin!(deadline);
    let outcome = loop {
        tokio::select! {
            milestone = rx.recv() => match milestone {
                Some(Milestone::Failed) | None => break Err("demo failed"),
                Some(m) => {
                    tracing::debug!(milestone = ?m, "Milestone reached");
                    pending -= 1;
                    if pending == 0 {
                        break Ok(());
                    }
                }
            },
            _ = &mut deadline => break Err("timed out waiting for disconnects"),
            _ = signals::interrupt() => break Ok(()),
        }
    };

    server.close();
    client.close();
    outcome?;

    tracing::info!("Demo complete");
    Ok(())
}
