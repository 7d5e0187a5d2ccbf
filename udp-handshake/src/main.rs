//! Entry point for `udp-handshake`.
//!
//! Parses CLI arguments and dispatches into **server**, **client**, or
//! **demo** mode.  All protocol work is delegated to the library; `main.rs`
//! owns only process setup (logging, signal handling, argument parsing).

use std::time::Duration;

use clap::{Parser, Subcommand};
use udp_handshake::{Address, Config, ConnError};

/// Largest message the server reads per connection.
const RECV_LEN: usize = 1024;

/// TCP-style handshake over UDP.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    /// How long to wait for a SYN-ACK or the final ACK, in milliseconds.
    #[arg(long, global = true, default_value_t = 3000)]
    handshake_timeout_ms: u64,

    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Accept connections and print the first message of each.
    Server {
        /// Welcome address to bind.
        #[arg(short, long, default_value = "localhost:8000")]
        bind: Address,
        /// How long to wait for a message once a connection is up.
        #[arg(long, default_value_t = 1000)]
        recv_timeout_ms: u64,
    },
    /// Connect to a server and send one message.
    Client {
        /// Local address to bind.
        #[arg(short, long, default_value = "localhost:4000")]
        bind: Address,
        /// Server welcome address.
        #[arg(short, long, default_value = "localhost:8000")]
        server: Address,
        #[arg(short, long, default_value = "Hello World")]
        message: String,
    },
    /// Run a server and a client against each other in one process.
    Demo {
        #[arg(long, default_value = "localhost:8000")]
        server: Address,
        #[arg(long, default_value = "localhost:4000")]
        client: Address,
        #[arg(short, long, default_value = "Hello World")]
        message: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();
    let config =
        Config::default().with_handshake_timeout(Duration::from_millis(cli.handshake_timeout_ms));

    match cli.mode {
        Mode::Server {
            bind,
            recv_timeout_ms,
        } => run_server(bind, config, Duration::from_millis(recv_timeout_ms), None).await,
        Mode::Client {
            bind,
            server,
            message,
        } => run_client(bind, server, &config, &message).await,
        Mode::Demo {
            server,
            client,
            message,
        } => {
            let server_task = tokio::spawn(run_server(
                server.clone(),
                config.clone(),
                Duration::from_secs(1),
                Some(1),
            ));
            tokio::time::sleep(Duration::from_millis(200)).await;
            run_client(client, server, &config, &message).await?;
            server_task.await?
        }
    }
}

/// Accept connections until interrupted (or `limit` have been served) and
/// print the first message received on each.
async fn run_server(
    bind: Address,
    config: Config,
    recv_timeout: Duration,
    limit: Option<usize>,
) -> anyhow::Result<()> {
    log::info!("Starting server on {bind}");
    let mut acceptor = udp_handshake::listen_with_config(bind, config).await?;

    let shutdown = acceptor.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("interrupt received; stopping listener");
            shutdown.shutdown();
        }
    });

    let mut served = 0;
    while limit.is_none_or(|n| served < n) {
        let mut conn = match acceptor.accept().await {
            Ok(conn) => conn,
            Err(ConnError::ListenerClosed) => break,
            Err(e) => {
                log::warn!("handshake failed: {e}");
                continue;
            }
        };
        served += 1;

        conn.set_timeout(Some(recv_timeout));
        match conn.recv(RECV_LEN).await {
            Ok(msg) => println!("msg={:?}", String::from_utf8_lossy(&msg)),
            Err(e) => log::warn!("no message from {}: {e}", conn.peer_addr()),
        }
    }
    Ok(())
}

async fn run_client(
    bind: Address,
    server: Address,
    config: &Config,
    message: &str,
) -> anyhow::Result<()> {
    log::info!("Starting client on {bind}, connecting to {server}");
    let mut conn = udp_handshake::connect_with_config(bind, server, config).await?;
    conn.set_timeout(Some(config.handshake_timeout));
    conn.send(message.as_bytes()).await?;
    log::info!("sent {} bytes to {}", message.len(), conn.peer_addr());
    Ok(())
}
