use clap::Parser;
use log::info;
use server::{MockServer, ServerConfig};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Runs a mock BattlEye RCON server.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port to listen on
    #[arg(short, long, default_value = "2306")]
    port: u16,

    /// Password clients must log in with
    #[arg(long, default_value = "password")]
    password: String,

    /// Largest response body sent in one packet
    #[arg(long, default_value = "1024")]
    max_fragment: usize,

    /// Send multi-packet responses last fragment first
    #[arg(long)]
    reverse_fragments: bool,

    /// Seconds of silence after which a session is dropped
    #[arg(long, default_value = "45")]
    session_timeout: u64,

    /// Maximum number of concurrent sessions
    #[arg(long, default_value = "16")]
    max_sessions: usize,

    /// Broadcast a server message every N seconds (0 disables)
    #[arg(long, default_value = "0")]
    broadcast_every: u64,

    /// Message used for periodic broadcasts
    #[arg(long, default_value = "(Global) Server: hello")]
    message: String,

    /// Canned response as COMMAND=RESPONSE, may be repeated
    #[arg(short, long = "respond")]
    respond: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let mut config = ServerConfig::new(args.password)
        .with_max_fragment(args.max_fragment)
        .with_reverse_fragments(args.reverse_fragments)
        .with_session_timeout(Duration::from_secs(args.session_timeout))
        .with_max_sessions(args.max_sessions);
    if args.broadcast_every > 0 {
        config = config.with_broadcast(Duration::from_secs(args.broadcast_every), args.message);
    }
    for entry in &args.respond {
        let (command, response) = entry
            .split_once('=')
            .ok_or_else(|| format!("invalid --respond {:?}, expected COMMAND=RESPONSE", entry))?;
        config = config.with_response(command, response);
    }

    let address = format!("{}:{}", args.host, args.port);
    let server = MockServer::bind(&address, config).await?;

    let token = CancellationToken::new();
    let running = tokio::spawn(server.run(token.clone()));

    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl+C, shutting down gracefully...");
    token.cancel();
    running.await?;

    Ok(())
}
