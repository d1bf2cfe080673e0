use clap::Parser;
use client::battleye;
use client::config::ConnectionConfig;
use client::rcon::Rcon;
use log::{error, info, warn};
use protocol::Event;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// RCON address of the game server
    #[arg(short = 's', long, default_value = "127.0.0.1:2306")]
    server: String,

    /// RCON password
    #[arg(short = 'p', long)]
    password: String,

    /// Seconds between keep-alive packets
    #[arg(short = 'k', long, default_value = "30")]
    keep_alive: u64,

    /// Seconds to wait for a command response
    #[arg(short = 't', long, default_value = "5")]
    timeout: u64,

    /// Print server events as JSON lines
    #[arg(long)]
    json: bool,
}

fn print_event(event: &Event, json: bool) {
    if json {
        match serde_json::to_string(event) {
            Ok(line) => println!("{}", line),
            Err(e) => warn!("Failed to encode event: {}", e),
        }
    } else {
        println!("[{:?}] {}", event.kind, event.payload);
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let response_timeout = Duration::from_secs(args.timeout);

    let config = ConnectionConfig::new(&args.server, &args.password)
        .with_keep_alive(Duration::from_secs(args.keep_alive));
    let queue = config.event_queue;

    info!("Connecting to: {}", args.server);
    let rcon = Rcon::new(battleye::Client::new(config));
    rcon.connect().await?;

    let token = CancellationToken::new();
    let (events, mut rx) = mpsc::channel(queue);
    rcon.subscribe(token.clone(), events).await?;

    let json = args.json;
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            print_event(&event, json);
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            line = lines.next_line() => line?,
        };

        let Some(line) = line else { break };
        let cmd = line.trim();
        if cmd.is_empty() {
            continue;
        }

        match rcon.write(cmd).await {
            Ok(transmission) => match transmission.wait(response_timeout).await {
                Ok(response) => println!("{}", response),
                Err(e) => warn!("{}: {}", cmd, e),
            },
            Err(e) => error!("Failed to send {:?}: {}", cmd, e),
        }
    }

    token.cancel();
    if let Err(e) = rcon.disconnect().await {
        warn!("Disconnect failed: {}", e);
    }
    let _ = printer.await;

    Ok(())
}
