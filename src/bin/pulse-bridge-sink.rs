use std::net::SocketAddr;
use clap::Parser;
use log::{error, info, warn};
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use pulse_bridge::init_logging;
use pulse_bridge::wire::{summarize_record, RecordSplitter};

/// Accepts bridge connections and logs every record received.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1:7878")]
    listen: String,

    /// Log debug output
    #[arg(short, long)]
    verbose: bool,
}

async fn handle_peer(mut stream: TcpStream, peer: SocketAddr) {
    info!("{} connected", peer);
    let mut splitter = RecordSplitter::new();
    let mut buffer = [0u8; 4096];

    loop {
        let read = match stream.read(&mut buffer).await {
            Ok(0) => break,
            Ok(read) => read,
            Err(err) => {
                warn!("Error reading from {}: {}", peer, err);
                break;
            },
        };

        for record in splitter.push(&buffer[..read]) {
            match serde_json::from_str::<serde_json::Value>(&record) {
                Ok(value) => match summarize_record(&value) {
                    Some(summary) => info!(
                        "{}: sensor={} value={} timestamp={}",
                        peer, summary.sensor, summary.value, summary.timestamp,
                    ),
                    None => info!("{}: {}", peer, value),
                },
                Err(err) => warn!("{} sent a malformed record ({}): {}", peer, err, record),
            }
        }
    }

    if !splitter.remainder().is_empty() {
        warn!("{} disconnected in the middle of a record", peer);
    }
    info!("{} disconnected", peer);
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let listener = TcpListener::bind(&args.listen).await.map_err(|err| {
        error!("Failed to listen on {}: {}", args.listen, err);
        err
    })?;
    info!("Listening on {}", listener.local_addr()?);

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tokio::spawn(handle_peer(stream, peer));
                },
                Err(err) => warn!("Failed to accept connection: {}", err),
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Close requested");
                return Ok(());
            },
        }
    }
}
