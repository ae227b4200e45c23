use std::fs;
use std::net;
use std::path::PathBuf;

use clap::Parser;

/// Send a file reliably to an rdt-recv instance
#[derive(Parser, Debug)]
#[command(name = "rdt-send", version)]
struct Args {
    /// Local address to bind
    #[arg(long, default_value = "0.0.0.0:0")]
    bind: net::SocketAddr,

    /// Address of the receiver
    #[arg(long)]
    receiver: net::SocketAddr,

    /// Segments in flight at once
    #[arg(long, default_value_t = 8)]
    window_size: u32,

    /// Retransmission timeout in milliseconds
    #[arg(long, default_value_t = 500)]
    rto_ms: u64,

    /// File to send
    #[arg(long)]
    file: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

fn main() -> rdt::Result<()> {
    let args = Args::parse();

    rdt::logging::init(&args.log_level)?;

    let payload = fs::read(&args.file)?;

    let config = rdt::Config {
        window_size: args.window_size,
        rto_ms: args.rto_ms,
        ..Default::default()
    };

    let channel = rdt::UdpChannel::bind(args.bind)?;

    let mut endpoint = rdt::Endpoint::connect(channel, args.receiver, config)?;

    endpoint.send(&payload)?;
    endpoint.close()?;

    let stats = endpoint.stats();

    println!(
        "sent {} bytes in {} segments ({} retransmitted, {} timeouts)",
        payload.len(),
        stats.segments_sent,
        stats.retransmissions,
        stats.timeouts
    );

    Ok(())
}
