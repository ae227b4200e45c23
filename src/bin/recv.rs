use std::fs;
use std::net;
use std::path::PathBuf;

use clap::Parser;

/// Receive a file sent by rdt-send
#[derive(Parser, Debug)]
#[command(name = "rdt-recv", version)]
struct Args {
    /// UDP port to listen on
    #[arg(long)]
    port: u16,

    /// Span of the receive window, in segments
    #[arg(long, default_value_t = 8)]
    window_size: u32,

    /// Where to write the received stream
    #[arg(long)]
    output: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

fn main() -> rdt::Result<()> {
    let args = Args::parse();

    rdt::logging::init(&args.log_level)?;

    let config = rdt::Config {
        window_size: args.window_size,
        ..Default::default()
    };

    let channel = rdt::UdpChannel::bind((net::Ipv4Addr::UNSPECIFIED, args.port))?;

    let (mut endpoint, peer_addr) = rdt::Endpoint::accept(channel, config)?;

    let stream = endpoint.recv()?;

    fs::write(&args.output, &stream)?;

    println!(
        "received {} bytes from {} ({} duplicates, reorder peak {})",
        stream.len(),
        peer_addr,
        endpoint.stats().duplicates,
        endpoint.stats().reorder_peak
    );

    Ok(())
}
