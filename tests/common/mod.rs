use std::net;
use std::thread;

use rdt::sim::{self, Faults, SimChannel};
use rdt::{Channel, Config, Endpoint, Stats};

pub fn addrs() -> (net::SocketAddr, net::SocketAddr) {
    (
        "10.0.0.1:4000".parse().unwrap(),
        "10.0.0.2:5000".parse().unwrap(),
    )
}

/// A linked pair: `.0` for the initiator, `.1` for the acceptor.
pub fn link() -> (SimChannel, SimChannel) {
    let (addr_a, addr_b) = addrs();
    sim::pair(addr_a, addr_b)
}

/// Deterministic, non-repeating-looking test data.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| (i.wrapping_mul(31) ^ (i >> 8)) as u8)
        .collect()
}

/// Quick timers so lossy trials finish promptly.
pub fn fast_config(window_size: u32) -> Config {
    Config {
        window_size,
        rto_ms: 20,
        linger_ms: 200,
        ..Default::default()
    }
}

pub fn assert_same_stream(sent: &[u8], received: &[u8]) {
    assert_eq!(received.len(), sent.len(), "stream length differs");
    assert_eq!(md5::compute(received), md5::compute(sent), "stream digest differs");
}

pub struct Trial {
    pub received: Vec<u8>,
    pub sender_stats: Stats,
    pub receiver_stats: Stats,
}

/// Runs a complete connect/send/close against accept/recv, the acceptor on its own thread.
/// Faults apply to datagrams sent by the respective side.
pub fn run_transfer(
    config: Config,
    data: &[u8],
    sender_faults: Faults,
    receiver_faults: Faults,
) -> Trial {
    let (sender_channel, receiver_channel) = link();
    let receiver_addr = receiver_channel.local_addr();

    let sender_channel = sender_channel.with_faults(sender_faults);
    let receiver_channel = receiver_channel.with_faults(receiver_faults);

    let receiver_config = config.clone();

    let receiver_thread = thread::spawn(move || {
        let (mut endpoint, _) = Endpoint::accept(receiver_channel, receiver_config).unwrap();

        let received = endpoint.recv().unwrap();

        (received, endpoint.stats().clone())
    });

    let mut endpoint = Endpoint::connect(sender_channel, receiver_addr, config).unwrap();

    endpoint.send(data).unwrap();
    endpoint.close().unwrap();

    let sender_stats = endpoint.stats().clone();

    let (received, receiver_stats) = receiver_thread.join().unwrap();

    Trial {
        received,
        sender_stats,
        receiver_stats,
    }
}
