//! Example Collector (Producer)
//!
//! Attaches to a packer's ring and writes synthetic keyboard/clipboard events
//! as fast as admission control allows.

use capture_ring::{RingBuffer, RingError};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let namespace = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "capture_demo".to_string());
    let count: u64 = std::env::args()
        .nth(2)
        .and_then(|n| n.parse().ok())
        .unwrap_or(1_000_000);

    println!("[Collector] Connecting to ring: {}", namespace);

    let ring = match RingBuffer::open_shared(&namespace) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("[Collector] Failed to connect: {}", e);
            eprintln!("[Collector] Make sure the packer is running first!");
            std::process::exit(1);
        }
    };

    let start = Instant::now();
    let mut sent = 0u64;
    let mut dropped = 0u64;
    let mut backoff = Duration::from_micros(10);

    while sent + dropped < count {
        let event = if sent % 10 == 0 {
            format!("clipboard seq={} text={}", sent, "x".repeat((sent % 200) as usize))
        } else {
            format!("key seq={} code={}", sent, sent % 104)
        };

        match ring.write(event.as_bytes()) {
            Ok(()) => {
                sent += 1;
                backoff = Duration::from_micros(10);
            }
            Err(RingError::Backpressure { .. }) => {
                std::thread::sleep(backoff);
                backoff = (backoff * 2).min(Duration::from_millis(5));
            }
            Err(RingError::Full { .. }) => dropped += 1,
            Err(e) => {
                eprintln!("[Collector] Write failed: {}", e);
                std::process::exit(1);
            }
        }
    }

    let elapsed = start.elapsed().as_secs_f64();
    println!(
        "[Collector] Sent {} events ({} dropped) in {:.2}s ({:.0} events/s)",
        sent,
        dropped,
        elapsed,
        sent as f64 / elapsed
    );
}
