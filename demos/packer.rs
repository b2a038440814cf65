//! Example Packer (Consumer/Owner)
//!
//! Creates a shared memory ring and drains event batches written by one or
//! more collectors. Run it first, then start `collector` with the same name.

use capture_ring::{RingBuffer, RingConfig, RingError};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let namespace = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "capture_demo".to_string());

    println!("╔══════════════════════════════════════════════════╗");
    println!("║              CaptureRing Packer                  ║");
    println!("╚══════════════════════════════════════════════════╝");
    println!();
    println!("[Packer] Creating ring: {}", namespace);

    let config = RingConfig::new(8 * 1024 * 1024).with_threshold(0.8);
    let ring = match RingBuffer::create_shared(&namespace, &config) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("[Packer] Failed to create ring: {}", e);
            std::process::exit(1);
        }
    };
    let mut consumer = match ring.consumer() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("[Packer] Failed to attach consumer: {}", e);
            std::process::exit(1);
        }
    };

    println!("[Packer] Ring ready ({} bytes), waiting for collectors... (Ctrl+C to quit)", ring.capacity());

    let mut last_report = Instant::now();
    let mut batch_bytes = 0usize;
    loop {
        match consumer.drain(|msg| batch_bytes += msg.len()) {
            Ok(0) => std::thread::sleep(Duration::from_millis(5)),
            Ok(_) => {}
            Err(RingError::Corrupted(c)) => {
                eprintln!("[Packer] Ring corrupted ({}), giving up", c);
                std::process::exit(2);
            }
            Err(e) => {
                eprintln!("[Packer] Read failed: {}", e);
                std::process::exit(1);
            }
        }

        if last_report.elapsed() >= Duration::from_secs(1) {
            let stats = ring.stats();
            tracing::info!(
                read = stats.messages_read,
                written = stats.messages_written,
                backpressure = stats.backpressure_events,
                full = stats.full_events,
                utilization = %format!("{:.1}%", ring.utilization() * 100.0),
                batch_bytes,
                "packer progress"
            );
            batch_bytes = 0;
            last_report = Instant::now();
        }
    }
}
