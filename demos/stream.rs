//! Print marker poses from the tracker to stdout.
//!
//! Usage: cargo run --example stream -- NAME=PATH [NAME=PATH ...]
//! Press Ctrl+C to stop.

use atracsys_igtl::{InitOptions, SimulatorBackend, Tracker, TrackerError};
use std::time::{Duration, Instant};

fn main() {
    env_logger::init();

    let mut tracker = match Tracker::init(Box::new(SimulatorBackend::new()), InitOptions::default()) {
        Ok(t) => t,
        Err(e) => {
            eprintln!("Failed to open tracker: {}", e);
            std::process::exit(1);
        }
    };

    for arg in std::env::args().skip(1) {
        let (name, path) = arg.split_once('=').unwrap_or((arg.as_str(), arg.as_str()));
        if let Err(e) = tracker.add_geometry(path, name) {
            eprintln!("Cannot add geometry '{}': {}", name, e);
        }
    }

    let stream = match tracker.into_stream(Duration::from_millis(20)) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Failed to start tracking: {}", e);
            std::process::exit(1);
        }
    };

    println!("Streaming marker poses (Ctrl+C to stop)...");

    let start = Instant::now();
    let mut count: u64 = 0;

    loop {
        match stream.recv_timeout(Duration::from_secs(2)) {
            Ok(sample) => {
                count += 1;
                // Print every ~25th sample to avoid flooding the terminal
                if count % 25 != 1 {
                    continue;
                }
                for marker in &sample.markers {
                    let t = marker.translation_mm();
                    println!(
                        "geometry {:<3} {:<12} trans=({:+9.2} {:+9.2} {:+9.2})  error={:.3}",
                        marker.geometry_id,
                        marker.name,
                        t[0],
                        t[1],
                        t[2],
                        marker.registration_error_mm,
                    );
                }
            }
            Err(TrackerError::Timeout) => {
                eprintln!("Timeout waiting for markers");
                break;
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                break;
            }
        }
    }

    let elapsed = start.elapsed().as_secs_f64();
    println!(
        "\nTotal: {} samples in {:.1}s ({:.1} Hz)",
        count,
        elapsed,
        count as f64 / elapsed
    );
}
