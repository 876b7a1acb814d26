//! Minimal OpenIGTLink client printing received TDATA messages.
//!
//! Usage: cargo run --example client [-- HOST:PORT]

use atracsys_igtl::protocol::read_tracking_message;
use atracsys_igtl::TrackerError;
use std::net::TcpStream;

fn main() {
    env_logger::init();

    let addr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:22222".to_string());

    let mut stream = match TcpStream::connect(&addr) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Cannot connect to {}: {}", addr, e);
            std::process::exit(1);
        }
    };
    println!("Connected to {}", addr);

    loop {
        let message = match read_tracking_message(&mut stream) {
            Ok(m) => m,
            Err(TrackerError::Io(e)) => {
                eprintln!("Connection closed: {}", e);
                break;
            }
            Err(e) => {
                eprintln!("Skipping message: {}", e);
                continue;
            }
        };

        let stamp = &message.header.timestamp;
        for element in &message.content.elements {
            let m = &element.matrix;
            println!(
                "{}.{:010} {:<20} ({:+9.2} {:+9.2} {:+9.2})",
                stamp.seconds, stamp.fraction, element.name, m[0][3], m[1][3], m[2][3],
            );
        }
    }
}
