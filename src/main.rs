//! Atracsys → OpenIGTLink server.
//!
//! Polls the tracker for registered geometries and broadcasts `TDATA`
//! messages to every connected OpenIGTLink client.
//!
//! Usage:
//!   atracsys-igtl-server --geometry Pointer=geometry002.ini --geometry Ultrasound=geometry003.ini
//!   Type `q` + Enter to quit.

use atracsys_igtl::config::Args;
use atracsys_igtl::protocol;
use atracsys_igtl::{ConnectionListener, Tracker, TrackerError};
use clap::Parser;
use std::io::BufRead as _;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn main() {
    env_logger::init();
    let args = Args::parse();

    if let Err(e) = run(&args) {
        log::error!("{}", e);
        std::process::exit(1);
    }
}

fn run(args: &Args) -> atracsys_igtl::Result<()> {
    let backend = atracsys_igtl::open_backend(args.backend)?;
    let mut tracker = Tracker::init(backend, args.init_options())?;

    let listener = ConnectionListener::bind(args.listen_addr(), args.accept_timeout())?;

    if args.geometries.is_empty() {
        log::warn!("No geometry given (--geometry NAME=PATH); no marker will be tracked");
    }
    for spec in &args.geometries {
        if let Err(e) = tracker.add_geometry(&spec.path, &spec.name) {
            log::error!("Skipping geometry '{}': {}", spec.name, e);
        }
    }

    tracker.start_tracking()?;
    let stream = tracker.into_stream(args.interval())?;

    let running = Arc::new(AtomicBool::new(true));
    spawn_quit_watcher(running.clone());

    log::info!("Streaming tracking data to OpenIGTLink clients (q + Enter to quit)");

    let mut count: u64 = 0;
    let mut sent: u64 = 0;
    let mut last_report = Instant::now();

    while running.load(Ordering::Relaxed) {
        let sample = match stream.recv_timeout(Duration::from_millis(500)) {
            Ok(s) => s,
            Err(TrackerError::Timeout) => continue,
            Err(e) => {
                log::error!("Tracking stream ended: {}", e);
                break;
            }
        };
        count += 1;

        let packet = match protocol::pack(&args.device_name, sample.timestamp, &sample.markers) {
            Ok(p) => p,
            Err(e) => {
                log::warn!("Cannot encode TDATA: {}", e);
                continue;
            }
        };
        if listener.send(&packet) > 0 {
            sent += 1;
        }

        let now = Instant::now();
        if now.duration_since(last_report) >= Duration::from_secs(5) {
            let elapsed = now.duration_since(last_report).as_secs_f64();
            log::info!(
                "{:.1} frames/s, {:.1} msg/s, {} client(s)",
                count as f64 / elapsed,
                sent as f64 / elapsed,
                listener.connection_count()
            );
            count = 0;
            sent = 0;
            last_report = now;
        }
    }

    stream.stop();
    log::info!("Stopped");
    Ok(())
}

/// Clear `running` when `q` is entered on stdin. A closed stdin keeps the server running.
fn spawn_quit_watcher(running: Arc<AtomicBool>) {
    let spawned = std::thread::Builder::new()
        .name("quit-watcher".into())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                match line {
                    Ok(l) if l.trim() == "q" => {
                        running.store(false, Ordering::Relaxed);
                        return;
                    }
                    Ok(_) => {}
                    Err(_) => return,
                }
            }
        });
    if let Err(e) = spawned {
        log::warn!("Cannot watch stdin for quit: {}", e);
    }
}
