//! List tracking devices visible to the selected backend.
//!
//! Usage: cargo run --example enumerate [-- sdk]

use atracsys_igtl::config::BackendKind;

fn main() {
    env_logger::init();

    let kind = match std::env::args().nth(1).as_deref() {
        Some("sdk") => BackendKind::Sdk,
        _ => BackendKind::Simulator,
    };

    let mut backend = match atracsys_igtl::open_backend(kind) {
        Ok(b) => b,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    match atracsys_igtl::device::list_devices(backend.as_mut()) {
        Ok(devices) => {
            println!("Found {} device(s) on {}:", devices.len(), backend.name());
            for (i, dev) in devices.iter().enumerate() {
                println!(
                    "  [{}] {}  SN=0x{:016x}",
                    i,
                    dev.device_type.label(),
                    dev.serial_number
                );
            }
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}
