//! # atracsys_igtl - Atracsys marker poses over OpenIGTLink
//!
//! Polls an Atracsys fusionTrack/spryTrack for the poses of registered
//! geometries and forwards them as OpenIGTLink `TDATA` messages. Provides:
//! - Device enumeration and spryTrack onboard-processing setup
//! - Geometry file loading and registration
//! - Frame polling into 4x4 marker transforms, inline or on a poller thread
//! - `TDATA` messages built with `openigtlink-rust`, fanned out to every
//!   client by a TCP listener
//! - C FFI over the tracker for C/C++ consumers
//!
//! The vendor driver is linked with the `sdk` feature; without it the
//! in-process simulator stands in for the hardware.
//!
//! ## Quick Start
//! ```no_run
//! use atracsys_igtl::protocol;
//! use atracsys_igtl::{ConnectionListener, InitOptions, SimulatorBackend, Tracker};
//! use std::time::Duration;
//!
//! let mut tracker = Tracker::init(Box::new(SimulatorBackend::new()), InitOptions::default()).unwrap();
//! tracker.add_geometry("geometry002.ini", "Pointer").unwrap();
//!
//! let listener = ConnectionListener::bind("0.0.0.0:22222", Duration::from_secs(10)).unwrap();
//! let stream = tracker.into_stream(Duration::from_millis(20)).unwrap();
//! loop {
//!     let sample = stream.recv().unwrap();
//!     let packet = protocol::pack("AtracsysTracker", sample.timestamp, &sample.markers).unwrap();
//!     listener.send(&packet);
//! }
//! ```

pub mod error;
pub mod types;
pub mod backend;
pub mod geometry;
pub mod sim;
#[cfg(feature = "sdk")]
pub mod sdk;
pub mod device;
pub mod tracker;
pub mod stream;
pub mod protocol;
pub mod server;
pub mod config;
pub mod ffi;

pub use error::{ErrorReport, TrackerError};
pub use types::*;
pub use backend::TrackerBackend;
pub use device::Device;
pub use geometry::{Geometry, GeometryLoader, GeometrySource};
pub use sim::SimulatorBackend;
pub use tracker::{InitOptions, PollOutcome, Tracker};
pub use stream::{TrackingSample, TrackingStream};
pub use server::ConnectionListener;

/// Result type alias for tracker operations.
pub type Result<T> = std::result::Result<T, TrackerError>;

/// Open the backend selected in the configuration.
pub fn open_backend(kind: config::BackendKind) -> Result<Box<dyn TrackerBackend>> {
    match kind {
        config::BackendKind::Simulator => Ok(Box::new(SimulatorBackend::new())),
        #[cfg(feature = "sdk")]
        config::BackendKind::Sdk => Ok(Box::new(sdk::SdkBackend::open()?)),
        #[cfg(not(feature = "sdk"))]
        config::BackendKind::Sdk => {
            log::error!("Built without the `sdk` feature; the vendor driver is unavailable");
            Err(TrackerError::LibraryInit)
        }
    }
}
