use crate::backend::FrameOptions;
use crate::geometry::GeometryLoader;
use crate::protocol::DEFAULT_PORT;
use crate::tracker::InitOptions;
use clap::{Parser, ValueEnum};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Which driver backend to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendKind {
    /// Vendor driver (requires the `sdk` feature).
    Sdk,
    /// In-process simulated device.
    Simulator,
}

impl Default for BackendKind {
    fn default() -> Self {
        if cfg!(feature = "sdk") {
            BackendKind::Sdk
        } else {
            BackendKind::Simulator
        }
    }
}

/// A geometry to register: `NAME=PATH`, or just `PATH` (named after the file stem).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeometrySpec {
    pub name: String,
    pub path: PathBuf,
}

fn parse_geometry_spec(s: &str) -> Result<GeometrySpec, String> {
    let (name, path) = match s.split_once('=') {
        Some((name, path)) => (name.trim().to_string(), PathBuf::from(path.trim())),
        None => {
            let path = PathBuf::from(s.trim());
            let name = path
                .file_stem()
                .map(|stem| stem.to_string_lossy().to_string())
                .unwrap_or_default();
            (name, path)
        }
    };
    if name.is_empty() || path.as_os_str().is_empty() {
        return Err(format!("expected NAME=PATH, got '{}'", s));
    }
    Ok(GeometrySpec { name, path })
}

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Tracking backend to open.
    #[arg(long, env = "ATRACSYS_BACKEND", value_enum, default_value_t = BackendKind::default())]
    pub backend: BackendKind,

    /// Geometry to register as NAME=PATH. Repeat or separate with commas.
    #[arg(
        long = "geometry",
        env = "ATRACSYS_GEOMETRIES",
        value_delimiter = ',',
        value_parser = parse_geometry_spec
    )]
    pub geometries: Vec<GeometrySpec>,

    /// Directory searched for geometry files not found at the given path.
    #[arg(long, env = "ATRACSYS_GEOMETRY_DIR")]
    pub geometry_dir: Option<PathBuf>,

    /// Refuse the driver's simulator device.
    #[arg(long, env)]
    pub no_simulator: bool,

    /// Address to listen on for OpenIGTLink clients.
    #[arg(long, env = "IGTL_BIND", default_value = "0.0.0.0")]
    pub bind: IpAddr,

    /// OpenIGTLink port.
    #[arg(long, env = "IGTL_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Device name carried in message headers.
    #[arg(long, env = "IGTL_DEVICE_NAME", default_value = "AtracsysTracker")]
    pub device_name: String,

    /// Pause between polls, in milliseconds.
    #[arg(long, env, default_value = "20")]
    pub interval_ms: u64,

    /// Maximum wait for a frame, in milliseconds.
    #[arg(long, env, default_value = "100")]
    pub frame_timeout_ms: u64,

    /// Seconds between "no connection" log lines while idle.
    #[arg(long, env, default_value = "10")]
    pub accept_timeout_s: u64,
}

impl Args {
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn accept_timeout(&self) -> Duration {
        Duration::from_secs(self.accept_timeout_s)
    }

    pub fn init_options(&self) -> InitOptions {
        let mut loader = GeometryLoader::from_env();
        if let Some(dir) = &self.geometry_dir {
            if !loader.search_dirs().contains(dir) {
                loader = loader.with_dir(dir);
            }
        }
        InitOptions {
            allow_simulator: !self.no_simulator,
            frame_timeout: Duration::from_millis(self.frame_timeout_ms),
            frame_options: FrameOptions::default(),
            geometry_loader: loader,
        }
    }
}
