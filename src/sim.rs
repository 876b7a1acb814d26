//! In-process stand-in for the driver's simulator device.
//!
//! Produces moving poses for every registered geometry so the tracker,
//! stream and server can run without hardware. Tests drive it through
//! [`SimulatorControl`] to inject scripted frames and inspect options.

use crate::backend::{FrameOptions, TrackerBackend};
use crate::error::ErrorReport;
use crate::geometry::Geometry;
use crate::types::{DeviceInfo, DeviceType, Frame, QueryStatus, RawMarker};
use crate::{Result, TrackerError};
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

pub const DEFAULT_SERIAL: u64 = 0x0000_5157_0000_0001;

/// Default frame period (~50 Hz, close to a spryTrack).
pub const DEFAULT_FRAME_PERIOD: Duration = Duration::from_millis(20);

// -- Simulator error codes (positive = error, as in the driver) --
pub const ERR_NO_FRAME_ALLOCATED: i32 = 100;
pub const ERR_INVALID_SERIAL: i32 = 101;
pub const ERR_GEOMETRY_REJECTED: i32 = 102;
pub const ERR_OPTION_REJECTED: i32 = 103;

struct SimState {
    devices: Vec<DeviceInfo>,
    options: BTreeMap<(u64, u32), i32>,
    geometries: BTreeMap<u32, Geometry>,
    scripted: VecDeque<std::result::Result<Frame, i32>>,
    frame: Option<FrameOptions>,
    frame_period: Duration,
    reject_geometries: bool,
    reject_options: bool,
    last_error: Option<String>,
    frames_served: u64,
}

/// Shared handle for scripting and inspecting a [`SimulatorBackend`].
#[derive(Clone)]
pub struct SimulatorControl {
    state: Arc<Mutex<SimState>>,
}

/// Simulated tracking device.
pub struct SimulatorBackend {
    state: Arc<Mutex<SimState>>,
    epoch: Instant,
    next_frame: Instant,
}

fn lock(state: &Mutex<SimState>) -> MutexGuard<'_, SimState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SimulatorBackend {
    /// One simulator device with [`DEFAULT_SERIAL`].
    pub fn new() -> SimulatorBackend {
        Self::with_devices(vec![DeviceInfo {
            serial_number: DEFAULT_SERIAL,
            device_type: DeviceType::Simulator,
        }])
    }

    /// Simulate an arbitrary set of enumerated devices.
    pub fn with_devices(devices: Vec<DeviceInfo>) -> SimulatorBackend {
        let now = Instant::now();
        SimulatorBackend {
            state: Arc::new(Mutex::new(SimState {
                devices,
                options: BTreeMap::new(),
                geometries: BTreeMap::new(),
                scripted: VecDeque::new(),
                frame: None,
                frame_period: DEFAULT_FRAME_PERIOD,
                reject_geometries: false,
                reject_options: false,
                last_error: None,
                frames_served: 0,
            })),
            epoch: now,
            next_frame: now,
        }
    }

    pub fn control(&self) -> SimulatorControl {
        SimulatorControl {
            state: self.state.clone(),
        }
    }

    fn fail(&self, call: &'static str, code: i32, message: &str) -> TrackerError {
        lock(&self.state).last_error = Some(format!(
            "<ftkError><errors>{}: {}</errors><warnings /><messages>{}</messages></ftkError>",
            code, message, call
        ));
        TrackerError::Sdk {
            call,
            code,
            report: self.last_error(),
        }
    }

    fn check_serial(&self, call: &'static str, serial: u64) -> Result<()> {
        let known = lock(&self.state)
            .devices
            .iter()
            .any(|d| d.serial_number == serial);
        if known {
            Ok(())
        } else {
            Err(self.fail(call, ERR_INVALID_SERIAL, "invalid serial number"))
        }
    }

    /// Pose of a geometry at `t` seconds: a slow circle around the optical
    /// axis at a per-geometry depth, rotating about Z.
    fn synthesize(&self, geometries: &BTreeMap<u32, Geometry>, capacity: u32) -> Frame {
        let t = self.epoch.elapsed().as_secs_f32();
        let mut markers: Vec<RawMarker> = geometries
            .values()
            .map(|g| {
                let phase = t * 0.5 + g.id as f32 * 0.7;
                let (s, c) = phase.sin_cos();
                RawMarker {
                    geometry_id: g.id,
                    presence_mask: (0..g.fiducials.len()).fold(0, |mask, i| mask | 1 << i),
                    registration_error_mm: 0.1,
                    rotation: [[c, -s, 0.0], [s, c, 0.0], [0.0, 0.0, 1.0]],
                    translation_mm: [100.0 * c, 100.0 * s, 1000.0 + 50.0 * g.id as f32],
                }
            })
            .collect();

        let markers_status = if markers.len() > capacity as usize {
            markers.truncate(capacity as usize);
            QueryStatus::Overflow
        } else {
            QueryStatus::Ok
        };

        Frame {
            markers,
            markers_status,
        }
    }
}

impl Default for SimulatorBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl TrackerBackend for SimulatorBackend {
    fn name(&self) -> &'static str {
        "simulator"
    }

    fn enumerate_devices(&mut self) -> Result<Vec<DeviceInfo>> {
        Ok(lock(&self.state).devices.clone())
    }

    fn set_int32(&mut self, serial: u64, option: u32, value: i32) -> Result<()> {
        self.check_serial("ftkSetInt32", serial)?;
        if lock(&self.state).reject_options {
            return Err(self.fail("ftkSetInt32", ERR_OPTION_REJECTED, "option not supported"));
        }
        lock(&self.state).options.insert((serial, option), value);
        Ok(())
    }

    fn set_geometry(&mut self, serial: u64, geometry: &Geometry) -> Result<()> {
        self.check_serial("ftkSetGeometry", serial)?;
        if lock(&self.state).reject_geometries {
            return Err(self.fail("ftkSetGeometry", ERR_GEOMETRY_REJECTED, "geometry rejected"));
        }
        lock(&self.state)
            .geometries
            .insert(geometry.id, geometry.clone());
        Ok(())
    }

    fn create_frame(&mut self, options: FrameOptions) -> Result<()> {
        lock(&self.state).frame = Some(options);
        self.next_frame = Instant::now();
        Ok(())
    }

    fn delete_frame(&mut self) {
        lock(&self.state).frame = None;
    }

    fn last_frame(&mut self, serial: u64, timeout: Duration) -> Result<Frame> {
        self.check_serial("ftkGetLastFrame", serial)?;

        let (options, scripted, period) = {
            let mut state = lock(&self.state);
            let options = state.frame;
            let scripted = if options.is_some() {
                state.scripted.pop_front()
            } else {
                None
            };
            (options, scripted, state.frame_period)
        };
        let options = match options {
            Some(o) => o,
            None => {
                return Err(self.fail("ftkGetLastFrame", ERR_NO_FRAME_ALLOCATED, "no frame allocated"))
            }
        };

        if let Some(result) = scripted {
            lock(&self.state).frames_served += 1;
            return result.map_err(|code| self.fail("ftkGetLastFrame", code, "scripted failure"));
        }

        let now = Instant::now();
        if self.next_frame > now {
            let wait = self.next_frame - now;
            if wait > timeout {
                std::thread::sleep(timeout);
                return Err(TrackerError::Timeout);
            }
            std::thread::sleep(wait);
        }
        self.next_frame = Instant::now() + period;

        let mut state = lock(&self.state);
        state.frames_served += 1;
        Ok(self.synthesize(&state.geometries, options.markers))
    }

    fn last_error(&self) -> Option<ErrorReport> {
        lock(&self.state)
            .last_error
            .as_deref()
            .and_then(ErrorReport::parse)
    }
}

impl SimulatorControl {
    /// Queue a frame returned by the next `last_frame` call.
    pub fn push_frame(&self, frame: Frame) {
        lock(&self.state).scripted.push_back(Ok(frame));
    }

    /// Queue a driver failure with the given code.
    pub fn push_error(&self, code: i32) {
        lock(&self.state).scripted.push_back(Err(code));
    }

    /// Value last written to a device option.
    pub fn option(&self, serial: u64, option: u32) -> Option<i32> {
        lock(&self.state).options.get(&(serial, option)).copied()
    }

    /// IDs of geometries registered with the simulated device.
    pub fn geometry_ids(&self) -> Vec<u32> {
        lock(&self.state).geometries.keys().copied().collect()
    }

    pub fn set_frame_period(&self, period: Duration) {
        lock(&self.state).frame_period = period;
    }

    /// Make subsequent `set_geometry` calls fail.
    pub fn reject_geometries(&self, reject: bool) {
        lock(&self.state).reject_geometries = reject;
    }

    /// Make subsequent `set_int32` calls fail.
    pub fn reject_options(&self, reject: bool) {
        lock(&self.state).reject_options = reject;
    }

    pub fn frame_allocated(&self) -> Option<FrameOptions> {
        lock(&self.state).frame
    }

    pub fn frames_served(&self) -> u64 {
        lock(&self.state).frames_served
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geometry(id: u32) -> Geometry {
        Geometry {
            id,
            fiducials: vec![[0.0; 3], [10.0, 0.0, 0.0], [0.0, 10.0, 0.0], [5.0, 5.0, 0.0]],
        }
    }

    #[test]
    fn test_frame_requires_allocation() {
        let mut sim = SimulatorBackend::new();
        let err = sim
            .last_frame(DEFAULT_SERIAL, Duration::from_millis(10))
            .unwrap_err();
        match err {
            TrackerError::Sdk { code, report, .. } => {
                assert_eq!(code, ERR_NO_FRAME_ALLOCATED);
                assert!(report.unwrap().has_error(ERR_NO_FRAME_ALLOCATED));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_synthesized_frame_covers_geometries() {
        let mut sim = SimulatorBackend::new();
        sim.set_geometry(DEFAULT_SERIAL, &geometry(2)).unwrap();
        sim.set_geometry(DEFAULT_SERIAL, &geometry(3)).unwrap();
        sim.create_frame(FrameOptions::default()).unwrap();

        let frame = sim
            .last_frame(DEFAULT_SERIAL, Duration::from_millis(100))
            .unwrap();
        assert_eq!(frame.markers_status, QueryStatus::Ok);
        let ids: Vec<u32> = frame.markers.iter().map(|m| m.geometry_id).collect();
        assert_eq!(ids, vec![2, 3]);
        assert_eq!(frame.markers[0].presence_mask, 0b1111);
        assert_eq!(frame.markers[1].translation_mm[2], 1150.0);
    }

    #[test]
    fn test_overflow_truncates() {
        let mut sim = SimulatorBackend::new();
        for id in 1..=3 {
            sim.set_geometry(DEFAULT_SERIAL, &geometry(id)).unwrap();
        }
        sim.create_frame(FrameOptions {
            markers: 2,
            ..FrameOptions::default()
        })
        .unwrap();

        let frame = sim
            .last_frame(DEFAULT_SERIAL, Duration::from_millis(100))
            .unwrap();
        assert_eq!(frame.markers_status, QueryStatus::Overflow);
        assert_eq!(frame.markers.len(), 2);
    }

    #[test]
    fn test_timeout_shorter_than_period() {
        let mut sim = SimulatorBackend::new();
        sim.control().set_frame_period(Duration::from_secs(5));
        sim.create_frame(FrameOptions::default()).unwrap();

        // First frame is immediate, the next one is 5 s away.
        sim.last_frame(DEFAULT_SERIAL, Duration::from_millis(10))
            .unwrap();
        let err = sim
            .last_frame(DEFAULT_SERIAL, Duration::from_millis(10))
            .unwrap_err();
        assert!(matches!(err, TrackerError::Timeout));
    }

    #[test]
    fn test_unknown_serial_rejected() {
        let mut sim = SimulatorBackend::new();
        assert!(sim.set_int32(42, 6000, 1).is_err());
        assert!(sim.set_int32(DEFAULT_SERIAL, 6000, 1).is_ok());
        assert_eq!(sim.control().option(DEFAULT_SERIAL, 6000), Some(1));
    }
}
