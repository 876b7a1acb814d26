use crate::backend::{FrameOptions, TrackerBackend, DEFAULT_FRAME_TIMEOUT};
use crate::device::Device;
use crate::geometry::{Geometry, GeometryLoader, GeometrySource};
use crate::stream::TrackingStream;
use crate::types::{DeviceType, Marker, QueryStatus};
use crate::{Result, TrackerError};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Settings for [`Tracker::init`].
#[derive(Debug, Clone)]
pub struct InitOptions {
    pub allow_simulator: bool,
    pub frame_timeout: Duration,
    pub frame_options: FrameOptions,
    pub geometry_loader: GeometryLoader,
}

impl Default for InitOptions {
    fn default() -> Self {
        InitOptions {
            allow_simulator: true,
            frame_timeout: DEFAULT_FRAME_TIMEOUT,
            frame_options: FrameOptions::default(),
            geometry_loader: GeometryLoader::from_env(),
        }
    }
}

/// What a single poll produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Number of markers applied from the frame.
    Updated(usize),
    NoMarkers,
    /// More markers than the frame holds; the frame was ignored.
    Overflow,
}

/// Owns the driver backend and the latest marker poses.
pub struct Tracker {
    backend: Box<dyn TrackerBackend>,
    device: Device,
    options: InitOptions,
    geometries: BTreeMap<String, Geometry>,
    markers: BTreeMap<u32, Marker>,
    tracking: bool,
    poll_index: u64,
}

impl Tracker {
    /// Retrieve the device and prepare it for tracking.
    ///
    /// A spryTrack 180 is switched to onboard processing with image sending
    /// disabled. Failures there are logged and do not abort initialization.
    pub fn init(mut backend: Box<dyn TrackerBackend>, options: InitOptions) -> Result<Tracker> {
        let device = Device::retrieve_last(backend.as_mut(), options.allow_simulator)?;

        if device.device_type() == DeviceType::SpryTrack180 {
            log::info!("Enable onboard processing");
            let _ = device.set_onboard_processing(backend.as_mut(), true);
            log::info!("Disable images sending");
            let _ = device.set_sending_images(backend.as_mut(), false);
        }

        log::info!(
            "Tracker ready on {} backend (serial 0x{:016x})",
            backend.name(),
            device.serial_number()
        );

        Ok(Tracker {
            backend,
            device,
            options,
            geometries: BTreeMap::new(),
            markers: BTreeMap::new(),
            tracking: false,
            poll_index: 0,
        })
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Load a geometry file and register it under `name`.
    pub fn add_geometry(&mut self, path: impl AsRef<Path>, name: &str) -> Result<GeometrySource> {
        let (geometry, source) = self.options.geometry_loader.load(path.as_ref())?;
        if let GeometrySource::InstallDir(p) = &source {
            log::info!("Loaded '{}' from installation directory: {}", name, p.display());
        }

        self.backend
            .set_geometry(self.device.serial_number(), &geometry)
            .inspect_err(|e| log::error!("Cannot set geometry '{}': {}", name, e))?;

        log::info!("Registered geometry {} as '{}'", geometry.id, name);
        self.markers
            .insert(geometry.id, Marker::new(geometry.id, name));
        self.geometries.insert(name.to_string(), geometry);
        Ok(source)
    }

    /// Geometries registered so far, by name.
    pub fn geometries(&self) -> &BTreeMap<String, Geometry> {
        &self.geometries
    }

    /// Allocate the frame buffer. Polling is possible afterwards.
    pub fn start_tracking(&mut self) -> Result<()> {
        self.backend.create_frame(self.options.frame_options)?;
        self.tracking = true;
        Ok(())
    }

    /// Release the frame buffer.
    pub fn stop_tracking(&mut self) -> Result<()> {
        if !self.tracking {
            return Err(TrackerError::NotTracking);
        }
        self.backend.delete_frame();
        self.tracking = false;
        Ok(())
    }

    pub fn is_tracking(&self) -> bool {
        self.tracking
    }

    /// Query the newest frame and update markers in place.
    pub fn poll(&mut self) -> Result<PollOutcome> {
        if !self.tracking {
            return Err(TrackerError::NotTracking);
        }

        let frame = self
            .backend
            .last_frame(self.device.serial_number(), self.options.frame_timeout)?;
        self.poll_index += 1;

        match frame.markers_status {
            QueryStatus::Ok => {}
            QueryStatus::Overflow => {
                log::warn!("Marker overflow");
                return Ok(PollOutcome::Overflow);
            }
            status => return Err(TrackerError::FrameStatus(status)),
        }

        if frame.markers.is_empty() {
            log::trace!("No markers");
            return Ok(PollOutcome::NoMarkers);
        }

        for raw in &frame.markers {
            self.markers
                .entry(raw.geometry_id)
                .or_insert_with(|| Marker::new(raw.geometry_id, ""))
                .update(raw, self.poll_index);
        }

        Ok(PollOutcome::Updated(frame.markers.len()))
    }

    /// Latest marker poses by geometry ID.
    pub fn markers(&self) -> &BTreeMap<u32, Marker> {
        &self.markers
    }

    /// Number of polls that returned a frame.
    pub fn poll_index(&self) -> u64 {
        self.poll_index
    }

    /// Move the tracker into a background poller thread.
    ///
    /// `interval` is slept between polls.
    pub fn into_stream(mut self, interval: Duration) -> Result<TrackingStream> {
        if !self.tracking {
            self.start_tracking()?;
        }
        TrackingStream::start(self, interval)
    }
}

impl Drop for Tracker {
    fn drop(&mut self) {
        if self.tracking {
            self.backend.delete_frame();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimulatorBackend, SimulatorControl, ERR_GEOMETRY_REJECTED};
    use crate::types::{DeviceInfo, Frame, RawMarker};

    const GEOMETRY: &str = "[geometry]\ncount=3\nid=4\n\
        [fiducial0]\nx=0\ny=0\nz=0\n\
        [fiducial1]\nx=50\ny=0\nz=0\n\
        [fiducial2]\nx=0\ny=50\nz=0\n";

    fn tracker() -> (Tracker, SimulatorControl) {
        let sim = SimulatorBackend::new();
        let control = sim.control();
        let tracker = Tracker::init(Box::new(sim), InitOptions::default()).unwrap();
        (tracker, control)
    }

    fn raw(geometry_id: u32, x: f32) -> RawMarker {
        RawMarker {
            geometry_id,
            presence_mask: 0b111,
            registration_error_mm: 0.2,
            rotation: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
            translation_mm: [x, 0.0, 0.0],
        }
    }

    #[test]
    fn test_poll_requires_tracking() {
        let (mut tracker, _) = tracker();
        assert!(matches!(tracker.poll(), Err(TrackerError::NotTracking)));
        assert!(matches!(tracker.stop_tracking(), Err(TrackerError::NotTracking)));
    }

    #[test]
    fn test_add_geometry_registers_marker() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("geometry004.ini");
        std::fs::write(&path, GEOMETRY).unwrap();

        let (mut tracker, control) = tracker();
        let source = tracker.add_geometry(&path, "Ultrasound").unwrap();
        assert_eq!(source, GeometrySource::Given(path));
        assert_eq!(control.geometry_ids(), vec![4]);

        let marker = &tracker.markers()[&4];
        assert_eq!(marker.name, "Ultrasound");
        assert_eq!(marker.last_seen, None);
        assert_eq!(tracker.geometries()["Ultrasound"].id, 4);
    }

    #[test]
    fn test_add_geometry_rejected_by_device() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("g.ini");
        std::fs::write(&path, GEOMETRY).unwrap();

        let (mut tracker, control) = tracker();
        control.reject_geometries(true);
        match tracker.add_geometry(&path, "Pointer") {
            Err(TrackerError::Sdk { code, .. }) => assert_eq!(code, ERR_GEOMETRY_REJECTED),
            other => panic!("unexpected {:?}", other),
        }
        assert!(tracker.markers().is_empty());
    }

    #[test]
    fn test_poll_updates_and_inserts() {
        let (mut tracker, control) = tracker();
        tracker.start_tracking().unwrap();
        control.push_frame(Frame {
            markers: vec![raw(9, 12.5)],
            markers_status: QueryStatus::Ok,
        });

        assert_eq!(tracker.poll().unwrap(), PollOutcome::Updated(1));
        let marker = &tracker.markers()[&9];
        assert_eq!(marker.name, "");
        assert_eq!(marker.translation_mm(), [12.5, 0.0, 0.0]);
        assert_eq!(marker.last_seen, Some(1));
    }

    #[test]
    fn test_poll_outcomes() {
        let (mut tracker, control) = tracker();
        tracker.start_tracking().unwrap();

        control.push_frame(Frame {
            markers: Vec::new(),
            markers_status: QueryStatus::Ok,
        });
        control.push_frame(Frame {
            markers: vec![raw(1, 1.0)],
            markers_status: QueryStatus::Ok,
        });
        control.push_frame(Frame {
            markers: vec![raw(1, 55.0), raw(8, 3.0)],
            markers_status: QueryStatus::Overflow,
        });
        control.push_frame(Frame {
            markers: vec![raw(1, 2.0)],
            markers_status: QueryStatus::Skipped,
        });
        control.push_error(17);

        assert_eq!(tracker.poll().unwrap(), PollOutcome::NoMarkers);
        assert_eq!(tracker.poll().unwrap(), PollOutcome::Updated(1));
        assert_eq!(tracker.poll().unwrap(), PollOutcome::Overflow);
        assert!(matches!(
            tracker.poll(),
            Err(TrackerError::FrameStatus(QueryStatus::Skipped))
        ));
        assert!(matches!(tracker.poll(), Err(TrackerError::Sdk { code: 17, .. })));

        // Ignored and rejected frames leave the last good pose in place.
        let marker = &tracker.markers()[&1];
        assert_eq!(marker.translation_mm(), [1.0, 0.0, 0.0]);
        assert_eq!(marker.last_seen, Some(2));
        assert!(!tracker.markers().contains_key(&8));
    }

    #[test]
    fn test_sprytrack_gets_onboard_processing() {
        let sim = SimulatorBackend::with_devices(vec![DeviceInfo {
            serial_number: 11,
            device_type: DeviceType::SpryTrack180,
        }]);
        let control = sim.control();
        Tracker::init(Box::new(sim), InitOptions::default()).unwrap();

        assert_eq!(
            control.option(11, crate::backend::ENABLE_ONBOARD_PROCESSING_OPTION),
            Some(1)
        );
        assert_eq!(control.option(11, crate::backend::SENDING_IMAGES_OPTION), Some(0));
    }

    #[test]
    fn test_sprytrack_option_failures_are_not_fatal() {
        let sim = SimulatorBackend::with_devices(vec![DeviceInfo {
            serial_number: 12,
            device_type: DeviceType::SpryTrack180,
        }]);
        let control = sim.control();
        control.reject_options(true);

        let tracker = Tracker::init(Box::new(sim), InitOptions::default()).unwrap();
        assert_eq!(tracker.device().serial_number(), 12);
        assert_eq!(control.option(12, crate::backend::ENABLE_ONBOARD_PROCESSING_OPTION), None);
        assert_eq!(control.option(12, crate::backend::SENDING_IMAGES_OPTION), None);
    }

    #[test]
    fn test_stop_releases_frame() {
        let (mut tracker, control) = tracker();
        tracker.start_tracking().unwrap();
        assert_eq!(control.frame_allocated(), Some(FrameOptions::default()));
        tracker.stop_tracking().unwrap();
        assert_eq!(control.frame_allocated(), None);
        assert!(matches!(tracker.poll(), Err(TrackerError::NotTracking)));
    }
}
