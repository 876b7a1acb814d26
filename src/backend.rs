use crate::error::ErrorReport;
use crate::geometry::Geometry;
use crate::types::{DeviceInfo, Frame};
use crate::Result;
use std::time::Duration;

// -- Vendor option identifiers --
pub const ENABLE_ONBOARD_PROCESSING_OPTION: u32 = 6000;
pub const SENDING_IMAGES_OPTION: u32 = 6003;

/// How long a frame query blocks when no new frame is available.
pub const DEFAULT_FRAME_TIMEOUT: Duration = Duration::from_millis(100);

/// Capacities of the frame buffer allocated by `create_frame`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameOptions {
    pub pixels: bool,
    pub events: u32,
    pub left_raw_data: u32,
    pub right_raw_data: u32,
    pub fiducials_3d: u32,
    pub markers: u32,
}

impl Default for FrameOptions {
    fn default() -> Self {
        FrameOptions {
            pixels: false,
            events: 0,
            left_raw_data: 16,
            right_raw_data: 16,
            fiducials_3d: 0,
            markers: 16,
        }
    }
}

/// Calls into the tracking driver.
///
/// One implementation links the vendor library, the other simulates a
/// device in-process. Every method maps onto a single driver call.
pub trait TrackerBackend: Send {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// All devices visible to the driver, in discovery order.
    fn enumerate_devices(&mut self) -> Result<Vec<DeviceInfo>>;

    /// Set an integer device option.
    fn set_int32(&mut self, serial: u64, option: u32, value: i32) -> Result<()>;

    /// Register a geometry with the device.
    fn set_geometry(&mut self, serial: u64, geometry: &Geometry) -> Result<()>;

    /// Allocate the frame buffer used by `last_frame`.
    fn create_frame(&mut self, options: FrameOptions) -> Result<()>;

    /// Release the frame buffer. No-op when none is allocated.
    fn delete_frame(&mut self);

    /// Block up to `timeout` for the newest frame.
    fn last_frame(&mut self, serial: u64, timeout: Duration) -> Result<Frame>;

    /// Parsed last-error string of the driver, if it has one.
    fn last_error(&self) -> Option<ErrorReport>;
}
