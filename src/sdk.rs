//! Vendor driver backend (`fusionTrack64`).
//!
//! Declarations follow `ftkInterface.h` of the 3.x SDK. Only the calls and
//! structures used by the tracker are bound; everything else in the frame
//! query is left as opaque pointers.

use crate::backend::{FrameOptions, TrackerBackend};
use crate::error::ErrorReport;
use crate::geometry::Geometry;
use crate::types::{DeviceInfo, DeviceType, Frame, QueryStatus, RawMarker, MAX_FIDUCIALS};
use crate::{Result, TrackerError};
use std::ffi::{c_char, c_void};
use std::time::Duration;

mod sys {
    use super::*;

    pub type FtkError = i32;
    pub const FTK_OK: FtkError = 0;

    #[repr(C)]
    pub struct FtkLibraryImp {
        _private: [u8; 0],
    }
    pub type FtkLibrary = *mut FtkLibraryImp;

    pub type DeviceEnumCallback = extern "C" fn(sn: u64, user: *mut c_void, device_type: i32);

    #[repr(C)]
    #[derive(Clone, Copy)]
    pub struct Fiducial3 {
        pub position: [f32; 3],
    }

    #[repr(C)]
    pub struct FtkGeometry {
        pub geometry_id: u32,
        pub version: u32,
        pub points_count: u32,
        pub positions: [Fiducial3; MAX_FIDUCIALS],
    }

    #[repr(C)]
    #[derive(Clone, Copy)]
    pub struct FtkMarker {
        pub id: u32,
        pub geometry_id: u32,
        pub geometry_presence_mask: u32,
        pub fiducial_corresp: [u32; MAX_FIDUCIALS],
        pub rotation: [[f32; 3]; 3],
        pub translation_mm: [f32; 3],
        pub registration_error_mm: f32,
    }

    #[repr(C)]
    #[derive(Clone, Copy)]
    pub struct FtkVersionSize {
        pub version: u32,
        pub reserved_size: u32,
    }

    /// Leading part of `ftkFrameQuery`; the driver owns the allocation.
    #[repr(C)]
    pub struct FtkFrameQuery {
        pub image_header: *mut c_void,
        pub image_header_version_size: FtkVersionSize,
        pub image_header_stat: i32,
        pub image_left_pixels: *mut u8,
        pub image_left_version_size: FtkVersionSize,
        pub image_left_stat: i32,
        pub image_right_pixels: *mut u8,
        pub image_right_version_size: FtkVersionSize,
        pub image_right_stat: i32,
        pub raw_data_left: *mut c_void,
        pub raw_data_left_version_size: FtkVersionSize,
        pub raw_data_left_count: u32,
        pub raw_data_left_stat: i32,
        pub raw_data_right: *mut c_void,
        pub raw_data_right_version_size: FtkVersionSize,
        pub raw_data_right_count: u32,
        pub raw_data_right_stat: i32,
        pub three_d_fiducials: *mut c_void,
        pub three_d_fiducials_version_size: FtkVersionSize,
        pub three_d_fiducials_count: u32,
        pub three_d_fiducials_stat: i32,
        pub markers: *mut FtkMarker,
        pub markers_version_size: FtkVersionSize,
        pub markers_count: u32,
        pub markers_stat: i32,
    }

    #[link(name = "fusionTrack64")]
    extern "C" {
        pub fn ftkInit() -> FtkLibrary;
        pub fn ftkClose(lib: *mut FtkLibrary) -> FtkError;
        pub fn ftkEnumerateDevices(
            lib: FtkLibrary,
            cb: DeviceEnumCallback,
            user: *mut c_void,
        ) -> FtkError;
        pub fn ftkSetInt32(lib: FtkLibrary, sn: u64, option: u32, value: i32) -> FtkError;
        pub fn ftkSetGeometry(lib: FtkLibrary, sn: u64, geometry: *mut FtkGeometry) -> FtkError;
        pub fn ftkCreateFrame() -> *mut FtkFrameQuery;
        pub fn ftkDeleteFrame(frame: *mut FtkFrameQuery) -> FtkError;
        pub fn ftkSetFrameOptions(
            pixels: bool,
            events_size: u32,
            left_raw_data_size: u32,
            right_raw_data_size: u32,
            three_d_fiducials_size: u32,
            markers_size: u32,
            frame: *mut FtkFrameQuery,
        ) -> FtkError;
        pub fn ftkGetLastFrame(
            lib: FtkLibrary,
            sn: u64,
            frame: *mut FtkFrameQuery,
            timeout_ms: u32,
        ) -> FtkError;
        pub fn ftkGetLastErrorString(lib: FtkLibrary, size: usize, message: *mut c_char)
            -> FtkError;
    }
}

extern "C" fn collect_device(sn: u64, user: *mut c_void, device_type: i32) {
    if user.is_null() {
        return;
    }
    // SAFETY: `user` is the `Vec<DeviceInfo>` passed by `enumerate_devices`
    // for the duration of the enumeration call.
    let devices = unsafe { &mut *(user as *mut Vec<DeviceInfo>) };
    devices.push(DeviceInfo {
        serial_number: sn,
        device_type: DeviceType::from_raw(device_type),
    });
}

/// Handle to the vendor library.
pub struct SdkBackend {
    lib: sys::FtkLibrary,
    frame: *mut sys::FtkFrameQuery,
}

// The driver handle may be used from any thread as long as calls are not
// concurrent, which `&mut self` guarantees.
unsafe impl Send for SdkBackend {}

impl SdkBackend {
    /// Initialize the driver.
    pub fn open() -> Result<SdkBackend> {
        // SAFETY: plain constructor call with no arguments.
        let lib = unsafe { sys::ftkInit() };
        if lib.is_null() {
            return Err(TrackerError::LibraryInit);
        }
        log::info!("Atracsys driver initialized");
        Ok(SdkBackend {
            lib,
            frame: std::ptr::null_mut(),
        })
    }

    fn check(&self, call: &'static str, code: sys::FtkError) -> Result<()> {
        match code {
            sys::FTK_OK => Ok(()),
            c if c < 0 => {
                log::warn!("{} returned warning {}", call, c);
                Ok(())
            }
            c => Err(TrackerError::Sdk {
                call,
                code: c,
                report: self.last_error(),
            }),
        }
    }
}

impl Drop for SdkBackend {
    fn drop(&mut self) {
        self.delete_frame();
        // SAFETY: `lib` came from `ftkInit` and is closed exactly once.
        let code = unsafe { sys::ftkClose(&mut self.lib) };
        if code != sys::FTK_OK {
            log::warn!("ftkClose failed with code {}", code);
        }
    }
}

impl TrackerBackend for SdkBackend {
    fn name(&self) -> &'static str {
        "sdk"
    }

    fn enumerate_devices(&mut self) -> Result<Vec<DeviceInfo>> {
        let mut devices: Vec<DeviceInfo> = Vec::new();
        // SAFETY: the callback only runs during this call and `devices`
        // outlives it.
        let code = unsafe {
            sys::ftkEnumerateDevices(
                self.lib,
                collect_device,
                &mut devices as *mut Vec<DeviceInfo> as *mut c_void,
            )
        };
        self.check("ftkEnumerateDevices", code)?;
        Ok(devices)
    }

    fn set_int32(&mut self, serial: u64, option: u32, value: i32) -> Result<()> {
        // SAFETY: valid library handle, value arguments only.
        let code = unsafe { sys::ftkSetInt32(self.lib, serial, option, value) };
        self.check("ftkSetInt32", code)
    }

    fn set_geometry(&mut self, serial: u64, geometry: &Geometry) -> Result<()> {
        let mut raw = sys::FtkGeometry {
            geometry_id: geometry.id,
            version: 0,
            points_count: geometry.fiducials.len().min(MAX_FIDUCIALS) as u32,
            positions: [sys::Fiducial3 { position: [0.0; 3] }; MAX_FIDUCIALS],
        };
        for (slot, position) in raw.positions.iter_mut().zip(&geometry.fiducials) {
            slot.position = *position;
        }
        // SAFETY: `raw` is a fully initialized geometry living across the call.
        let code = unsafe { sys::ftkSetGeometry(self.lib, serial, &mut raw) };
        self.check("ftkSetGeometry", code)
    }

    fn create_frame(&mut self, options: FrameOptions) -> Result<()> {
        self.delete_frame();

        // SAFETY: allocation call, checked for null below.
        let frame = unsafe { sys::ftkCreateFrame() };
        if frame.is_null() {
            return Err(TrackerError::Sdk {
                call: "ftkCreateFrame",
                code: -1,
                report: None,
            });
        }

        // SAFETY: `frame` is a fresh frame from `ftkCreateFrame`.
        let code = unsafe {
            sys::ftkSetFrameOptions(
                options.pixels,
                options.events,
                options.left_raw_data,
                options.right_raw_data,
                options.fiducials_3d,
                options.markers,
                frame,
            )
        };
        if code > sys::FTK_OK {
            // SAFETY: frame was never handed out.
            unsafe { sys::ftkDeleteFrame(frame) };
            return self.check("ftkSetFrameOptions", code);
        }

        self.frame = frame;
        Ok(())
    }

    fn delete_frame(&mut self) {
        if !self.frame.is_null() {
            // SAFETY: `frame` came from `ftkCreateFrame` and is released once.
            unsafe { sys::ftkDeleteFrame(self.frame) };
            self.frame = std::ptr::null_mut();
        }
    }

    fn last_frame(&mut self, serial: u64, timeout: Duration) -> Result<Frame> {
        if self.frame.is_null() {
            return Err(TrackerError::NotTracking);
        }

        let timeout_ms = timeout.as_millis().min(u32::MAX as u128) as u32;
        // SAFETY: `frame` is a live frame owned by this backend.
        let code = unsafe { sys::ftkGetLastFrame(self.lib, serial, self.frame, timeout_ms) };
        if code != sys::FTK_OK {
            return Err(TrackerError::Sdk {
                call: "ftkGetLastFrame",
                code,
                report: self.last_error(),
            });
        }

        // SAFETY: after a successful query the driver has filled `markers`
        // with `markers_count` entries.
        let frame = unsafe { &*self.frame };
        let raw_markers: &[sys::FtkMarker] = if frame.markers.is_null() || frame.markers_count == 0 {
            &[]
        } else {
            unsafe { std::slice::from_raw_parts(frame.markers, frame.markers_count as usize) }
        };

        Ok(Frame {
            markers: raw_markers
                .iter()
                .map(|m| RawMarker {
                    geometry_id: m.geometry_id,
                    presence_mask: m.geometry_presence_mask,
                    registration_error_mm: m.registration_error_mm,
                    rotation: m.rotation,
                    translation_mm: m.translation_mm,
                })
                .collect(),
            markers_status: QueryStatus::from_raw(frame.markers_stat),
        })
    }

    fn last_error(&self) -> Option<ErrorReport> {
        let mut buf = [0 as c_char; 1024];
        // SAFETY: `buf` is writable for its full length.
        let code = unsafe { sys::ftkGetLastErrorString(self.lib, buf.len(), buf.as_mut_ptr()) };
        if code != sys::FTK_OK {
            log::debug!("Uninitialised library handle provided");
            return None;
        }
        let bytes: Vec<u8> = buf
            .iter()
            .take_while(|&&c| c != 0)
            .map(|&c| c as u8)
            .collect();
        ErrorReport::parse(&String::from_utf8_lossy(&bytes))
    }
}
