//! C FFI layer over the tracker.
//!
//! Provides an opaque handle-based API for C/C++ consumers.
//! The generated C header is written to `include/atracsys_igtl.h` by cbindgen.

use crate::error::LastError;
use crate::protocol::fit_name;
use crate::sim::SimulatorBackend;
use crate::tracker::{InitOptions, PollOutcome, Tracker};
use crate::{TrackerBackend, TrackerError};
use std::ffi::{c_char, c_int, CStr};

/// Last error message for C consumers.
static LAST_ERROR: LastError = LastError::new();

/// Opaque tracker handle for C consumers.
pub struct AtwTracker(Tracker);

/// Marker pose in C-compatible layout.
#[repr(C)]
pub struct AtwMarker {
    pub geometry_id: u32,
    /// Null-terminated geometry name.
    pub name: [c_char; 32],
    /// One bit per matched fiducial.
    pub presence_mask: u32,
    pub registration_error_mm: f32,
    /// Homogeneous transform, flat row-major (16 elements), millimeters.
    pub transform: [f32; 16],
    /// Whether the marker was reported by any poll yet.
    pub seen: bool,
    /// Poll index of the last report (0 when never seen).
    pub last_seen: u64,
}

/// Null-terminated copy of `s`, truncated at a character boundary.
fn str_to_fixed<const N: usize>(s: &str) -> [c_char; N] {
    let mut buf = [0 as c_char; N];
    for (slot, &b) in buf.iter_mut().zip(fit_name(s, N - 1).as_bytes()) {
        *slot = b as c_char;
    }
    buf
}

fn into_handle(result: crate::Result<Tracker>) -> *mut AtwTracker {
    match result {
        Ok(tracker) => {
            LAST_ERROR.clear();
            Box::into_raw(Box::new(AtwTracker(tracker)))
        }
        Err(e) => {
            LAST_ERROR.set(&e);
            std::ptr::null_mut()
        }
    }
}

fn status(result: crate::Result<()>) -> c_int {
    match result {
        Ok(()) => 0,
        Err(e) => {
            LAST_ERROR.set(&e);
            -1
        }
    }
}

fn init(backend: Box<dyn TrackerBackend>) -> *mut AtwTracker {
    into_handle(Tracker::init(backend, InitOptions::default()))
}

/// Open a tracker on the in-process simulator.
/// Returns NULL on error (check atw_last_error()).
#[no_mangle]
pub extern "C" fn atw_init_simulator() -> *mut AtwTracker {
    init(Box::new(SimulatorBackend::new()))
}

/// Open a tracker on the vendor driver.
/// Returns NULL on error (check atw_last_error()).
#[cfg(feature = "sdk")]
#[no_mangle]
pub extern "C" fn atw_init_sdk() -> *mut AtwTracker {
    match crate::sdk::SdkBackend::open() {
        Ok(backend) => init(Box::new(backend)),
        Err(e) => {
            LAST_ERROR.set(&e);
            std::ptr::null_mut()
        }
    }
}

/// Close a tracker and free its resources.
///
/// # Safety
/// `tracker` must be a pointer returned by an `atw_init_*` function, or null.
#[no_mangle]
pub unsafe extern "C" fn atw_free(tracker: *mut AtwTracker) {
    if !tracker.is_null() {
        drop(Box::from_raw(tracker));
    }
}

/// Load a geometry file and register it under `name`.
/// Returns 0 on success, -1 on error.
///
/// # Safety
/// `tracker` must be a valid tracker pointer; `path` and `name` must be
/// null-terminated strings. Any of them may be null.
#[no_mangle]
pub unsafe extern "C" fn atw_add_geometry(
    tracker: *mut AtwTracker,
    path: *const c_char,
    name: *const c_char,
) -> c_int {
    if tracker.is_null() || path.is_null() || name.is_null() {
        return -1;
    }
    let tracker = &mut *tracker;
    let path = CStr::from_ptr(path).to_string_lossy().into_owned();
    let name = CStr::from_ptr(name).to_string_lossy().into_owned();
    status(tracker.0.add_geometry(path, &name).map(|_| ()))
}

/// Allocate the frame buffer. Returns 0 on success, -1 on error.
///
/// # Safety
/// `tracker` must be a valid tracker pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn atw_start_tracking(tracker: *mut AtwTracker) -> c_int {
    if tracker.is_null() {
        return -1;
    }
    let tracker = &mut *tracker;
    status(tracker.0.start_tracking())
}

/// Release the frame buffer. Returns 0 on success, -1 on error.
///
/// # Safety
/// `tracker` must be a valid tracker pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn atw_stop_tracking(tracker: *mut AtwTracker) -> c_int {
    if tracker.is_null() {
        return -1;
    }
    let tracker = &mut *tracker;
    status(tracker.0.stop_tracking())
}

/// Poll one frame. Returns the number of markers updated (0 when the frame
/// held none or overflowed), or -1 on error/timeout.
///
/// # Safety
/// `tracker` must be a valid tracker pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn atw_poll(tracker: *mut AtwTracker) -> c_int {
    if tracker.is_null() {
        return -1;
    }
    let tracker = &mut *tracker;
    match tracker.0.poll() {
        Ok(PollOutcome::Updated(n)) => n as c_int,
        Ok(PollOutcome::NoMarkers) | Ok(PollOutcome::Overflow) => 0,
        Err(e) => {
            LAST_ERROR.set(&e);
            -1
        }
    }
}

/// Number of known markers.
///
/// # Safety
/// `tracker` must be a valid tracker pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn atw_marker_count(tracker: *const AtwTracker) -> c_int {
    if tracker.is_null() {
        return 0;
    }
    let tracker = &*tracker;
    tracker.0.markers().len() as c_int
}

/// Copy the marker at `index` (ordered by geometry ID) into `out`.
/// Returns 0 on success, -1 if the index is out of range.
///
/// # Safety
/// `tracker` and `out` must be valid pointers, or null.
#[no_mangle]
pub unsafe extern "C" fn atw_marker_at(
    tracker: *const AtwTracker,
    index: c_int,
    out: *mut AtwMarker,
) -> c_int {
    if tracker.is_null() || out.is_null() || index < 0 {
        return -1;
    }
    let tracker = &*tracker;
    let marker = match tracker.0.markers().values().nth(index as usize) {
        Some(m) => m,
        None => {
            LAST_ERROR.set(&TrackerError::MarkerIndex(index));
            return -1;
        }
    };

    let mut transform = [0f32; 16];
    for (i, row) in marker.transform.iter().enumerate() {
        transform[i * 4..i * 4 + 4].copy_from_slice(row);
    }

    out.write(AtwMarker {
        geometry_id: marker.geometry_id,
        name: str_to_fixed(&marker.name),
        presence_mask: marker.presence_mask.bits(),
        registration_error_mm: marker.registration_error_mm,
        transform,
        seen: marker.last_seen.is_some(),
        last_seen: marker.last_seen.unwrap_or(0),
    });
    0
}

/// Get the last error message. Returns NULL if no error.
/// The returned pointer is valid until the next failing call.
#[no_mangle]
pub extern "C" fn atw_last_error() -> *const c_char {
    LAST_ERROR.as_ptr()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;
    use std::mem::MaybeUninit;

    #[test]
    fn test_simulator_round() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("geometry005.ini");
        std::fs::write(
            &path,
            "[geometry]\ncount=3\nid=5\n[fiducial0]\nx=0\ny=0\nz=0\n\
             [fiducial1]\nx=1\ny=0\nz=0\n[fiducial2]\nx=0\ny=1\nz=0\n",
        )
        .unwrap();
        let c_path = CString::new(path.to_string_lossy().as_bytes()).unwrap();
        let c_name = CString::new("Needle").unwrap();

        unsafe {
            let tracker = atw_init_simulator();
            assert!(!tracker.is_null());
            assert_eq!(atw_poll(tracker), -1);
            assert!(!atw_last_error().is_null());

            assert_eq!(atw_add_geometry(tracker, c_path.as_ptr(), c_name.as_ptr()), 0);
            assert_eq!(atw_start_tracking(tracker), 0);
            assert_eq!(atw_poll(tracker), 1);
            assert_eq!(atw_marker_count(tracker), 1);

            let mut marker = MaybeUninit::<AtwMarker>::uninit();
            assert_eq!(atw_marker_at(tracker, 0, marker.as_mut_ptr()), 0);
            let marker = marker.assume_init();
            assert_eq!(marker.geometry_id, 5);
            assert_eq!(CStr::from_ptr(marker.name.as_ptr()).to_str().unwrap(), "Needle");
            assert!(marker.seen);
            assert_eq!(marker.presence_mask, 0b111);
            assert_eq!(&marker.transform[12..], &[0.0, 0.0, 0.0, 1.0]);

            let mut unused = MaybeUninit::<AtwMarker>::uninit();
            assert_eq!(atw_marker_at(tracker, 1, unused.as_mut_ptr()), -1);

            assert_eq!(atw_stop_tracking(tracker), 0);
            atw_free(tracker);
        }
    }

    #[test]
    fn test_marker_name_truncated_whole() {
        let name: [c_char; 8] = str_to_fixed("abcdefé");
        let name = unsafe { CStr::from_ptr(name.as_ptr()) };
        assert_eq!(name.to_str().unwrap(), "abcdef");

        let name: [c_char; 8] = str_to_fixed("Needle");
        let name = unsafe { CStr::from_ptr(name.as_ptr()) };
        assert_eq!(name.to_str().unwrap(), "Needle");
    }

    #[test]
    fn test_null_handles() {
        unsafe {
            assert_eq!(atw_poll(std::ptr::null_mut()), -1);
            assert_eq!(atw_marker_count(std::ptr::null()), 0);
            atw_free(std::ptr::null_mut());
        }
    }
}
