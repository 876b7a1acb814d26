use std::fmt;

/// Maximum number of fiducials in one geometry.
pub const MAX_FIDUCIALS: usize = 6;

/// Row-major 4x4 homogeneous transform. Translation is in millimeters.
pub type Transform = [[f32; 4]; 4];

pub const IDENTITY: Transform = [
    [1.0, 0.0, 0.0, 0.0],
    [0.0, 1.0, 0.0, 0.0],
    [0.0, 0.0, 1.0, 0.0],
    [0.0, 0.0, 0.0, 1.0],
];

/// Build a homogeneous transform from a 3x3 rotation and a translation.
///
/// Rotation rows are copied as-is, the translation fills column 3 and the
/// bottom row stays `[0, 0, 0, 1]`.
pub fn transform_from_pose(rotation: &[[f32; 3]; 3], translation_mm: &[f32; 3]) -> Transform {
    let mut transform = IDENTITY;
    for (row, rot) in transform.iter_mut().zip(rotation.iter()) {
        row[..3].copy_from_slice(rot);
    }
    for (row, t) in transform.iter_mut().zip(translation_mm.iter()) {
        row[3] = *t;
    }
    transform
}

bitflags::bitflags! {
    /// Fiducials of a geometry that were matched in a frame.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    #[repr(C)]
    pub struct PresenceMask: u32 {
        const FIDUCIAL_0 = 1 << 0;
        const FIDUCIAL_1 = 1 << 1;
        const FIDUCIAL_2 = 1 << 2;
        const FIDUCIAL_3 = 1 << 3;
        const FIDUCIAL_4 = 1 << 4;
        const FIDUCIAL_5 = 1 << 5;
    }
}

/// Atracsys hardware families.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceType {
    Simulator,
    FusionTrack500,
    FusionTrack250,
    SpryTrack180,
    Unknown(i32),
}

impl DeviceType {
    pub fn from_raw(raw: i32) -> DeviceType {
        match raw {
            0 => DeviceType::Simulator,
            2 => DeviceType::FusionTrack500,
            3 => DeviceType::FusionTrack250,
            4 => DeviceType::SpryTrack180,
            other => DeviceType::Unknown(other),
        }
    }

    pub fn raw(self) -> i32 {
        match self {
            DeviceType::Simulator => 0,
            DeviceType::FusionTrack500 => 2,
            DeviceType::FusionTrack250 => 3,
            DeviceType::SpryTrack180 => 4,
            DeviceType::Unknown(raw) => raw,
        }
    }

    /// Short label used in logs.
    pub fn label(self) -> &'static str {
        match self {
            DeviceType::Simulator => "fTk simulator",
            DeviceType::FusionTrack500 => "fTk 500",
            DeviceType::FusionTrack250 => "fTk 250",
            DeviceType::SpryTrack180 => "sTk 180",
            DeviceType::Unknown(_) => "UNKNOWN",
        }
    }
}

/// Device identification as reported by enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceInfo {
    pub serial_number: u64,
    pub device_type: DeviceType,
}

/// Status of one section of a frame query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
    Ok,
    /// Section was not filled in by the driver.
    Skipped,
    /// More items than the frame can hold; the excess was dropped.
    Overflow,
    InvalidReservedSize,
    Other(i32),
}

impl QueryStatus {
    pub fn from_raw(raw: i32) -> QueryStatus {
        match raw {
            0 => QueryStatus::Ok,
            -1 => QueryStatus::Skipped,
            1 => QueryStatus::Overflow,
            2 => QueryStatus::InvalidReservedSize,
            other => QueryStatus::Other(other),
        }
    }
}

impl fmt::Display for QueryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryStatus::Ok => write!(f, "ok"),
            QueryStatus::Skipped => write!(f, "marker fields in the frame are not set"),
            QueryStatus::Overflow => write!(f, "marker overflow"),
            QueryStatus::InvalidReservedSize => write!(f, "invalid marker reserved size"),
            QueryStatus::Other(raw) => write!(f, "status {}", raw),
        }
    }
}

/// One marker as reported in a frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawMarker {
    pub geometry_id: u32,
    pub presence_mask: u32,
    pub registration_error_mm: f32,
    pub rotation: [[f32; 3]; 3],
    pub translation_mm: [f32; 3],
}

/// Result of a frame query.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub markers: Vec<RawMarker>,
    pub markers_status: QueryStatus,
}

/// Latest known pose of a registered geometry.
#[derive(Debug, Clone, PartialEq)]
pub struct Marker {
    pub geometry_id: u32,
    pub name: String,
    pub presence_mask: PresenceMask,
    pub registration_error_mm: f32,
    pub transform: Transform,
    /// Poll index in which the marker was last reported.
    pub last_seen: Option<u64>,
}

impl Marker {
    pub fn new(geometry_id: u32, name: impl Into<String>) -> Marker {
        Marker {
            geometry_id,
            name: name.into(),
            presence_mask: PresenceMask::empty(),
            registration_error_mm: 0.0,
            transform: IDENTITY,
            last_seen: None,
        }
    }

    /// Overwrite the pose in place from a frame marker.
    pub fn update(&mut self, raw: &RawMarker, poll_index: u64) {
        self.presence_mask = PresenceMask::from_bits_truncate(raw.presence_mask);
        self.registration_error_mm = raw.registration_error_mm;
        self.transform = transform_from_pose(&raw.rotation, &raw.translation_mm);
        self.last_seen = Some(poll_index);
    }

    pub fn translation_mm(&self) -> [f32; 3] {
        [self.transform[0][3], self.transform[1][3], self.transform[2][3]]
    }
}
