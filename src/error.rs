use std::fmt;
use std::path::PathBuf;

/// Errors that can occur when driving the tracker or serving clients.
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("Cannot initialize tracking library")]
    LibraryInit,

    #[error("SDK call {call} failed with code {code}{}", report_suffix(.report))]
    Sdk {
        call: &'static str,
        code: i32,
        report: Option<ErrorReport>,
    },

    #[error("No device connected")]
    NoDevice,

    #[error("Unknown device type {0}")]
    UnknownDevice(i32),

    #[error("Cannot load geometry file '{path}': {reason}")]
    Geometry { path: PathBuf, reason: String },

    #[error("Invalid frame: {0}")]
    FrameStatus(crate::types::QueryStatus),

    #[error("Tracking not started")]
    NotTracking,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("OpenIGTLink error: {0}")]
    Igtl(#[from] openigtlink_rust::IgtlError),

    #[error("Marker index {0} out of range")]
    MarkerIndex(i32),

    #[error("Tracking stream stopped")]
    StreamStopped,

    #[error("Timeout waiting for data")]
    Timeout,
}

fn report_suffix(report: &Option<ErrorReport>) -> String {
    match report {
        Some(r) if !r.errors.is_empty() => format!(": {}", r.errors),
        _ => String::new(),
    }
}

/// Parsed form of the vendor's last-error string.
///
/// The driver reports failures as
/// `<ftkError><errors>..</errors><warnings>..</warnings><messages>..</messages></ftkError>`,
/// with `<tag />` standing in for an empty section. Codes appear in the
/// sections as `<code>:` prefixes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorReport {
    pub errors: String,
    pub warnings: String,
    pub messages: String,
}

impl ErrorReport {
    /// Parse the raw error string. Returns `None` when the root element or a
    /// section cannot be found.
    pub fn parse(raw: &str) -> Option<ErrorReport> {
        if !raw.contains("<ftkError>") || !raw.contains("</ftkError>") {
            log::debug!("Cannot find root element <ftkError>");
            return None;
        }

        Some(ErrorReport {
            errors: extract_section(raw, "errors")?,
            warnings: extract_section(raw, "warnings")?,
            messages: extract_section(raw, "messages")?,
        })
    }

    /// Whether the given error code was flagged. Only positive codes are errors.
    pub fn has_error(&self, code: i32) -> bool {
        code > 0 && self.errors.contains(&format!("{}:", code))
    }

    /// Whether the given warning code was flagged. Only negative codes are warnings.
    pub fn has_warning(&self, code: i32) -> bool {
        code < 0 && self.warnings.contains(&format!("{}:", code))
    }

    /// No errors and no warnings flagged.
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty() && self.warnings.is_empty()
    }
}

impl fmt::Display for ErrorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "errors=[{}] warnings=[{}] messages=[{}]",
            self.errors, self.warnings, self.messages
        )
    }
}

fn extract_section(raw: &str, tag: &str) -> Option<String> {
    if raw.contains(&format!("<{} />", tag)) {
        return Some(String::new());
    }

    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let begin = raw.find(&open)? + open.len();
    let end = raw.find(&close)?;
    if end < begin {
        log::debug!("Cannot interpret <{}>", tag);
        return None;
    }

    Some(raw[begin..end].replacen("No errors", "", 1).trim().to_string())
}

/// Thread-safe last-error storage for the C FFI layer.
pub(crate) struct LastError {
    message: std::sync::Mutex<String>,
}

impl LastError {
    pub const fn new() -> Self {
        Self {
            message: std::sync::Mutex::new(String::new()),
        }
    }

    pub fn set(&self, err: &TrackerError) {
        if let Ok(mut msg) = self.message.lock() {
            *msg = fmt::format(format_args!("{}\0", err));
        }
    }

    pub fn clear(&self) {
        if let Ok(mut msg) = self.message.lock() {
            msg.clear();
        }
    }

    pub fn as_ptr(&self) -> *const std::ffi::c_char {
        match self.message.lock() {
            Ok(msg) if !msg.is_empty() => msg.as_ptr() as *const std::ffi::c_char,
            _ => std::ptr::null(),
        }
    }
}
