//! Error types for the monitor.
//!
//! Startup failures (`Device`, and `Capture` on the first frame) are fatal.
//! Everything that happens per frame in steady state is logged and absorbed
//! by the loop that hit it.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MonitorError {
    /// The capture device could not be opened.
    #[error("camera {index} could not be opened: {reason}")]
    Device { index: u32, reason: String },

    /// A single frame read failed.
    #[error("frame capture failed: {0}")]
    Capture(String),

    /// The video writer rejected a frame or could not be created/finalized.
    #[error("video write failed: {0}")]
    Write(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, MonitorError>;

#[cfg(feature = "gst")]
impl From<glib::Error> for MonitorError {
    fn from(err: glib::Error) -> Self {
        MonitorError::Write(err.to_string())
    }
}

#[cfg(feature = "gst")]
impl From<glib::BoolError> for MonitorError {
    fn from(err: glib::BoolError) -> Self {
        MonitorError::Write(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_error_names_the_camera() {
        let err = MonitorError::Device {
            index: 3,
            reason: "no such device".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "camera 3 could not be opened: no such device"
        );
    }

    #[test]
    fn io_errors_convert() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope");
        let err: MonitorError = io.into();
        assert!(matches!(err, MonitorError::Io(_)));
    }
}
