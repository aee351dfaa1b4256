pub mod camera;
pub mod config;
pub mod detection;
pub mod error;
pub mod feed;
#[cfg(feature = "gst")]
pub mod gst;
pub mod monitor;
pub mod recorder;

#[cfg(test)]
mod testing;

pub mod prelude {
    pub use crate::camera::{CameraSession, Frame, FrameSource};
    pub use crate::config::{Cli, FrameMode, MonitorConfig};
    pub use crate::detection::{DetectionParams, MotionDetector};
    pub use crate::error::{MonitorError, Result};
    pub use crate::monitor::{open_or_exit, MotionMonitor, Transition};
    pub use crate::recorder::{EpisodeSummary, Recorder, SinkFactory, VideoSink, VideoSpec};
}
